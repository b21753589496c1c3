//! Upstream chat-messaging API client (spec.md §4.2).
//!
//! Retry/backoff/jitter is grounded on `telegram/retry_handler.rs`'s
//! `RetryConfig`/`RetryHandler::calculate_delay`; the structured,
//! classified error shape is grounded on `mcp/errors.rs`'s `McpError`.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Which client call failed; embedded in `TransportError` and propagated
/// into `ErrorDetail.context.operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FetchUpdates,
    SendMessage,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FetchUpdates => "fetch_updates",
            Operation::SendMessage => "send_message",
        }
    }
}

/// Structured transport error (spec.md §4.2).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation:?} failed: {kind:?} ({message})")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status_code: Option<u16>,
    pub error_code: Option<i64>,
    pub retryable: bool,
    pub operation: Operation,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    NetworkError,
    HttpError,
    ApiError,
    InvalidResponse,
}

impl TransportError {
    fn new(
        kind: TransportErrorKind,
        operation: Operation,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status_code: None,
            error_code: None,
            retryable,
            operation,
            message: message.into(),
        }
    }
}

/// Retry configuration with exponential backoff, mirroring
/// `telegram::retry_handler::RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
    pub backoff_factor: f64,
    pub enable_jitter: bool,
    pub jitter_range: f64,
    /// Hard ceiling on how long a `retry_after` rate-limit suggestion is
    /// allowed to sleep (spec.md §4.2).
    pub rate_limit_wait_ceiling_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_secs: 10,
            backoff_factor: 2.0,
            enable_jitter: true,
            jitter_range: 0.1,
            rate_limit_wait_ceiling_secs: 30,
        }
    }
}

impl RetryConfig {
    fn calculate_delay(&self, attempt: usize, suggested: Option<Duration>) -> Duration {
        if let Some(suggested) = suggested {
            let capped = suggested.min(Duration::from_secs(self.rate_limit_wait_ceiling_secs));
            return self.add_jitter(capped);
        }
        let base_delay_ms = self.initial_delay_ms as f64;
        let exponential = base_delay_ms * self.backoff_factor.powi(attempt as i32);
        let capped = Duration::from_millis(exponential as u64)
            .min(Duration::from_secs(self.max_delay_secs));
        self.add_jitter(capped)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if !self.enable_jitter {
            return delay;
        }
        let mut rng = rand::thread_rng();
        let factor = rng.gen_range(-self.jitter_range..self.jitter_range);
        let delay_ms = delay.as_millis() as f64 * (1.0 + factor);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// The upstream chat-messaging API port (spec.md §4.2). Bit-compatible with
/// the well-known Telegram Bot API envelope.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get_updates(
        &self,
        offset: i64,
        timeout_s: u64,
        limit: u32,
    ) -> Result<Vec<Value>, TransportError>;

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<(), TransportError>;
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ApiParameters>,
}

#[derive(Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

/// Reqwest-backed implementation talking to the upstream HTTPS JSON API.
pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpApiClient {
    pub fn new(token: String, retry: RetryConfig) -> Self {
        Self::with_base_url(format!("https://api.telegram.org/bot{token}"), retry)
    }

    pub fn with_base_url(base_url: String, retry: RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            retry,
        }
    }

    async fn call(
        &self,
        method: &str,
        body: Value,
        operation: Operation,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/{}", self.base_url, method);
        let mut last_err = None;

        for attempt in 0..self.retry.max_attempts {
            let response = self.http.post(&url).json(&body).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let parsed = resp.json::<ApiEnvelope<Value>>().await;

                    match parsed {
                        Ok(envelope) if envelope.ok => {
                            return Ok(envelope.result.unwrap_or(Value::Null));
                        }
                        Ok(envelope) => {
                            let retry_after = envelope
                                .parameters
                                .and_then(|p| p.retry_after)
                                .map(Duration::from_secs);
                            let retryable = status.is_server_error() || retry_after.is_some();
                            let err = TransportError {
                                kind: TransportErrorKind::ApiError,
                                status_code: Some(status.as_u16()),
                                error_code: envelope.error_code,
                                retryable,
                                operation,
                                message: envelope
                                    .description
                                    .unwrap_or_else(|| "upstream reported ok:false".to_string()),
                            };
                            if !retryable || attempt + 1 == self.retry.max_attempts {
                                return Err(err);
                            }
                            let delay = self.retry.calculate_delay(attempt, retry_after);
                            warn!(attempt, ?delay, code = ?err.kind, "retrying transport call");
                            last_err = Some(err);
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            let retryable = status.is_server_error();
                            let err = TransportError {
                                kind: if status.is_server_error() {
                                    TransportErrorKind::HttpError
                                } else {
                                    TransportErrorKind::InvalidResponse
                                },
                                status_code: Some(status.as_u16()),
                                error_code: None,
                                retryable,
                                operation,
                                message: format!("failed to parse response: {e}"),
                            };
                            if !retryable || attempt + 1 == self.retry.max_attempts {
                                return Err(err);
                            }
                            let delay = self.retry.calculate_delay(attempt, None);
                            last_err = Some(err);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Err(e) => {
                    let kind = if e.is_timeout() {
                        TransportErrorKind::Timeout
                    } else {
                        TransportErrorKind::NetworkError
                    };
                    let err = TransportError::new(kind, operation, true, e.to_string());
                    if attempt + 1 == self.retry.max_attempts {
                        return Err(err);
                    }
                    let delay = self.retry.calculate_delay(attempt, None);
                    debug!(attempt, ?delay, "network error, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            TransportError::new(
                TransportErrorKind::NetworkError,
                operation,
                true,
                "retry budget exhausted with no recorded error",
            )
        }))
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    #[instrument(skip(self))]
    async fn get_updates(
        &self,
        offset: i64,
        timeout_s: u64,
        limit: u32,
    ) -> Result<Vec<Value>, TransportError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_s,
            "limit": limit,
        });
        let result = self.call("getUpdates", body, Operation::FetchUpdates).await?;
        match result {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(TransportError::new(
                TransportErrorKind::InvalidResponse,
                Operation::FetchUpdates,
                false,
                format!("expected array result, got {other}"),
            )),
        }
    }

    #[instrument(skip(self, text))]
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = Value::String(reply_to.to_string());
        }
        self.call("sendMessage", body, Operation::SendMessage).await?;
        Ok(())
    }
}
