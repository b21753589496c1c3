//! Core data model shared by the transport, service and runtime layers.
//!
//! Grounded on `mcp/errors.rs` (structured error code/category/severity shape)
//! and `mcp/telemetry.rs` (telemetry contract/version envelope) from the
//! teacher, adapted to the wire shapes spec.md §3/§6 require.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One parsed, text-bearing inbound update. Produced only by the pure parser
/// (spec.md §4.1); every other update shape yields a `SkipReason` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub update_id: String,
    pub chat_id: String,
    pub user_id: Option<String>,
    pub text: String,
    pub received_ts_ms: i64,
}

impl InboundMessage {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::for_chat(&self.chat_id)
    }
}

/// Reasons the parser declines to produce an `InboundMessage`. Stable,
/// lower-kebab-case names matching spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    MissingMessage,
    UnsupportedUpdateType,
    MissingChat,
    MissingUser,
    EmptyText,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingMessage => "missing-message",
            SkipReason::UnsupportedUpdateType => "unsupported-update-type",
            SkipReason::MissingChat => "missing-chat",
            SkipReason::MissingUser => "missing-user",
            SkipReason::EmptyText => "empty-text",
        }
    }
}

/// A reply produced by an orchestrator, destined for `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to_update_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to_update_id: None,
        }
    }

    pub fn replying_to(mut self, update_id: impl Into<String>) -> Self {
        self.reply_to_update_id = Some(update_id.into());
        self
    }
}

/// Deterministic per-chat ordering key: `"telegram:<chat_id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn for_chat(chat_id: &str) -> Self {
        SessionKey(format!("telegram:{chat_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric-aware equality used for chat_id comparisons and allowlist
/// matching (spec.md §3 "Normalization rules"): numeric when both sides
/// parse as integers, exact string match otherwise.
pub fn chat_ids_equal(a: &str, b: &str) -> bool {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

pub fn chat_id_in_allowlist(chat_id: &str, allowlist: &[String]) -> bool {
    allowlist.iter().any(|entry| chat_ids_equal(entry, chat_id))
}

/// Layers a diagnostic context can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layer {
    Service,
    Orchestrator,
    Adapter,
    Gate,
    RuntimeWrapper,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Service => "service",
            Layer::Orchestrator => "orchestrator",
            Layer::Adapter => "adapter",
            Layer::Gate => "gate",
            Layer::RuntimeWrapper => "runtime-wrapper",
        }
    }
}

/// Where a structured diagnostic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticSource {
    ProcessOnce,
    OrchestratorDiagnostics,
    AdapterDiagnostics,
    RuntimeWrapper,
}

impl DiagnosticSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticSource::ProcessOnce => "process_once",
            DiagnosticSource::OrchestratorDiagnostics => "orchestrator.diagnostics",
            DiagnosticSource::AdapterDiagnostics => "adapter.diagnostics",
            DiagnosticSource::RuntimeWrapper => "runtime-wrapper",
        }
    }
}

/// Error vs. drop — kept as distinct variants per spec.md §9 ("Drops vs.
/// errors must remain distinct variants, not two flavors of a single error
/// type"), because their operator semantics diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Error,
    Drop,
}

/// Context attached to a structured diagnostic (spec.md §3 `ErrorDetail`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub layer: String,
    pub operation: String,
}

impl DiagContext {
    pub fn new(layer: Layer, operation: impl Into<String>) -> Self {
        Self {
            update_id: None,
            chat_id: None,
            session_id: None,
            layer: layer.as_str().to_string(),
            operation: operation.into(),
        }
    }

    pub fn with_update_id(mut self, update_id: impl Into<String>) -> Self {
        self.update_id = Some(update_id.into());
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Stable key used by `diagnostic_id`: every field, in a fixed order,
    /// so equal contexts always hash identically regardless of the order
    /// builder methods were called in.
    fn stable_repr(&self) -> String {
        let mut parts = BTreeMap::new();
        parts.insert("update_id", self.update_id.clone().unwrap_or_default());
        parts.insert("chat_id", self.chat_id.clone().unwrap_or_default());
        parts.insert("session_id", self.session_id.clone().unwrap_or_default());
        parts.insert("layer", self.layer.clone());
        parts.insert("operation", self.operation.clone());
        parts
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// One structured error/drop record (spec.md §3 `ErrorDetail`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub source: String,
    pub category: Category,
    pub diagnostic_id: String,
    pub context: DiagContext,
}

impl ErrorDetail {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        source: DiagnosticSource,
        category: Category,
        context: DiagContext,
    ) -> Self {
        let code = code.into();
        let message = message.into();
        let diagnostic_id = diagnostic_id(&code, &context, &message);
        Self {
            code,
            message,
            retryable,
            source: source.as_str().to_string(),
            category,
            diagnostic_id,
            context,
        }
    }
}

/// Stable short hash of `(code, context, normalized message)`, used for
/// receiver-side de-duplication (spec.md §7/P10). Byte-identical across
/// runs for identical inputs; within a cycle, duplicates collapse to one
/// entry (see `runtime::dedup_error_details`).
pub fn diagnostic_id(code: &str, context: &DiagContext, message: &str) -> String {
    let normalized_message = message.trim().to_lowercase();
    let key = format!("{code}\u{1f}{}\u{1f}{normalized_message}", context.stable_repr());
    let digest = Sha256::digest(key.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], hex_chars: usize) -> String {
    let mut out = String::with_capacity(hex_chars);
    for byte in bytes {
        if out.len() >= hex_chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(hex_chars);
    out
}

/// A dropped update, reported alongside the cycle result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedUpdate {
    pub update_id: String,
    pub chat_id: String,
    pub reason: String,
}

/// Overall cycle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Failed => "failed",
        }
    }
}

/// Enumerated cycle reasons (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    NoUpdates,
    Processed,
    CompletedWithErrors,
    AdapterFetchException,
    RuntimeProcessOnceException,
    RuntimeLoopCycleException,
    InvalidConfig,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::NoUpdates => "no-updates",
            Reason::Processed => "processed",
            Reason::CompletedWithErrors => "completed-with-errors",
            Reason::AdapterFetchException => "adapter-fetch-exception",
            Reason::RuntimeProcessOnceException => "runtime-process-once-exception",
            Reason::RuntimeLoopCycleException => "runtime-loop-cycle-exception",
            Reason::InvalidConfig => "invalid-config",
        }
    }
}

/// Heartbeat emit outcome, embedded in the telemetry block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmitState {
    Disabled,
    Emitted,
    EmitFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counters {
    pub fetch_total: u64,
    pub send_total: u64,
    pub drop_total: u64,
    pub heartbeat_emit_failures: u64,
    pub retry_total: Option<u64>,
    pub queue_depth: Option<u64>,
    pub worker_restart_total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersMs {
    pub cycle_total: u64,
    pub fetch: Option<u64>,
    pub send: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub emit_state: EmitState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholders {
    pub retry_total: String,
    pub queue_depth: String,
    pub worker_restart_total: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            retry_total: "not tracked by this runtime build".to_string(),
            queue_depth: "not tracked by this runtime build".to_string(),
            worker_restart_total: "not tracked by this runtime build".to_string(),
        }
    }
}

/// Additive telemetry block (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub contract: String,
    pub version: String,
    pub counters: Counters,
    pub timers_ms: TimersMs,
    pub heartbeat: Heartbeat,
    pub placeholders: Placeholders,
}

impl Telemetry {
    pub fn new(counters: Counters, timers_ms: TimersMs, heartbeat: Heartbeat) -> Self {
        Self {
            contract: "tg-live.runtime.telemetry".to_string(),
            version: "2.0".to_string(),
            counters,
            timers_ms,
            heartbeat,
            placeholders: Placeholders::default(),
        }
    }
}

/// Canonical per-cycle result (spec.md §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub status: Status,
    pub reason: Reason,
    pub fetched: u64,
    pub sent: u64,
    pub acked: u64,
    pub ack_skipped: u64,
    pub error: u64,
    pub dropped: u64,
    pub heartbeat_emit_failures: u64,
    pub errors: Vec<String>,
    pub error_details: Vec<ErrorDetail>,
    pub dropped_updates: Vec<DroppedUpdate>,
    pub telemetry: Telemetry,
}

/// Ack policy (spec.md §4.5/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckPolicy {
    Always,
    OnSuccess,
}

impl AckPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(AckPolicy::Always),
            "on-success" => Some(AckPolicy::OnSuccess),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_numeric_equivalence() {
        assert!(chat_ids_equal("42", "0042"));
        assert!(chat_ids_equal("-200", "-200"));
        assert!(!chat_ids_equal("42", "43"));
        assert!(!chat_ids_equal("abc", "abc0"));
        assert!(chat_ids_equal("abc", "abc"));
    }

    #[test]
    fn allowlist_uses_numeric_equivalence() {
        let allowlist = vec!["0042".to_string(), "777".to_string()];
        assert!(chat_id_in_allowlist("42", &allowlist));
        assert!(!chat_id_in_allowlist("43", &allowlist));
    }

    #[test]
    fn session_key_format() {
        assert_eq!(SessionKey::for_chat("42").as_str(), "telegram:42");
    }

    #[test]
    fn diagnostic_id_stable_and_order_independent() {
        let ctx_a = DiagContext::new(Layer::Adapter, "fetch_updates")
            .with_update_id("1")
            .with_chat_id("42");
        let ctx_b = DiagContext {
            chat_id: Some("42".to_string()),
            update_id: Some("1".to_string()),
            session_id: None,
            layer: Layer::Adapter.as_str().to_string(),
            operation: "fetch_updates".to_string(),
        };
        let id_a = diagnostic_id("adapter-fetch-exception", &ctx_a, "boom");
        let id_b = diagnostic_id("adapter-fetch-exception", &ctx_b, "  Boom  ");
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn diagnostic_id_changes_with_code() {
        let ctx = DiagContext::new(Layer::Adapter, "fetch_updates");
        let id_a = diagnostic_id("adapter-fetch-exception", &ctx, "boom");
        let id_b = diagnostic_id("ack-update-failed", &ctx, "boom");
        assert_ne!(id_a, id_b);
    }
}
