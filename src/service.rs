//! Single-cycle service (spec.md §4.5): the minimal orchestration kernel.
//! Fetches, dispatches through the orchestrator, sends, and acks — all in
//! fetch order, no parallelism across messages.
//!
//! Accounting style (counts accumulated into a result struct as the loop
//! runs) mirrors `internal_processor.rs`'s `ProcessingResult`/
//! `ProcessingStats`.

use crate::model::{
    AckPolicy, Category, DiagContext, DiagnosticSource, DroppedUpdate, ErrorDetail, Layer, Reason,
    Status,
};
use crate::orchestrator::Orchestrator;
use crate::transport::{AdapterError, AdapterPort};
use tracing::{error, warn};

/// Accumulated counts and diagnostics from one `process_once` call, before
/// telemetry and the event emitter are layered on by the runtime loop.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub status: Status,
    pub reason: Reason,
    pub fetched: u64,
    pub sent: u64,
    pub acked: u64,
    pub ack_skipped: u64,
    pub error: u64,
    pub dropped: u64,
    pub error_details: Vec<ErrorDetail>,
    pub dropped_updates: Vec<DroppedUpdate>,
}

impl CycleOutcome {
    fn empty(status: Status, reason: Reason) -> Self {
        Self {
            status,
            reason,
            fetched: 0,
            sent: 0,
            acked: 0,
            ack_skipped: 0,
            error: 0,
            dropped: 0,
            error_details: Vec::new(),
            dropped_updates: Vec::new(),
        }
    }
}

/// Runs one fetch → dispatch → send → ack cycle.
pub async fn process_once(
    adapter: &dyn AdapterPort,
    orchestrator: &dyn Orchestrator,
    ack_policy: AckPolicy,
) -> CycleOutcome {
    let messages = match adapter.fetch_updates().await {
        Ok(messages) => messages,
        Err(AdapterError { operation, source }) => {
            let context = DiagContext::new(Layer::Service, operation.as_str());
            let detail = ErrorDetail::new(
                "adapter-fetch-exception",
                source.message.clone(),
                true,
                DiagnosticSource::ProcessOnce,
                Category::Error,
                context,
            );
            error!(error = %source, "adapter fetch failed, aborting cycle");
            let mut outcome = CycleOutcome::empty(Status::Failed, Reason::AdapterFetchException);
            outcome.error_details.push(detail);
            return outcome;
        }
    };

    if messages.is_empty() {
        let mut outcome = CycleOutcome::empty(Status::Ok, Reason::NoUpdates);
        drain_adapter_diagnostics(adapter, &mut outcome);
        return outcome;
    }

    let mut outcome = CycleOutcome::empty(Status::Ok, Reason::Processed);
    outcome.fetched = messages.len() as u64;

    for message in &messages {
        let result = run_one_message(adapter, orchestrator, ack_policy, message).await;
        match result {
            Ok(per_message) => apply(&mut outcome, per_message),
            Err(unexpected) => {
                error!(error = %unexpected, update_id = %message.update_id, "unexpected failure in message loop");
                let context = DiagContext::new(Layer::Service, "handle_message")
                    .with_update_id(&message.update_id)
                    .with_chat_id(&message.chat_id);
                let detail = ErrorDetail::new(
                    "runtime-process-once-exception",
                    unexpected,
                    false,
                    DiagnosticSource::ProcessOnce,
                    Category::Error,
                    context,
                );
                return CycleOutcome {
                    status: Status::Failed,
                    reason: Reason::RuntimeProcessOnceException,
                    error_details: vec![detail],
                    ..outcome
                };
            }
        }
    }

    drain_adapter_diagnostics(adapter, &mut outcome);

    outcome.reason = if outcome.error > 0 {
        Reason::CompletedWithErrors
    } else {
        Reason::Processed
    };
    outcome
}

struct PerMessage {
    sent: bool,
    acked: bool,
    ack_skipped: bool,
    errored: bool,
    error_details: Vec<ErrorDetail>,
    dropped_update: Option<DroppedUpdate>,
}

async fn run_one_message(
    adapter: &dyn AdapterPort,
    orchestrator: &dyn Orchestrator,
    ack_policy: AckPolicy,
    message: &crate::model::InboundMessage,
) -> Result<PerMessage, String> {
    let session_id = message.session_key().to_string();
    let mut per_message = PerMessage {
        sent: false,
        acked: false,
        ack_skipped: false,
        errored: false,
        error_details: Vec::new(),
        dropped_update: None,
    };

    let handle_outcome = orchestrator
        .handle_message(&session_id, &message.chat_id, &message.update_id, &message.text)
        .await;

    let mut handle_failed = false;
    if let Some(diag) = &handle_outcome.diagnostic {
        let detail = ErrorDetail::new(
            diag.code.clone(),
            diag.message.clone(),
            diag.retryable,
            diag.source(),
            diag.category,
            diag.context.clone(),
        );
        match diag.category {
            Category::Drop => {
                per_message.dropped_update = Some(DroppedUpdate {
                    update_id: message.update_id.clone(),
                    chat_id: message.chat_id.clone(),
                    reason: diag.message.clone(),
                });
            }
            Category::Error => {
                handle_failed = true;
                per_message.errored = true;
            }
        }
        per_message.error_details.push(detail);
    }

    let mut send_failed = false;
    if let Some(outbound) = &handle_outcome.outbound {
        match adapter.send_message(outbound).await {
            Ok(()) => per_message.sent = true,
            Err(transport_err) => {
                send_failed = true;
                per_message.errored = true;
                warn!(error = %transport_err, update_id = %message.update_id, "send_message failed");
                let context = DiagContext::new(Layer::Service, "send_message")
                    .with_update_id(&message.update_id)
                    .with_chat_id(&message.chat_id)
                    .with_session_id(&session_id);
                per_message.error_details.push(ErrorDetail::new(
                    "send-message-failed",
                    transport_err.message.clone(),
                    transport_err.retryable,
                    DiagnosticSource::ProcessOnce,
                    Category::Error,
                    context,
                ));
            }
        }
    }

    let should_ack = match ack_policy {
        AckPolicy::Always => true,
        AckPolicy::OnSuccess => !handle_failed && !send_failed,
    };

    if should_ack {
        adapter.ack_update(&message.update_id).await;
        per_message.acked = true;
    } else {
        per_message.ack_skipped = true;
    }

    Ok(per_message)
}

fn apply(outcome: &mut CycleOutcome, per_message: PerMessage) {
    if per_message.sent {
        outcome.sent += 1;
    }
    if per_message.acked {
        outcome.acked += 1;
    }
    if per_message.ack_skipped {
        outcome.ack_skipped += 1;
    }
    if per_message.errored {
        outcome.error += 1;
    }
    if per_message.dropped_update.is_some() {
        outcome.dropped += 1;
    }
    outcome.error_details.extend(per_message.error_details);
    if let Some(dropped) = per_message.dropped_update {
        outcome.dropped_updates.push(dropped);
    }
}

fn drain_adapter_diagnostics(adapter: &dyn AdapterPort, outcome: &mut CycleOutcome) {
    for diag in adapter.drain_diagnostics() {
        let detail = ErrorDetail::new(
            diag.code.clone(),
            diag.message.clone(),
            diag.retryable,
            DiagnosticSource::AdapterDiagnostics,
            diag.category,
            diag.context.clone(),
        );
        match diag.category {
            Category::Drop => {
                if let (Some(update_id), Some(chat_id)) =
                    (diag.context.update_id.clone(), diag.context.chat_id.clone())
                {
                    outcome.dropped += 1;
                    outcome.dropped_updates.push(DroppedUpdate {
                        update_id,
                        chat_id,
                        reason: diag.message.clone(),
                    });
                }
            }
            Category::Error => {
                outcome.error += 1;
            }
        }
        outcome.error_details.push(detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InboundMessage, OutboundMessage};
    use crate::orchestrator::{HandleOutcome, OrchestratorDiagnostic};
    use crate::transport::{AdapterDiagnostic, Operation, TransportError, TransportErrorKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAdapter {
        messages: Mutex<Vec<InboundMessage>>,
        fail_fetch: bool,
        sent: Mutex<Vec<OutboundMessage>>,
        acked: Mutex<Vec<String>>,
        diagnostics: Mutex<Vec<AdapterDiagnostic>>,
        fail_send: bool,
    }

    impl FakeAdapter {
        fn new(messages: Vec<InboundMessage>) -> Self {
            Self {
                messages: Mutex::new(messages),
                fail_fetch: false,
                sent: Mutex::new(Vec::new()),
                acked: Mutex::new(Vec::new()),
                diagnostics: Mutex::new(Vec::new()),
                fail_send: false,
            }
        }
    }

    #[async_trait]
    impl AdapterPort for FakeAdapter {
        async fn fetch_updates(&self) -> Result<Vec<InboundMessage>, AdapterError> {
            if self.fail_fetch {
                return Err(AdapterError {
                    operation: Operation::FetchUpdates,
                    source: TransportError {
                        kind: TransportErrorKind::NetworkError,
                        status_code: None,
                        error_code: None,
                        retryable: true,
                        operation: Operation::FetchUpdates,
                        message: "network down".to_string(),
                    },
                });
            }
            Ok(std::mem::take(&mut *self.messages.lock().unwrap()))
        }

        async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            if self.fail_send {
                return Err(TransportError {
                    kind: TransportErrorKind::HttpError,
                    status_code: Some(500),
                    error_code: None,
                    retryable: true,
                    operation: Operation::SendMessage,
                    message: "boom".to_string(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn ack_update(&self, update_id: &str) {
            self.acked.lock().unwrap().push(update_id.to_string());
        }

        fn drain_diagnostics(&self) -> Vec<AdapterDiagnostic> {
            std::mem::take(&mut *self.diagnostics.lock().unwrap())
        }
    }

    struct FakeOrchestrator {
        outcome_fn: Box<dyn Fn(&str, &str) -> HandleOutcome + Send + Sync>,
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn handle_message(
            &self,
            _session_id: &str,
            chat_id: &str,
            update_id: &str,
            _text: &str,
        ) -> HandleOutcome {
            (self.outcome_fn)(chat_id, update_id)
        }
    }

    fn msg(update_id: &str, chat_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            update_id: update_id.to_string(),
            chat_id: chat_id.to_string(),
            user_id: Some("1".to_string()),
            text: text.to_string(),
            received_ts_ms: 0,
        }
    }

    #[tokio::test]
    async fn happy_path_echo_like() {
        let adapter = FakeAdapter::new(vec![msg("100", "42", "hi")]);
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|chat_id, update_id| {
                HandleOutcome::reply(OutboundMessage::new(chat_id, "hi").replying_to(update_id))
            }),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::Always).await;
        assert_eq!(outcome.status, Status::Ok);
        assert_eq!(outcome.reason, Reason::Processed);
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.acked, 1);
        assert_eq!(outcome.error, 0);
        assert_eq!(outcome.dropped, 0);
    }

    #[tokio::test]
    async fn empty_fetch_is_no_updates() {
        let adapter = FakeAdapter::new(vec![]);
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|_, _| HandleOutcome::default()),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::Always).await;
        assert_eq!(outcome.status, Status::Ok);
        assert_eq!(outcome.reason, Reason::NoUpdates);
        assert_eq!(outcome.fetched, 0);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_cycle() {
        let mut adapter = FakeAdapter::new(vec![]);
        adapter.fail_fetch = true;
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|_, _| HandleOutcome::default()),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::Always).await;
        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.reason, Reason::AdapterFetchException);
        assert_eq!(outcome.error_details[0].code, "adapter-fetch-exception");
        assert!(outcome.error_details[0].retryable);
        assert_eq!(outcome.fetched, 0);
    }

    #[tokio::test]
    async fn allowlist_drop_counts_as_dropped_not_error() {
        let adapter = FakeAdapter::new(vec![msg("100", "777", "hi")]);
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|chat_id, update_id| {
                let context = DiagContext::new(Layer::Orchestrator, "allowlist_check")
                    .with_chat_id(chat_id)
                    .with_update_id(update_id);
                HandleOutcome::drop(OrchestratorDiagnostic::new(
                    "allowlist-drop",
                    format!("chat_id not allowlisted: {chat_id}"),
                    false,
                    Category::Drop,
                    context,
                ))
            }),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::Always).await;
        assert_eq!(outcome.reason, Reason::Processed);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.error, 0);
        assert!(outcome.dropped_updates[0].reason.contains("chat_id not allowlisted"));
    }

    #[tokio::test]
    async fn on_success_skips_ack_when_send_fails() {
        let mut adapter = FakeAdapter::new(vec![msg("100", "42", "hi")]);
        adapter.fail_send = true;
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|chat_id, update_id| {
                HandleOutcome::reply(OutboundMessage::new(chat_id, "hi").replying_to(update_id))
            }),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::OnSuccess).await;
        assert_eq!(outcome.ack_skipped, 1);
        assert_eq!(outcome.acked, 0);
        assert_eq!(outcome.error, 1);
        assert_eq!(outcome.reason, Reason::CompletedWithErrors);
    }

    #[tokio::test]
    async fn always_policy_acks_even_on_allowlist_drop() {
        let adapter = FakeAdapter::new(vec![msg("100", "777", "hi")]);
        let orchestrator = FakeOrchestrator {
            outcome_fn: Box::new(|chat_id, update_id| {
                let context = DiagContext::new(Layer::Orchestrator, "allowlist_check")
                    .with_chat_id(chat_id)
                    .with_update_id(update_id);
                HandleOutcome::drop(OrchestratorDiagnostic::new(
                    "allowlist-drop",
                    "chat_id not allowlisted",
                    false,
                    Category::Drop,
                    context,
                ))
            }),
        };
        let outcome = process_once(&adapter, &orchestrator, AckPolicy::Always).await;
        assert_eq!(outcome.acked, 1);
        assert_eq!(outcome.ack_skipped, 0);
    }
}
