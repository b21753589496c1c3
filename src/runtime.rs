//! Runtime loop (spec.md §4.8): composition and scheduling around
//! `process_once`. `--once` runs a single cycle and exits; continuous mode
//! loops forever, sleeping `poll_interval_s` between cycles and never
//! exiting on a cycle error.
//!
//! Cycle/telemetry/select! structure is grounded on the teacher's
//! `main.rs` composition root.

use crate::heartbeat::{EventEmitter, Severity, SystemEvent, TelemetryDigest};
use crate::model::{
    AckPolicy, Category, Counters, CycleResult, DiagContext, DiagnosticSource, EmitState, ErrorDetail,
    Heartbeat, Layer, Reason, Status, Telemetry, TimersMs,
};
use crate::orchestrator::Orchestrator;
use crate::service::{process_once, CycleOutcome};
use crate::transport::AdapterPort;
use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CYCLE_FAILED: i32 = 1;
pub const EXIT_INVALID_CONFIG: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

pub struct RuntimeLoop<'a> {
    pub adapter: &'a dyn AdapterPort,
    pub orchestrator: &'a dyn Orchestrator,
    pub ack_policy: AckPolicy,
    pub event_emitter: &'a dyn EventEmitter,
    pub once: bool,
    pub poll_interval: Duration,
}

impl<'a> RuntimeLoop<'a> {
    /// Runs the loop to completion (`--once`) or until interrupted
    /// (continuous mode), printing one JSON line per cycle to stdout.
    pub async fn run(&self) -> i32 {
        loop {
            let started = Instant::now();
            let result = self.run_cycle(started).await;
            let is_failed = result.status == Status::Failed;

            match serde_json::to_string(&result) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to serialize cycle result"),
            }

            if self.once {
                return if is_failed { EXIT_CYCLE_FAILED } else { EXIT_OK };
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, stopping at cycle boundary");
                    return EXIT_INTERRUPTED;
                }
            }
        }
    }

    async fn run_cycle(&self, started: Instant) -> CycleResult {
        let cycle = AssertUnwindSafe(process_once(self.adapter, self.orchestrator, self.ack_policy));
        let outcome = match cycle.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "process_once panicked, cycle aborted");
                let context = DiagContext::new(Layer::RuntimeWrapper, "process_once");
                let detail = ErrorDetail::new(
                    "runtime-loop-cycle-exception",
                    message,
                    false,
                    DiagnosticSource::RuntimeWrapper,
                    Category::Error,
                    context,
                );
                CycleOutcome {
                    status: Status::Failed,
                    reason: Reason::RuntimeLoopCycleException,
                    fetched: 0,
                    sent: 0,
                    acked: 0,
                    ack_skipped: 0,
                    error: 1,
                    dropped: 0,
                    error_details: vec![detail],
                    dropped_updates: Vec::new(),
                }
            }
        };

        let cycle_total_ms = started.elapsed().as_millis() as u64;
        let error_details = dedup_error_details(outcome.error_details);
        let errors = error_details.iter().map(|d| d.message.clone()).collect::<Vec<_>>();

        let mut counters = Counters {
            fetch_total: outcome.fetched,
            send_total: outcome.sent,
            drop_total: outcome.dropped,
            heartbeat_emit_failures: 0,
            retry_total: None,
            queue_depth: None,
            worker_restart_total: None,
        };

        let emit_state = if self.event_emitter.is_enabled() {
            let digest = TelemetryDigest {
                fetch_total: outcome.fetched,
                send_total: outcome.sent,
                drop_total: outcome.dropped,
                cycle_total_ms,
                heartbeat_emit_state: EmitState::Emitted,
            };
            let event = SystemEvent {
                topic: "cycle.completed".to_string(),
                severity: if outcome.status == Status::Failed {
                    Severity::Error
                } else {
                    Severity::Info
                },
                context: DiagContext::new(Layer::RuntimeWrapper, "process_once"),
                telemetry_digest: Some(digest),
            };
            match self.event_emitter.publish_system_event(event).await {
                Ok(()) => EmitState::Emitted,
                Err(e) => {
                    warn!(error = %e, "event emitter publish failed");
                    counters.heartbeat_emit_failures = 1;
                    EmitState::EmitFailed
                }
            }
        } else {
            EmitState::Disabled
        };

        let telemetry = Telemetry::new(
            counters,
            TimersMs {
                cycle_total: cycle_total_ms,
                fetch: None,
                send: None,
            },
            Heartbeat { emit_state },
        );

        crate::log_cycle_summary!(
            outcome.status.as_str(),
            outcome.reason.as_str(),
            fetched = outcome.fetched,
            sent = outcome.sent,
            acked = outcome.acked,
            dropped = outcome.dropped,
            error = outcome.error,
            cycle_total_ms = cycle_total_ms
        );

        CycleResult {
            status: outcome.status,
            reason: outcome.reason,
            fetched: outcome.fetched,
            sent: outcome.sent,
            acked: outcome.acked,
            ack_skipped: outcome.ack_skipped,
            error: outcome.error,
            dropped: outcome.dropped,
            heartbeat_emit_failures: telemetry.counters.heartbeat_emit_failures,
            errors,
            error_details,
            dropped_updates: outcome.dropped_updates,
            telemetry,
        }
    }
}

/// Extracts a message from a caught panic payload, covering the two shapes
/// `std::panic!`/`.unwrap()`/`.expect()` actually produce.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "process_once panicked with a non-string payload".to_string()
    }
}

/// Collapses duplicate `diagnostic_id`s within one cycle's error details
/// into a single entry (spec.md §4.8/P10), preserving first-seen order.
fn dedup_error_details(details: Vec<ErrorDetail>) -> Vec<ErrorDetail> {
    let mut seen = HashSet::new();
    details
        .into_iter()
        .filter(|d| seen.insert(d.diagnostic_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, DiagnosticSource};

    fn detail(code: &str, message: &str) -> ErrorDetail {
        let context = DiagContext::new(Layer::Service, "fetch_updates");
        ErrorDetail::new(
            code,
            message,
            true,
            DiagnosticSource::ProcessOnce,
            Category::Error,
            context,
        )
    }

    #[test]
    fn dedup_collapses_identical_diagnostics() {
        let details = vec![detail("x", "boom"), detail("x", "boom"), detail("y", "bang")];
        let deduped = dedup_error_details(details);
        assert_eq!(deduped.len(), 2);
    }

    struct PanicAdapter;

    #[async_trait::async_trait]
    impl AdapterPort for PanicAdapter {
        async fn fetch_updates(
            &self,
        ) -> Result<Vec<crate::model::InboundMessage>, crate::transport::AdapterError> {
            panic!("adapter exploded");
        }

        async fn send_message(
            &self,
            _message: &crate::model::OutboundMessage,
        ) -> Result<(), crate::transport::TransportError> {
            Ok(())
        }

        async fn ack_update(&self, _update_id: &str) {}

        fn drain_diagnostics(&self) -> Vec<crate::transport::AdapterDiagnostic> {
            Vec::new()
        }
    }

    struct NullOrchestrator;

    #[async_trait::async_trait]
    impl Orchestrator for NullOrchestrator {
        async fn handle_message(
            &self,
            _session_id: &str,
            _chat_id: &str,
            _update_id: &str,
            _text: &str,
        ) -> crate::orchestrator::HandleOutcome {
            crate::orchestrator::HandleOutcome::default()
        }
    }

    #[tokio::test]
    async fn panic_in_process_once_yields_runtime_loop_cycle_exception() {
        let adapter = PanicAdapter;
        let orchestrator = NullOrchestrator;
        let emitter = crate::heartbeat::NullEventEmitter;
        let runtime = RuntimeLoop {
            adapter: &adapter,
            orchestrator: &orchestrator,
            ack_policy: AckPolicy::Always,
            event_emitter: &emitter,
            once: true,
            poll_interval: Duration::from_secs(1),
        };
        let result = runtime.run_cycle(Instant::now()).await;
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.reason, Reason::RuntimeLoopCycleException);
        assert_eq!(result.error_details[0].code, "runtime-loop-cycle-exception");
        assert!(result.error_details[0].message.contains("adapter exploded"));
    }
}
