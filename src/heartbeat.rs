//! Best-effort event emitter (spec.md §6/§9): `publish_system_event` is the
//! only operation. Non-blocking, bounded internal buffer, overflow policy
//! is drop-oldest — the real publication backend is an out-of-scope
//! collaborator (spec.md §1), so this module only implements the contract
//! up to handing events to that backend.
//!
//! Dispatch pattern (best-effort, failures swallowed and counted rather
//! than propagated) mirrors the fire-and-forget notification calls in the
//! teacher's `main.rs`.

use crate::model::{DiagContext, EmitState};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct TelemetryDigest {
    pub fetch_total: u64,
    pub send_total: u64,
    pub drop_total: u64,
    pub cycle_total_ms: u64,
    pub heartbeat_emit_state: EmitState,
}

#[derive(Debug, Clone)]
pub struct SystemEvent {
    pub topic: String,
    pub severity: Severity,
    pub context: DiagContext,
    pub telemetry_digest: Option<TelemetryDigest>,
}

#[derive(Debug, thiserror::Error)]
#[error("event emitter sink unavailable: {0}")]
pub struct EmitError(pub String);

/// The single narrow operation the runtime loop depends on. `is_enabled`
/// lets the runtime distinguish "disabled" from "attempted and failed"
/// without inspecting the event itself.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    fn is_enabled(&self) -> bool;
    async fn publish_system_event(&self, event: SystemEvent) -> Result<(), EmitError>;
}

/// Disabled sink: no backend configured.
pub struct NullEventEmitter;

#[async_trait]
impl EventEmitter for NullEventEmitter {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn publish_system_event(&self, _event: SystemEvent) -> Result<(), EmitError> {
        Ok(())
    }
}

/// Buffers events for an out-of-scope downstream publication backend.
/// Non-blocking: a full buffer drops its oldest entry rather than waiting.
pub struct BufferedEventEmitter {
    capacity: usize,
    buffer: Mutex<VecDeque<SystemEvent>>,
}

impl BufferedEventEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn drain(&self) -> Vec<SystemEvent> {
        self.buffer.lock().unwrap().drain(..).collect()
    }
}

#[async_trait]
impl EventEmitter for BufferedEventEmitter {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn publish_system_event(&self, event: SystemEvent) -> Result<(), EmitError> {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() >= self.capacity {
            warn!(topic = %event.topic, "event emitter buffer full, dropping oldest system event");
            buffer.pop_front();
        }
        buffer.push_back(event);
        Ok(())
    }
}
