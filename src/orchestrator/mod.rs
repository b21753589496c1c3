//! Orchestrator port (spec.md §4.5-§4.7): the narrow `handle_message`
//! interface the single-cycle service dispatches through, plus the
//! allowlist-gate, echo and subprocess implementations.

pub mod allowlist;
pub mod echo;
pub mod subprocess;

pub use allowlist::AllowlistGate;
pub use echo::EchoOrchestrator;
pub use subprocess::SubprocessOrchestrator;

use crate::model::{DiagContext, DiagnosticSource, Layer, OutboundMessage};
use async_trait::async_trait;

/// One orchestrator diagnostic — an error or a policy drop, never both
/// (spec.md §9's "drops vs. errors must remain distinct variants").
#[derive(Debug, Clone)]
pub struct OrchestratorDiagnostic {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub category: crate::model::Category,
    pub context: DiagContext,
}

impl OrchestratorDiagnostic {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        category: crate::model::Category,
        context: DiagContext,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
            category,
            context,
        }
    }

    pub fn source(&self) -> DiagnosticSource {
        DiagnosticSource::OrchestratorDiagnostics
    }
}

/// Result of dispatching one message to an orchestrator. `outbound` and
/// `diagnostic` are independent: a fallback-notify reply can accompany a
/// diagnostic (spec.md §4.7), and a plain success carries neither.
#[derive(Debug, Clone, Default)]
pub struct HandleOutcome {
    pub outbound: Option<OutboundMessage>,
    pub diagnostic: Option<OrchestratorDiagnostic>,
}

impl HandleOutcome {
    pub fn reply(outbound: OutboundMessage) -> Self {
        Self {
            outbound: Some(outbound),
            diagnostic: None,
        }
    }

    pub fn drop(diagnostic: OrchestratorDiagnostic) -> Self {
        Self {
            outbound: None,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn error(diagnostic: OrchestratorDiagnostic) -> Self {
        Self {
            outbound: None,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn error_with_fallback(diagnostic: OrchestratorDiagnostic, outbound: OutboundMessage) -> Self {
        Self {
            outbound: Some(outbound),
            diagnostic: Some(diagnostic),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            &self.diagnostic,
            Some(d) if d.category == crate::model::Category::Error
        )
    }
}

/// The narrow port every orchestrator implements (spec.md §9: "capability
/// sets, not inheritance hierarchies").
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn handle_message(
        &self,
        session_id: &str,
        chat_id: &str,
        update_id: &str,
        text: &str,
    ) -> HandleOutcome;
}

pub(crate) fn base_context(operation: &str) -> DiagContext {
    DiagContext::new(Layer::Orchestrator, operation)
}
