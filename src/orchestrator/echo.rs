//! Trivial default orchestrator: echoes the inbound text back verbatim.

use super::{base_context, HandleOutcome, Orchestrator, OrchestratorDiagnostic};
use crate::model::{Category, OutboundMessage};
use async_trait::async_trait;

pub struct EchoOrchestrator;

#[async_trait]
impl Orchestrator for EchoOrchestrator {
    async fn handle_message(
        &self,
        _session_id: &str,
        chat_id: &str,
        update_id: &str,
        text: &str,
    ) -> HandleOutcome {
        if text.is_empty() {
            let context = base_context("handle_message")
                .with_update_id(update_id)
                .with_chat_id(chat_id);
            let diagnostic = OrchestratorDiagnostic::new(
                "empty-text-drop",
                "echo orchestrator has nothing to reply with for empty text",
                false,
                Category::Drop,
                context,
            );
            return HandleOutcome::drop(diagnostic);
        }
        let outbound = OutboundMessage::new(chat_id, text).replying_to(update_id);
        HandleOutcome::reply(outbound)
    }
}
