//! Allowlist gate (spec.md §4.6): wraps another orchestrator and drops
//! messages from chats outside the allowlist before delegating.
//!
//! Grounded on `telegram/bot.rs::is_user_allowed`'s membership check,
//! generalized to the numeric-aware `chat_ids_equal` rule spec.md §3
//! requires.

use super::{base_context, HandleOutcome, Orchestrator, OrchestratorDiagnostic};
use crate::model::{chat_id_in_allowlist, Category};
use async_trait::async_trait;

pub struct AllowlistGate<O: Orchestrator> {
    allowlist: Vec<String>,
    inner: O,
}

impl<O: Orchestrator> AllowlistGate<O> {
    /// An empty allowlist disables the gate entirely (spec.md §4.6).
    pub fn new(allowlist: Vec<String>, inner: O) -> Self {
        Self { allowlist, inner }
    }

    fn is_open(&self) -> bool {
        self.allowlist.is_empty()
    }
}

#[async_trait]
impl<O: Orchestrator> Orchestrator for AllowlistGate<O> {
    async fn handle_message(
        &self,
        session_id: &str,
        chat_id: &str,
        update_id: &str,
        text: &str,
    ) -> HandleOutcome {
        if self.is_open() || chat_id_in_allowlist(chat_id, &self.allowlist) {
            return self.inner.handle_message(session_id, chat_id, update_id, text).await;
        }

        let context = base_context("allowlist_check")
            .with_update_id(update_id)
            .with_chat_id(chat_id)
            .with_session_id(session_id);
        let diagnostic = OrchestratorDiagnostic::new(
            "allowlist-drop",
            format!("chat_id not allowlisted: {chat_id}"),
            false,
            Category::Drop,
            context,
        );
        HandleOutcome::drop(diagnostic)
    }
}
