//! Subprocess orchestrator (spec.md §4.7): per-session workers over an
//! external command (`codex exec …`), stdin carries the prompt, stdout
//! carries the reply.
//!
//! Worker lifecycle states (`idle → running → idle | terminated`) mirror
//! `tier_orchestrator/core.rs`'s `CircuitBreakerState` bookkeeping style
//! (an `RwLock`-guarded table mutated only by the dispatcher); timeout
//! classification is grounded on `telegram/retry_handler.rs`.

use super::{base_context, HandleOutcome, Orchestrator, OrchestratorDiagnostic};
use crate::model::{Category, OutboundMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const FALLBACK_TEXT: &str = "(orchestrator error; please retry)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
}

/// One session's serialization point. The `Mutex` *is* the per-session
/// queue: a request awaiting the lock is queued behind whatever request
/// holds it.
struct SessionWorker {
    lock: Arc<Mutex<()>>,
    state: WorkerState,
    last_used: Instant,
}

impl SessionWorker {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            state: WorkerState::Idle,
            last_used: Instant::now(),
        }
    }
}

pub struct SubprocessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub session_max: usize,
    pub session_idle_ttl: Duration,
    pub notify_on_orchestrator_error: bool,
}

/// Implements the orchestrator port over an external command, one
/// serialized worker per session.
pub struct SubprocessOrchestrator {
    config: SubprocessConfig,
    sessions: RwLock<HashMap<String, SessionWorker>>,
}

impl SubprocessOrchestrator {
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch (or spawn) the session's serialization lock, evicting idle
    /// sessions past their TTL and, if still over `session_max`, the
    /// least-recently-used idle session (spec.md §4.7 (a)/(b)).
    async fn acquire_session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut sessions = self.sessions.write().await;
        self.evict_idle(&mut sessions);

        if !sessions.contains_key(session_id) && sessions.len() >= self.config.session_max {
            self.evict_lru(&mut sessions);
        }

        let worker = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionWorker::new);
        worker.last_used = Instant::now();
        worker.lock.clone()
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, SessionWorker>) {
        let ttl = self.config.session_idle_ttl;
        let now = Instant::now();
        sessions.retain(|session_id, worker| {
            let expired = worker.state == WorkerState::Idle && now.duration_since(worker.last_used) > ttl;
            if expired {
                debug!(session_id, "evicting idle session worker past TTL");
            }
            !expired
        });
    }

    fn evict_lru(&self, sessions: &mut HashMap<String, SessionWorker>) {
        let candidate = sessions
            .iter()
            .filter(|(_, w)| w.state == WorkerState::Idle)
            .min_by_key(|(_, w)| w.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = candidate {
            debug!(session_id = %id, "evicting LRU idle session worker over session_max");
            sessions.remove(&id);
        }
    }

    async fn mark_state(&self, session_id: &str, state: WorkerState) {
        let mut sessions = self.sessions.write().await;
        if let Some(worker) = sessions.get_mut(session_id) {
            worker.state = state;
            worker.last_used = Instant::now();
        }
    }

    async fn terminate(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    async fn run_command(&self, prompt: &str) -> Result<String, ExecFailure> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecFailure::SpawnFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ExecFailure::SpawnFailed(e.to_string()))?;
        }

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecFailure::Timeout)?
            .map_err(|e| ExecFailure::SpawnFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(ExecFailure::NonZeroExit);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(ExecFailure::EmptyStdout);
        }
        Ok(stdout)
    }

    fn fallback_outcome(&self, diagnostic: OrchestratorDiagnostic, chat_id: &str, update_id: &str) -> HandleOutcome {
        if self.config.notify_on_orchestrator_error {
            let outbound = OutboundMessage::new(chat_id, FALLBACK_TEXT).replying_to(update_id);
            HandleOutcome::error_with_fallback(diagnostic, outbound)
        } else {
            HandleOutcome::error(diagnostic)
        }
    }
}

enum ExecFailure {
    SpawnFailed(String),
    NonZeroExit,
    EmptyStdout,
    Timeout,
}

#[async_trait]
impl Orchestrator for SubprocessOrchestrator {
    async fn handle_message(
        &self,
        session_id: &str,
        chat_id: &str,
        update_id: &str,
        text: &str,
    ) -> HandleOutcome {
        let lock = self.acquire_session_lock(session_id).await;
        let _guard = lock.lock().await;
        self.mark_state(session_id, WorkerState::Running).await;

        let context = base_context("handle_message")
            .with_update_id(update_id)
            .with_chat_id(chat_id)
            .with_session_id(session_id);

        let result = self.run_command(text).await;

        match result {
            Ok(reply) => {
                self.mark_state(session_id, WorkerState::Idle).await;
                let outbound = OutboundMessage::new(chat_id, reply).replying_to(update_id);
                HandleOutcome::reply(outbound)
            }
            Err(ExecFailure::Timeout) => {
                let message = format!("orchestrator handle_message exceeded {:?}", self.config.timeout);
                crate::log_session_failure!(session_id, "codex-timeout", message);
                self.terminate(session_id).await;
                let diagnostic =
                    OrchestratorDiagnostic::new("codex-timeout", message, true, Category::Error, context);
                self.fallback_outcome(diagnostic, chat_id, update_id)
            }
            Err(ExecFailure::SpawnFailed(detail)) => {
                let message = format!("failed to spawn orchestrator command: {detail}");
                crate::log_session_failure!(session_id, "codex-exec-failed", message);
                self.terminate(session_id).await;
                let diagnostic =
                    OrchestratorDiagnostic::new("codex-exec-failed", message, true, Category::Error, context);
                self.fallback_outcome(diagnostic, chat_id, update_id)
            }
            Err(ExecFailure::NonZeroExit) => {
                let message = "orchestrator command exited with a non-zero status";
                crate::log_session_failure!(session_id, "codex-exec-failed", message);
                self.mark_state(session_id, WorkerState::Idle).await;
                let diagnostic =
                    OrchestratorDiagnostic::new("codex-exec-failed", message, true, Category::Error, context);
                self.fallback_outcome(diagnostic, chat_id, update_id)
            }
            Err(ExecFailure::EmptyStdout) => {
                let message = "orchestrator command produced no output";
                crate::log_session_failure!(session_id, "codex-exec-failed", message);
                self.mark_state(session_id, WorkerState::Idle).await;
                let diagnostic =
                    OrchestratorDiagnostic::new("codex-exec-failed", message, true, Category::Error, context);
                self.fallback_outcome(diagnostic, chat_id, update_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_config(timeout: Duration) -> SubprocessConfig {
        SubprocessConfig {
            command: "cat".to_string(),
            args: vec![],
            timeout,
            session_max: 8,
            session_idle_ttl: Duration::from_secs(300),
            notify_on_orchestrator_error: false,
        }
    }

    #[tokio::test]
    async fn successful_exec_replies_with_stdout() {
        let orch = SubprocessOrchestrator::new(echo_config(Duration::from_secs(5)));
        let outcome = orch.handle_message("telegram:42", "42", "1", "hello").await;
        let outbound = outcome.outbound.expect("cat echoes stdin to stdout");
        assert_eq!(outbound.text, "hello");
        assert!(outcome.diagnostic.is_none());
    }

    #[tokio::test]
    async fn timeout_yields_codex_timeout_diagnostic() {
        let mut config = echo_config(Duration::from_millis(1));
        config.command = "sleep".to_string();
        config.args = vec!["5".to_string()];
        let orch = SubprocessOrchestrator::new(config);
        let outcome = orch.handle_message("telegram:42", "42", "1", "hello").await;
        let diag = outcome.diagnostic.expect("timeout produces a diagnostic");
        assert_eq!(diag.code, "codex-timeout");
        assert!(diag.retryable);
        assert!(outcome.outbound.is_none());
    }

    #[tokio::test]
    async fn notify_on_error_adds_fallback_reply() {
        let mut config = echo_config(Duration::from_millis(1));
        config.command = "sleep".to_string();
        config.args = vec!["5".to_string()];
        config.notify_on_orchestrator_error = true;
        let orch = SubprocessOrchestrator::new(config);
        let outcome = orch.handle_message("telegram:42", "42", "1", "hello").await;
        assert!(outcome.diagnostic.is_some());
        let outbound = outcome.outbound.expect("fallback notify is enabled");
        assert_eq!(outbound.text, FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn nonexistent_command_yields_codex_exec_failed() {
        let mut config = echo_config(Duration::from_secs(5));
        config.command = "this-command-does-not-exist-anywhere".to_string();
        let orch = SubprocessOrchestrator::new(config);
        let outcome = orch.handle_message("telegram:42", "42", "1", "hello").await;
        let diag = outcome.diagnostic.expect("spawn failure produces a diagnostic");
        assert_eq!(diag.code, "codex-exec-failed");
    }

    #[tokio::test]
    async fn session_max_evicts_lru_idle_session() {
        let mut config = echo_config(Duration::from_secs(5));
        config.session_max = 1;
        let orch = SubprocessOrchestrator::new(config);
        orch.handle_message("telegram:1", "1", "1", "a").await;
        orch.handle_message("telegram:2", "2", "2", "b").await;
        let sessions = orch.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key("telegram:2"));
    }
}
