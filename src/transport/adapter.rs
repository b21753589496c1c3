//! Channel adapter (spec.md §4.3): composes the API client, parser and
//! cursor store into the port the single-cycle service consumes.
//!
//! Bookkeeping (`seen`/`pending`/`processed`) mirrors the in-memory maps
//! `telegram/tracking.rs::MessageTracker` keeps over correlation ids,
//! adapted to `update_id` sets.

use crate::model::{DiagContext, DiagnosticSource, InboundMessage, Layer, OutboundMessage};
use crate::transport::client::{ApiClient, Operation, TransportError};
use crate::transport::cursor::{CursorStore, LoadOutcome};
use crate::transport::parser::{self};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A drop or error diagnostic raised by the adapter, outside of a fatal
/// `AdapterError` (spec.md §4.3's `stale-drop` / cursor-IO diagnostics).
#[derive(Debug, Clone)]
pub struct AdapterDiagnostic {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub category: crate::model::Category,
    pub context: DiagContext,
}

impl AdapterDiagnostic {
    pub fn stale_drop(update_id: &str, chat_id: &str) -> Self {
        Self {
            code: "stale-drop".to_string(),
            message: format!("update {update_id} is below the committed cursor floor"),
            retryable: false,
            category: crate::model::Category::Drop,
            context: DiagContext::new(Layer::Adapter, "fetch_updates")
                .with_update_id(update_id)
                .with_chat_id(chat_id),
        }
    }

    pub fn cursor_load_failed(detail: &str) -> Self {
        Self {
            code: "cursor-state-load-failed".to_string(),
            message: detail.to_string(),
            retryable: true,
            category: crate::model::Category::Error,
            context: DiagContext::new(Layer::Adapter, "fetch_updates"),
        }
    }

    pub fn cursor_save_failed(detail: &str) -> Self {
        Self {
            code: "cursor-state-save-failed".to_string(),
            message: detail.to_string(),
            retryable: true,
            category: crate::model::Category::Error,
            context: DiagContext::new(Layer::Adapter, "ack_update"),
        }
    }

    pub fn ack_update_failed(update_id: &str) -> Self {
        Self {
            code: "ack-update-failed".to_string(),
            message: format!("update {update_id} was not in the pending set"),
            retryable: true,
            category: crate::model::Category::Error,
            context: DiagContext::new(Layer::Adapter, "ack_update").with_update_id(update_id),
        }
    }
}

/// Fatal adapter error: the API call itself failed, so no partial state
/// may escape (spec.md §4.3).
#[derive(Debug, Clone, thiserror::Error)]
#[error("adapter operation {operation:?} failed: {source}")]
pub struct AdapterError {
    pub operation: Operation,
    #[source]
    pub source: TransportError,
}

/// The port the single-cycle service depends on.
#[async_trait]
pub trait AdapterPort: Send + Sync {
    async fn fetch_updates(&self) -> Result<Vec<InboundMessage>, AdapterError>;
    async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    async fn ack_update(&self, update_id: &str);
    /// Diagnostics accumulated since the last call (drained on read).
    fn drain_diagnostics(&self) -> Vec<AdapterDiagnostic>;
}

struct Bookkeeping {
    seen: HashSet<i64>,
    pending: HashSet<i64>,
    processed: HashSet<i64>,
}

impl Bookkeeping {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            pending: HashSet::new(),
            processed: HashSet::new(),
        }
    }
}

/// Composes `ApiClient` + parser + `CursorStore` into the adapter port.
pub struct ChannelAdapter<C: ApiClient> {
    client: C,
    cursor: CursorStore,
    book: Mutex<Bookkeeping>,
    diagnostics: Mutex<Vec<AdapterDiagnostic>>,
    poll_timeout_s: u64,
    poll_limit: u32,
    strict_cursor_io: bool,
}

impl<C: ApiClient> ChannelAdapter<C> {
    pub fn new(
        client: C,
        cursor_path: Option<PathBuf>,
        poll_timeout_s: u64,
        poll_limit: u32,
        strict_cursor_io: bool,
    ) -> Self {
        let (cursor, outcome) = CursorStore::load(cursor_path);
        let mut diagnostics = Vec::new();
        if outcome == LoadOutcome::Corrupt {
            diagnostics.push(AdapterDiagnostic::cursor_load_failed(
                "cursor state file failed to parse on startup; floor reset to 0",
            ));
        }
        if !cursor.persistence_enabled() {
            info!("cursor persistence disabled: path not configured, running in-memory only");
        }
        Self {
            client,
            cursor,
            book: Mutex::new(Bookkeeping::new()),
            diagnostics: Mutex::new(diagnostics),
            poll_timeout_s,
            poll_limit,
            strict_cursor_io,
        }
    }

    pub fn committed_floor(&self) -> i64 {
        self.cursor.floor()
    }

    /// Whether `cursor-state-load-failed`/`cursor-state-save-failed`
    /// diagnostics should additionally fail the cycle (spec.md §4.4).
    pub fn strict_cursor_io(&self) -> bool {
        self.strict_cursor_io
    }

    fn push_diagnostic(&self, diag: AdapterDiagnostic) {
        self.diagnostics.lock().unwrap().push(diag);
    }
}

#[async_trait]
impl<C: ApiClient> AdapterPort for ChannelAdapter<C> {
    async fn fetch_updates(&self) -> Result<Vec<InboundMessage>, AdapterError> {
        let floor = self.cursor.floor();
        let raw_updates = self
            .client
            .get_updates(floor, self.poll_timeout_s, self.poll_limit)
            .await
            .map_err(|source| AdapterError {
                operation: Operation::FetchUpdates,
                source,
            })?;

        let mut inbound = Vec::new();
        // Tracks the offset rule: floor advances past the max update_id
        // seen in this batch (parsed or skipped alike), so a batch made
        // entirely of skipped updates still moves the offset forward
        // deterministically instead of re-fetching them forever.
        let mut max_update_id: Option<i64> = None;
        let received_ts_ms = now_ms();

        for raw in &raw_updates {
            let raw_id = raw.get("update_id").and_then(|v| v.as_i64());
            if let Some(id) = raw_id {
                max_update_id = Some(max_update_id.map_or(id, |m: i64| m.max(id)));
            }

            match parser::parse_update(raw, received_ts_ms) {
                Ok(msg) => {
                    let update_id: i64 = msg.update_id.parse().unwrap_or_default();
                    if update_id < floor {
                        self.push_diagnostic(AdapterDiagnostic::stale_drop(
                            &msg.update_id,
                            &msg.chat_id,
                        ));
                        continue;
                    }
                    let mut book = self.book.lock().unwrap();
                    book.seen.insert(update_id);
                    book.pending.insert(update_id);
                    drop(book);
                    inbound.push(msg);
                }
                Err(_skip_reason) => {
                    // Skipped updates are not diagnostics (not errors, not
                    // drops of a delivered message) — they simply advance
                    // the offset via `max_update_id` above.
                }
            }
        }

        if let Some(max_id) = max_update_id {
            if let Err(e) = self.cursor.advance_to(max_id + 1) {
                let diag = AdapterDiagnostic::cursor_save_failed(&e.to_string());
                warn!(error = %e, "failed to persist cursor floor");
                self.push_diagnostic(diag);
            }
        }

        Ok(inbound)
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.client
            .send_message(
                &message.chat_id,
                &message.text,
                message.reply_to_update_id.as_deref(),
            )
            .await
    }

    async fn ack_update(&self, update_id: &str) {
        let Ok(id) = update_id.parse::<i64>() else {
            self.push_diagnostic(AdapterDiagnostic::ack_update_failed(update_id));
            return;
        };

        let min_pending_after_ack = {
            let mut book = self.book.lock().unwrap();
            if !book.pending.remove(&id) {
                drop(book);
                self.push_diagnostic(AdapterDiagnostic::ack_update_failed(update_id));
                return;
            }
            book.processed.insert(id);
            book.pending.iter().copied().min()
        };

        // Advance the floor past this id only while it was (or still is)
        // the minimum pending id, matching spec.md §4.3's "advances the
        // cursor floor past it when it is the minimum pending id" rule.
        let should_advance = min_pending_after_ack.map_or(true, |min| min > id);
        if should_advance {
            if let Err(e) = self.cursor.advance_to(id + 1) {
                warn!(error = %e, update_id, "failed to persist cursor floor on ack");
                self.push_diagnostic(AdapterDiagnostic::cursor_save_failed(&e.to_string()));
            }
        }
        debug!(update_id, "acked update");
    }

    fn drain_diagnostics(&self) -> Vec<AdapterDiagnostic> {
        std::mem::take(&mut *self.diagnostics.lock().unwrap())
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
