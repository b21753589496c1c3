//! Durable cursor-floor file (spec.md §4.4).
//!
//! JSON IO follows `storage/file_store.rs`'s `store_json`/`load_json`
//! pattern; the atomic write uses `tempfile::NamedTempFile::persist`, the
//! same crate the teacher already carries as a dependency for its own
//! persistence tests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::NamedTempFile;
use tracing::warn;

const SCHEMA: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorFile {
    committed_floor: i64,
    schema: String,
}

/// Outcome of a load, distinguishing "file absent" from "file corrupt" so
/// the adapter can surface the right diagnostic (spec.md §4.4/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Absent,
    Loaded,
    Corrupt,
}

/// Durable, monotonic cursor floor. Disabled (in-memory only) when
/// constructed with `path = None`.
pub struct CursorStore {
    path: Option<PathBuf>,
    floor: AtomicI64,
}

impl CursorStore {
    /// Load the floor from `path` (or start at 0 if disabled/absent).
    /// Returns the store plus the outcome of the initial load, so callers
    /// can emit a `cursor-state-load-failed` diagnostic on corruption.
    pub fn load(path: Option<PathBuf>) -> (Self, LoadOutcome) {
        let Some(path) = path else {
            return (
                Self {
                    path: None,
                    floor: AtomicI64::new(0),
                },
                LoadOutcome::Absent,
            );
        };

        if !path.exists() {
            return (
                Self {
                    path: Some(path),
                    floor: AtomicI64::new(0),
                },
                LoadOutcome::Absent,
            );
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CursorFile>(&content) {
                Ok(parsed) => (
                    Self {
                        path: Some(path),
                        floor: AtomicI64::new(parsed.committed_floor.max(0)),
                    },
                    LoadOutcome::Loaded,
                ),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "cursor state file is corrupt, resetting to 0");
                    (
                        Self {
                            path: Some(path),
                            floor: AtomicI64::new(0),
                        },
                        LoadOutcome::Corrupt,
                    )
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "cursor state file unreadable, resetting to 0");
                (
                    Self {
                        path: Some(path),
                        floor: AtomicI64::new(0),
                    },
                    LoadOutcome::Corrupt,
                )
            }
        }
    }

    pub fn floor(&self) -> i64 {
        self.floor.load(Ordering::SeqCst)
    }

    pub fn persistence_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Raise the in-memory floor to `max(current, candidate)` and persist.
    /// Monotonicity invariant (spec.md §4.4/P2): a lower value never wins,
    /// whether it comes from a concurrent external edit on reload or from
    /// a caller passing a stale candidate.
    pub fn advance_to(&self, candidate: i64) -> Result<(), std::io::Error> {
        let mut current = self.floor.load(Ordering::SeqCst);
        loop {
            if candidate <= current {
                return Ok(());
            }
            match self.floor.compare_exchange(
                current,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomic(
            path,
            &CursorFile {
                committed_floor: self.floor(),
                schema: SCHEMA.to_string(),
            },
        )
    }
}

fn write_atomic(path: &Path, value: &CursorFile) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let content = serde_json::to_string(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::io::Write::write_all(&mut tmp, content.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let (store, outcome) = CursorStore::load(Some(path));
        assert_eq!(outcome, LoadOutcome::Absent);
        assert_eq!(store.floor(), 0);
    }

    #[test]
    fn advance_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let (store, _) = CursorStore::load(Some(path.clone()));
        store.advance_to(101).unwrap();
        assert_eq!(store.floor(), 101);

        let (reloaded, outcome) = CursorStore::load(Some(path));
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(reloaded.floor(), 101);
    }

    #[test]
    fn advance_never_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        let (store, _) = CursorStore::load(Some(path));
        store.advance_to(50).unwrap();
        store.advance_to(10).unwrap();
        assert_eq!(store.floor(), 50);
    }

    #[test]
    fn corrupt_file_resets_to_zero_with_diagnostic_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "not json").unwrap();
        let (store, outcome) = CursorStore::load(Some(path));
        assert_eq!(outcome, LoadOutcome::Corrupt);
        assert_eq!(store.floor(), 0);
    }

    #[test]
    fn disabled_when_path_is_none() {
        let (store, outcome) = CursorStore::load(None);
        assert_eq!(outcome, LoadOutcome::Absent);
        assert!(!store.persistence_enabled());
        store.advance_to(5).unwrap();
        assert_eq!(store.floor(), 5);
    }

    #[test]
    fn restart_idempotence_e2e() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");

        let (store_a, _) = CursorStore::load(Some(path.clone()));
        store_a.advance_to(102).unwrap();
        drop(store_a);

        let (store_b, outcome) = CursorStore::load(Some(path));
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(store_b.floor(), 102);
        // A subsequent save with the same value is idempotent.
        store_b.advance_to(102).unwrap();
        assert_eq!(store_b.floor(), 102);
    }
}
