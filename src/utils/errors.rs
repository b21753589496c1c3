use thiserror::Error;

/// Setup-step error for the composition root (`main.rs`). Per-cycle
/// transport and orchestrator failures use the structured `ErrorDetail`
/// shape in `model.rs` instead — this type only covers failures that
/// happen before a cycle can even start (logging init, `.env` loading).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("setup error: {0}")]
    Config(String),
}
