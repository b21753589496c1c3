use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use anyhow::Result;

pub fn setup_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                // JSON format requires additional features, using compact format for now
                .compact()
        )
        .with(env_filter)
        .init();

    Ok(())
}

/// Log a completed cycle's headline counters in one structured line.
#[macro_export]
macro_rules! log_cycle_summary {
    ($status:expr, $reason:expr, $($key:ident = $value:expr),*) => {
        tracing::info!(
            status = $status,
            reason = $reason,
            $($key = $value,)*
            "cycle completed"
        );
    };
}

/// Log a per-session orchestrator failure with its diagnostic code.
#[macro_export]
macro_rules! log_session_failure {
    ($session_id:expr, $code:expr, $error:expr) => {
        tracing::warn!(
            session_id = $session_id,
            code = $code,
            error = %$error,
            "session dispatch failed"
        );
    };
}
