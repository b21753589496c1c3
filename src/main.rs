use anyhow::Context;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use tg_runtime_bridge::config::{Config, ConfigError, OrchestratorMode};
use tg_runtime_bridge::heartbeat::{BufferedEventEmitter, NullEventEmitter};
use tg_runtime_bridge::model::{
    Counters, CycleResult, EmitState, Heartbeat, Reason, Status, Telemetry, TimersMs,
};
use tg_runtime_bridge::orchestrator::subprocess::SubprocessConfig;
use tg_runtime_bridge::orchestrator::{AllowlistGate, EchoOrchestrator, Orchestrator, SubprocessOrchestrator};
use tg_runtime_bridge::transport::{ChannelAdapter, HttpApiClient, RetryConfig};
use tg_runtime_bridge::utils;
use tg_runtime_bridge::BridgeError;
use tg_runtime_bridge::RuntimeLoop;

const EVENT_BUFFER_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    if let Err(e) = load_dotenv() {
        warn!("{e:#}");
    }

    if let Err(e) = init_logging() {
        eprintln!("failed to initialize logging: {e:#}");
        std::process::exit(tg_runtime_bridge::runtime::EXIT_INVALID_CONFIG);
    }

    info!("starting tg-runtime-bridge v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let env: HashMap<String, String> = std::env::vars().collect();

    let config = match Config::from_args_and_env(&args, &env) {
        Ok(config) => config,
        Err(e) => {
            let payload = invalid_config_payload(&e);
            println!("{payload}");
            std::process::exit(tg_runtime_bridge::runtime::EXIT_INVALID_CONFIG);
        }
    };

    let exit_code = run(config).await;
    std::process::exit(exit_code);
}

/// Loads `.env` into the process environment. A missing file is expected
/// (shell-provided environment is the common case) and not an error;
/// anything else is wrapped as a `BridgeError` for the caller to log.
fn load_dotenv() -> anyhow::Result<()> {
    if let Err(e) = dotenv::dotenv() {
        if e.to_string().contains("No such file or directory") {
            return Ok(());
        }
        return Err(BridgeError::Config(e.to_string())).context("loading .env file");
    }
    Ok(())
}

fn init_logging() -> anyhow::Result<()> {
    utils::setup_logging()
        .map_err(|e| BridgeError::Config(e.to_string()))
        .context("initializing tracing subscriber")
}

async fn run(config: Config) -> i32 {
    let client = HttpApiClient::new(config.token.clone(), RetryConfig::default());
    let adapter = ChannelAdapter::new(
        client,
        config.cursor_state_path.as_ref().map(std::path::PathBuf::from),
        30,
        100,
        config.strict_cursor_state_io,
    );

    let echo = EchoOrchestrator;
    let gated_echo = AllowlistGate::new(config.allowed_chat_ids.clone(), echo);

    let subprocess_config = SubprocessConfig {
        command: "codex".to_string(),
        args: vec!["exec".to_string()],
        timeout: Duration::from_secs_f64(config.codex_timeout_s),
        session_max: config.codex_session_max,
        session_idle_ttl: Duration::from_secs(config.codex_session_idle_ttl_s),
        notify_on_orchestrator_error: config.notify_on_orchestrator_error,
    };
    let subprocess = SubprocessOrchestrator::new(subprocess_config);
    let gated_subprocess = AllowlistGate::new(config.allowed_chat_ids.clone(), subprocess);

    let orchestrator: &dyn Orchestrator = match config.orchestrator_mode {
        OrchestratorMode::Default => &gated_echo,
        OrchestratorMode::Codex => &gated_subprocess,
    };

    let null_emitter = NullEventEmitter;
    let buffered_emitter = BufferedEventEmitter::new(EVENT_BUFFER_CAPACITY);
    let event_emitter: &dyn tg_runtime_bridge::heartbeat::EventEmitter = if config.live_mode {
        &buffered_emitter
    } else {
        &null_emitter
    };

    let runtime = RuntimeLoop {
        adapter: &adapter,
        orchestrator,
        ack_policy: config.ack_policy,
        event_emitter,
        once: config.once,
        poll_interval: Duration::from_secs(config.poll_interval_s),
    };

    runtime.run().await
}

fn invalid_config_payload(error: &ConfigError) -> String {
    let result = CycleResult {
        status: Status::Failed,
        reason: Reason::InvalidConfig,
        fetched: 0,
        sent: 0,
        acked: 0,
        ack_skipped: 0,
        error: 1,
        dropped: 0,
        heartbeat_emit_failures: 0,
        errors: vec![error.to_string()],
        error_details: vec![],
        dropped_updates: vec![],
        telemetry: Telemetry::new(
            Counters {
                fetch_total: 0,
                send_total: 0,
                drop_total: 0,
                heartbeat_emit_failures: 0,
                retry_total: None,
                queue_depth: None,
                worker_restart_total: None,
            },
            TimersMs {
                cycle_total: 0,
                fetch: None,
                send: None,
            },
            Heartbeat {
                emit_state: EmitState::Disabled,
            },
        ),
    };
    serde_json::to_string(&result).unwrap_or_else(|_| "{\"status\":\"failed\"}".to_string())
}
