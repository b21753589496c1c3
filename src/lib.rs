pub mod config;
pub mod heartbeat;
pub mod kb;
pub mod model;
pub mod orchestrator;
pub mod runtime;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{Config, ConfigError};
pub use orchestrator::{AllowlistGate, EchoOrchestrator, Orchestrator, SubprocessOrchestrator};
pub use runtime::RuntimeLoop;
pub use service::process_once;
pub use transport::{ApiClient, ChannelAdapter, CursorStore, HttpApiClient};
pub use utils::errors::BridgeError;
pub use utils::setup_logging;
