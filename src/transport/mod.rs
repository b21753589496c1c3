pub mod adapter;
pub mod client;
pub mod cursor;
pub mod parser;

pub use adapter::{AdapterDiagnostic, AdapterError, AdapterPort, ChannelAdapter};
pub use client::{ApiClient, HttpApiClient, Operation, RetryConfig, TransportError, TransportErrorKind};
pub use cursor::{CursorStore, LoadOutcome};
pub use parser::parse_update;
