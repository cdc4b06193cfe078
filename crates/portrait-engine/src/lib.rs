pub mod config;
pub mod edit;
pub mod error;
pub mod generation;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{resolve_credential, ConfigError, EngineConfig};
pub use edit::EditClient;
pub use error::StudioError;
pub use generation::{random_seed, GenerationClient, GenerationRequest};
pub use retry::{RetryPolicy, RetrySignal};
pub use session::StudioSession;
pub use transport::{ImageTransport, TransportSet};
