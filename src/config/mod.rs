//! Bridge configuration: `config/mcp-pipe.yaml` discovery, parsing and
//! validation.
//!
//! The file carries the endpoint URI, reconnect backoff bounds, the worker
//! command line, and log settings. `${VAR}` / `${VAR:-default}` expressions
//! are resolved from the environment before parsing.

pub mod errors;
pub mod loader;

// Re-exports for convenience
pub use errors::ConfigError;
pub use loader::{
    find_config_path, load_config, BridgeConfig, EndpointConfig, LoggingConfig,
    ReconnectionConfig, WorkerConfig,
};
