//! Relays a remote WebSocket endpoint to a local worker process.
//!
//! This module handles:
//! - Validating the endpoint URI at startup
//! - Spawning and tearing down the worker child process
//! - Pumping messages socket → stdin, stdout → socket, stderr → diagnostics
//! - Running one connection session at a time with guaranteed cleanup
//! - Reconnecting forever with capped, jittered exponential backoff
//!
//! The worker is a black box: it reads one JSON-RPC request per line on
//! stdin and writes one response per line on stdout.

pub mod backoff;
pub mod errors;
pub mod pumps;
pub mod reconnect;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod types;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, BackoffState};
pub use errors::{BridgeError, PumpKind};
pub use reconnect::run_forever;
pub use session::Session;
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use types::{EndpointUri, SessionEnd};
