//! Bridge error types.
//!
//! A closed taxonomy: the reconnect loop and the binary entry point match on
//! the kind to decide between aborting, retrying, or exiting cleanly.

use std::fmt;

use thiserror::Error;

/// Which relay pump produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpKind {
    /// Socket messages into worker stdin.
    SocketToWorker,
    /// Worker stdout lines out to the socket.
    WorkerToSocket,
    /// Worker stderr lines to the local diagnostics stream.
    StderrToDiagnostics,
}

impl fmt::Display for PumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PumpKind::SocketToWorker => "socket->stdin",
            PumpKind::WorkerToSocket => "stdout->socket",
            PumpKind::StderrToDiagnostics => "stderr->diagnostics",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while running the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configured endpoint does not use a WebSocket scheme.
    #[error("invalid endpoint '{url}': must start with ws:// or wss://")]
    InvalidEndpoint { url: String },

    /// The WebSocket handshake (or DNS/TCP connect) failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// The peer closed the WebSocket, or the stream ended.
    #[error("socket closed: {reason}")]
    SocketClosed { reason: String },

    /// A WebSocket receive or send failed mid-flight.
    #[error("socket error: {reason}")]
    SocketError { reason: String },

    /// The worker process failed to start.
    #[error("failed to spawn worker '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    /// Reading from or writing to one of the worker's streams failed.
    #[error("worker {stream} error: {reason}")]
    WorkerIo {
        stream: &'static str,
        reason: String,
    },

    /// A pump reached end-of-stream, which ends the session.
    #[error("{pump} pump reached end of stream")]
    StreamEnded { pump: PumpKind },
}

impl BridgeError {
    /// Errors that must stop the process before any connection attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::InvalidEndpoint { .. })
    }

    /// Shorthand for a worker stream I/O failure.
    pub(crate) fn worker_io(stream: &'static str, err: impl fmt::Display) -> Self {
        BridgeError::WorkerIo {
            stream,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint_is_fatal() {
        let err = BridgeError::InvalidEndpoint {
            url: "http://example.com".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_session_errors_are_not_fatal() {
        let errs = [
            BridgeError::ConnectFailed {
                endpoint: "ws://localhost:1".into(),
                reason: "refused".into(),
            },
            BridgeError::SocketClosed {
                reason: "peer closed".into(),
            },
            BridgeError::SpawnFailed {
                command: "missing".into(),
                reason: "not found".into(),
            },
            BridgeError::worker_io("stdin", "broken pipe"),
            BridgeError::StreamEnded {
                pump: PumpKind::WorkerToSocket,
            },
        ];
        for err in errs {
            assert!(!err.is_fatal(), "{err} should not be fatal");
        }
    }

    #[test]
    fn test_display_names_pump() {
        let err = BridgeError::StreamEnded {
            pump: PumpKind::StderrToDiagnostics,
        };
        assert_eq!(err.to_string(), "stderr->diagnostics pump reached end of stream");
    }
}
