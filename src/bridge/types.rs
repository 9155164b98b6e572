//! Shared types for the bridge.
//!
//! Endpoint validation, lifecycle states, and the shapes read by the
//! best-effort tool-list scan.

use std::fmt;

use serde::Deserialize;

use super::errors::BridgeError;

// ─── Endpoint ────────────────────────────────────────────────────────────────

/// A WebSocket endpoint URI, validated at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUri(String);

impl EndpointUri {
    /// Validate that `url` uses the `ws://` or `wss://` scheme.
    pub fn parse(url: &str) -> Result<Self, BridgeError> {
        let trimmed = url.trim();
        let valid = ["ws://", "wss://"].iter().any(|scheme| {
            trimmed.len() > scheme.len()
                && trimmed[..scheme.len()].eq_ignore_ascii_case(scheme)
        });
        if !valid {
            return Err(BridgeError::InvalidEndpoint {
                url: url.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The endpoint with its query string removed, safe for logs.
    ///
    /// Endpoints commonly carry an access token as a query parameter.
    pub fn redacted(&self) -> &str {
        match self.0.find('?') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.redacted())
    }
}

// ─── Lifecycle States ────────────────────────────────────────────────────────

/// Lifecycle of a worker process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

/// Lifecycle of the session's WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle of one connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    /// All pumps running.
    Active,
    /// One pump ended; the others are being collapsed.
    Draining,
    Closed,
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// An external shutdown was requested.
    Interrupted,
}

/// How a pump ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The source stream closed.
    EndOfStream,
}

// ─── Tool List Scan ──────────────────────────────────────────────────────────

/// The `result` of a tool-list response, as far as the scan cares.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolListResult {
    #[serde(default)]
    pub tools: Vec<AdvertisedTool>,
}

/// One tool advertised by the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvertisedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl AdvertisedTool {
    /// `"<name> - <first line of description>"`.
    pub fn summary(&self) -> String {
        let first_line = self.description.lines().next().unwrap_or("").trim();
        format!("{} - {}", self.name, first_line)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_accepts_ws_schemes() {
        assert!(EndpointUri::parse("ws://localhost:8080/mcp").is_ok());
        assert!(EndpointUri::parse("wss://api.example.com/mcp/?token=abc").is_ok());
        assert!(EndpointUri::parse("WSS://API.EXAMPLE.COM").is_ok());
    }

    #[test]
    fn test_endpoint_rejects_other_schemes() {
        for url in ["http://example.com", "https://example.com", "example.com", "ws://", ""] {
            let err = EndpointUri::parse(url).unwrap_err();
            assert!(matches!(err, BridgeError::InvalidEndpoint { .. }), "{url}");
        }
    }

    #[test]
    fn test_endpoint_redacts_query() {
        let uri = EndpointUri::parse("wss://host/mcp/?token=secret").unwrap();
        assert_eq!(uri.redacted(), "wss://host/mcp/");
        assert_eq!(uri.to_string(), "wss://host/mcp/");
        assert_eq!(uri.as_str(), "wss://host/mcp/?token=secret");
    }

    #[test]
    fn test_tool_summary_uses_first_description_line() {
        let tool = AdvertisedTool {
            name: "x".into(),
            description: "d1\nd2".into(),
        };
        assert_eq!(tool.summary(), "x - d1");
    }

    #[test]
    fn test_tool_summary_without_description() {
        let tool: AdvertisedTool = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
        assert_eq!(tool.summary(), "bare - ");
    }
}
