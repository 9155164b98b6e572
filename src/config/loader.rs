//! Bridge configuration loading and validation.
//!
//! Reads `config/mcp-pipe.yaml` (or the file named by `MCP_PIPE_CONFIG`),
//! interpolates environment variables, and validates the values the bridge
//! relies on. The endpoint scheme itself is validated by the bridge at
//! startup, not here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::errors::ConfigError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MCP_PIPE_CONFIG";

/// Env var that overrides `endpoint.url`.
pub const ENDPOINT_ENV: &str = "MCP_ENDPOINT";

/// Config location relative to the project root.
const CONFIG_RELATIVE_PATH: &str = "config/mcp-pipe.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level bridge configuration (mirrors `config/mcp-pipe.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub reconnection: ReconnectionConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote WebSocket endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Must start with `ws://` or `wss://`.
    pub url: String,
    /// Set when `MCP_ENDPOINT` replaced the file's value.
    #[serde(skip)]
    pub from_env: bool,
}

/// Reconnect backoff settings. Durations are given in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionConfig {
    #[serde(default = "default_initial_backoff", deserialize_with = "seconds")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", deserialize_with = "seconds")]
    pub max_backoff: Duration,
    /// Starting value of the attempt counter. Non-zero makes the first
    /// connection wait out a backoff delay.
    #[serde(default)]
    pub reconnect_attempt: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            reconnect_attempt: 0,
        }
    }
}

/// How to launch the worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Time the worker gets to exit after the terminate signal.
    #[serde(default = "default_shutdown_grace", deserialize_with = "seconds")]
    pub shutdown_grace: Duration,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the daily log files.
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: None,
        }
    }
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}
fn default_max_backoff() -> Duration {
    Duration::from_secs(600)
}
fn default_shutdown_grace() -> Duration {
    crate::bridge::supervisor::DEFAULT_GRACE_PERIOD
}
fn default_log_dir() -> String {
    "log".to_string()
}

/// Deserialize a non-negative number of seconds (integer or float).
fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| serde::de::Error::custom(format!("invalid duration {secs}: {e}")))
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve the config file path.
///
/// `MCP_PIPE_CONFIG` wins if set. Otherwise searches upward from `start`
/// for `config/mcp-pipe.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        return Err(ConfigError::NotFound {
            reason: format!("{CONFIG_PATH_ENV} points to missing file {}", candidate.display()),
        });
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        reason: format!("could not find {CONFIG_RELATIVE_PATH} above {}", start.display()),
    })
}

/// Load, interpolate, override, and validate the config file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut config = parse_config(&raw)?;
    apply_endpoint_override(&mut config, std::env::var(ENDPOINT_ENV).ok());
    config.validate()?;
    Ok(config)
}

/// Parse config YAML after `${VAR}` interpolation.
pub fn parse_config(raw: &str) -> Result<BridgeConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

/// Replace `endpoint.url` with a non-empty override.
fn apply_endpoint_override(config: &mut BridgeConfig, endpoint: Option<String>) {
    if let Some(url) = endpoint.filter(|url| !url.trim().is_empty()) {
        config.endpoint.url = url;
        config.endpoint.from_env = true;
    }
}

impl BridgeConfig {
    /// Check the values the bridge depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.endpoint.url.trim().is_empty() {
            return Err(invalid("endpoint.url", "must not be empty"));
        }
        let r = &self.reconnection;
        if r.initial_backoff.is_zero() {
            return Err(invalid("reconnection.initial_backoff", "must be greater than zero"));
        }
        if r.max_backoff < r.initial_backoff {
            return Err(invalid(
                "reconnection.max_backoff",
                "must be at least reconnection.initial_backoff",
            ));
        }
        if self.worker.command.trim().is_empty() {
            return Err(invalid("worker.command", "must not be empty"));
        }
        if self.worker.shutdown_grace.is_zero() {
            return Err(invalid("worker.shutdown_grace", "must be greater than zero"));
        }
        Ok(())
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
