pub mod bridge;
pub mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bridge::{BackoffState, BridgeError, EndpointUri, ShutdownSignal};
use config::{BridgeConfig, LoggingConfig};

/// Filter used when neither `RUST_LOG` nor `logging.level` is set.
const DEFAULT_LOG_FILTER: &str = "mcp_pipe=info,warn";

/// Initialize the tracing subscriber with a console layer on stderr plus a daily log file.
///
/// The file lives at `<logging.dir>/<YYYY-MM-DD>.log` and is written through a
/// line-flushing writer so entries survive a crash. When the config could not
/// be loaded only the console layer is installed.
fn init_tracing(logging: Option<&LoggingConfig>) -> Option<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = logging
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_FILTER);
        EnvFilter::new(directive)
    });

    let log_file = logging.and_then(|l| open_daily_log(Path::new(&l.dir)));
    let log_path = log_file.as_ref().map(|(path, _)| path.clone());
    let file_layer = log_file.map(|(_, writer)| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    log_path
}

/// Open (append) today's log file under `dir`, creating the directory.
fn open_daily_log(dir: &Path) -> Option<(PathBuf, FlushingWriter)> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("mcp-pipe: cannot create log directory {}: {e}", dir.display());
        return None;
    }
    let path = dir.join(daily_log_name(chrono::Local::now().date_naive()));
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some((path, FlushingWriter::new(file))),
        Err(e) => {
            eprintln!("mcp-pipe: cannot open log file {}: {e}", path.display());
            None
        }
    }
}

fn daily_log_name(date: chrono::NaiveDate) -> String {
    format!("{}.log", date.format("%Y-%m-%d"))
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Locate and load the config relative to the current directory.
fn load_startup_config() -> Result<(PathBuf, BridgeConfig), config::ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let path = config::find_config_path(&cwd)?;
    let config = config::load_config(&path)?;
    Ok((path, config))
}

/// Validate the endpoint, then run the reconnect loop until `shutdown`.
///
/// An invalid endpoint scheme returns before any connection attempt.
pub async fn start(config: &BridgeConfig, shutdown: ShutdownSignal) -> Result<BackoffState, BridgeError> {
    let endpoint = EndpointUri::parse(&config.endpoint.url)?;
    tracing::info!(
        endpoint = %endpoint,
        worker = %config.worker.command,
        initial_backoff_ms = config.reconnection.initial_backoff.as_millis() as u64,
        max_backoff_ms = config.reconnection.max_backoff.as_millis() as u64,
        "bridge starting"
    );
    Ok(bridge::run_forever(&endpoint, &config.reconnection, &config.worker, shutdown).await)
}

/// Binary entry point: config, logging, interrupt handling, then the bridge.
///
/// Exits non-zero when the config cannot be loaded or the endpoint scheme is
/// invalid; exits 0 after a clean interrupt.
pub async fn run() -> ExitCode {
    let loaded = load_startup_config();
    let log_path = init_tracing(loaded.as_ref().ok().map(|(_, c)| &c.logging));

    let (config_path, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        config = %config_path.display(),
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        "=== mcp-pipe starting ==="
    );
    if config.endpoint.from_env {
        tracing::info!(
            env = config::loader::ENDPOINT_ENV,
            "endpoint overridden from environment"
        );
    }

    let (trigger, signal) = bridge::shutdown::channel();
    let _interrupt = bridge::shutdown::listen_for_interrupt(trigger);

    match start(&config, signal).await {
        Ok(state) => {
            tracing::info!(attempts = state.attempt_count, "mcp-pipe stopped");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_fatal() => {
            tracing::error!(
                error = %e,
                "set a valid endpoint in endpoint.url or MCP_ENDPOINT (must start with ws:// or wss://)"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
    }
}
