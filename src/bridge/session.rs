//! Connection session: one socket plus one worker, from connect to teardown.
//!
//! The session opens the WebSocket, spawns the worker, races the relay pumps
//! against the shutdown signal, and releases both resources on every exit
//! path before reporting the outcome. Stdout is never cut short by stderr
//! reaching end-of-stream first.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;
use uuid::Uuid;

use super::errors::{BridgeError, PumpKind};
use super::pumps::{self, ToolListScan};
use super::shutdown::ShutdownSignal;
use super::supervisor::{self, WorkerHandle};
use super::types::{EndpointUri, PumpExit, SessionEnd, SessionState, SocketState};
use crate::config::WorkerConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Bound on sending the close frame during teardown.
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on forwarding leftover stdout after the worker's stdin broke.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ─── SessionResources ────────────────────────────────────────────────────────

/// The socket and worker a session owns.
///
/// `release` is idempotent. If the session future is dropped before
/// `release` runs, dropping the sink closes the TCP stream and dropping the
/// worker handle kills the process.
pub(crate) struct SessionResources {
    socket: Option<WsSink>,
    socket_state: SocketState,
    worker: Option<WorkerHandle>,
    grace: Duration,
}

impl SessionResources {
    fn new(socket: Option<WsSink>, grace: Duration) -> Self {
        let socket_state = if socket.is_some() {
            SocketState::Open
        } else {
            SocketState::Closed
        };
        Self {
            socket,
            socket_state,
            worker: None,
            grace,
        }
    }

    /// Close the socket if open, then shut the worker down.
    pub(crate) async fn release(&mut self) {
        if let Some(mut sink) = self.socket.take() {
            match tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => tracing::debug!("socket closed"),
                Ok(Err(e)) => tracing::debug!(error = %e, "socket already closed"),
                Err(_) => tracing::warn!("timed out sending close frame"),
            }
        }
        self.socket_state = SocketState::Closed;

        if let Some(worker) = self.worker.as_mut() {
            worker.shutdown(self.grace).await;
        }
    }
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One attempt at holding an open socket and a running worker.
pub struct Session<'a> {
    id: Uuid,
    attempt: u32,
    worker_config: &'a WorkerConfig,
    state: SessionState,
    worker_pid: Option<u32>,
}

impl<'a> Session<'a> {
    pub fn new(worker_config: &'a WorkerConfig, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt,
            worker_config,
            state: SessionState::Connecting,
            worker_pid: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pid of the worker this session spawned, if it got that far.
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(SessionEnd::Interrupted)` only when `shutdown` fired;
    /// every other ending, including a pump reaching end-of-stream, is an
    /// error for the reconnect loop to handle.
    pub async fn run(
        &mut self,
        endpoint: &EndpointUri,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, BridgeError> {
        let span = tracing::info_span!("session", id = %self.id, attempt = self.attempt);
        self.run_inner(endpoint, shutdown).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        endpoint: &EndpointUri,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, BridgeError> {
        self.state = SessionState::Connecting;
        tracing::info!(endpoint = %endpoint, "connecting to endpoint");

        let connected = tokio::select! {
            result = connect_async(endpoint.as_str()) => Some(result),
            _ = shutdown.wait() => None,
        };
        let ws = match connected {
            None => {
                self.state = SessionState::Closed;
                return Ok(SessionEnd::Interrupted);
            }
            Some(Ok((ws, _response))) => ws,
            Some(Err(e)) => {
                self.state = SessionState::Closed;
                return Err(BridgeError::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        tracing::info!("connected to endpoint");

        let (sink, inbound) = ws.split();
        let mut resources = SessionResources::new(Some(sink), self.worker_config.shutdown_grace);

        let outcome = self.relay(&mut resources, inbound, shutdown).await;

        self.state = SessionState::Draining;
        resources.release().await;
        self.state = SessionState::Closed;

        match &outcome {
            Ok(SessionEnd::Interrupted) => tracing::info!("session interrupted"),
            Err(e) => tracing::debug!(error = %e, "session ended"),
        }
        outcome
    }

    /// Spawn the worker and race the pumps until the first one finishes.
    async fn relay(
        &mut self,
        resources: &mut SessionResources,
        inbound: SplitStream<WsStream>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, BridgeError> {
        let mut worker = supervisor::spawn(self.worker_config)?;
        self.worker_pid = worker.pid();
        let stdio = worker.take_stdio();
        resources.worker = Some(worker);
        let stdio = stdio?;

        let outbound = resources.socket.as_mut().ok_or_else(|| BridgeError::SocketClosed {
            reason: "socket released before relay started".into(),
        })?;
        let mut scan = ToolListScan::new();

        self.state = SessionState::Active;
        tracing::info!(pid = ?self.worker_pid, "relay active");

        let to_worker = pumps::socket_to_worker(inbound, stdio.stdin);
        let to_socket = pumps::worker_to_socket(BufReader::new(stdio.stdout), outbound, &mut scan);
        let diagnostics =
            pumps::stderr_to_diagnostics(BufReader::new(stdio.stderr), tokio::io::stderr());
        tokio::pin!(to_worker, to_socket, diagnostics);

        // Stderr closing alone does not end the session; stdout may still
        // hold lines the worker wrote before exiting.
        let mut stderr_open = true;
        let finished = loop {
            tokio::select! {
                result = &mut to_worker => break Some((PumpKind::SocketToWorker, result)),
                result = &mut to_socket => break Some((PumpKind::WorkerToSocket, result)),
                result = &mut diagnostics, if stderr_open => match result {
                    Ok(PumpExit::EndOfStream) => {
                        tracing::debug!("worker stderr closed, relay continues until stdout");
                        stderr_open = false;
                    }
                    Err(e) => break Some((PumpKind::StderrToDiagnostics, Err(e))),
                },
                _ = shutdown.wait() => break None,
            }
        };

        // A stdin write failure usually means the worker died; forward
        // whatever it already wrote before tearing down.
        let finished = match finished {
            Some((PumpKind::SocketToWorker, Err(e @ BridgeError::WorkerIo { .. }))) => {
                match tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut to_socket).await {
                    Ok(result) => tracing::debug!(result = ?result.map(|_| ()), "drained worker stdout"),
                    Err(_) => tracing::debug!("worker stdout still open after drain window"),
                }
                Some((PumpKind::SocketToWorker, Err(e)))
            }
            other => other,
        };
        // Returning drops the remaining pumps and their ends of the pipes.
        self.state = SessionState::Draining;

        match finished {
            None => Ok(SessionEnd::Interrupted),
            Some((pump, Ok(PumpExit::EndOfStream))) => {
                tracing::info!(pump = %pump, "pump finished, ending session");
                Err(BridgeError::StreamEnded { pump })
            }
            Some((pump, Err(e))) => {
                tracing::warn!(pump = %pump, error = %e, "pump failed, ending session");
                Err(e)
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
