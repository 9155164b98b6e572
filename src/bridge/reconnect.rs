//! Reconnect loop, the bridge's top-level driver.
//!
//! Runs one session at a time, forever. Every failed session bumps the
//! attempt counter and the next attempt waits out the backoff delay. Only an
//! external shutdown ends the loop.

use super::backoff::{BackoffPolicy, BackoffState};
use super::errors::BridgeError;
use super::session::Session;
use super::shutdown::ShutdownSignal;
use super::types::{EndpointUri, SessionEnd};
use crate::config::{ReconnectionConfig, WorkerConfig};

/// Keep a session running against `endpoint` until `shutdown` fires.
///
/// Session failures are logged and retried without limit. The returned
/// state is the backoff state at exit.
pub async fn run_forever(
    endpoint: &EndpointUri,
    reconnection: &ReconnectionConfig,
    worker: &WorkerConfig,
    mut shutdown: ShutdownSignal,
) -> BackoffState {
    let policy = BackoffPolicy::new(reconnection.initial_backoff, reconnection.max_backoff);
    let mut state = policy.initial_state(reconnection.reconnect_attempt);

    loop {
        if shutdown.is_triggered() {
            break;
        }

        if state.attempt_count > 0 {
            let (wait, next) = policy.next_delay(state);
            state = next;
            tracing::info!(
                attempt = state.attempt_count,
                wait_secs = %format!("{:.2}", wait.as_secs_f64()),
                "waiting before reconnect attempt"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => break,
            }
        }

        let mut session = Session::new(worker, state.attempt_count);
        match session.run(endpoint, &mut shutdown).await {
            Ok(SessionEnd::Interrupted) => break,
            Err(e) => {
                state = state.record_failure();
                log_session_failure(&e, state.attempt_count);
            }
        }
    }

    tracing::info!(attempts = state.attempt_count, "reconnect loop stopped");
    state
}

fn log_session_failure(err: &BridgeError, attempt: u32) {
    match err {
        BridgeError::SocketClosed { .. } | BridgeError::StreamEnded { .. } => {
            tracing::warn!(attempt, error = %err, "connection closed");
        }
        _ => {
            tracing::error!(attempt, error = %err, "connection error");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
