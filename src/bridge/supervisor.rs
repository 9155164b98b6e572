//! Worker process supervision.
//!
//! Spawns the worker with all three stdio streams piped, hands the streams
//! to the relay pumps, and tears the process down at the end of a session:
//! close stdin, send a graceful terminate, wait out the grace period, then
//! force-kill.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::errors::BridgeError;
use super::types::WorkerState;
use crate::config::WorkerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default time a worker gets to exit after the terminate signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ─── WorkerStdio ─────────────────────────────────────────────────────────────

/// The worker's piped streams, taken out of the handle for the pumps.
pub struct WorkerStdio {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

// ─── WorkerHandle ────────────────────────────────────────────────────────────

/// A running worker process, exclusively owned by one session.
pub struct WorkerHandle {
    command: String,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    state: WorkerState,
}

impl WorkerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Take the three streams. Fails if they were already taken.
    pub fn take_stdio(&mut self) -> Result<WorkerStdio, BridgeError> {
        let command = self.command.clone();
        let missing = |stream: &str| BridgeError::SpawnFailed {
            command: command.clone(),
            reason: format!("{stream} already taken"),
        };
        let stdin = self.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = self.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = self.stderr.take().ok_or_else(|| missing("stderr"))?;
        Ok(WorkerStdio {
            stdin,
            stdout,
            stderr,
        })
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(_) => false,
        }
    }

    /// Terminate the worker: close stdin, signal, wait `grace`, then kill.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.state == WorkerState::Terminated {
            return None;
        }
        self.state = WorkerState::Terminating;

        // End-of-input lets a well-behaved worker exit on its own.
        drop(self.stdin.take());

        let status = match self.child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => {
                self.send_terminate();
                match tokio::time::timeout(grace, self.child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        tracing::warn!(pid = ?self.pid, error = %e, "waiting for worker failed, killing");
                        self.force_kill().await
                    }
                    Err(_) => {
                        tracing::warn!(
                            pid = ?self.pid,
                            grace_ms = grace.as_millis() as u64,
                            "worker did not exit within grace period, killing"
                        );
                        self.force_kill().await
                    }
                }
            }
        };

        self.stdout = None;
        self.stderr = None;
        self.state = WorkerState::Terminated;
        tracing::info!(pid = ?self.pid, status = ?status, "worker terminated");
        status
    }

    async fn force_kill(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = ?self.pid, error = %e, "failed to kill worker");
        }
        self.child.try_wait().ok().flatten()
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        // SAFETY: plain syscall on a pid we spawned and have not yet reaped.
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            tracing::debug!(pid, error = %err, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.state != WorkerState::Terminated {
            // Cancelled before shutdown ran. kill_on_drop reaps the rest.
            let _ = self.child.start_kill();
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn the worker process with stdin, stdout and stderr piped.
pub fn spawn(config: &WorkerConfig) -> Result<WorkerHandle, BridgeError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    // Text-mode UTF-8 for Python workers regardless of locale.
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUNBUFFERED", "1");

    if let Some(dir) = &config.cwd {
        cmd.current_dir(dir);
    }

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| BridgeError::SpawnFailed {
        command: config.command.clone(),
        reason: e.to_string(),
    })?;

    let capture_failed = |stream: &str| BridgeError::SpawnFailed {
        command: config.command.clone(),
        reason: format!("failed to capture {stream}"),
    };
    let stdin = child.stdin.take().ok_or_else(|| capture_failed("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| capture_failed("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| capture_failed("stderr"))?;

    let pid = child.id();
    tracing::info!(command = %config.command, pid = ?pid, "worker started");

    Ok(WorkerHandle {
        command: config.command.clone(),
        child,
        pid,
        stdin: Some(stdin),
        stdout: Some(stdout),
        stderr: Some(stderr),
        state: WorkerState::Running,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    pub(crate) fn sh(script: &str) -> WorkerConfig {
        WorkerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            cwd: None,
            shutdown_grace: Duration::from_millis(500),
        }
    }

    pub(crate) fn pid_is_running(pid: u32) -> bool {
        // SAFETY: signal 0 only checks for existence.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut config = sh("true");
        config.command = "/nonexistent/mcp-pipe-worker".into();
        let err = spawn(&config).err().unwrap();
        assert!(matches!(err, BridgeError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_streams_are_piped() {
        let mut worker = spawn(&sh("read line; echo \"out:$line\"; echo \"err:$line\" >&2")).unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        let mut stdio = worker.take_stdio().unwrap();

        stdio.stdin.write_all(b"hello\n").await.unwrap();
        stdio.stdin.flush().await.unwrap();

        let mut out = String::new();
        BufReader::new(&mut stdio.stdout).read_line(&mut out).await.unwrap();
        let mut err = String::new();
        BufReader::new(&mut stdio.stderr).read_line(&mut err).await.unwrap();
        assert_eq!(out, "out:hello\n");
        assert_eq!(err, "err:hello\n");

        assert!(worker.take_stdio().is_err());
        worker.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_stdin_for_cooperative_worker() {
        // `cat` exits on its own once stdin closes.
        let mut config = sh("exec cat");
        config.shutdown_grace = Duration::from_secs(5);
        let mut worker = spawn(&config).unwrap();
        let pid = worker.pid().unwrap();

        let status = worker.shutdown(config.shutdown_grace).await;
        assert!(status.is_some());
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert!(!pid_is_running(pid));
    }

    #[tokio::test]
    async fn test_shutdown_force_kills_after_grace() {
        let mut worker = spawn(&sh("trap '' TERM; exec sleep 30")).unwrap();
        let pid = worker.pid().unwrap();
        // Let the shell install the trap before signalling.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        worker.shutdown(Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!worker.is_alive());
        assert!(!pid_is_running(pid));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut worker = spawn(&sh("exec sleep 30")).unwrap();
        let first = worker.shutdown(Duration::from_secs(1)).await;
        let second = worker.shutdown(Duration::from_secs(1)).await;
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn test_shutdown_of_already_exited_worker() {
        let mut worker = spawn(&sh("exit 3")).unwrap();
        while worker.is_alive() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = worker.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
