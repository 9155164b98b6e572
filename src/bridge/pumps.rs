//! Relay pumps between the WebSocket and the worker's stdio.
//!
//! Three independent loops, one direction each:
//! - socket messages → worker stdin (one line per message, flushed)
//! - worker stdout lines → socket messages (one message per line)
//! - worker stderr lines → the bridge's own stderr
//!
//! Each pump is generic over its endpoints so the session can wire real
//! streams while tests wire in-memory ones. Ordering within a pump is
//! strictly FIFO; there is no ordering between pumps.

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::{self, Message};

use super::errors::{BridgeError, PumpKind};
use super::types::{PumpExit, ToolListResult};

// ─── Constants ───────────────────────────────────────────────────────────────

/// JSON-RPC id of the response carrying the worker's tool list.
pub const TOOL_LIST_SENTINEL_ID: u64 = 1;

/// How much of each outbound line is echoed into debug logs.
const LOG_PREVIEW_CHARS: usize = 120;

// ─── Socket → Worker ─────────────────────────────────────────────────────────

/// Forward inbound socket messages to the worker's stdin.
///
/// Each text message is written with exactly one trailing newline and
/// flushed before the next message is received, so a slow reader applies
/// backpressure instead of losing messages. The writer is shut down on every
/// exit path so the worker sees end-of-input.
pub async fn socket_to_worker<S, W>(mut inbound: S, mut stdin: W) -> Result<PumpExit, BridgeError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = forward_inbound(&mut inbound, &mut stdin).await;
    let _ = stdin.shutdown().await;
    if let Err(e) = &result {
        tracing::error!(pump = %PumpKind::SocketToWorker, error = %e, "pump failed");
    }
    result
}

async fn forward_inbound<S, W>(inbound: &mut S, stdin: &mut W) -> Result<PumpExit, BridgeError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message = match inbound.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(socket_receive_error(e)),
            None => {
                return Err(BridgeError::SocketClosed {
                    reason: "stream ended".into(),
                })
            }
        };

        let text = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => {
                String::from_utf8(bytes.to_vec()).map_err(|e| BridgeError::SocketError {
                    reason: format!("binary frame is not UTF-8: {e}"),
                })?
            }
            Message::Close(frame) => {
                let reason = match frame {
                    Some(frame) => format!(
                        "close frame {}: {}",
                        u16::from(frame.code),
                        frame.reason.as_str()
                    ),
                    None => "close frame".into(),
                };
                return Err(BridgeError::SocketClosed { reason });
            }
            // Control frames are answered by tungstenite itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        tracing::debug!(bytes = text.len(), "<< message from endpoint");

        let line = frame_line(&text);
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::worker_io("stdin", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| BridgeError::worker_io("stdin", e))?;
    }
}

/// Terminate a message with exactly one newline.
fn frame_line(text: &str) -> String {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let body = body.strip_suffix('\r').unwrap_or(body);
    let mut line = String::with_capacity(body.len() + 1);
    line.push_str(body);
    line.push('\n');
    line
}

fn socket_receive_error(err: tungstenite::Error) -> BridgeError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            BridgeError::SocketClosed {
                reason: err.to_string(),
            }
        }
        other => BridgeError::SocketError {
            reason: format!("receive failed: {other}"),
        },
    }
}

// ─── Worker → Socket ─────────────────────────────────────────────────────────

/// Forward worker stdout lines to the socket, one message per line.
///
/// Lines are sent exactly as read. End-of-stream returns
/// `Ok(PumpExit::EndOfStream)`; read and send failures are errors.
pub async fn worker_to_socket<R, K>(
    mut stdout: R,
    outbound: &mut K,
    scan: &mut ToolListScan,
) -> Result<PumpExit, BridgeError>
where
    R: AsyncBufRead + Unpin,
    K: Sink<Message> + Unpin,
    K::Error: std::fmt::Display,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| log_failure(PumpKind::WorkerToSocket, BridgeError::worker_io("stdout", e)))?;

        if bytes_read == 0 {
            tracing::info!("worker stdout closed");
            return Ok(PumpExit::EndOfStream);
        }

        scan.observe(&line);
        tracing::debug!(line = %preview(&line), ">> message to endpoint");

        outbound
            .send(Message::text(line.clone()))
            .await
            .map_err(|e| {
                log_failure(
                    PumpKind::WorkerToSocket,
                    BridgeError::SocketError {
                        reason: format!("send failed: {e}"),
                    },
                )
            })?;
    }
}

fn preview(line: &str) -> String {
    let trimmed = line.trim_end();
    if trimmed.chars().count() <= LOG_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(LOG_PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

// ─── Worker stderr → Diagnostics ─────────────────────────────────────────────

/// Copy worker stderr lines to `sink` as they arrive, flushing each one.
pub async fn stderr_to_diagnostics<R, W>(mut stderr: R, mut sink: W) -> Result<PumpExit, BridgeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = stderr
            .read_line(&mut line)
            .await
            .map_err(|e| log_failure(PumpKind::StderrToDiagnostics, BridgeError::worker_io("stderr", e)))?;

        if bytes_read == 0 {
            tracing::info!("worker stderr closed");
            return Ok(PumpExit::EndOfStream);
        }

        // A broken local stderr must not take the session down.
        if sink.write_all(line.as_bytes()).await.is_ok() {
            let _ = sink.flush().await;
        }
    }
}

fn log_failure(pump: PumpKind, err: BridgeError) -> BridgeError {
    tracing::error!(pump = %pump, error = %err, "pump failed");
    err
}

// ─── Tool List Scan ──────────────────────────────────────────────────────────

/// One-shot observer that logs the worker's advertised tools.
///
/// Fires on the first JSON line whose `id` is [`TOOL_LIST_SENTINEL_ID`].
/// Anything that does not parse is ignored; the scan never affects relaying.
#[derive(Debug, Default)]
pub struct ToolListScan {
    done: bool,
}

impl ToolListScan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Inspect one outbound line. Returns the tool summaries that were
    /// logged, empty when the line did not trigger the scan.
    pub fn observe(&mut self, line: &str) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return Vec::new();
        };
        if value.get("id").and_then(serde_json::Value::as_u64) != Some(TOOL_LIST_SENTINEL_ID) {
            return Vec::new();
        }
        self.done = true;

        let Some(result) = value.get("result") else {
            return Vec::new();
        };
        let Ok(listing) = serde_json::from_value::<ToolListResult>(result.clone()) else {
            return Vec::new();
        };

        let summaries: Vec<String> = listing.tools.iter().map(|tool| tool.summary()).collect();
        if !summaries.is_empty() {
            tracing::info!(count = summaries.len(), "worker advertised tools");
        }
        for summary in &summaries {
            tracing::info!("{summary}");
        }
        summaries
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader};

    fn text(s: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::text(s.to_string()))
    }

    #[tokio::test]
    async fn test_socket_to_worker_preserves_order_and_newlines() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let inbound = stream::iter(vec![
            text(r#"{"id":1}"#),
            text("{\"id\":2}\n"),
            text("{\"id\":3}\r\n"),
            Ok(Message::Ping(Vec::new().into())),
            Ok(Message::binary(b"{\"id\":4}".to_vec())),
        ]);

        let err = socket_to_worker(inbound, writer).await.unwrap_err();
        assert!(matches!(err, BridgeError::SocketClosed { .. }));

        let mut received = String::new();
        reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n{\"id\":4}\n");
    }

    #[tokio::test]
    async fn test_socket_to_worker_close_frame_is_fatal() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let inbound = stream::iter(vec![text("a"), Ok(Message::Close(None)), text("never")]);

        let err = socket_to_worker(inbound, writer).await.unwrap_err();
        assert!(matches!(err, BridgeError::SocketClosed { .. }));

        // stdin was shut down, so the reader sees EOF after the first line.
        let mut received = String::new();
        reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "a\n");
    }

    #[tokio::test]
    async fn test_socket_to_worker_receive_error_is_fatal() {
        let (writer, _reader) = tokio::io::duplex(64);
        let inbound = stream::iter(vec![Err(tungstenite::Error::Io(std::io::Error::other(
            "connection reset",
        )))]);
        let err = socket_to_worker(inbound, writer).await.unwrap_err();
        assert!(matches!(err, BridgeError::SocketError { .. }));
    }

    #[tokio::test]
    async fn test_socket_to_worker_broken_pipe() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let inbound = stream::iter(vec![text("lost")]);
        let err = socket_to_worker(inbound, writer).await.unwrap_err();
        assert!(matches!(err, BridgeError::WorkerIo { stream: "stdin", .. }));
    }

    #[tokio::test]
    async fn test_socket_to_worker_waits_for_slow_reader() {
        // An 8-byte pipe forces every write to wait for the reader.
        let (writer, reader) = tokio::io::duplex(8);
        let messages: Vec<_> = (0..50).map(|i| text(&format!("{{\"method\":\"ping\",\"n\":{i}}}"))).collect();
        let pump = tokio::spawn(socket_to_worker(stream::iter(messages), writer));

        let mut lines = BufReader::new(reader).lines();
        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(1)).await;
            seen.push(line);
        }
        let _ = pump.await.unwrap();

        assert_eq!(seen.len(), 50);
        for (i, line) in seen.iter().enumerate() {
            assert_eq!(line, &format!("{{\"method\":\"ping\",\"n\":{i}}}"));
        }
    }

    #[tokio::test]
    async fn test_worker_to_socket_preserves_order() {
        let input: String = (0..100).map(|i| format!("{{\"id\":{}}}\n", i + 10)).collect();
        let (mut tx, mut rx) = mpsc::unbounded::<Message>();
        let mut scan = ToolListScan::new();

        let exit = worker_to_socket(BufReader::new(input.as_bytes()), &mut tx, &mut scan)
            .await
            .unwrap();
        assert_eq!(exit, PumpExit::EndOfStream);
        drop(tx);

        let mut received = Vec::new();
        while let Some(msg) = rx.next().await {
            received.push(msg.into_text().unwrap().as_str().to_owned());
        }
        assert_eq!(received.len(), 100);
        for (i, msg) in received.iter().enumerate() {
            assert_eq!(msg, &format!("{{\"id\":{}}}\n", i + 10));
        }
        assert!(!scan.is_done());
    }

    #[tokio::test]
    async fn test_worker_to_socket_forwards_tool_list_unchanged() {
        let line = "{\"id\":1,\"result\":{\"tools\":[{\"name\":\"x\",\"description\":\"d1\\nd2\"}]}}\n";
        let (mut tx, mut rx) = mpsc::unbounded::<Message>();
        let mut scan = ToolListScan::new();

        worker_to_socket(BufReader::new(line.as_bytes()), &mut tx, &mut scan)
            .await
            .unwrap();
        drop(tx);

        let msg = rx.next().await.unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), line);
        assert!(rx.next().await.is_none());
        assert!(scan.is_done());
    }

    #[tokio::test]
    async fn test_worker_to_socket_send_failure_is_fatal() {
        let (mut tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let mut scan = ToolListScan::new();
        let err = worker_to_socket(BufReader::new(&b"line\n"[..]), &mut tx, &mut scan)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SocketError { .. }));
    }

    #[tokio::test]
    async fn test_worker_to_socket_invalid_utf8_is_fatal() {
        let (mut tx, _rx) = mpsc::unbounded::<Message>();
        let mut scan = ToolListScan::new();
        let err = worker_to_socket(BufReader::new(&b"\xff\xfe\n"[..]), &mut tx, &mut scan)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::WorkerIo { stream: "stdout", .. }));
    }

    #[tokio::test]
    async fn test_stderr_to_diagnostics_copies_lines() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let exit = stderr_to_diagnostics(BufReader::new(&b"warn one\nwarn two\npartial"[..]), writer)
            .await
            .unwrap();
        assert_eq!(exit, PumpExit::EndOfStream);

        let mut copied = String::new();
        reader.read_to_string(&mut copied).await.unwrap();
        assert_eq!(copied, "warn one\nwarn two\npartial");
    }

    #[test]
    fn test_scan_logs_first_line_of_each_description() {
        let mut scan = ToolListScan::new();
        let summaries = scan.observe(
            r#"{"id":1,"result":{"tools":[{"name":"x","description":"d1\nd2"},{"name":"y","description":"weather"}]}}"#,
        );
        assert_eq!(summaries, vec!["x - d1".to_string(), "y - weather".to_string()]);
    }

    #[test]
    fn test_scan_fires_only_once() {
        let mut scan = ToolListScan::new();
        let line = r#"{"id":1,"result":{"tools":[{"name":"x","description":"d"}]}}"#;
        assert_eq!(scan.observe(line).len(), 1);
        assert!(scan.observe(line).is_empty());
    }

    #[test]
    fn test_scan_ignores_garbage_and_other_ids() {
        let mut scan = ToolListScan::new();
        assert!(scan.observe("not json\n").is_empty());
        assert!(scan.observe(r#"{"id":2,"result":{"tools":[{"name":"x"}]}}"#).is_empty());
        assert!(scan.observe(r#"{"method":"notifications/initialized"}"#).is_empty());
        assert!(!scan.is_done());
    }

    #[test]
    fn test_scan_sentinel_without_tools_still_completes() {
        let mut scan = ToolListScan::new();
        assert!(scan.observe(r#"{"id":1,"result":{"protocolVersion":"2024-11-05"}}"#).is_empty());
        assert!(scan.is_done());
        assert!(scan.observe(r#"{"id":1,"result":{"tools":[{"name":"late"}]}}"#).is_empty());
    }

    #[test]
    fn test_frame_line_single_newline() {
        assert_eq!(frame_line("a"), "a\n");
        assert_eq!(frame_line("a\n"), "a\n");
        assert_eq!(frame_line("a\r\n"), "a\n");
        assert_eq!(frame_line(""), "\n");
    }

    #[test]
    fn test_preview_truncates_long_lines() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.len(), LOG_PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short\n"), "short");
    }
}
