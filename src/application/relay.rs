//! The two directional pumps that move bytes through one bridge session.
//!
//! Every session runs exactly two pumps concurrently:
//!
//! - **client → upstream**: reads WebSocket messages, writes the payload of
//!   binary messages verbatim to the upstream TCP socket.
//! - **upstream → client**: reads bounded chunks from the upstream TCP
//!   socket, wraps each chunk as a single binary WebSocket message.
//!
//! Within one direction, bytes are forwarded in the order received.  Across
//! the two directions there is no ordering relationship.  There is no
//! backpressure beyond what the transports provide natively: a full
//! destination blocks the pump's write call, which is an accepted stall, not
//! an error.
//!
//! # Teardown contract
//!
//! Each pump terminates exactly once, on the first read or write failure on
//! its own transports (a clean close counts as a termination cause, not an
//! error).  On exit a pump closes the transport halves it owns (the upstream
//! write half, or the WebSocket sink) and signals the session's shared
//! teardown channel.  The sibling pump waits on that channel alongside its
//! own blocked read, so the first termination releases the second within a
//! bounded time even when the second pump's peer stays silent.  Once both
//! pumps have returned, every half of both transports has been closed by its
//! owner, each exactly once.
//!
//! # Why generic transports?
//!
//! The pumps take `Stream`/`Sink` and `AsyncRead`/`AsyncWrite` bounds rather
//! than concrete socket types.  The relay semantics can then be tested with
//! in-memory pipes; `ws_server` plugs in the real split socket halves.

use std::fmt;
use std::io;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, warn};

use crate::domain::config::RELAY_CHUNK_SIZE;

// ── Outcome taxonomy ──────────────────────────────────────────────────────────

/// Errors that can terminate a pump.
///
/// These wrap the underlying transport error so the coordinator can log the
/// cause without the pumps hardcoding a logging backend.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The WebSocket side failed mid-relay.
    #[error("websocket transport failed: {0}")]
    WebSocket(#[from] WsError),

    /// The upstream TCP side failed mid-relay.
    #[error("tcp transport failed: {0}")]
    Tcp(#[from] io::Error),
}

/// How one pump terminated.
///
/// A pump has no other states: it runs until it terminates, termination is
/// final, and there is no retry.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The pump's source reached an orderly end: WebSocket close frame or
    /// end-of-stream, peer-initiated connection close, or TCP EOF.
    CleanClose,

    /// The sibling pump terminated first and tore the session down; this
    /// pump never observed an I/O outcome of its own.
    SessionClosed,

    /// A read or write on one of the pump's transports failed.
    Failed(RelayError),
}

impl RelayOutcome {
    /// True for every termination cause except a transport failure.
    pub fn is_clean(&self) -> bool {
        !matches!(self, RelayOutcome::Failed(_))
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayOutcome::CleanClose => write!(f, "clean close"),
            RelayOutcome::SessionClosed => write!(f, "closed by the other direction"),
            RelayOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// How a whole session ended, as reported by the session coordinator.
///
/// Exposing the termination causes as a value keeps the core observable
/// without requiring a specific logging backend.
#[derive(Debug)]
pub enum SessionEnd {
    /// The upstream dial failed; the client was notified once and no pump
    /// was ever started.
    DialFailed,

    /// Both pumps ran and reported completion.
    Relayed {
        /// Outcome of the client-to-upstream pump.
        client_to_upstream: RelayOutcome,
        /// Outcome of the upstream-to-client pump.
        upstream_to_client: RelayOutcome,
    },
}

// ── client → upstream ─────────────────────────────────────────────────────────

/// Pumps WebSocket messages from the client into the upstream TCP socket.
///
/// Only binary messages are forwarded; their payload is written verbatim.
/// Any other data message is logged and dropped without terminating the
/// pump.  Protocol ping frames are answered by the WebSocket layer itself,
/// so they are merely noted here.
///
/// On exit the upstream write half is shut down (the VNC server sees EOF)
/// and the shared teardown channel is signalled.
pub async fn relay_client_to_upstream<S, W>(
    mut client_rx: S,
    mut upstream_tx: W,
    session_id: &str,
    teardown_tx: broadcast::Sender<()>,
    mut teardown_rx: broadcast::Receiver<()>,
) -> RelayOutcome
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = loop {
        // Wait for the next client frame, or for the sibling pump to tear
        // the session down.  Both `next()` and `recv()` are cancel safe.
        let frame = tokio::select! {
            frame = client_rx.next() => frame,
            _ = teardown_rx.recv() => break RelayOutcome::SessionClosed,
        };

        match frame {
            Some(Ok(WsMessage::Binary(payload))) => {
                // `write_all` ensures the whole payload reaches the socket
                // even if the OS accepts only a partial write at first, so
                // byte order is preserved within this direction.
                if let Err(e) = upstream_tx.write_all(&payload).await {
                    break RelayOutcome::Failed(RelayError::Tcp(e));
                }
            }
            Some(Ok(WsMessage::Close(_))) => {
                debug!("session {session_id}: client sent close frame");
                break RelayOutcome::CleanClose;
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                // The protocol layer queues the pong reply itself; nothing
                // to forward.
                debug!("session {session_id}: websocket ping/pong");
            }
            Some(Ok(other)) => {
                // Text (or raw) frames have no place in the framebuffer
                // stream.  Drop them, keep the session alive.
                warn!(
                    "session {session_id}: dropped non-binary {} message",
                    message_kind(&other)
                );
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_))) => {
                // How an abrupt client disconnect surfaces from the read
                // side; the normal way a peer-initiated close is observed.
                debug!("session {session_id}: client websocket closed");
                break RelayOutcome::CleanClose;
            }
            Some(Err(e)) => break RelayOutcome::Failed(RelayError::WebSocket(e)),
            None => {
                debug!("session {session_id}: client stream ended");
                break RelayOutcome::CleanClose;
            }
        }
    };

    // Close what this direction owns, then release the sibling pump.  The
    // send fails only when the sibling has already terminated; either way
    // the session is coming down, so the results are ignored.
    let _ = upstream_tx.shutdown().await;
    let _ = teardown_tx.send(());
    outcome
}

// ── upstream → client ─────────────────────────────────────────────────────────

/// Pumps bytes from the upstream TCP socket to the client as binary
/// WebSocket messages.
///
/// TCP is a byte stream, so chunk boundaries carry no meaning: each read of
/// up to [`RELAY_CHUNK_SIZE`] bytes becomes one binary message, and only the
/// concatenation of payloads is significant.  A zero-byte read is upstream
/// EOF and ends the pump cleanly.
///
/// On exit the WebSocket sink is closed (the client receives a close frame)
/// and the shared teardown channel is signalled.
pub async fn relay_upstream_to_client<R, S>(
    mut upstream_rx: R,
    mut client_tx: S,
    session_id: &str,
    teardown_tx: broadcast::Sender<()>,
    mut teardown_rx: broadcast::Receiver<()>,
) -> RelayOutcome
where
    R: AsyncRead + Unpin,
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut chunk = vec![0u8; RELAY_CHUNK_SIZE];

    let outcome = loop {
        let read = tokio::select! {
            read = upstream_rx.read(&mut chunk) => read,
            _ = teardown_rx.recv() => break RelayOutcome::SessionClosed,
        };

        let n = match read {
            Ok(0) => {
                debug!("session {session_id}: upstream closed (EOF)");
                break RelayOutcome::CleanClose;
            }
            Ok(n) => n,
            Err(e) => break RelayOutcome::Failed(RelayError::Tcp(e)),
        };

        if let Err(e) = client_tx.send(WsMessage::Binary(chunk[..n].to_vec())).await {
            break match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
                    debug!("session {session_id}: client websocket closed");
                    RelayOutcome::CleanClose
                }
                other => RelayOutcome::Failed(RelayError::WebSocket(other)),
            };
        }
    };

    let _ = client_tx.close().await;
    let _ = teardown_tx.send(());
    outcome
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// Returns a short kind string for a WebSocket message, for log lines.
fn message_kind(msg: &WsMessage) -> &'static str {
    match msg {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "raw frame",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use futures_util::stream;
    use tokio::io::duplex;

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// In-memory Sink that records every message and whether it was closed.
    struct RecordingSink {
        sent: Arc<Mutex<Vec<WsMessage>>>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn new() -> (Self, Arc<Mutex<Vec<WsMessage>>>, Arc<AtomicBool>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                },
                sent,
                closed,
            )
        }
    }

    impl Sink<WsMessage> for RecordingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WsMessage) -> Result<(), WsError> {
            self.sent.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            self.closed.store(true, Ordering::Relaxed);
            Poll::Ready(Ok(()))
        }
    }

    /// Sink that fails every send with the given error constructor.
    struct FailingSink {
        make_error: fn() -> WsError,
    }

    impl Sink<WsMessage> for FailingSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Err((self.make_error)()))
        }

        fn start_send(self: Pin<&mut Self>, _item: WsMessage) -> Result<(), WsError> {
            Err((self.make_error)())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Err((self.make_error)()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Reader whose first poll fails with an I/O error.
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    fn teardown_pair() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        broadcast::channel(1)
    }

    fn concat_binary_payloads(messages: &[WsMessage]) -> Vec<u8> {
        messages
            .iter()
            .filter(|m| m.is_binary())
            .flat_map(|m| m.clone().into_data())
            .collect()
    }

    // ── client → upstream ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_binary_payloads_are_written_verbatim_in_order() {
        // Arrange: two binary frames, then end of stream.
        let frames = stream::iter(vec![
            Ok(WsMessage::Binary(vec![1, 2, 3])),
            Ok(WsMessage::Binary(vec![4, 5])),
        ]);
        let (upstream_tx, mut upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();

        // Act
        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        // Assert: the upstream side sees the exact payload concatenation.
        assert!(matches!(outcome, RelayOutcome::CleanClose));
        let mut received = Vec::new();
        upstream_far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_text_message_is_dropped_but_session_survives() {
        // Arrange: a text frame in the middle of binary traffic.
        let frames = stream::iter(vec![
            Ok(WsMessage::Binary(vec![1])),
            Ok(WsMessage::Text("not framebuffer data".to_string())),
            Ok(WsMessage::Binary(vec![2])),
        ]);
        let (upstream_tx, mut upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();

        // Act
        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        // Assert: the text payload never reaches the upstream socket and the
        // binary frame after it still does.
        assert!(matches!(outcome, RelayOutcome::CleanClose));
        let mut received = Vec::new();
        upstream_far.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_close_frame_terminates_pump_cleanly() {
        let frames = stream::iter(vec![Ok(WsMessage::Close(None))]);
        let (upstream_tx, mut upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();

        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::CleanClose));
        // The upstream write half must have been shut down: EOF, no bytes.
        let mut received = Vec::new();
        upstream_far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_peer_close_error_counts_as_clean_close() {
        let frames = stream::iter(vec![Err(WsError::ConnectionClosed)]);
        let (upstream_tx, _upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();

        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::CleanClose));
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn test_websocket_read_error_terminates_with_failure() {
        let frames = stream::iter(vec![Err(WsError::Io(io::Error::new(
            io::ErrorKind::Other,
            "boom",
        )))]);
        let (upstream_tx, _upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();

        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::WebSocket(_))
        ));
        assert!(!outcome.is_clean());
    }

    #[tokio::test]
    async fn test_tcp_write_error_terminates_with_failure() {
        // Arrange: drop the far end so writes fail with a broken pipe.
        let frames = stream::iter(vec![Ok(WsMessage::Binary(vec![1, 2, 3]))]);
        let (upstream_tx, upstream_far) = duplex(1);
        drop(upstream_far);
        let (tx, rx) = teardown_pair();

        let outcome = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::Failed(RelayError::Tcp(_))));
    }

    #[tokio::test]
    async fn test_teardown_signal_releases_blocked_client_pump() {
        // Arrange: a source that never yields, so the pump can only exit
        // through the teardown channel.
        let frames = stream::pending::<Result<WsMessage, WsError>>();
        let (upstream_tx, mut upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();
        let release = tx.clone();

        // Act: run the pump, then signal teardown from "the sibling".
        let pump = tokio::spawn(relay_client_to_upstream(frames, upstream_tx, "test", tx, rx));
        release.send(()).unwrap();
        let outcome = pump.await.unwrap();

        // Assert: the pump reports the shared closure and still shuts down
        // the upstream write half on its way out.
        assert!(matches!(outcome, RelayOutcome::SessionClosed));
        let mut received = Vec::new();
        upstream_far.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_client_pump_signals_teardown_on_exit() {
        let frames = stream::iter(vec![Ok(WsMessage::Close(None))]);
        let (upstream_tx, _upstream_far) = duplex(64);
        let (tx, rx) = teardown_pair();
        let mut sibling_rx = tx.subscribe();

        let _ = relay_client_to_upstream(frames, upstream_tx, "test", tx, rx).await;

        // The sibling's receiver must have a pending signal.
        assert!(sibling_rx.recv().await.is_ok());
    }

    // ── upstream → client ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_upstream_bytes_become_binary_messages() {
        // Arrange: write bytes into the pipe, then close the write side.
        let (mut far, upstream_rx) = duplex(64);
        far.write_all(&[0x41, 0x42]).await.unwrap();
        far.shutdown().await.unwrap();
        let (sink, sent, closed) = RecordingSink::new();
        let (tx, rx) = teardown_pair();

        // Act
        let outcome = relay_upstream_to_client(upstream_rx, sink, "test", tx, rx).await;

        // Assert: payload concatenation matches the byte stream, every
        // message is binary, and the sink was closed on the way out.
        assert!(matches!(outcome, RelayOutcome::CleanClose));
        let messages = sent.lock().unwrap();
        assert!(messages.iter().all(|m| m.is_binary()));
        assert_eq!(concat_binary_payloads(&messages), vec![0x41, 0x42]);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_immediate_eof_is_clean_with_no_messages() {
        let (far, upstream_rx) = duplex(64);
        drop(far);
        let (sink, sent, closed) = RecordingSink::new();
        let (tx, rx) = teardown_pair();

        let outcome = relay_upstream_to_client(upstream_rx, sink, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::CleanClose));
        assert!(sent.lock().unwrap().is_empty());
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_tcp_read_error_terminates_with_failure() {
        let (sink, _sent, _closed) = RecordingSink::new();
        let (tx, rx) = teardown_pair();

        let outcome = relay_upstream_to_client(FailingReader, sink, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::Failed(RelayError::Tcp(_))));
    }

    #[tokio::test]
    async fn test_websocket_write_error_terminates_with_failure() {
        let (mut far, upstream_rx) = duplex(64);
        far.write_all(&[1]).await.unwrap();
        let sink = FailingSink {
            make_error: || WsError::Io(io::Error::new(io::ErrorKind::Other, "sink gone")),
        };
        let (tx, rx) = teardown_pair();

        let outcome = relay_upstream_to_client(upstream_rx, sink, "test", tx, rx).await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed(RelayError::WebSocket(_))
        ));
    }

    #[tokio::test]
    async fn test_websocket_peer_close_on_write_is_clean() {
        let (mut far, upstream_rx) = duplex(64);
        far.write_all(&[1]).await.unwrap();
        let sink = FailingSink {
            make_error: || WsError::ConnectionClosed,
        };
        let (tx, rx) = teardown_pair();

        let outcome = relay_upstream_to_client(upstream_rx, sink, "test", tx, rx).await;

        assert!(matches!(outcome, RelayOutcome::CleanClose));
    }

    #[tokio::test]
    async fn test_teardown_signal_releases_blocked_upstream_pump() {
        // Arrange: keep the far end alive with nothing written, so the read
        // blocks until the teardown signal arrives.
        let (_far, upstream_rx) = duplex(64);
        let (sink, _sent, closed) = RecordingSink::new();
        let (tx, rx) = teardown_pair();
        let release = tx.clone();

        let pump = tokio::spawn(relay_upstream_to_client(upstream_rx, sink, "test", tx, rx));
        release.send(()).unwrap();
        let outcome = pump.await.unwrap();

        assert!(matches!(outcome, RelayOutcome::SessionClosed));
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_upstream_pump_signals_teardown_on_exit() {
        let (far, upstream_rx) = duplex(64);
        drop(far);
        let (sink, _sent, _closed) = RecordingSink::new();
        let (tx, rx) = teardown_pair();
        let mut sibling_rx = tx.subscribe();

        let _ = relay_upstream_to_client(upstream_rx, sink, "test", tx, rx).await;

        assert!(sibling_rx.recv().await.is_ok());
    }

    // ── Outcome taxonomy ──────────────────────────────────────────────────────

    #[test]
    fn test_clean_close_and_session_closed_are_clean() {
        assert!(RelayOutcome::CleanClose.is_clean());
        assert!(RelayOutcome::SessionClosed.is_clean());
    }

    #[test]
    fn test_failed_outcome_is_not_clean() {
        let outcome = RelayOutcome::Failed(RelayError::Tcp(io::Error::new(
            io::ErrorKind::Other,
            "x",
        )));
        assert!(!outcome.is_clean());
    }

    #[test]
    fn test_outcome_display_names_the_cause() {
        assert_eq!(RelayOutcome::CleanClose.to_string(), "clean close");
        assert_eq!(
            RelayOutcome::SessionClosed.to_string(),
            "closed by the other direction"
        );
        let failed = RelayOutcome::Failed(RelayError::Tcp(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(failed.to_string().starts_with("failed: "));
    }

    #[test]
    fn test_message_kind_names() {
        assert_eq!(message_kind(&WsMessage::Text("x".to_string())), "text");
        assert_eq!(message_kind(&WsMessage::Binary(vec![])), "binary");
        assert_eq!(message_kind(&WsMessage::Ping(vec![])), "ping");
        assert_eq!(message_kind(&WsMessage::Pong(vec![])), "pong");
        assert_eq!(message_kind(&WsMessage::Close(None)), "close");
    }
}
