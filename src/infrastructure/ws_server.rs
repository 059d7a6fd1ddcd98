//! WebSocket server: accept loop and per-session relay coordination.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session on the fixed
//!    `/websockify` path, always advertising the `binary` sub-protocol.
//! 4. Opening a corresponding TCP connection to the upstream VNC server.
//! 5. Running the session's two relay pumps (client-to-upstream and
//!    upstream-to-client) and waiting for both to finish.
//! 6. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each browser session runs in its own Tokio task.  The accept loop never
//! blocks on a session's lifetime: it accepts a connection and immediately
//! spawns a new task for it before accepting the next one.  There is no
//! session pool or admission limit; concurrent sessions are bounded only by
//! available memory and the OS's TCP stack.
//!
//! # Session teardown
//!
//! The coordinator waits for *both* pumps, order-independent.  Each pump
//! closes the transport halves it owns and wakes its sibling through the
//! session's teardown channel (see `application::relay`), so by the time the
//! join returns, both transports are fully closed under every exit path:
//! dial failure, pump failure, or a clean close on either side.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        Message as WsMessage,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::application::relay::{
    relay_client_to_upstream, relay_upstream_to_client, SessionEnd,
};
use crate::domain::config::{BridgeConfig, WS_ENDPOINT_PATH, WS_SUBPROTOCOL};
use crate::domain::messages::ErrorNotice;
use crate::infrastructure::upstream_conn::UpstreamConnection;

// ── Public API ────────────────────────────────────────────────────────────────

/// A bound but not yet serving bridge listener.
///
/// Splitting bind from serve lets tests bind port `0` and read the actual
/// address before the accept loop starts, and lets a host-process wrapper
/// treat "start listening" and "stop listening" as plain operations.
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<BridgeConfig>,
}

impl BridgeServer {
    /// Binds the WebSocket TCP listener on `config.ws_bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound (e.g., the port is
    /// already in use or the process lacks permission to bind).
    pub async fn bind(config: BridgeConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.ws_bind_addr)
            .await
            .with_context(|| {
                format!(
                    "failed to bind WebSocket listener on {}",
                    config.ws_bind_addr
                )
            })?;

        // Port 0 requests an ephemeral port, so read back what we got.
        let local_addr = listener
            .local_addr()
            .context("failed to read bound listener address")?;

        info!(
            "WebSocket bridge listening on {local_addr}, upstream {}",
            config.upstream_addr
        );

        Ok(Self {
            listener,
            local_addr,
            // `Arc` so the config can be shared cheaply across many session
            // tasks without copying; it is never mutated after startup.
            config: Arc::new(config),
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until `running` is set to `false`.
    ///
    /// Each accepted connection is handed off to a dedicated Tokio task so
    /// that one slow client never blocks others.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        loop {
            // Check the shutdown flag before each accept attempt.
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Use a short timeout on `accept()` so the loop can periodically
            // check the `running` flag even when no browsers are connecting.
            let accept_result = timeout(Duration::from_millis(200), self.listener.accept()).await;

            match accept_result {
                Ok(Ok((stream, peer_addr))) => {
                    info!("new client connection from {peer_addr}");
                    let cfg = Arc::clone(&self.config);

                    // `tokio::spawn` is non-blocking: it queues the session
                    // task and returns immediately, so the accept loop is
                    // never delayed by session I/O.
                    tokio::spawn(async move {
                        handle_session(stream, peer_addr, cfg).await;
                    });
                }
                Ok(Err(e)) => {
                    // Transient accept error (e.g., too many open file
                    // descriptors).  Log it and keep accepting.
                    error!("accept error: {e}");
                }
                Err(_) => {
                    // Timeout, no new connection in the last 200 ms.  Loop
                    // back to check the `running` flag.
                }
            }
        }

        Ok(())
    }
}

/// Binds and serves in one call.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(config: BridgeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    BridgeServer::bind(config).await?.serve(running).await
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Top-level handler for a single browser WebSocket session.
///
/// Wraps [`run_session`] and logs the outcome.  This function is the entry
/// point for each per-session Tokio task spawned by the accept loop.
async fn handle_session(raw_stream: TcpStream, peer_addr: SocketAddr, config: Arc<BridgeConfig>) {
    match run_session(raw_stream, peer_addr, config).await {
        Ok(SessionEnd::DialFailed) => {
            info!("session {peer_addr} ended: upstream unreachable, client notified");
        }
        Ok(SessionEnd::Relayed {
            client_to_upstream,
            upstream_to_client,
        }) => {
            if client_to_upstream.is_clean() && upstream_to_client.is_clean() {
                info!(
                    "session {peer_addr} ended: client-to-upstream {client_to_upstream}, \
                     upstream-to-client {upstream_to_client}"
                );
            } else {
                warn!(
                    "session {peer_addr} ended with transport failure: \
                     client-to-upstream {client_to_upstream}, \
                     upstream-to-client {upstream_to_client}"
                );
            }
        }
        Err(e) => warn!("session {peer_addr} aborted: {e:#}"),
    }
}

/// Runs the complete lifecycle of a single bridge session.
///
/// This function:
///
/// 1. Completes the WebSocket HTTP upgrade handshake with the browser.
/// 2. Dials the upstream VNC server over TCP.  On dial failure it sends the
///    one structured error notice, closes the WebSocket, and returns
///    without starting any pump (no retry).
/// 3. Splits both transports and starts exactly two relay pumps.
/// 4. Waits for *both* pumps to report completion, then returns their
///    outcomes.
///
/// By the time this returns, both transports are closed: each pump closes
/// the halves it owns on exit, and the dial-failure path closes the
/// WebSocket itself.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails or a pump task
/// panics; relay-phase transport failures are reported inside
/// [`SessionEnd`], not as errors.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<BridgeConfig>,
) -> anyhow::Result<SessionEnd> {
    // ── Step 1: Complete the WebSocket handshake ──────────────────────────────
    //
    // `accept_hdr_async` reads the browser's HTTP Upgrade request, lets the
    // callback vet the path and stamp the sub-protocol, and sends the
    // "101 Switching Protocols" response.
    let mut ws_stream = accept_hdr_async(raw_stream, upgrade_callback)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    info!("WebSocket session established: {peer_addr}");

    // ── Step 2: Dial the upstream VNC server ──────────────────────────────────
    let upstream = match UpstreamConnection::connect(&config.upstream_addr).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("session {peer_addr}: {e:#}");
            send_dial_failure(&mut ws_stream, peer_addr).await;
            return Ok(SessionEnd::DialFailed);
        }
    };

    debug!(
        "session {peer_addr}: connected to upstream at {}",
        config.upstream_addr
    );

    // ── Step 3: Split both transports into their halves ───────────────────────
    //
    // Each pump owns one read side and one write side; concurrent read and
    // write on one transport is covered by the transports' own contracts
    // (tungstenite's split sink/stream, tokio's TCP halves).
    let (ws_tx, ws_rx) = ws_stream.split();
    let (upstream_rx, upstream_tx) = (upstream.read_half, upstream.write_half);

    // Session identifier string used in log messages.
    let session_id = peer_addr.to_string();

    // The shared teardown channel: whichever pump terminates first signals
    // it, releasing the sibling's blocked read.  Both receivers must exist
    // before either pump is spawned; a receiver subscribed later could miss
    // a signal from a pump that terminated immediately.
    let (teardown_tx, teardown_rx_a) = broadcast::channel(1);
    let teardown_rx_b = teardown_tx.subscribe();

    // ── Step 4: Run the two pumps until both complete ─────────────────────────
    let client_to_upstream_task = tokio::spawn({
        let session_id = session_id.clone();
        let teardown_tx = teardown_tx.clone();
        async move {
            relay_client_to_upstream(ws_rx, upstream_tx, &session_id, teardown_tx, teardown_rx_a)
                .await
        }
    });

    let upstream_to_client_task = tokio::spawn(async move {
        relay_upstream_to_client(upstream_rx, ws_tx, &session_id, teardown_tx, teardown_rx_b)
            .await
    });

    // Wait for both pumps, order-independent.  `tokio::join!` only returns
    // once every session task has retired.
    let (client_to_upstream, upstream_to_client) =
        tokio::join!(client_to_upstream_task, upstream_to_client_task);

    Ok(SessionEnd::Relayed {
        client_to_upstream: client_to_upstream
            .context("client-to-upstream relay task panicked")?,
        upstream_to_client: upstream_to_client
            .context("upstream-to-client relay task panicked")?,
    })
}

// ── Handshake policy ──────────────────────────────────────────────────────────

/// Vets the upgrade request and stamps the response headers.
///
/// Policy: only the fixed `/websockify` path upgrades; every other path is
/// answered with 404 and the request is dropped.  All origins are accepted
/// (deliberate permissiveness for browser clients served from anywhere, not
/// a security gate).  The response always advertises the single supported
/// sub-protocol token, `binary`, which noVNC-family clients offer.
fn upgrade_callback(req: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() != WS_ENDPOINT_PATH {
        warn!(
            "rejecting upgrade request for unknown path {}",
            req.uri().path()
        );
        let mut not_found = ErrorResponse::new(Some("no such endpoint".to_string()));
        *not_found.status_mut() = StatusCode::NOT_FOUND;
        return Err(not_found);
    }

    response.headers_mut().append(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(WS_SUBPROTOCOL),
    );
    Ok(response)
}

// ── Dial-failure notification ─────────────────────────────────────────────────

/// Sends the single `{"error":"connect failed"}` notice and closes the
/// WebSocket.
///
/// Delivery failures are only logged: the client is going away either way.
async fn send_dial_failure(ws_stream: &mut WebSocketStream<TcpStream>, peer_addr: SocketAddr) {
    match serde_json::to_string(&ErrorNotice::connect_failed()) {
        Ok(json) => {
            if let Err(e) = ws_stream.send(WsMessage::Text(json)).await {
                debug!("session {peer_addr}: could not deliver dial-failure notice: {e}");
            }
        }
        Err(e) => {
            error!("session {peer_addr}: failed to serialize dial-failure notice: {e}");
        }
    }
    let _ = ws_stream.close(None).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(path: &str) -> Request {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn test_upgrade_on_websockify_path_is_accepted() {
        // Arrange
        let req = upgrade_request("/websockify");
        let response = Response::new(());

        // Act
        let result = upgrade_callback(&req, response);

        // Assert
        assert!(result.is_ok());
    }

    #[test]
    fn test_upgrade_response_advertises_binary_subprotocol() {
        let req = upgrade_request("/websockify");
        let response = Response::new(());

        let accepted = upgrade_callback(&req, response).unwrap();

        let proto = accepted
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .expect("sub-protocol header must be present");
        assert_eq!(proto, "binary");
    }

    #[test]
    fn test_upgrade_on_unknown_path_is_rejected_with_404() {
        let req = upgrade_request("/not-websockify");
        let response = Response::new(());

        let rejected = upgrade_callback(&req, response).unwrap_err();

        assert_eq!(rejected.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upgrade_on_root_path_is_rejected() {
        let req = upgrade_request("/");
        let response = Response::new(());

        assert!(upgrade_callback(&req, response).is_err());
    }
}
