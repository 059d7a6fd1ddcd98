//! TCP connection management for the upstream VNC server.
//!
//! Each browser WebSocket session gets its own TCP connection to the
//! upstream target.  The VNC server treats the bridge as just another
//! viewer; it never learns that a WebSocket is involved.
//!
//! # Portability note
//!
//! This module uses only the `tokio::net::TcpStream` API, which works
//! identically on Windows, Linux, and macOS.  There are no platform-specific
//! syscalls, and the connection attempt uses the platform stack's default
//! timeout (no extra deadline is layered on top).

use anyhow::Context;
use tokio::net::TcpStream;

/// A per-session TCP connection to the upstream VNC server.
///
/// The read and write halves are owned separately so that each can be moved
/// into one of the session's two relay pumps without shared ownership.
pub struct UpstreamConnection {
    /// Read half of the upstream TCP stream (upstream-to-client direction).
    pub read_half: tokio::net::tcp::OwnedReadHalf,
    /// Write half of the upstream TCP stream (client-to-upstream direction).
    pub write_half: tokio::net::tcp::OwnedWriteHalf,
}

impl UpstreamConnection {
    /// Opens a new TCP connection to the upstream server at `upstream_addr`.
    ///
    /// The address is a `host:port` string handed to the dial call
    /// unchanged: hostname resolution and address validation happen there
    /// and nowhere else.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established (the
    /// server is not running, the address does not resolve, or the attempt
    /// times out at the platform default).
    pub async fn connect(upstream_addr: &str) -> anyhow::Result<Self> {
        // `TcpStream::connect` performs the TCP three-way handshake
        // asynchronously, yielding to the runtime while it is in progress.
        let stream = TcpStream::connect(upstream_addr)
            .await
            .with_context(|| format!("failed to connect to upstream at {upstream_addr}"))?;

        // Split into independent read and write halves so we can pass each
        // to a separate relay pump without shared ownership.
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            read_half,
            write_half,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listening_socket_succeeds() {
        // Arrange: a real listener on an ephemeral port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Act
        let conn = UpstreamConnection::connect(&addr.to_string()).await;

        // Assert
        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_fails() {
        // Arrange: allocate a port, then free it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // Act
        let conn = UpstreamConnection::connect(&addr.to_string()).await;

        // Assert: the dial itself is the only validation there is.
        assert!(conn.is_err());
    }

    #[tokio::test]
    async fn test_halves_carry_bytes_independently() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let conn = UpstreamConnection::connect(&addr.to_string()).await.unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        // Act: write through the write half, echo back, read through the
        // read half.
        let mut write_half = conn.write_half;
        let mut read_half = conn.read_half;
        write_half.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server_side.write_all(b"pong").await.unwrap();
        read_half.read_exact(&mut buf).await.unwrap();

        // Assert
        assert_eq!(&buf, b"pong");
    }
}
