//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from CLI arguments and an optional config file
//! (preferred for production) or from sensible defaults (useful for local
//! development and tests).
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the bridge easy to embed in tests
//! and future orchestration systems.  The infrastructure layer and `main.rs`
//! are responsible for populating the struct from CLI args, environment
//! variables, or the config file.

use std::net::SocketAddr;

/// HTTP path on which WebSocket upgrade requests are accepted.
///
/// Fixed, not configurable.  noVNC-family clients use this path by
/// convention; requests for any other path are answered with 404.
pub const WS_ENDPOINT_PATH: &str = "/websockify";

/// The single WebSocket sub-protocol token advertised in every upgrade
/// response.  noVNC clients offer `binary` to signal that they expect the
/// framebuffer byte stream as binary frames.
pub const WS_SUBPROTOCOL: &str = "binary";

/// Size in bytes of one TCP read in the upstream-to-client direction.
///
/// Each chunk read from the VNC socket becomes a single binary WebSocket
/// message, so this bounds the message size seen by the browser.
pub const RELAY_CHUNK_SIZE: usize = 4096;

/// All runtime configuration for the WebSocket bridge.
///
/// Build this struct once at startup and then wrap it in an `Arc` so it can
/// be shared cheaply across all session tasks.  It is never mutated after
/// construction.
///
/// # Example
///
/// ```rust
/// use vnc_web_bridge::domain::BridgeConfig;
///
/// // Defaults are suitable for local development:
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 6080);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    ///
    /// `0.0.0.0` accepts connections from any network interface (LAN +
    /// localhost).  Set to `127.0.0.1` to accept only local connections.
    pub ws_bind_addr: SocketAddr,

    /// The `host:port` of the upstream VNC server.
    ///
    /// Kept as a plain string rather than a parsed `SocketAddr` so that
    /// hostnames work: the value is handed to the dial call unchanged and is
    /// not validated beyond what that call itself enforces.
    pub upstream_addr: String,
}

impl Default for BridgeConfig {
    /// Returns a `BridgeConfig` suitable for local development without any
    /// external configuration.
    ///
    /// | Field         | Default           |
    /// |---------------|-------------------|
    /// | ws_bind_addr  | `0.0.0.0:6080`    |
    /// | upstream_addr | `127.0.0.1:5900`  |
    ///
    /// Port 6080 is the conventional websockify listen port; 5900 is VNC
    /// display `:0` on the same machine.
    fn default() -> Self {
        Self {
            // The `.parse().unwrap()` call here is safe because this is a
            // compile-time-known valid socket address string.
            ws_bind_addr: "0.0.0.0:6080".parse().unwrap(),
            upstream_addr: "127.0.0.1:5900".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
