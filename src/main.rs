//! vnc-web-bridge — entry point.
//!
//! This binary accepts WebSocket connections from web browsers and proxies
//! them to a plain-TCP remote framebuffer (VNC) server.  It relays the byte
//! stream opaquely in both directions; it does not parse or reframe the
//! framebuffer protocol.
//!
//! # Why a separate bridge process?
//!
//! Web browsers can only communicate over HTTP/WebSocket; they cannot open
//! raw TCP sockets.  VNC servers speak raw TCP.  This bridge sits between
//! the two so a noVNC-style web client can reach an unmodified VNC server.
//!
//! # Usage
//!
//! ```text
//! vnc-web-bridge [OPTIONS]
//!
//! Options:
//!   --ws-port  <PORT>   WebSocket listener port [default: 6080]
//!   --ws-bind  <IP>     WebSocket listener bind address [default: 0.0.0.0]
//!   --upstream <ADDR>   Upstream VNC server, host:port [default: 127.0.0.1:5900]
//!   --config   <PATH>   Optional TOML config file
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable              | Description                      |
//! |-----------------------|----------------------------------|
//! | `VNC_BRIDGE_WS_PORT`  | WebSocket listener port          |
//! | `VNC_BRIDGE_WS_BIND`  | WebSocket listener bind address  |
//! | `VNC_BRIDGE_UPSTREAM` | Upstream VNC address (host:port) |
//! | `VNC_BRIDGE_CONFIG`   | Path to the TOML config file     |
//!
//! # Precedence
//!
//! CLI flags win over config-file values, which win over the built-in
//! defaults.  A `--config` path that cannot be read or parsed is fatal:
//! the bridge refuses to start on half-understood configuration.
//!
//! # Architecture overview
//!
//! ```text
//! Web Browser  (binary frames over WebSocket, /websockify)
//!       ↕
//! vnc-web-bridge  ← this process
//!   domain/          BridgeConfig, the error notice message
//!   application/     the two directional relay pumps
//!   infrastructure/
//!     ws_server/     accept WebSocket connections, coordinate sessions
//!     upstream_conn/ TCP connection to the VNC server
//!       ↕
//! VNC server  (raw bytes over TCP, typically port 5900)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vnc_web_bridge::domain::BridgeConfig;
use vnc_web_bridge::infrastructure::config_file::FileConfig;
use vnc_web_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket-to-TCP bridge for VNC servers.
///
/// Accepts WebSocket connections from browsers on `/websockify` and relays
/// them to the configured upstream VNC server.
///
/// Every flag is optional; the effective value is CLI flag, then config
/// file, then built-in default.
#[derive(Debug, Parser)]
#[command(
    name = "vnc-web-bridge",
    about = "WebSocket-to-TCP relay so browser clients can reach a plain-TCP VNC endpoint",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server to listen on.
    ///
    /// Browsers connect to this port via WebSocket (ws://host:PORT/websockify).
    #[arg(long, env = "VNC_BRIDGE_WS_PORT")]
    ws_port: Option<u16>,

    /// IP address to bind the WebSocket server to.
    ///
    /// Use `0.0.0.0` to accept connections from any network interface, or
    /// `127.0.0.1` to accept only local connections.
    #[arg(long, env = "VNC_BRIDGE_WS_BIND")]
    ws_bind: Option<String>,

    /// Upstream VNC server as `host:port`.
    ///
    /// Hostnames are allowed; resolution happens at dial time, per session.
    #[arg(long, env = "VNC_BRIDGE_UPSTREAM")]
    upstream: Option<String>,

    /// Path to an optional TOML config file (keys: `port`, `bind`, `vnc`).
    #[arg(long, env = "VNC_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Merges CLI flags, the optional config file, and built-in defaults
    /// into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the named config file cannot be loaded, or if
    /// the resulting bind address string cannot be parsed.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };

        let defaults = BridgeConfig::default();

        let port = self
            .ws_port
            .or(file.port)
            .unwrap_or_else(|| defaults.ws_bind_addr.port());
        let bind = self
            .ws_bind
            .or(file.bind)
            .unwrap_or_else(|| defaults.ws_bind_addr.ip().to_string());
        let upstream_addr = self.upstream.or(file.vnc).unwrap_or(defaults.upstream_addr);

        let ws_bind_addr: SocketAddr = format!("{bind}:{port}")
            .parse()
            .with_context(|| format!("invalid WebSocket bind address: '{bind}:{port}'"))?;

        Ok(BridgeConfig {
            ws_bind_addr,
            upstream_addr,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// The `#[tokio::main]` attribute sets up the Tokio multi-threaded async
/// runtime.  All session and pump tasks run on this runtime's thread pool.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised to format log output.  The log
///    level is controlled by the `RUST_LOG` environment variable (e.g.,
///    `RUST_LOG=debug`).
/// 2. CLI arguments are parsed with `clap` and merged with the optional
///    config file into a [`BridgeConfig`].
/// 3. A Ctrl+C handler is spawned; it clears a shared `AtomicBool` when the
///    user interrupts the process.
/// 4. [`run_server`] binds the WebSocket port and accepts browser
///    connections until the shutdown flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `EnvFilter::try_from_default_env()` reads the `RUST_LOG` environment
    // variable.  If it is absent or invalid, we fall back to `info` level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Parse CLI arguments and assemble the config ───────────────────────────
    //
    // `Cli::parse()` reads from `std::env::args()` and exits with a usage
    // message if values are invalid.  Config errors are the one error class
    // that aborts the whole process; no session handling begins.
    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;

    info!(
        "vnc-web-bridge starting: ws={}, upstream={}",
        config.ws_bind_addr, config.upstream_addr
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    //
    // The accept loop checks this flag between accepts and exits cleanly
    // once it is cleared.  In-flight sessions run to their own completion;
    // there is no cancellation applied to an in-progress relay.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    run_server(config, running).await?;

    info!("vnc-web-bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
