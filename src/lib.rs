//! vnc-web-bridge library crate.
//!
//! This crate provides a WebSocket-to-TCP relay that allows web browsers to
//! reach a plain-TCP remote framebuffer (VNC) server.  Browsers cannot open
//! raw TCP sockets, so a noVNC-style client connects here over WebSocket and
//! the bridge copies the binary byte stream to and from the real VNC endpoint.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (binary frames over WebSocket)
//!         ↕
//! [vnc-web-bridge]
//!   ├── domain/           Pure types: BridgeConfig, the error notice message
//!   ├── application/      Relay logic: the two directional pumps
//!   └── infrastructure/
//!         ├── ws_server/     WebSocket accept loop + session coordinator
//!         ├── upstream_conn/ TCP connection to the VNC endpoint
//!         └── config_file/   optional TOML config file loading
//!         ↕
//! VNC server (raw bytes over TCP)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies beyond `serde` (no I/O, no async).
//! - `application` depends on `domain` plus the transport traits it pumps
//!   between (`AsyncRead`/`AsyncWrite`, `Stream`/`Sink`), never on sockets.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tungstenite`.
//!
//! Keeping the pump logic behind transport traits means the relay semantics
//! can be unit tested with in-memory pipes, while the infrastructure layer
//! stays a thin wiring of real sockets onto those same functions.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: the bidirectional relay pumps.
pub mod application;

/// Infrastructure layer: WebSocket server, upstream TCP dial, config file.
pub mod infrastructure;
