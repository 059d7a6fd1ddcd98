//! Infrastructure layer for vnc-web-bridge.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browsers, opening TCP connections to the upstream VNC server, and
//! reading the optional config file.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener for browser WebSocket connections
//! - Performing the WebSocket HTTP upgrade handshake
//! - Opening the per-session TCP connection to the upstream target
//! - Spawning per-session Tokio tasks and joining the relay pumps
//! - Handling the graceful shutdown signal
//! - Loading `config.toml` when one is given
//!
//! # What does NOT belong here?
//!
//! - The relay semantics themselves (that is the application layer)
//! - Message and configuration type definitions (that is the domain layer)
//! - CLI parsing (that is done in `main.rs`)

pub mod config_file;
pub mod upstream_conn;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use ws_server::{run_server, BridgeServer};
