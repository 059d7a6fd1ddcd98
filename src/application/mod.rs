//! Application layer for vnc-web-bridge.
//!
//! The application layer holds the relay logic: it knows *what* a session
//! does (pump bytes in both directions until one side goes away, then tear
//! everything down exactly once), but delegates *how* the transports are
//! created to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - The two directional pumps (client-to-upstream and upstream-to-client)
//! - The relay outcome taxonomy (`RelayOutcome`, `RelayError`, `SessionEnd`)
//! - The shared-teardown contract between the two pumps of one session
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (that is infrastructure)
//! - The WebSocket handshake (handled by tokio-tungstenite in ws_server)
//! - Configuration parsing (that is done in `main.rs`)

pub mod relay;

// Re-export so callers can write `application::relay_client_to_upstream`.
pub use relay::{
    relay_client_to_upstream, relay_upstream_to_client, RelayError, RelayOutcome, SessionEnd,
};
