//! The browser-facing notification message.
//!
//! The bridge relays framebuffer bytes opaquely, so there is almost no
//! application-level protocol between the browser and the bridge.  The one
//! exception: when the upstream TCP dial fails, the bridge tells the browser
//! why the session is ending before closing the WebSocket.
//!
//! # Wire format
//!
//! A single JSON object sent as a WebSocket text frame:
//!
//! ```json
//! {"error":"connect failed"}
//! ```
//!
//! noVNC-family clients look for an `error` key on a text frame to surface a
//! connection failure to the user.  No other application-level messages are
//! defined; everything else on the wire is opaque binary payload.

use serde::{Deserialize, Serialize};

/// A structured error notification sent to the browser over the WebSocket.
///
/// Sent exactly once, only when the upstream dial fails, while the WebSocket
/// is still open.  The session ends immediately afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Short human-readable description of the failure.
    pub error: String,
}

impl ErrorNotice {
    /// The notice sent when the upstream VNC server cannot be reached.
    pub fn connect_failed() -> Self {
        Self {
            error: "connect failed".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_serializes_to_exact_wire_form() {
        // Arrange
        let notice = ErrorNotice::connect_failed();

        // Act
        let json = serde_json::to_string(&notice).unwrap();

        // Assert: clients match on this exact shape, so it must not drift.
        assert_eq!(json, r#"{"error":"connect failed"}"#);
    }

    #[test]
    fn test_notice_round_trips_through_json() {
        let original = ErrorNotice::connect_failed();
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ErrorNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_notice_with_custom_text_keeps_single_error_key() {
        let notice = ErrorNotice {
            error: "something else".to_string(),
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert_eq!(json, r#"{"error":"something else"}"#);
    }
}
