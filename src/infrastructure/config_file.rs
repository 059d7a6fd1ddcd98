//! TOML config file loading.
//!
//! Deployments that run the bridge as a system service keep a small
//! `config.toml` next to the service definition instead of passing CLI
//! flags.  The file provides the same two or three settings the CLI does:
//!
//! ```toml
//! # WebSocket listen port
//! port = 6080
//! # Listen interface (optional)
//! bind = "0.0.0.0"
//! # Upstream VNC server, host:port
//! vnc = "127.0.0.1:5900"
//! ```
//!
//! Every key is optional; `main.rs` merges file values with CLI flags and
//! built-in defaults (CLI wins over file, file wins over defaults).  A
//! config file that is named but cannot be read or parsed is fatal to the
//! whole process: the bridge refuses to start on half-understood
//! configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// On-disk configuration schema.
///
/// All fields are optional so a file can set just the values it cares
/// about; absent fields fall back to CLI flags or built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    /// WebSocket listen port.
    pub port: Option<u16>,
    /// IP address to bind the WebSocket listener to.
    pub bind: Option<String>,
    /// Upstream VNC server as a `host:port` string.
    pub vnc: Option<String>,
}

impl FileConfig {
    /// Reads and parses the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid TOML for this schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
