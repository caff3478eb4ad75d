//! Error types for the inspector proxy
//!
//! Failures scoped to one in-flight command reject only that command;
//! failures scoped to a connection fail every pending command on it and
//! deactivate dependent relays. Nothing in this crate terminates the host
//! process.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the inspector proxy
#[derive(Error, Debug)]
pub enum Error {
    // === Supervisor Errors ===
    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Debug target already running. Use restart() to replace it")]
    AlreadyRunning,

    #[error("No debug target running")]
    NotRunning,

    #[error("Debug target exited before its debug endpoint was discovered")]
    TargetExited { code: Option<i32> },

    #[error("Debug endpoint not discovered within {0} seconds")]
    DiscoveryTimeout(u64),

    // === Connection Errors ===
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Client transport error: {0}")]
    ClientTransport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected. Disconnect first")]
    AlreadyConnected,

    // === Protocol Errors ===
    #[error("'{method}' failed: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    #[error("'{method}' timed out after {secs} seconds")]
    CommandTimeout { method: String, secs: u64 },

    #[error("Malformed protocol frame: {0}")]
    MalformedFrame(String),

    // === Configuration Errors ===
    #[error("Runtime '{0}' not found in PATH")]
    RuntimeNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a protocol error carried back from the target
    pub fn protocol(method: &str, code: i64, message: &str) -> Self {
        Self::Protocol {
            method: method.to_string(),
            code,
            message: message.to_string(),
        }
    }
}
