//! Error types for the harness.
//!
//! Per-event sink failures ([`SinkError`]) are recoverable and never cross a
//! batch boundary. [`CaptureError`] and [`ConfigError`] are startup failures:
//! the CLI reports them and exits before any workload runs.

use thiserror::Error;

/// Failure reported by an [`EventSink`](crate::sink::EventSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is not initialized")]
    NotInitialized,

    #[error("sink has already been shut down")]
    ShutDown,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("event rejected: {0}")]
    Rejected(String),

    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure while arming the diagnostic capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("diagnostic capture is already installed in this process")]
    AlreadyInstalled,

    #[error("failed to register handler for {signal}: {source}")]
    Register {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create wake pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("signal-triggered capture is not supported on this platform")]
    Unsupported,
}

/// Invalid harness configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    EmptyBatch,

    #[error("dump capacity must be at least 1 byte")]
    EmptyDumpBuffer,

    #[error("event name must not be empty")]
    EmptyEventName,
}
