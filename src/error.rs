//! Error taxonomy for the stream pipeline.
//!
//! Connect and read failures are consumed by the capture loop's retry policy
//! and surface to the UI only as session state transitions. Control and
//! snapshot failures are returned synchronously to the caller.

use std::path::PathBuf;

/// Failure to establish a stream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("endpoint URI is not valid: {0}")]
    BadUri(String),

    #[error("host unreachable or connection refused: {0}")]
    Unreachable(String),

    #[error("stream authentication rejected")]
    AuthRejected,
}

/// Failure while reading from an established stream.
///
/// Always a reconnect trigger for the capture loop; the source never retries
/// internally.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("stream connection dropped: {0}")]
    Disconnected(String),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("no frame arrived within the read timeout")]
    Timeout,
}

/// Failure to persist a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("no frame available yet")]
    NoFrameAvailable,

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] image::ImageError),

    #[error("frame buffer does not match its dimensions")]
    MalformedFrame,
}

/// Operation invalid for the current session state.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("a capture session is already running")]
    AlreadyRunning,

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}
