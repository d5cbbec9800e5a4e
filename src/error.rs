//! Error types for media-fanout.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`FanoutError`]): Reject an operator call (connect, build)
//! - **Sink errors** ([`SinkError`]): Returned from a sink's write path and
//!   surfaced via [`EventCallback`](crate::EventCallback); they never end the session
//!
//! The boundary errors ([`SourceError`], [`ContainerError`], [`PushError`]) are
//! what external collaborators return to this crate.

use std::path::PathBuf;

/// Fatal errors returned from operator-facing calls.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The locator could not be parsed into host and port.
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator {
        /// The locator as given.
        locator: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A session is still running; call `disconnect()` first.
    #[error("a session is already active for {locator}")]
    SessionActive {
        /// Locator of the running session.
        locator: String,
    },

    /// `connect()` was called from the delivery thread itself.
    #[error("connect() cannot be called from the session delivery thread")]
    ReentrantConnect,

    /// No source connector was configured on the builder.
    #[error("no source connector configured - use connector() before build()")]
    NoConnector,

    /// The delivery thread could not be spawned.
    #[error("failed to spawn delivery thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The delivery thread panicked while running a session.
    #[error("delivery thread panicked")]
    WorkerPanicked,
}

/// Failures reported by a session source.
///
/// Any of these ends the session; they are never retried.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The endpoint could not be reached within the connect timeout.
    #[error("cannot connect to {host}:{port}: {reason}")]
    Connect {
        /// Host of the endpoint.
        host: String,
        /// Port of the endpoint.
        port: u16,
        /// Description of the failure.
        reason: String,
    },

    /// Socket I/O failed mid-session.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The upstream peer violated the session protocol.
    #[error("source protocol error: {0}")]
    Protocol(String),
}

/// Failures reported by a container writer.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The underlying file write failed (disk full, I/O error).
    #[error("container I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sample was written to a track index that was never declared.
    #[error("track {track} was not declared at open time")]
    TrackNotDeclared {
        /// The offending track index.
        track: usize,
    },

    /// A sample was written before the container was started.
    #[error("container not ready for samples")]
    NotReady,

    /// A sample was written after the container was finalized.
    #[error("container already closed")]
    Closed,
}

impl ContainerError {
    /// Returns `true` if this error indicates a caller sequencing bug rather
    /// than an I/O failure.
    pub fn is_sequencing(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Failures reported by a push-protocol client.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The client has no live connection.
    #[error("push client not connected")]
    NotConnected,

    /// The transport rejected the data.
    #[error("push transport error: {0}")]
    Transport(String),
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors are isolated: the distributor emits
/// [`SessionEvent::SinkError`] and keeps delivering to the other sinks.
/// Fatal errors (see [`SinkError::is_fatal`]) additionally detach the sink.
///
/// [`SessionEvent::SinkError`]: crate::SessionEvent::SinkError
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing to the current container file failed. The file is abandoned.
    #[error("container write failed: {path}: {source}")]
    ContainerWrite {
        /// Path of the abandoned file.
        path: PathBuf,
        /// The underlying container error.
        #[source]
        source: ContainerError,
    },

    /// File system error outside the container (e.g. creating the output directory).
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted out of order (unopened container, undeclared
    /// track, unit before format). This is a programming-contract violation.
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// The push client rejected a send.
    #[error("relay send failed: {0}")]
    Push(#[from] PushError),

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a sequencing error with the given description.
    pub fn sequencing(msg: impl Into<String>) -> Self {
        Self::Sequencing(msg.into())
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }

    /// Maps a container error on `path` into a sink error.
    ///
    /// Sequencing-class container errors become [`SinkError::Sequencing`].
    pub fn container(path: impl Into<PathBuf>, source: ContainerError) -> Self {
        let path = path.into();
        if source.is_sequencing() {
            Self::Sequencing(format!("{}: {source}", path.display()))
        } else {
            Self::ContainerWrite { path, source }
        }
    }

    /// Returns `true` if the sink can no longer be trusted with units.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Sequencing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_error_display() {
        let err = FanoutError::SessionActive {
            locator: "rtsp://cam:554/live".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "a session is already active for rtsp://cam:554/live"
        );
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Connect {
            host: "10.0.0.2".to_string(),
            port: 554,
            reason: "timed out".to_string(),
        };
        assert_eq!(err.to_string(), "cannot connect to 10.0.0.2:554: timed out");
    }

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_container_io_maps_to_write_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = SinkError::container("/tmp/a.mp4", ContainerError::Io(io_err));
        assert!(matches!(err, SinkError::ContainerWrite { .. }));
        assert!(err.to_string().contains("/tmp/a.mp4"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_container_sequencing_maps_to_fatal() {
        let err = SinkError::container("/tmp/a.mp4", ContainerError::TrackNotDeclared { track: 2 });
        assert!(matches!(err, SinkError::Sequencing(_)));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("track 2"));
    }

    #[test]
    fn test_push_error_converts() {
        let err: SinkError = PushError::NotConnected.into();
        assert_eq!(err.to_string(), "relay send failed: push client not connected");
    }
}
