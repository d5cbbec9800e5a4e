//! Runtime events for monitoring sessions, relays and recordings.
//!
//! Events are notifications, not control flow. The distributor keeps running
//! after any event is emitted; they exist so an operator can log, update a UI
//! or decide whether to reconnect.

use std::path::PathBuf;
use std::sync::Arc;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The source closed the session.
    Disconnected,
    /// The operator called `disconnect()`.
    Stopped,
    /// The source rejected the credentials.
    Unauthorized,
    /// The source failed mid-session.
    Failed(String),
    /// The source could not be reached at all. No units were delivered.
    ConnectFailed(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected by source"),
            Self::Stopped => f.write_str("stopped by operator"),
            Self::Unauthorized => f.write_str("unauthorized"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
            Self::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
        }
    }
}

/// Session lifecycle events emitted by the distributor.
///
/// # Example
///
/// ```
/// use media_fanout::SessionEvent;
///
/// fn handle_event(event: SessionEvent) {
///     match event {
///         SessionEvent::Connecting { locator } => eprintln!("connecting to {locator}"),
///         SessionEvent::Connected { width, height } => eprintln!("format {width}x{height}"),
///         SessionEvent::Unauthorized => eprintln!("source rejected credentials"),
///         SessionEvent::SessionEnded { reason } => eprintln!("session ended: {reason}"),
///         SessionEvent::SinkError { sink_name, error } => eprintln!("{sink_name}: {error}"),
///         SessionEvent::SinkDetached { sink_name, error } => {
///             eprintln!("{sink_name} detached: {error}")
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session is being opened.
    Connecting {
        /// Locator being connected to.
        locator: String,
    },

    /// The source connected and codec parameters were resolved.
    Connected {
        /// Video width from the source.
        width: u32,
        /// Video height from the source.
        height: u32,
    },

    /// The source reported an authorization failure.
    Unauthorized,

    /// The session ended. No more units will be delivered for it.
    SessionEnded {
        /// Why the session ended.
        reason: EndReason,
    },

    /// A sink returned an error for one unit. Delivery continues.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A sink returned a fatal error and was detached from the distributor.
    SinkDetached {
        /// Name of the detached sink.
        sink_name: String,
        /// The fatal error.
        error: String,
    },
}

/// Callback type for receiving session events.
///
/// Register one via [`MediaFanoutBuilder::on_event()`].
///
/// [`MediaFanoutBuilder::on_event()`]: crate::MediaFanoutBuilder::on_event
pub type EventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use media_fanout::{event_callback, SessionEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(SessionEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Connection-health notifications from the push transport.
///
/// The relay sink forwards these unchanged to its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The transport began connecting.
    ConnectionStarted {
        /// Remote URL.
        url: String,
    },
    /// The transport finished the handshake.
    ConnectionSuccess,
    /// The transport could not connect. The relay resets itself to stopped.
    ConnectionFailed {
        /// Description from the transport.
        reason: String,
    },
    /// The connection dropped. The relay resets itself to stopped.
    Disconnected,
    /// The endpoint rejected the credentials.
    AuthError,
    /// The endpoint accepted the credentials.
    AuthSuccess,
    /// The transport measured a new outgoing bitrate.
    NewBitrate {
        /// Bits per second.
        bits_per_second: u64,
    },
}

impl RelayEvent {
    /// Returns `true` for events after which the connection is gone.
    pub fn ends_connection(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Disconnected)
    }
}

/// Callback type for relay connection-health notifications.
pub type HealthCallback = Arc<dyn Fn(RelayEvent) + Send + Sync>;

/// Creates a [`HealthCallback`] from a closure.
pub fn health_callback<F>(f: F) -> HealthCallback
where
    F: Fn(RelayEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Recording segment lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// A new segment file was opened.
    SegmentOpened {
        /// Path of the new file.
        path: PathBuf,
    },
    /// A segment file was finalized (trailer written, handle closed).
    SegmentFinalized {
        /// Path of the finished file.
        path: PathBuf,
        /// Number of samples written to the video track.
        video_samples: u64,
        /// Number of samples written to the audio track.
        audio_samples: u64,
    },
    /// A write failed and the segment was abandoned.
    WriteFailed {
        /// Path of the abandoned file.
        path: PathBuf,
        /// Description of the failure.
        error: String,
    },
}

/// Callback type for recording segment notifications.
pub type RecordingCallback = Arc<dyn Fn(RecordingEvent) + Send + Sync>;
