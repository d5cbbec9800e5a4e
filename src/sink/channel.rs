//! Tokio mpsc channel sink implementation.

use crate::sink::Sink;
use crate::{MediaUnit, SinkError};
use tokio::sync::mpsc;

/// A sink that sends access units to a tokio mpsc channel.
///
/// This is the way to tap the raw unit stream from async code (analysis,
/// thumbnailing, a custom transport). The send blocks the delivery thread
/// while the channel is full, so a slow receiver throttles the session like
/// any other sink.
///
/// `on_unit` uses `blocking_send`, which panics inside an async context.
/// The distributor always calls it from its own delivery thread.
///
/// # Example
///
/// ```
/// use media_fanout::{ChannelSink, MediaUnit};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<MediaUnit>(64);
/// let sink = ChannelSink::new(tx);
///
/// // Attach sink to a distributor...
/// // Then receive units:
/// // while let Some(unit) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<MediaUnit>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// A capacity of a few seconds of units (e.g. 64) keeps the session from
    /// stalling on short receiver hiccups.
    pub fn new(sender: mpsc::Sender<MediaUnit>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<MediaUnit>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
        self.sender
            .blocking_send(unit.clone())
            .map_err(|_| SinkError::ChannelClosed)
    }
}
