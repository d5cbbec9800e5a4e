//! Builder pattern for `StreamDistributor`.

use std::sync::Arc;

use crate::sink::Sink;
use crate::source::SourceConnector;
use crate::{event_callback, EventCallback, FanoutConfig, FanoutError, SessionEvent, StreamDistributor};

/// Builder for configuring a [`StreamDistributor`].
///
/// Use [`MediaFanout::builder()`] to create a new builder.
///
/// # Example
///
/// ```ignore
/// use media_fanout::{MediaFanout, RecordingSink, RelaySink, ChannelSink};
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel(64);
/// let recording = Arc::new(RecordingSink::new(container_factory));
///
/// let distributor = MediaFanout::builder()
///     .connector(rtsp_connector)
///     .add_sink_arc(recording.clone())
///     .add_sink(ChannelSink::new(tx))
///     .on_event(|e| tracing::warn!(?e, "session event"))
///     .build()?;
///
/// distributor.connect("rtsp://192.168.1.20:554/stream1")?;
/// recording.start("/var/recordings", "video/avc", 1920, 1080);
/// ```
///
/// [`MediaFanout::builder()`]: crate::MediaFanout::builder
#[must_use]
pub struct MediaFanoutBuilder {
    /// Opens upstream sessions.
    connector: Option<Arc<dyn SourceConnector>>,
    /// Sinks attached before the first session.
    sinks: Vec<Arc<dyn Sink>>,
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Distributor configuration.
    config: FanoutConfig,
}

impl Default for MediaFanoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFanoutBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            connector: None,
            sinks: Vec::new(),
            event_callback: None,
            config: FanoutConfig::default(),
        }
    }

    /// Set the connector used to open upstream sessions. Required.
    pub fn connector<C: SourceConnector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Add a sink that receives every session's units.
    ///
    /// Sinks are invoked in the order they were added.
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add a sink the caller keeps a handle to, e.g. to drive its controls.
    pub fn add_sink_arc(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include connection progress, sink errors and session end.
    /// The callback runs on the delivery thread and must not block.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom distributor configuration.
    pub fn with_config(mut self, config: FanoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the builder configuration.
    fn validate(&self) -> Result<(), FanoutError> {
        if self.connector.is_none() {
            return Err(FanoutError::NoConnector);
        }
        Ok(())
    }

    /// Builds the distributor. No session is started until
    /// [`StreamDistributor::connect()`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::NoConnector`] if no connector was set.
    pub fn build(self) -> Result<StreamDistributor, FanoutError> {
        self.validate()?;
        let connector = self.connector.ok_or(FanoutError::NoConnector)?;

        tracing::info!(
            sinks = self.sinks.len(),
            connect_timeout = ?self.config.connect_timeout,
            "distributor created"
        );
        Ok(StreamDistributor::new(
            connector,
            self.sinks,
            self.event_callback,
            self.config,
        ))
    }
}

/// Main entry point for media-fanout.
///
/// Use [`MediaFanout::builder()`] to start configuring a distributor.
pub struct MediaFanout;

impl MediaFanout {
    /// Creates a new builder for configuring a distributor.
    pub fn builder() -> MediaFanoutBuilder {
        MediaFanoutBuilder::new()
    }
}
