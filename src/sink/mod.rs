//! Sink trait and implementations for access-unit consumers.
//!
//! A [`Sink`] is any consumer attached to the distributor. The crate
//! provides three built-in sinks:
//!
//! - [`RecordingSink`]: Multiplexes units into rotating container files
//! - [`RelaySink`]: Forwards units to a push-protocol endpoint
//! - [`ChannelSink`]: Sends units to a tokio mpsc channel
//!
//! You can implement the [`Sink`] trait for custom consumers like analyzers
//! or alternative transports.

mod channel;
mod recording;
mod relay;

pub use channel::ChannelSink;
pub use recording::RecordingSink;
pub use relay::RelaySink;

use std::sync::Arc;

use crate::{CodecParameters, EndReason, MediaUnit, SinkError};

/// A consumer of access units.
///
/// Sinks receive units from the distributor's delivery thread and process
/// them (write to a container, forward over the network, hand to a channel).
///
/// # Implementation Notes
///
/// - Methods take `&self`; guard mutable state with a single mutex per sink
/// - Every method is called on the delivery thread, except that operator
///   controls on the concrete sink may run concurrently from other threads
/// - `on_unit` blocks the whole session while it runs. That is the only
///   backpressure: a slow sink slows every sink
/// - `on_format` always arrives before the first `on_unit` of a session,
///   including for sinks attached mid-session
/// - Returning a fatal error (see [`SinkError::is_fatal`]) detaches the sink
///
/// # Example
///
/// ```
/// use media_fanout::{MediaUnit, Sink, SinkError};
///
/// struct PrintSink {
///     name: String,
/// }
///
/// impl Sink for PrintSink {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
///         println!("{} unit, {} bytes", unit.track, unit.len());
///         Ok(())
///     }
/// }
/// ```
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once per session with the resolved codec parameters.
    ///
    /// Default implementation does nothing.
    fn on_format(&self, _params: &Arc<CodecParameters>) {}

    /// Processes one access unit.
    ///
    /// Errors are isolated to this sink: the distributor emits a
    /// [`SessionEvent::SinkError`] and moves on to the next sink. Units are
    /// never retried.
    ///
    /// [`SessionEvent::SinkError`]: crate::SessionEvent::SinkError
    fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError>;

    /// Called once when the session ends, after the last unit.
    ///
    /// Default implementation does nothing.
    fn on_session_ended(&self, _reason: &EndReason) {}
}
