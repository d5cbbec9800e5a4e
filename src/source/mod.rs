//! Session source boundary.
//!
//! A session source is the upstream producer: an RTSP-style client that
//! negotiates a session, reports codec parameters once, then delivers
//! timestamped video and audio access units until it disconnects or fails.
//! Session negotiation and depacketization live outside this crate; this
//! module defines the seam the distributor drives them through.
//!
//! The contract is blocking and single-threaded. The distributor calls
//! [`SourceConnector::connect`] and then [`SessionSource::run`] on its own
//! delivery thread, and `run` invokes the [`SourceListener`] for every event
//! on that same thread until the session is over. `run` must return promptly
//! once the [`StopSignal`] fires; sources that block on a socket read should
//! register a waker with [`StopSignal::on_stop`] (e.g. shutting the socket
//! down) to escape the wait.

mod locator;
mod mock;
mod stop;

pub use locator::{Locator, DEFAULT_RTSP_PORT};
pub use mock::{MockConnector, MockEvent, MockFeed};
pub use stop::StopSignal;

use std::sync::Arc;
use std::time::Duration;

use crate::format::CodecParameters;
use crate::SourceError;

/// Receives session events from a running source.
///
/// Implemented by the distributor's delivery bridge. Payload slices are only
/// valid for the duration of the call.
pub trait SourceListener {
    /// Codec parameters resolved. Called once, before any unit.
    fn on_connected(&mut self, params: CodecParameters);

    /// One H.264 access unit with its Annex-B start code.
    fn on_video_unit(&mut self, data: &[u8], timestamp: Duration);

    /// One AAC frame.
    fn on_audio_unit(&mut self, data: &[u8], timestamp: Duration);

    /// The upstream peer closed the session.
    fn on_disconnected(&mut self);

    /// The upstream peer rejected the credentials.
    fn on_unauthorized(&mut self);

    /// The session failed. `run` is expected to return shortly after.
    fn on_failed(&mut self, message: &str);
}

/// A connected session that can be driven to completion.
pub trait SessionSource: Send {
    /// Runs the session, reporting every event to `listener`.
    ///
    /// Returns when the peer disconnects, the session fails, or `stop` fires.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O or protocol failures that ended the session.
    fn run(
        &mut self,
        listener: &mut dyn SourceListener,
        stop: &StopSignal,
    ) -> Result<(), SourceError>;
}

/// Opens sessions against an upstream endpoint.
pub trait SourceConnector: Send + Sync {
    /// Connects to `locator`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connect`] if the endpoint is unreachable.
    fn connect(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn SessionSource>, SourceError>;
}

impl<T: SourceConnector + ?Sized> SourceConnector for Arc<T> {
    fn connect(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn SessionSource>, SourceError> {
        (**self).connect(locator, timeout)
    }
}
