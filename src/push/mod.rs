//! Push-protocol client boundary.
//!
//! The relay sink forwards units to a remote broadcast endpoint through a
//! [`PushClient`]. The wire protocol (RTMP handshake, chunking) belongs to
//! the client implementation; this crate only sequences calls into it.
//!
//! A client reports connection health asynchronously through the
//! [`HealthCallback`] it was created with. The callback may fire on any
//! thread, including from inside one of the client's own methods.

mod mock;

pub use mock::{ConnectBehavior, MockPushClient, MockPushConnector, PushCall};

use std::sync::Arc;
use std::time::Duration;

use crate::{HealthCallback, PushError, VideoCodec};

/// A push-protocol connection.
pub trait PushClient: Send + Sync {
    /// Announces the video stream format. Called before [`connect`](Self::connect).
    fn set_video_format(&self, codec: VideoCodec, width: u32, height: u32, frame_rate: u32);

    /// Restricts the connection to video only.
    fn set_video_only(&self, video_only: bool);

    /// Starts connecting. Returns immediately; the outcome arrives through
    /// the health callback.
    fn connect(&self, url: &str);

    /// Sends the video descriptor (SPS and PPS).
    ///
    /// # Errors
    ///
    /// Returns a [`PushError`] if the transport rejects it.
    fn set_video_descriptor(&self, sps: &[u8], pps: &[u8]) -> Result<(), PushError>;

    /// Sends the audio descriptor.
    ///
    /// # Errors
    ///
    /// Returns a [`PushError`] if the transport rejects it.
    fn set_audio_descriptor(&self, sample_rate_hz: u32, is_stereo: bool) -> Result<(), PushError>;

    /// Sends one video access unit.
    ///
    /// # Errors
    ///
    /// Returns a [`PushError`] if the transport rejects it.
    fn send_video(
        &self,
        payload: &[u8],
        timestamp: Duration,
        is_key_frame: bool,
    ) -> Result<(), PushError>;

    /// Sends one audio frame.
    ///
    /// # Errors
    ///
    /// Returns a [`PushError`] if the transport rejects it.
    fn send_audio(&self, payload: &[u8], timestamp: Duration) -> Result<(), PushError>;

    /// Tears the connection down.
    fn disconnect(&self);
}

/// Creates push clients.
///
/// Every relay start gets a fresh client bound to its own health callback.
pub trait PushConnector: Send + Sync {
    /// Creates an unconnected client that reports to `health`.
    fn create(&self, health: HealthCallback) -> Arc<dyn PushClient>;
}
