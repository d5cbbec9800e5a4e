//! Container writer boundary.
//!
//! The recording sink multiplexes units into a container through these traits.
//! The box-level MP4 writer itself is supplied by the host; this crate ships
//! two implementations:
//!
//! - [`SampleLogFactory`]: a simple length-prefixed sample log on disk
//! - [`MemoryContainerFactory`]: keeps every file in memory, for tests
//!
//! Track layout is fixed: index [`VIDEO_TRACK`] is video, [`AUDIO_TRACK`] is
//! audio, and both are declared when the container is opened.

mod memory;
mod sample_log;

pub use memory::{MemoryContainerFactory, RecordedFile, RecordedSample};
pub use sample_log::{SampleLog, SampleLogFactory};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ContainerError;

/// Track index of the video track.
pub const VIDEO_TRACK: usize = 0;

/// Track index of the audio track.
pub const AUDIO_TRACK: usize = 1;

/// Video track declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrackFormat {
    /// Codec MIME type, e.g. `video/avc`.
    pub mime: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Sequence parameter set (`csd-0`).
    pub sps: Arc<[u8]>,
    /// Picture parameter set (`csd-1`).
    pub pps: Arc<[u8]>,
}

/// Audio track declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrackFormat {
    /// Codec MIME type, e.g. `audio/mp4a-latm`.
    pub mime: String,
    /// Sample rate in Hz.
    pub sample_rate_hz: u32,
    /// Channel count.
    pub channels: u16,
}

/// An open container file.
///
/// Dropping a writer without calling [`finish`](ContainerWriter::finish)
/// leaves the file without a trailer.
pub trait ContainerWriter: Send {
    /// Writes one sample into `track`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::TrackNotDeclared`] for an unknown track and
    /// [`ContainerError::Io`] if the write fails.
    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp: Duration,
        is_key_frame: bool,
    ) -> Result<(), ContainerError>;

    /// Writes the trailer and releases the file.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Io`] if the trailer cannot be written.
    fn finish(self: Box<Self>) -> Result<(), ContainerError>;
}

/// Opens container files.
pub trait ContainerFactory: Send + Sync {
    /// Creates `path` with a video and an audio track declared up front.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Io`] if the file cannot be created.
    fn open(
        &self,
        path: &Path,
        video: &VideoTrackFormat,
        audio: &AudioTrackFormat,
    ) -> Result<Box<dyn ContainerWriter>, ContainerError>;
}
