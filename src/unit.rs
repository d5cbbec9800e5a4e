//! Encoded access unit with metadata.

use std::sync::Arc;
use std::time::Duration;

use crate::format::is_idr_access_unit;

/// Which elementary stream an access unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// H.264 video.
    Video,
    /// AAC audio.
    Audio,
}

impl TrackKind {
    /// Container track index for this kind: video is 0, audio is 1.
    pub fn track_index(self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// One encoded video frame or audio frame.
///
/// `MediaUnit` is the fundamental unit passed through the distributor. The
/// payload is stored in an `Arc<[u8]>` so every sink sees the same bytes
/// without copying; sinks only ever get `&MediaUnit`.
///
/// # Example
///
/// ```
/// use media_fanout::{MediaUnit, TrackKind};
/// use std::time::Duration;
///
/// let unit = MediaUnit::video(vec![0, 0, 0, 1, 0x65, 0x88], Duration::from_micros(33_366));
/// assert_eq!(unit.track, TrackKind::Video);
/// assert!(unit.is_key_frame);
///
/// let shared = unit.clone(); // cheap - shares the payload
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    /// Track this unit belongs to.
    pub track: TrackKind,

    /// Encoded payload bytes.
    pub payload: Arc<[u8]>,

    /// Presentation timestamp, microsecond resolution.
    ///
    /// Non-decreasing within a track; no ordering is implied across tracks.
    pub timestamp: Duration,

    /// `true` iff this is a video IDR access unit. Always `false` for audio.
    pub is_key_frame: bool,
}

impl MediaUnit {
    /// Creates a video unit, detecting the keyframe flag from the payload.
    pub fn video(payload: impl Into<Arc<[u8]>>, timestamp: Duration) -> Self {
        let payload = payload.into();
        let is_key_frame = is_idr_access_unit(&payload);
        Self {
            track: TrackKind::Video,
            payload,
            timestamp,
            is_key_frame,
        }
    }

    /// Creates an audio unit.
    pub fn audio(payload: impl Into<Arc<[u8]>>, timestamp: Duration) -> Self {
        Self {
            track: TrackKind::Audio,
            payload: payload.into(),
            timestamp,
            is_key_frame: false,
        }
    }

    /// Returns `true` if this is a video keyframe, i.e. a valid rotation point.
    pub fn is_video_keyframe(&self) -> bool {
        self.track == TrackKind::Video && self.is_key_frame
    }

    /// Presentation timestamp in whole microseconds.
    pub fn timestamp_us(&self) -> u64 {
        u64::try_from(self.timestamp.as_micros()).unwrap_or(u64::MAX)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_keyframe_detected() {
        let unit = MediaUnit::video(vec![0, 0, 0, 1, 0x65], Duration::ZERO);
        assert!(unit.is_key_frame);
        assert!(unit.is_video_keyframe());
    }

    #[test]
    fn test_video_p_frame() {
        let unit = MediaUnit::video(vec![0, 0, 0, 1, 0x41], Duration::ZERO);
        assert!(!unit.is_key_frame);
        assert!(!unit.is_video_keyframe());
    }

    #[test]
    fn test_audio_never_keyframe() {
        // Payload byte 4 looks like an IDR header but audio ignores it
        let unit = MediaUnit::audio(vec![0, 0, 0, 1, 0x65], Duration::ZERO);
        assert!(!unit.is_key_frame);
        assert!(!unit.is_video_keyframe());
    }

    #[test]
    fn test_track_index() {
        assert_eq!(TrackKind::Video.track_index(), 0);
        assert_eq!(TrackKind::Audio.track_index(), 1);
    }

    #[test]
    fn test_timestamp_us() {
        let unit = MediaUnit::audio(vec![1], Duration::from_micros(1_500_250));
        assert_eq!(unit.timestamp_us(), 1_500_250);
    }

    #[test]
    fn test_clone_shares_payload() {
        let unit = MediaUnit::audio(vec![1, 2, 3], Duration::ZERO);
        let cloned = unit.clone();
        assert!(Arc::ptr_eq(&unit.payload, &cloned.payload));
        assert_eq!(cloned.len(), 3);
        assert!(!cloned.is_empty());
    }
}
