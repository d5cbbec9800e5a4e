//! Configuration types for the distributor and its sinks.

use std::time::Duration;

/// Video codecs the push relay can announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    /// H.264 / AVC. The only codec the upstream source delivers.
    #[default]
    H264,
}

impl VideoCodec {
    /// Returns the MIME type used when declaring a container track.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
        }
    }
}

/// Configuration for the stream distributor.
///
/// Use [`FanoutConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use media_fanout::FanoutConfig;
/// use std::time::Duration;
///
/// let config = FanoutConfig {
///     connect_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Timeout passed to the source connector when opening a session.
    ///
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Emit a debug log line every this many delivered units.
    ///
    /// Default: 50
    pub stats_log_interval: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            stats_log_interval: 50,
        }
    }
}

/// Configuration for the recording sink.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Extension appended to every segment file name (without the dot).
    ///
    /// Default: `"mp4"`
    pub file_extension: String,

    /// `chrono` format string for segment file names.
    ///
    /// Default: `"%Y-%m-%d-%H-%M-%S"`
    pub file_name_format: String,

    /// MIME type declared for the audio track.
    ///
    /// Default: `"audio/mp4a-latm"` (AAC)
    pub audio_mime: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            file_extension: "mp4".to_string(),
            file_name_format: "%Y-%m-%d-%H-%M-%S".to_string(),
            audio_mime: "audio/mp4a-latm".to_string(),
        }
    }
}

/// Configuration for the relay sink.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Codec announced to the push endpoint.
    pub video_codec: VideoCodec,

    /// Frame rate announced to the push endpoint.
    ///
    /// Default: 30
    pub frame_rate: u32,

    /// Resolution announced when the relay starts before format is known.
    ///
    /// Default: 1280x720
    pub fallback_resolution: (u32, u32),
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            frame_rate: 30,
            fallback_resolution: (1280, 720),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_config_defaults() {
        let config = FanoutConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.stats_log_interval, 50);
    }

    #[test]
    fn test_recording_config_defaults() {
        let config = RecordingConfig::default();
        assert_eq!(config.file_extension, "mp4");
        assert_eq!(config.file_name_format, "%Y-%m-%d-%H-%M-%S");
    }

    #[test]
    fn test_relay_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.video_codec, VideoCodec::H264);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.fallback_resolution, (1280, 720));
    }

    #[test]
    fn test_video_codec_mime() {
        assert_eq!(VideoCodec::H264.mime(), "video/avc");
    }
}
