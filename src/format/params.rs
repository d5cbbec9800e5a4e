//! Per-session codec parameters.

use std::sync::Arc;

/// Video track description resolved from the session setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParameters {
    /// Sequence parameter set.
    pub sps: Arc<[u8]>,
    /// Picture parameter set.
    pub pps: Arc<[u8]>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Audio track description resolved from the session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParameters {
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate_hz: u32,
    /// Number of channels (1 = mono, 2 = stereo).
    pub channels: u16,
}

impl AudioParameters {
    /// Returns `true` for two-channel audio.
    pub fn is_stereo(&self) -> bool {
        self.channels == 2
    }
}

/// Codec parameters for one session.
///
/// Set once right after the source connects and never mutated afterwards.
/// The distributor shares it with every sink as `Arc<CodecParameters>`, so
/// sinks can read it without locking.
///
/// # Example
///
/// ```
/// use media_fanout::CodecParameters;
///
/// let params = CodecParameters::new(
///     vec![0x67, 0x42, 0x00, 0x1f],
///     vec![0x68, 0xce, 0x3c, 0x80],
///     1280,
///     720,
///     48000,
///     2,
/// );
/// assert!(params.audio.is_stereo());
/// assert_eq!(params.video.width, 1280);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    /// Video track parameters.
    pub video: VideoParameters,
    /// Audio track parameters.
    pub audio: AudioParameters,
}

impl CodecParameters {
    /// Creates codec parameters from raw parameter sets and track metadata.
    pub fn new(
        sps: impl Into<Arc<[u8]>>,
        pps: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        sample_rate_hz: u32,
        channels: u16,
    ) -> Self {
        Self {
            video: VideoParameters {
                sps: sps.into(),
                pps: pps.into(),
                width,
                height,
            },
            audio: AudioParameters {
                sample_rate_hz,
                channels,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parameters_new() {
        let params = CodecParameters::new(vec![1, 2], vec![3], 640, 480, 44100, 1);
        assert_eq!(&*params.video.sps, &[1, 2]);
        assert_eq!(&*params.video.pps, &[3]);
        assert_eq!(params.video.height, 480);
        assert_eq!(params.audio.sample_rate_hz, 44100);
        assert!(!params.audio.is_stereo());
    }

    #[test]
    fn test_clone_shares_parameter_sets() {
        let params = CodecParameters::new(vec![1, 2], vec![3], 640, 480, 44100, 2);
        let cloned = params.clone();
        assert!(Arc::ptr_eq(&params.video.sps, &cloned.video.sps));
        assert_eq!(params, cloned);
    }
}
