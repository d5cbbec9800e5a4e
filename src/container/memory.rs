//! In-memory container for testing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioTrackFormat, ContainerFactory, ContainerWriter, VideoTrackFormat, AUDIO_TRACK};
use crate::ContainerError;

/// One sample as it was written to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSample {
    /// Track index.
    pub track: usize,
    /// Sample bytes.
    pub payload: Vec<u8>,
    /// Presentation timestamp.
    pub timestamp: Duration,
    /// Keyframe flag as written.
    pub is_key_frame: bool,
}

/// Snapshot of one file created by a [`MemoryContainerFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFile {
    /// Path the file was opened at.
    pub path: PathBuf,
    /// Declared video track.
    pub video: VideoTrackFormat,
    /// Declared audio track.
    pub audio: AudioTrackFormat,
    /// Samples in write order.
    pub samples: Vec<RecordedSample>,
    /// `true` once `finish` ran.
    pub finished: bool,
}

impl RecordedFile {
    /// Samples written to `track`.
    pub fn track_samples(&self, track: usize) -> impl Iterator<Item = &RecordedSample> {
        self.samples.iter().filter(move |s| s.track == track)
    }
}

#[derive(Default)]
struct Shared {
    files: Mutex<Vec<RecordedFile>>,
    fail_next_write: AtomicBool,
    fail_next_open: AtomicBool,
    fail_next_finish: AtomicBool,
}

/// A [`ContainerFactory`] that records every file in memory.
///
/// Clones share the same storage, so a test can keep one clone for
/// inspection and hand the other to a recording sink.
///
/// # Example
///
/// ```
/// use media_fanout::container::{
///     AudioTrackFormat, ContainerFactory, MemoryContainerFactory, VideoTrackFormat,
/// };
/// use std::path::Path;
/// use std::time::Duration;
///
/// let factory = MemoryContainerFactory::new();
/// let video = VideoTrackFormat {
///     mime: "video/avc".into(),
///     width: 640,
///     height: 360,
///     sps: vec![0x67].into(),
///     pps: vec![0x68].into(),
/// };
/// let audio = AudioTrackFormat { mime: "audio/mp4a-latm".into(), sample_rate_hz: 48000, channels: 2 };
///
/// let mut writer = factory.open(Path::new("a.mp4"), &video, &audio).unwrap();
/// writer.write_sample(0, &[0, 0, 0, 1, 0x65], Duration::ZERO, true).unwrap();
/// writer.finish().unwrap();
///
/// assert!(factory.files()[0].finished);
/// ```
#[derive(Clone, Default)]
pub struct MemoryContainerFactory {
    shared: Arc<Shared>,
}

impl MemoryContainerFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every file opened so far, in open order.
    pub fn files(&self) -> Vec<RecordedFile> {
        self.shared.files.lock().clone()
    }

    /// Number of files opened so far.
    pub fn file_count(&self) -> usize {
        self.shared.files.lock().len()
    }

    /// Makes the next `write_sample` on any writer fail with an I/O error.
    pub fn fail_next_write(&self) {
        self.shared.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Makes the next `open` fail with an I/O error.
    pub fn fail_next_open(&self) {
        self.shared.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Makes the next `finish` fail with an I/O error. The file stays
    /// unfinished.
    pub fn fail_next_finish(&self) {
        self.shared.fail_next_finish.store(true, Ordering::SeqCst);
    }
}

impl ContainerFactory for MemoryContainerFactory {
    fn open(
        &self,
        path: &Path,
        video: &VideoTrackFormat,
        audio: &AudioTrackFormat,
    ) -> Result<Box<dyn ContainerWriter>, ContainerError> {
        if self.shared.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "injected open failure",
            )));
        }

        let mut files = self.shared.files.lock();
        files.push(RecordedFile {
            path: path.to_path_buf(),
            video: video.clone(),
            audio: audio.clone(),
            samples: Vec::new(),
            finished: false,
        });

        Ok(Box::new(MemoryWriter {
            shared: Arc::clone(&self.shared),
            index: files.len() - 1,
        }))
    }
}

struct MemoryWriter {
    shared: Arc<Shared>,
    index: usize,
}

impl ContainerWriter for MemoryWriter {
    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp: Duration,
        is_key_frame: bool,
    ) -> Result<(), ContainerError> {
        if self.shared.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        if track > AUDIO_TRACK {
            return Err(ContainerError::TrackNotDeclared { track });
        }

        let mut files = self.shared.files.lock();
        let file = files.get_mut(self.index).ok_or(ContainerError::Closed)?;
        file.samples.push(RecordedSample {
            track,
            payload: payload.to_vec(),
            timestamp,
            is_key_frame,
        });
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), ContainerError> {
        if self.shared.fail_next_finish.swap(false, Ordering::SeqCst) {
            return Err(ContainerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected trailer failure",
            )));
        }
        let mut files = self.shared.files.lock();
        let file = files.get_mut(self.index).ok_or(ContainerError::Closed)?;
        file.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::VIDEO_TRACK;

    fn formats() -> (VideoTrackFormat, AudioTrackFormat) {
        (
            VideoTrackFormat {
                mime: "video/avc".to_string(),
                width: 640,
                height: 360,
                sps: Arc::from(vec![0x67]),
                pps: Arc::from(vec![0x68]),
            },
            AudioTrackFormat {
                mime: "audio/mp4a-latm".to_string(),
                sample_rate_hz: 48000,
                channels: 2,
            },
        )
    }

    #[test]
    fn test_memory_factory_records_samples() {
        let factory = MemoryContainerFactory::new();
        let (video, audio) = formats();

        let mut writer = factory.open(Path::new("x.mp4"), &video, &audio).unwrap();
        writer
            .write_sample(VIDEO_TRACK, &[1], Duration::from_micros(1), true)
            .unwrap();
        writer
            .write_sample(AUDIO_TRACK, &[2], Duration::from_micros(2), false)
            .unwrap();

        let files = factory.files();
        assert_eq!(files.len(), 1);
        assert!(!files[0].finished);
        assert_eq!(files[0].track_samples(VIDEO_TRACK).count(), 1);
        assert_eq!(files[0].track_samples(AUDIO_TRACK).count(), 1);

        writer.finish().unwrap();
        assert!(factory.files()[0].finished);
    }

    #[test]
    fn test_memory_factory_injected_failures() {
        let factory = MemoryContainerFactory::new();
        let (video, audio) = formats();

        factory.fail_next_open();
        assert!(factory.open(Path::new("x.mp4"), &video, &audio).is_err());
        assert_eq!(factory.file_count(), 0);

        let mut writer = factory.open(Path::new("x.mp4"), &video, &audio).unwrap();
        factory.fail_next_write();
        assert!(matches!(
            writer.write_sample(VIDEO_TRACK, &[1], Duration::ZERO, false),
            Err(ContainerError::Io(_))
        ));
        // Only the next write fails
        assert!(writer
            .write_sample(VIDEO_TRACK, &[1], Duration::ZERO, false)
            .is_ok());

        factory.fail_next_finish();
        assert!(matches!(writer.finish(), Err(ContainerError::Io(_))));
        assert!(!factory.files()[0].finished);
    }

    #[test]
    fn test_memory_factory_rejects_undeclared_track() {
        let factory = MemoryContainerFactory::new();
        let (video, audio) = formats();

        let mut writer = factory.open(Path::new("x.mp4"), &video, &audio).unwrap();
        let err = writer
            .write_sample(5, &[1], Duration::ZERO, false)
            .unwrap_err();
        assert!(err.is_sequencing());
    }
}
