//! Recording sink with keyframe-aligned file rotation.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::container::{AudioTrackFormat, ContainerFactory, ContainerWriter, VideoTrackFormat};
use crate::event::{RecordingCallback, RecordingEvent};
use crate::sink::Sink;
use crate::{CodecParameters, EndReason, MediaUnit, RecordingConfig, SinkError, TrackKind};

/// Used when the configured file name format cannot be rendered.
const FALLBACK_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Where the next file goes. Present exactly while recording is armed.
#[derive(Debug, Clone)]
struct RecordingTarget {
    directory: PathBuf,
    video_mime: String,
    width: u32,
    height: u32,
}

struct OpenFile {
    writer: Box<dyn ContainerWriter>,
    path: PathBuf,
    video_samples: u64,
    audio_samples: u64,
}

#[derive(Default)]
struct RecordingState {
    target: Option<RecordingTarget>,
    rotation_pending: bool,
    /// Only `Some` while `target` is `Some`.
    current: Option<OpenFile>,
    format: Option<Arc<CodecParameters>>,
    /// Last file name stamp and the collision suffix it got.
    last_stamp: Option<(String, u32)>,
}

/// A sink that multiplexes video and audio into rotating container files.
///
/// Recording is armed with [`start`](Self::start) and disarmed with
/// [`stop`](Self::stop). No file exists until the first unit arrives while
/// armed and codec parameters are known; the file is then opened with the
/// video track at index 0 and the audio track at index 1.
///
/// [`request_new_file`](Self::request_new_file) schedules a rotation that
/// happens at the next video keyframe: the current file is finalized and the
/// keyframe becomes the first sample of a new file. Units that arrive between
/// the request and that keyframe still go to the old file, so every file
/// after the first starts on a keyframe and nothing is lost or duplicated.
///
/// Files are named from the local wall clock using
/// [`RecordingConfig::file_name_format`], with a `-1`, `-2`, ... suffix when
/// two files would otherwise share a name.
///
/// When the session ends the open file is finalized and recording is
/// disarmed.
///
/// # Example
///
/// ```
/// use media_fanout::container::MemoryContainerFactory;
/// use media_fanout::RecordingSink;
///
/// let sink = RecordingSink::new(MemoryContainerFactory::new());
/// sink.start(std::env::temp_dir(), "video/avc", 1280, 720);
/// assert!(sink.is_armed());
/// sink.stop().unwrap();
/// ```
pub struct RecordingSink {
    name: String,
    factory: Arc<dyn ContainerFactory>,
    config: RecordingConfig,
    on_event: Option<RecordingCallback>,
    state: Mutex<RecordingState>,
}

impl RecordingSink {
    /// Creates a disarmed recording sink that opens files with `factory`.
    pub fn new(factory: impl ContainerFactory + 'static) -> Self {
        Self {
            name: "recording".to_string(),
            factory: Arc::new(factory),
            config: RecordingConfig::default(),
            on_event: None,
            state: Mutex::new(RecordingState::default()),
        }
    }

    /// Sets a custom name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the recording configuration.
    #[must_use]
    pub fn with_config(mut self, config: RecordingConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a callback for file lifecycle notifications.
    ///
    /// The callback runs after the sink's lock is released and may call back
    /// into the sink.
    #[must_use]
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(RecordingEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    /// Arms recording into `directory`.
    ///
    /// `width` and `height` are declared on the video track. Nothing is
    /// opened until the next unit arrives. Calling `start` while armed
    /// replaces the target; the open file is kept and the new values apply
    /// from the next file opened.
    pub fn start(
        &self,
        directory: impl Into<PathBuf>,
        video_mime: &str,
        width: u32,
        height: u32,
    ) {
        let mut state = self.state.lock();
        let directory = directory.into();
        let rearm = state.target.is_some();
        tracing::info!(
            sink = %self.name,
            directory = %directory.display(),
            video_mime,
            width,
            height,
            "{}",
            if rearm { "recording target updated" } else { "recording armed" }
        );

        state.target = Some(RecordingTarget {
            directory,
            video_mime: video_mime.to_string(),
            width,
            height,
        });
        if !rearm {
            state.rotation_pending = false;
        }
    }

    /// Disarms recording, finalizing the open file if there is one.
    ///
    /// The file is fully closed when this returns. Calling `stop` while
    /// disarmed does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::ContainerWrite`] if the trailer could not be
    /// written. The sink is disarmed either way.
    pub fn stop(&self) -> Result<(), SinkError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            self.disarm(&mut state, &mut events)
        };
        self.emit(events);
        result
    }

    /// Requests a new file at the next video keyframe.
    ///
    /// Ignored while disarmed.
    pub fn request_new_file(&self) {
        let mut state = self.state.lock();
        if state.target.is_none() {
            tracing::debug!(sink = %self.name, "new file requested while disarmed, ignoring");
            return;
        }
        state.rotation_pending = true;
        tracing::debug!(sink = %self.name, "rotation pending until next keyframe");
    }

    /// Path of the open file, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().current.as_ref().map(|f| f.path.clone())
    }

    /// Returns `true` while recording is armed.
    pub fn is_armed(&self) -> bool {
        self.state.lock().target.is_some()
    }

    /// Returns `true` while a rotation waits for a keyframe.
    pub fn is_rotation_pending(&self) -> bool {
        self.state.lock().rotation_pending
    }

    fn emit(&self, events: Vec<RecordingEvent>) {
        if let Some(ref callback) = self.on_event {
            for event in events {
                callback(event);
            }
        }
    }

    fn disarm(
        &self,
        state: &mut RecordingState,
        events: &mut Vec<RecordingEvent>,
    ) -> Result<(), SinkError> {
        if state.target.take().is_some() {
            tracing::info!(sink = %self.name, "recording disarmed");
        }
        state.rotation_pending = false;
        match state.current.take() {
            Some(file) => self.finalize(file, events),
            None => Ok(()),
        }
    }

    fn finalize(&self, file: OpenFile, events: &mut Vec<RecordingEvent>) -> Result<(), SinkError> {
        let OpenFile {
            writer,
            path,
            video_samples,
            audio_samples,
        } = file;

        match writer.finish() {
            Ok(()) => {
                tracing::info!(
                    sink = %self.name,
                    path = %path.display(),
                    video_samples,
                    audio_samples,
                    "recording file finalized"
                );
                events.push(RecordingEvent::SegmentFinalized {
                    path,
                    video_samples,
                    audio_samples,
                });
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    sink = %self.name,
                    path = %path.display(),
                    error = %err,
                    "failed to finalize recording file"
                );
                events.push(RecordingEvent::WriteFailed {
                    path: path.clone(),
                    error: err.to_string(),
                });
                Err(SinkError::container(path, err))
            }
        }
    }

    /// Builds a file path that is not taken yet.
    fn next_path(&self, directory: &Path, last_stamp: &mut Option<(String, u32)>) -> PathBuf {
        let now = Local::now();
        let mut stamp = String::new();
        if write!(stamp, "{}", now.format(&self.config.file_name_format)).is_err() {
            tracing::warn!(
                format = %self.config.file_name_format,
                "invalid file name format, using default"
            );
            stamp = now.format(FALLBACK_NAME_FORMAT).to_string();
        }

        let mut suffix = match last_stamp {
            Some((last, n)) if *last == stamp => *n + 1,
            _ => 0,
        };
        loop {
            let mut name = stamp.clone();
            if suffix > 0 {
                let _ = write!(name, "-{suffix}");
            }
            if !self.config.file_extension.is_empty() {
                let _ = write!(name, ".{}", self.config.file_extension);
            }

            let path = directory.join(name);
            if !path.exists() {
                *last_stamp = Some((stamp, suffix));
                return path;
            }
            suffix += 1;
        }
    }

    fn open_file(
        &self,
        state: &mut RecordingState,
        format: &CodecParameters,
        events: &mut Vec<RecordingEvent>,
    ) -> Result<OpenFile, SinkError> {
        let Some(target) = state.target.as_ref() else {
            return Err(SinkError::sequencing("open requested while disarmed"));
        };

        std::fs::create_dir_all(&target.directory)
            .map_err(|e| SinkError::file_error(&target.directory, e))?;

        let video = VideoTrackFormat {
            mime: target.video_mime.clone(),
            width: target.width,
            height: target.height,
            sps: Arc::clone(&format.video.sps),
            pps: Arc::clone(&format.video.pps),
        };
        let audio = AudioTrackFormat {
            mime: self.config.audio_mime.clone(),
            sample_rate_hz: format.audio.sample_rate_hz,
            channels: format.audio.channels,
        };

        let path = self.next_path(&target.directory, &mut state.last_stamp);
        let writer = self
            .factory
            .open(&path, &video, &audio)
            .map_err(|e| SinkError::container(&path, e))?;

        tracing::info!(sink = %self.name, path = %path.display(), "recording file opened");
        events.push(RecordingEvent::SegmentOpened { path: path.clone() });

        Ok(OpenFile {
            writer,
            path,
            video_samples: 0,
            audio_samples: 0,
        })
    }

    /// Drops the open file after a failed write.
    fn abandon(
        &self,
        state: &mut RecordingState,
        err: crate::ContainerError,
        events: &mut Vec<RecordingEvent>,
    ) -> SinkError {
        let Some(file) = state.current.take() else {
            return SinkError::sequencing(err.to_string());
        };

        tracing::error!(
            sink = %self.name,
            path = %file.path.display(),
            error = %err,
            "recording write failed, abandoning file"
        );
        // Best effort: the file is already damaged
        if let Err(close_err) = file.writer.finish() {
            tracing::debug!(error = %close_err, "closing abandoned file failed");
        }

        events.push(RecordingEvent::WriteFailed {
            path: file.path.clone(),
            error: err.to_string(),
        });
        SinkError::container(file.path, err)
    }

    fn write_unit(
        &self,
        state: &mut RecordingState,
        unit: &MediaUnit,
        events: &mut Vec<RecordingEvent>,
    ) -> Result<(), SinkError> {
        if state.target.is_none() {
            return Ok(());
        }
        let Some(format) = state.format.clone() else {
            tracing::trace!(sink = %self.name, "unit before format, not recording");
            return Ok(());
        };

        let mut rotation = Ok(());
        if state.rotation_pending && unit.is_video_keyframe() {
            state.rotation_pending = false;
            tracing::info!(sink = %self.name, "rotating recording file at keyframe");
            if let Some(file) = state.current.take() {
                // The keyframe still opens the next file; the error is
                // reported once it is written
                rotation = self.finalize(file, events);
            }
        }

        if state.current.is_none() {
            let file = self.open_file(state, &format, events)?;
            state.current = Some(file);
        }
        let Some(file) = state.current.as_mut() else {
            return Err(SinkError::sequencing("no recording file after open"));
        };

        let result = file.writer.write_sample(
            unit.track.track_index(),
            &unit.payload,
            unit.timestamp,
            unit.is_key_frame,
        );
        match result {
            Ok(()) => {
                match unit.track {
                    TrackKind::Video => file.video_samples += 1,
                    TrackKind::Audio => file.audio_samples += 1,
                }
                tracing::trace!(
                    sink = %self.name,
                    track = %unit.track,
                    bytes = unit.len(),
                    ts_us = unit.timestamp_us(),
                    "sample written"
                );
                rotation
            }
            Err(err) => Err(self.abandon(state, err, events)),
        }
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_format(&self, params: &Arc<CodecParameters>) {
        self.state.lock().format = Some(Arc::clone(params));
    }

    fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            self.write_unit(&mut state, unit, &mut events)
        };
        self.emit(events);
        result
    }

    fn on_session_ended(&self, reason: &EndReason) {
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            state.format = None;
            if state.target.is_some() {
                tracing::info!(sink = %self.name, %reason, "session ended, stopping recording");
            }
            self.disarm(&mut state, &mut events)
        };
        if let Err(err) = result {
            tracing::warn!(sink = %self.name, error = %err, "recording not finalized cleanly");
        }
        self.emit(events);
    }
}
