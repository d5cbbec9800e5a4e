//! Length-prefixed sample log container.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "MFLG" | version u16 | sample_count u64
//! video: width u32 | height u32 | mime | sps | pps     (each blob: len u16 + bytes)
//! audio: mime | sample_rate u32 | channels u16
//! record*: track u8 | flags u8 | timestamp_us u64 | len u32 | payload
//! ```
//!
//! `sample_count` is written as a placeholder when the file is opened and
//! patched on [`finish`](ContainerWriter::finish), so a file that was never
//! finished is recognizable.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{
    AudioTrackFormat, ContainerFactory, ContainerWriter, RecordedSample, VideoTrackFormat,
    AUDIO_TRACK,
};
use crate::ContainerError;

/// File magic.
const MAGIC: &[u8; 4] = b"MFLG";

/// Format version written into every file.
const VERSION: u16 = 1;

/// Byte offset of the sample count field.
const SAMPLE_COUNT_OFFSET: u64 = 6;

/// Sample count of a file that was never finished.
const UNFINISHED: u64 = u64::MAX;

/// Record flag bit for keyframes.
const FLAG_KEY_FRAME: u8 = 0x01;

/// Opens [`SampleLog`] files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleLogFactory;

impl SampleLogFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self
    }
}

impl ContainerFactory for SampleLogFactory {
    fn open(
        &self,
        path: &Path,
        video: &VideoTrackFormat,
        audio: &AudioTrackFormat,
    ) -> Result<Box<dyn ContainerWriter>, ContainerError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, video, audio)?;

        tracing::debug!(path = %path.display(), "sample log opened");

        Ok(Box::new(SampleLogWriter {
            path: path.to_path_buf(),
            writer,
            samples: 0,
        }))
    }
}

struct SampleLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    samples: u64,
}

impl ContainerWriter for SampleLogWriter {
    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp: Duration,
        is_key_frame: bool,
    ) -> Result<(), ContainerError> {
        if track > AUDIO_TRACK {
            return Err(ContainerError::TrackNotDeclared { track });
        }
        let len = u32::try_from(payload.len()).map_err(|_| invalid_input("payload too large"))?;
        let timestamp_us = u64::try_from(timestamp.as_micros()).unwrap_or(u64::MAX);
        let flags = if is_key_frame { FLAG_KEY_FRAME } else { 0 };

        // track <= AUDIO_TRACK, fits in a byte
        #[allow(clippy::cast_possible_truncation)]
        self.writer.write_all(&[track as u8, flags])?;
        self.writer.write_all(&timestamp_us.to_le_bytes())?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.samples += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), ContainerError> {
        self.writer.seek(SeekFrom::Start(SAMPLE_COUNT_OFFSET))?;
        self.writer.write_all(&self.samples.to_le_bytes())?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;

        tracing::debug!(
            path = %self.path.display(),
            samples = self.samples,
            "sample log finished"
        );
        Ok(())
    }
}

fn write_header(
    writer: &mut impl Write,
    video: &VideoTrackFormat,
    audio: &AudioTrackFormat,
) -> Result<(), ContainerError> {
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&UNFINISHED.to_le_bytes())?;

    writer.write_all(&video.width.to_le_bytes())?;
    writer.write_all(&video.height.to_le_bytes())?;
    write_blob(writer, video.mime.as_bytes())?;
    write_blob(writer, &video.sps)?;
    write_blob(writer, &video.pps)?;

    write_blob(writer, audio.mime.as_bytes())?;
    writer.write_all(&audio.sample_rate_hz.to_le_bytes())?;
    writer.write_all(&audio.channels.to_le_bytes())?;
    Ok(())
}

fn write_blob(writer: &mut impl Write, blob: &[u8]) -> Result<(), ContainerError> {
    let len = u16::try_from(blob.len()).map_err(|_| invalid_input("header field too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(blob)?;
    Ok(())
}

fn invalid_input(msg: &str) -> ContainerError {
    ContainerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))
}

fn invalid_data(msg: &str) -> ContainerError {
    ContainerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// A sample log read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLog {
    /// Declared video track.
    pub video: VideoTrackFormat,
    /// Declared audio track.
    pub audio: AudioTrackFormat,
    /// Every sample, in write order.
    pub samples: Vec<RecordedSample>,
    /// `true` if the trailer was written.
    pub finished: bool,
}

impl SampleLog {
    /// Reads and validates a sample log.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Io`] if the file cannot be read or is
    /// malformed.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        let data = std::fs::read(path)?;
        let mut reader = ByteReader::new(&data);

        if reader.take(4)? != MAGIC {
            return Err(invalid_data("not a sample log"));
        }
        if reader.u16()? != VERSION {
            return Err(invalid_data("unsupported sample log version"));
        }
        let count = reader.u64()?;

        let width = reader.u32()?;
        let height = reader.u32()?;
        let video = VideoTrackFormat {
            mime: reader.string()?,
            width,
            height,
            sps: Arc::from(reader.blob()?),
            pps: Arc::from(reader.blob()?),
        };
        let audio = AudioTrackFormat {
            mime: reader.string()?,
            sample_rate_hz: reader.u32()?,
            channels: reader.u16()?,
        };

        let mut samples = Vec::new();
        while !reader.is_empty() {
            let track = usize::from(reader.u8()?);
            let flags = reader.u8()?;
            let timestamp = Duration::from_micros(reader.u64()?);
            let len = reader.u32()? as usize;
            samples.push(RecordedSample {
                track,
                payload: reader.take(len)?.to_vec(),
                timestamp,
                is_key_frame: flags & FLAG_KEY_FRAME != 0,
            });
        }

        let finished = count != UNFINISHED;
        if finished && count != samples.len() as u64 {
            return Err(invalid_data("sample count does not match records"));
        }

        Ok(Self {
            video,
            audio,
            samples,
            finished,
        })
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ContainerError> {
        if self.data.len() < n {
            return Err(invalid_data("truncated sample log"));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ContainerError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ContainerError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ContainerError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ContainerError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ContainerError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn blob(&mut self) -> Result<&'a [u8], ContainerError> {
        let len = usize::from(self.u16()?);
        self.take(len)
    }

    fn string(&mut self) -> Result<String, ContainerError> {
        String::from_utf8(self.blob()?.to_vec()).map_err(|_| invalid_data("invalid UTF-8"))
    }
}
