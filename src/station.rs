//! Operator facade over a distributor, a recording sink and a relay sink.

use std::path::PathBuf;
use std::sync::Arc;

use crate::pipeline::SinkId;
use crate::session::{ConnectionState, Session};
use crate::{FanoutError, RecordingSink, RelaySink, SinkError, StreamDistributor};

/// One camera feed wired to a recorder and a relay.
///
/// `Station` attaches both sinks to the distributor on creation and exposes
/// the operator controls in one place. Every control can be called from any
/// thread at any time; recording and relaying are independent of each other
/// and of the session, and take effect from the next unit.
///
/// # Example
///
/// ```
/// use media_fanout::container::MemoryContainerFactory;
/// use media_fanout::push::MockPushConnector;
/// use media_fanout::source::MockConnector;
/// use media_fanout::{MediaFanout, RecordingSink, RelaySink, Station};
/// use std::sync::Arc;
///
/// let distributor = MediaFanout::builder()
///     .connector(MockConnector::new())
///     .build()?;
/// let station = Station::new(
///     distributor,
///     Arc::new(RecordingSink::new(MemoryContainerFactory::new())),
///     Arc::new(RelaySink::new(MockPushConnector::new())),
/// );
///
/// station.start_recording(std::env::temp_dir(), "video/avc", 1280, 720);
/// station.start_streaming("rtmp://live.example.com/app/key", false);
/// assert!(station.is_recording());
/// assert!(station.is_streaming());
///
/// station.shutdown()?;
/// assert!(!station.is_recording());
/// # Ok::<(), media_fanout::FanoutError>(())
/// ```
pub struct Station {
    distributor: StreamDistributor,
    recording: Arc<RecordingSink>,
    relay: Arc<RelaySink>,
    sink_ids: [SinkId; 2],
}

impl Station {
    /// Attaches `recording` and `relay` to `distributor`, in that order.
    pub fn new(
        distributor: StreamDistributor,
        recording: Arc<RecordingSink>,
        relay: Arc<RelaySink>,
    ) -> Self {
        let recording_id = distributor.attach(recording.clone());
        let relay_id = distributor.attach(relay.clone());
        Self {
            distributor,
            recording,
            relay,
            sink_ids: [recording_id, relay_id],
        }
    }

    /// Starts a session. See [`StreamDistributor::connect`].
    ///
    /// # Errors
    ///
    /// Propagates the distributor's connect errors.
    pub fn connect(&self, locator: &str) -> Result<Session, FanoutError> {
        self.distributor.connect(locator)
    }

    /// Stops the session. Recording and relay state are left alone; the
    /// session end finalizes any open file.
    ///
    /// # Errors
    ///
    /// Propagates the distributor's disconnect errors.
    pub fn disconnect(&self) -> Result<(), FanoutError> {
        self.distributor.disconnect()
    }

    /// Arms recording into `directory`.
    pub fn start_recording(
        &self,
        directory: impl Into<PathBuf>,
        video_mime: &str,
        width: u32,
        height: u32,
    ) {
        self.recording.start(directory, video_mime, width, height);
    }

    /// Disarms recording, finalizing the open file.
    ///
    /// # Errors
    ///
    /// Returns the container error if the file could not be finalized.
    pub fn stop_recording(&self) -> Result<(), SinkError> {
        self.recording.stop()
    }

    /// Rotates to a new file at the next keyframe.
    pub fn request_new_file(&self) {
        self.recording.request_new_file();
    }

    /// Starts relaying to `url`.
    pub fn start_streaming(&self, url: &str, video_only: bool) {
        self.relay.start(url, video_only);
    }

    /// Stops relaying.
    pub fn stop_streaming(&self) {
        self.relay.stop();
    }

    /// Stops recording, then relaying, then the session.
    ///
    /// The session is always torn down, even if finalizing the recording
    /// failed; that failure is only logged.
    ///
    /// # Errors
    ///
    /// Propagates the distributor's disconnect errors.
    pub fn shutdown(&self) -> Result<(), FanoutError> {
        if let Err(e) = self.recording.stop() {
            tracing::warn!(error = %e, "recording did not finalize cleanly");
        }
        self.relay.stop();
        self.distributor.disconnect()
    }

    /// Path of the file being recorded, if any.
    pub fn recording_path(&self) -> Option<PathBuf> {
        self.recording.current_path()
    }

    /// Returns `true` while recording is armed.
    pub fn is_recording(&self) -> bool {
        self.recording.is_armed()
    }

    /// Returns `true` while the relay is started.
    pub fn is_streaming(&self) -> bool {
        self.relay.is_connected()
    }

    /// Connection state of the current session.
    pub fn connection_state(&self) -> ConnectionState {
        self.distributor.connection_state()
    }

    /// The underlying distributor, e.g. to attach more sinks.
    pub fn distributor(&self) -> &StreamDistributor {
        &self.distributor
    }

    /// The recording sink.
    pub fn recording(&self) -> &Arc<RecordingSink> {
        &self.recording
    }

    /// The relay sink.
    pub fn relay(&self) -> &Arc<RelaySink> {
        &self.relay
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        for id in self.sink_ids {
            self.distributor.detach(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{MemoryContainerFactory, VIDEO_TRACK};
    use crate::push::{MockPushConnector, PushCall};
    use crate::source::MockConnector;
    use crate::{CodecParameters, EndReason, MediaFanout};
    use std::time::Duration;

    struct Fixture {
        station: Station,
        connector: Arc<MockConnector>,
        files: MemoryContainerFactory,
        push: MockPushConnector,
    }

    fn fixture() -> Fixture {
        let connector = Arc::new(MockConnector::new());
        let files = MemoryContainerFactory::new();
        let push = MockPushConnector::new();
        let distributor = MediaFanout::builder()
            .connector(Arc::clone(&connector))
            .build()
            .unwrap();
        let station = Station::new(
            distributor,
            Arc::new(RecordingSink::new(files.clone())),
            Arc::new(RelaySink::new(push.clone())),
        );
        Fixture {
            station,
            connector,
            files,
            push,
        }
    }

    fn params() -> CodecParameters {
        CodecParameters::new(vec![0x67, 0x42], vec![0x68], 1280, 720, 48000, 2)
    }

    const IDR: [u8; 5] = [0, 0, 0, 1, 0x65];
    const P_FRAME: [u8; 5] = [0, 0, 0, 1, 0x41];

    #[test]
    fn test_station_attaches_both_sinks() {
        let f = fixture();
        assert_eq!(f.station.distributor().sink_count(), 2);
        assert_eq!(f.station.connection_state(), ConnectionState::Idle);

        let distributor = f.station.distributor().clone();
        drop(f.station);
        assert_eq!(distributor.sink_count(), 0);
    }

    #[test]
    fn test_station_records_and_relays() {
        let f = fixture();
        let feed = f.connector.push_feed();
        let dir = tempfile::tempdir().unwrap();

        let session = f.station.connect("rtsp://cam/live").unwrap();
        f.station.start_recording(dir.path(), "video/avc", 1280, 720);
        f.station.start_streaming("rtmp://relay/app/key", true);

        feed.connected(params());
        feed.video(IDR, Duration::ZERO);
        feed.audio(vec![0x21], Duration::from_millis(10));
        feed.video(P_FRAME, Duration::from_millis(33));
        assert!(feed.flush());

        let path = f.station.recording_path().unwrap();
        assert!(path.starts_with(dir.path()));

        let client = f.push.latest().unwrap();
        let stream = client.stream_calls();
        assert!(matches!(stream[0], PushCall::VideoDescriptor { .. }));
        assert_eq!(stream.len(), 3);

        f.station.shutdown().unwrap();
        assert!(!session.is_running());
        assert_eq!(session.end_reason(), Some(EndReason::Stopped));
        assert!(!f.station.is_recording());
        assert!(!f.station.is_streaming());

        let files = f.files.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].finished);
        assert_eq!(files[0].track_samples(VIDEO_TRACK).count(), 2);
        assert_eq!(files[0].samples.len(), 3);
    }

    #[test]
    fn test_station_controls_are_independent() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();

        f.station.start_recording(dir.path(), "video/avc", 640, 480);
        f.station.start_streaming("rtmp://relay/app/key", false);
        f.station.stop_streaming();

        assert!(f.station.is_recording());
        assert!(!f.station.is_streaming());
        f.station.request_new_file();
        assert!(f.station.recording().is_rotation_pending());

        f.station.stop_recording().unwrap();
        assert!(!f.station.is_recording());
        assert_eq!(f.station.relay().epoch(), 1);
    }
}
