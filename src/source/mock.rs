//! Mock session source for testing without a camera.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::{Locator, SessionSource, SourceConnector, SourceListener, StopSignal};
use crate::format::CodecParameters;
use crate::SourceError;

/// How long [`MockFeed::flush`] waits for the source to catch up.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One scripted event delivered by a [`MockFeed`].
#[derive(Debug, Clone)]
pub enum MockEvent {
    /// Codec parameters resolved.
    Connected(CodecParameters),
    /// A video access unit.
    Video {
        /// Annex-B payload.
        payload: Vec<u8>,
        /// Presentation timestamp.
        timestamp: Duration,
    },
    /// An audio frame.
    Audio {
        /// AAC payload.
        payload: Vec<u8>,
        /// Presentation timestamp.
        timestamp: Duration,
    },
    /// The peer closed the session. Ends `run`.
    Disconnected,
    /// The peer rejected the credentials. The session keeps running.
    Unauthorized,
    /// The session failed with a message. Ends `run`.
    Failed(String),
    /// Socket I/O failed. Ends `run` with [`SourceError::Io`].
    IoError(String),
}

enum FeedItem {
    Event(MockEvent),
    Barrier(Sender<()>),
}

enum Attempt {
    Refuse(String),
    Feed(Receiver<FeedItem>),
}

/// Test handle that drives one mock session.
///
/// Dropping the feed closes the session as if the peer disconnected.
///
/// # Example
///
/// ```
/// use media_fanout::source::MockConnector;
/// use std::time::Duration;
///
/// let connector = MockConnector::new();
/// let feed = connector.push_feed();
/// feed.video(vec![0, 0, 0, 1, 0x65], Duration::ZERO);
/// feed.disconnect();
/// ```
pub struct MockFeed {
    tx: Sender<FeedItem>,
}

impl MockFeed {
    /// Sends an event. Returns `false` if the session is already gone.
    pub fn send(&self, event: MockEvent) -> bool {
        self.tx.send(FeedItem::Event(event)).is_ok()
    }

    /// Reports codec parameters.
    pub fn connected(&self, params: CodecParameters) -> bool {
        self.send(MockEvent::Connected(params))
    }

    /// Delivers a video unit.
    pub fn video(&self, payload: impl Into<Vec<u8>>, timestamp: Duration) -> bool {
        self.send(MockEvent::Video {
            payload: payload.into(),
            timestamp,
        })
    }

    /// Delivers an audio unit.
    pub fn audio(&self, payload: impl Into<Vec<u8>>, timestamp: Duration) -> bool {
        self.send(MockEvent::Audio {
            payload: payload.into(),
            timestamp,
        })
    }

    /// Ends the session as a peer disconnect.
    pub fn disconnect(&self) -> bool {
        self.send(MockEvent::Disconnected)
    }

    /// Ends the session as a failure.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.send(MockEvent::Failed(message.into()))
    }

    /// Blocks until every event sent so far has been fully delivered.
    ///
    /// Delivery is synchronous, so once the source reaches this point every
    /// earlier unit has been handled by every sink. Returns `false` if the
    /// session ended first or the wait timed out.
    pub fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(FeedItem::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(FLUSH_TIMEOUT).is_ok()
    }
}

/// A [`SourceConnector`] whose sessions are driven by test code.
///
/// Each call to `connect` consumes the next queued attempt: either a feed
/// created by [`push_feed`](Self::push_feed) or a refusal queued by
/// [`push_refusal`](Self::push_refusal). With nothing queued, `connect` fails.
#[derive(Default)]
pub struct MockConnector {
    attempts: Mutex<VecDeque<Attempt>>,
    connects: AtomicUsize,
    last: Mutex<Option<(Locator, Duration)>>,
}

impl MockConnector {
    /// Creates a connector with no queued attempts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector whose first session replays `events` and then
    /// closes.
    pub fn scripted(events: impl IntoIterator<Item = MockEvent>) -> Self {
        let connector = Self::new();
        let feed = connector.push_feed();
        for event in events {
            feed.send(event);
        }
        connector
    }

    /// Queues a session and returns the feed that drives it.
    pub fn push_feed(&self) -> MockFeed {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.attempts.lock().push_back(Attempt::Feed(rx));
        MockFeed { tx }
    }

    /// Queues a connection refusal.
    pub fn push_refusal(&self, reason: impl Into<String>) {
        self.attempts
            .lock()
            .push_back(Attempt::Refuse(reason.into()));
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Locator and timeout of the most recent `connect` call.
    pub fn last_connect(&self) -> Option<(Locator, Duration)> {
        self.last.lock().clone()
    }
}

impl SourceConnector for MockConnector {
    fn connect(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Box<dyn SessionSource>, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some((locator.clone(), timeout));

        let refused = |reason: String| SourceError::Connect {
            host: locator.host().to_string(),
            port: locator.port(),
            reason,
        };

        match self.attempts.lock().pop_front() {
            Some(Attempt::Feed(feed)) => Ok(Box::new(MockSession { feed })),
            Some(Attempt::Refuse(reason)) => Err(refused(reason)),
            None => Err(refused("no mock session queued".to_string())),
        }
    }
}

/// Whether the session continues after an event.
enum Flow {
    Continue,
    End,
}

struct MockSession {
    feed: Receiver<FeedItem>,
}

impl MockSession {
    fn dispatch(
        event: MockEvent,
        listener: &mut dyn SourceListener,
    ) -> Result<Flow, SourceError> {
        match event {
            MockEvent::Connected(params) => listener.on_connected(params),
            MockEvent::Video { payload, timestamp } => listener.on_video_unit(&payload, timestamp),
            MockEvent::Audio { payload, timestamp } => listener.on_audio_unit(&payload, timestamp),
            MockEvent::Unauthorized => listener.on_unauthorized(),
            MockEvent::Disconnected => {
                listener.on_disconnected();
                return Ok(Flow::End);
            }
            MockEvent::Failed(message) => {
                listener.on_failed(&message);
                return Ok(Flow::End);
            }
            MockEvent::IoError(message) => {
                return Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    message,
                )));
            }
        }
        Ok(Flow::Continue)
    }
}

impl SessionSource for MockSession {
    fn run(
        &mut self,
        listener: &mut dyn SourceListener,
        stop: &StopSignal,
    ) -> Result<(), SourceError> {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(1);
        stop.on_stop(move || {
            let _ = wake_tx.try_send(());
        });

        loop {
            if stop.is_stopped() {
                return Ok(());
            }
            crossbeam_channel::select! {
                recv(self.feed) -> item => match item {
                    Ok(FeedItem::Event(event)) => {
                        if let Flow::End = Self::dispatch(event, listener)? {
                            return Ok(());
                        }
                    }
                    Ok(FeedItem::Barrier(ack)) => {
                        let _ = ack.send(());
                    }
                    Err(_) => {
                        // Feed dropped: the peer went away
                        listener.on_disconnected();
                        return Ok(());
                    }
                },
                recv(wake_rx) -> _ => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        log: Vec<String>,
    }

    impl SourceListener for RecordingListener {
        fn on_connected(&mut self, params: CodecParameters) {
            self.log.push(format!("connected {}x{}", params.video.width, params.video.height));
        }
        fn on_video_unit(&mut self, data: &[u8], timestamp: Duration) {
            self.log.push(format!("video {} @{}", data.len(), timestamp.as_micros()));
        }
        fn on_audio_unit(&mut self, data: &[u8], timestamp: Duration) {
            self.log.push(format!("audio {} @{}", data.len(), timestamp.as_micros()));
        }
        fn on_disconnected(&mut self) {
            self.log.push("disconnected".to_string());
        }
        fn on_unauthorized(&mut self) {
            self.log.push("unauthorized".to_string());
        }
        fn on_failed(&mut self, message: &str) {
            self.log.push(format!("failed {message}"));
        }
    }

    fn params() -> CodecParameters {
        CodecParameters::new(vec![0x67], vec![0x68], 640, 360, 48000, 2)
    }

    fn locator() -> Locator {
        Locator::parse("rtsp://mock:554/live").unwrap()
    }

    #[test]
    fn test_scripted_session_replays_events() {
        let connector = MockConnector::scripted([
            MockEvent::Connected(params()),
            MockEvent::Video {
                payload: vec![0, 0, 0, 1, 0x65],
                timestamp: Duration::from_micros(10),
            },
            MockEvent::Audio {
                payload: vec![1, 2],
                timestamp: Duration::from_micros(20),
            },
        ]);

        let mut source = connector.connect(&locator(), Duration::from_secs(1)).unwrap();
        let mut listener = RecordingListener::default();
        source.run(&mut listener, &StopSignal::new()).unwrap();

        assert_eq!(
            listener.log,
            vec![
                "connected 640x360",
                "video 5 @10",
                "audio 2 @20",
                "disconnected"
            ]
        );
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_failed_ends_run() {
        let connector = MockConnector::scripted([
            MockEvent::Failed("boom".to_string()),
            MockEvent::Audio {
                payload: vec![1],
                timestamp: Duration::ZERO,
            },
        ]);

        let mut source = connector.connect(&locator(), Duration::from_secs(1)).unwrap();
        let mut listener = RecordingListener::default();
        source.run(&mut listener, &StopSignal::new()).unwrap();

        assert_eq!(listener.log, vec!["failed boom"]);
    }

    #[test]
    fn test_io_error_surfaces() {
        let connector = MockConnector::scripted([MockEvent::IoError("reset".to_string())]);
        let mut source = connector.connect(&locator(), Duration::from_secs(1)).unwrap();
        let mut listener = RecordingListener::default();

        let result = source.run(&mut listener, &StopSignal::new());
        assert!(matches!(result, Err(SourceError::Io(_))));
    }

    #[test]
    fn test_refusal_and_empty_queue() {
        let connector = MockConnector::new();
        connector.push_refusal("host unreachable");

        let err = connector
            .connect(&locator(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("host unreachable"));

        let err = connector
            .connect(&locator(), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Connect { .. }));
        assert_eq!(connector.connect_count(), 2);
    }

    #[test]
    fn test_stop_wakes_blocked_run() {
        let connector = MockConnector::new();
        let _feed = connector.push_feed();
        let mut source = connector.connect(&locator(), Duration::from_secs(1)).unwrap();

        let stop = StopSignal::new();
        let stopper = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });

        let mut listener = RecordingListener::default();
        source.run(&mut listener, &stop).unwrap();
        handle.join().unwrap();

        assert!(listener.log.is_empty());
    }

    #[test]
    fn test_last_connect_recorded() {
        let connector = MockConnector::new();
        let _ = connector.connect(&locator(), Duration::from_millis(5000));
        let (locator, timeout) = connector.last_connect().unwrap();
        assert_eq!(locator.host(), "mock");
        assert_eq!(timeout, Duration::from_millis(5000));
    }
}
