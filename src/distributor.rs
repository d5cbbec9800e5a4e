//! Stream distributor - owns the session lifecycle and the sink registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::pipeline::{run_session, Router, SessionContext, SinkId};
use crate::session::{ConnectionState, Session, SessionState};
use crate::sink::Sink;
use crate::source::{Locator, SourceConnector, StopSignal};
use crate::{CodecParameters, EndReason, EventCallback, FanoutConfig, FanoutError};

/// The session currently (or most recently) owned by the distributor.
struct ActiveSession {
    session: Session,
    state: Arc<SessionState>,
    stop: StopSignal,
}

struct Inner {
    router: Arc<Router>,
    connector: Arc<dyn SourceConnector>,
    config: FanoutConfig,
    event_callback: Option<EventCallback>,
    /// Held across spawn and join; never touched from the delivery thread.
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Only ever held briefly, so the delivery thread may lock it.
    active: Mutex<Option<ActiveSession>>,
    delivery_thread: Arc<Mutex<Option<ThreadId>>>,
    next_session: AtomicU64,
}

impl Inner {
    fn on_delivery_thread(&self) -> bool {
        *self.delivery_thread.lock() == Some(std::thread::current().id())
    }

    fn signal_stop(&self) -> Option<Arc<SessionState>> {
        let active = self.active.lock();
        let active = active.as_ref()?;
        active.state.begin_teardown();
        active.stop.stop();
        Some(Arc::clone(&active.state))
    }

    /// Joins the worker thread, if any. Caller holds the worker lock.
    fn join_worker(
        worker: &mut Option<JoinHandle<()>>,
        state: Option<&Arc<SessionState>>,
    ) -> Result<(), FanoutError> {
        let Some(handle) = worker.take() else {
            return Ok(());
        };
        if handle.join().is_ok() {
            return Ok(());
        }

        tracing::error!("delivery thread panicked");
        if let Some(state) = state {
            if state.is_running() {
                state.finish(EndReason::Failed("delivery thread panicked".to_string()));
            }
        }
        Err(FanoutError::WorkerPanicked)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.signal_stop();
        if self.on_delivery_thread() {
            // The last handle went away inside a sink callback; the thread
            // exits on its own once the callback returns.
            return;
        }
        let _ = Self::join_worker(self.worker.get_mut(), state.as_ref());
    }
}

/// Fans one upstream session out to every attached sink.
///
/// Created with [`MediaFanout::builder()`]. Cloning is cheap and all clones
/// control the same distributor; the session is stopped and joined when the
/// last clone is dropped.
///
/// At most one session runs at a time. Each session gets a dedicated
/// delivery thread that invokes every sink synchronously, in attach order.
///
/// # Example
///
/// ```
/// use media_fanout::source::{MockConnector, MockEvent};
/// use media_fanout::{CodecParameters, MediaFanout, MediaUnit, Sink, SinkError};
/// use std::time::Duration;
///
/// struct Counter;
///
/// impl Sink for Counter {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn on_unit(&self, _unit: &MediaUnit) -> Result<(), SinkError> {
///         Ok(())
///     }
/// }
///
/// let params = CodecParameters::new(vec![0x67], vec![0x68], 640, 480, 44100, 1);
/// let connector = MockConnector::scripted(vec![
///     MockEvent::Connected(params),
///     MockEvent::Disconnected,
/// ]);
///
/// let distributor = MediaFanout::builder()
///     .connector(connector)
///     .add_sink(Counter)
///     .build()?;
///
/// let session = distributor.connect("rtsp://192.168.1.20/live")?;
/// assert!(session.wait_finished(Duration::from_secs(5)));
/// distributor.disconnect()?;
/// # Ok::<(), media_fanout::FanoutError>(())
/// ```
///
/// [`MediaFanout::builder()`]: crate::MediaFanout::builder
#[derive(Clone)]
pub struct StreamDistributor {
    inner: Arc<Inner>,
}

impl StreamDistributor {
    pub(crate) fn new(
        connector: Arc<dyn SourceConnector>,
        sinks: Vec<Arc<dyn Sink>>,
        event_callback: Option<EventCallback>,
        config: FanoutConfig,
    ) -> Self {
        let router = Arc::new(Router::new(event_callback.clone()));
        for sink in sinks {
            router.attach(sink);
        }
        Self {
            inner: Arc::new(Inner {
                router,
                connector,
                config,
                event_callback,
                worker: Mutex::new(None),
                active: Mutex::new(None),
                delivery_thread: Arc::new(Mutex::new(None)),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Starts a session against `locator` on a new delivery thread.
    ///
    /// Returns as soon as the thread is running; connect failures are
    /// reported through `on_session_ended` and
    /// [`SessionEvent::SessionEnded`](crate::SessionEvent::SessionEnded).
    ///
    /// # Errors
    ///
    /// - [`FanoutError::InvalidLocator`] if the locator cannot be parsed
    /// - [`FanoutError::SessionActive`] if a session is still running
    /// - [`FanoutError::ReentrantConnect`] if called from a sink callback
    /// - [`FanoutError::WorkerSpawn`] if the thread cannot be created
    pub fn connect(&self, locator: &str) -> Result<Session, FanoutError> {
        if self.inner.on_delivery_thread() {
            return Err(FanoutError::ReentrantConnect);
        }
        let locator = Locator::parse(locator)?;

        let mut worker = self.inner.worker.lock();
        let previous = {
            let active = self.inner.active.lock();
            if let Some(active) = active.as_ref() {
                if active.state.is_running() {
                    return Err(FanoutError::SessionActive {
                        locator: active.session.locator().url().to_string(),
                    });
                }
            }
            active.as_ref().map(|a| Arc::clone(&a.state))
        };
        // The previous session already ended; reap its thread.
        if let Err(e) = Inner::join_worker(&mut worker, previous.as_ref()) {
            tracing::warn!(error = %e, "previous session did not exit cleanly");
        }

        let session_id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(SessionState::new());
        let stop = StopSignal::new();
        let session = Session::new(session_id, locator.clone(), Arc::clone(&state));

        let ctx = SessionContext {
            session_id,
            locator,
            router: Arc::clone(&self.inner.router),
            connector: Arc::clone(&self.inner.connector),
            config: self.inner.config.clone(),
            event_callback: self.inner.event_callback.clone(),
            state: Arc::clone(&state),
            stop: stop.clone(),
            delivery_thread: Arc::clone(&self.inner.delivery_thread),
        };

        let handle = std::thread::Builder::new()
            .name(format!("fanout-session-{session_id}"))
            .spawn(move || run_session(&ctx))
            .map_err(FanoutError::WorkerSpawn)?;

        tracing::info!(session = session_id, locator = session.locator().url(), "session started");
        *self.inner.active.lock() = Some(ActiveSession {
            session: session.clone(),
            state,
            stop,
        });
        *worker = Some(handle);
        Ok(session)
    }

    /// Stops the current session and waits for its delivery thread to exit.
    ///
    /// Every sink has seen `on_session_ended` when this returns. Does nothing
    /// if no session is running.
    ///
    /// Called from inside a sink callback (on the delivery thread), this only
    /// signals the session to stop; the thread exits once the callback
    /// returns and is reaped by the next `connect` or `disconnect`.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::WorkerPanicked`] if the delivery thread panicked.
    pub fn disconnect(&self) -> Result<(), FanoutError> {
        if self.inner.on_delivery_thread() {
            tracing::debug!("disconnect requested from the delivery thread");
            self.inner.signal_stop();
            return Ok(());
        }

        let mut worker = self.inner.worker.lock();
        let state = self.inner.signal_stop();
        if worker.is_some() {
            tracing::info!("stopping session");
        }
        Inner::join_worker(&mut worker, state.as_ref())
    }

    /// Attaches a sink. It receives the current format (if any) before this
    /// returns and every unit delivered afterwards.
    pub fn attach(&self, sink: Arc<dyn Sink>) -> SinkId {
        self.inner.router.attach(sink)
    }

    /// Detaches a sink. Returns `false` if the id is unknown.
    pub fn detach(&self, id: SinkId) -> bool {
        self.inner.router.detach(id)
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        self.inner.router.sink_count()
    }

    /// The current or most recent session.
    pub fn current_session(&self) -> Option<Session> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Connection state of the current session, `Idle` before the first one.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .active
            .lock()
            .as_ref()
            .map_or(ConnectionState::Idle, |active| active.state.connection())
    }

    /// Codec parameters of the running session, once resolved.
    pub fn codec_parameters(&self) -> Option<Arc<CodecParameters>> {
        self.inner.router.format()
    }
}

impl std::fmt::Debug for StreamDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDistributor")
            .field("state", &self.connection_state())
            .field("sinks", &self.sink_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockConnector, MockEvent};
    use crate::{MediaUnit, SinkError};
    use std::time::Duration;

    struct NullSink;

    impl Sink for NullSink {
        fn name(&self) -> &str {
            "null"
        }

        fn on_unit(&self, _unit: &MediaUnit) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn distributor(connector: Arc<MockConnector>) -> StreamDistributor {
        StreamDistributor::new(connector, vec![Arc::new(NullSink)], None, FanoutConfig::default())
    }

    fn params() -> CodecParameters {
        CodecParameters::new(vec![0x67], vec![0x68], 640, 480, 44100, 1)
    }

    #[test]
    fn test_idle_before_connect() {
        let distributor = distributor(Arc::new(MockConnector::new()));
        assert_eq!(distributor.connection_state(), ConnectionState::Idle);
        assert!(distributor.current_session().is_none());
        assert_eq!(distributor.sink_count(), 1);
        distributor.disconnect().unwrap();
    }

    #[test]
    fn test_invalid_locator_rejected() {
        let distributor = distributor(Arc::new(MockConnector::new()));
        let result = distributor.connect("rtsp://cam:99999/live");
        assert!(matches!(result, Err(FanoutError::InvalidLocator { .. })));
    }

    #[test]
    fn test_session_active_rejected() {
        let connector = Arc::new(MockConnector::new());
        let feed = connector.push_feed();
        let distributor = distributor(Arc::clone(&connector));

        let session = distributor.connect("rtsp://cam/live").unwrap();
        feed.connected(params());
        assert!(feed.flush());

        let result = distributor.connect("rtsp://other/live");
        assert!(matches!(result, Err(FanoutError::SessionActive { locator }) if locator == "rtsp://cam/live"));

        distributor.disconnect().unwrap();
        assert!(!session.is_running());
        assert_eq!(session.end_reason(), Some(EndReason::Stopped));
        assert_eq!(distributor.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnect_after_session_ends() {
        let connector = Arc::new(MockConnector::new());
        connector.push_refusal("refused");
        let second = connector.push_feed();
        let distributor = distributor(Arc::clone(&connector));

        let first = distributor.connect("rtsp://cam/live").unwrap();
        assert!(first.wait_finished(Duration::from_secs(5)));
        assert!(matches!(first.end_reason(), Some(EndReason::ConnectFailed(_))));

        let session = distributor.connect("rtsp://cam/live").unwrap();
        assert_eq!(session.id(), first.id() + 1);
        second.send(MockEvent::Connected(params()));
        assert!(second.flush());
        assert_eq!(distributor.connection_state(), ConnectionState::Connected);
        assert!(distributor.codec_parameters().is_some());

        second.disconnect();
        assert!(session.wait_finished(Duration::from_secs(5)));
        assert_eq!(session.end_reason(), Some(EndReason::Disconnected));
        assert!(distributor.codec_parameters().is_none());
        assert_eq!(connector.connect_count(), 2);
    }

    #[test]
    fn test_connect_uses_configured_timeout() {
        let connector = Arc::new(MockConnector::new());
        let distributor = StreamDistributor::new(
            Arc::clone(&connector) as Arc<dyn SourceConnector>,
            Vec::new(),
            None,
            FanoutConfig {
                connect_timeout: Duration::from_millis(750),
                ..FanoutConfig::default()
            },
        );

        let session = distributor.connect("rtsp://10.1.1.1:8554/cam").unwrap();
        assert!(session.wait_finished(Duration::from_secs(5)));

        let (locator, timeout) = connector.last_connect().unwrap();
        assert_eq!(locator.host(), "10.1.1.1");
        assert_eq!(locator.port(), 8554);
        assert_eq!(timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_drop_joins_running_session() {
        let connector = Arc::new(MockConnector::new());
        let _feed = connector.push_feed();
        let distributor = distributor(Arc::clone(&connector));

        let session = distributor.connect("rtsp://cam/live").unwrap();
        drop(distributor);

        assert!(!session.is_running());
        assert_eq!(session.end_reason(), Some(EndReason::Stopped));
    }
}
