//! Session handle and per-session state.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::source::Locator;
use crate::EndReason;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session has been started.
    Idle,
    /// The source is being connected.
    Connecting,
    /// Codec parameters are known and units are flowing.
    Connected,
    /// Teardown was requested and is in progress.
    Disconnecting,
    /// The session is over.
    Disconnected,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            4 => Self::Disconnected,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnecting => 3,
            Self::Disconnected => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Statistics about a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Video units delivered to sinks.
    pub video_units: u64,
    /// Audio units delivered to sinks.
    pub audio_units: u64,
    /// Video keyframes among the delivered video units.
    pub key_frames: u64,
    /// Units dropped because they arrived before codec parameters.
    pub dropped_units: u64,
}

/// Internal state shared between `Session` handles and the delivery thread.
pub(crate) struct SessionState {
    running: AtomicBool,
    connection: AtomicU8,
    pub video_units: AtomicU64,
    pub audio_units: AtomicU64,
    pub key_frames: AtomicU64,
    pub dropped_units: AtomicU64,
    end_reason: Mutex<Option<EndReason>>,
    finished: Condvar,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            connection: AtomicU8::new(ConnectionState::Idle.as_u8()),
            video_units: AtomicU64::new(0),
            audio_units: AtomicU64::new(0),
            key_frames: AtomicU64::new(0),
            dropped_units: AtomicU64::new(0),
            end_reason: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection.load(Ordering::SeqCst))
    }

    pub fn set_connection(&self, state: ConnectionState) {
        self.connection.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Moves to `Disconnecting` unless the session already ended.
    pub fn begin_teardown(&self) {
        let _ = self.connection.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            (current != ConnectionState::Disconnected.as_u8())
                .then_some(ConnectionState::Disconnecting.as_u8())
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            video_units: self.video_units.load(Ordering::SeqCst),
            audio_units: self.audio_units.load(Ordering::SeqCst),
            key_frames: self.key_frames.load(Ordering::SeqCst),
            dropped_units: self.dropped_units.load(Ordering::SeqCst),
        }
    }

    /// Marks the session finished and wakes every waiter.
    pub fn finish(&self, reason: EndReason) {
        let mut end_reason = self.end_reason.lock();
        *end_reason = Some(reason);
        self.set_connection(ConnectionState::Disconnected);
        self.running.store(false, Ordering::SeqCst);
        self.finished.notify_all();
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason.lock().clone()
    }

    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut end_reason = self.end_reason.lock();
        while end_reason.is_none() {
            if self
                .finished
                .wait_until(&mut end_reason, deadline)
                .timed_out()
            {
                return end_reason.is_some();
            }
        }
        true
    }
}

/// Handle to one connect-to-disconnect lifetime of the source.
///
/// Returned by [`StreamDistributor::connect()`]. The handle observes the
/// session; it does not own it. Dropping it has no effect, and teardown
/// goes through [`StreamDistributor::disconnect()`]. Cloning is cheap.
///
/// # Example
///
/// ```ignore
/// let session = distributor.connect("rtsp://192.168.1.20:554/stream1")?;
///
/// // Units flow on the delivery thread...
/// if session.wait_finished(Duration::from_secs(60)) {
///     println!("ended: {:?}", session.end_reason());
/// }
/// println!("{:?}", session.stats());
/// ```
///
/// [`StreamDistributor::connect()`]: crate::StreamDistributor::connect
/// [`StreamDistributor::disconnect()`]: crate::StreamDistributor::disconnect
#[derive(Clone)]
pub struct Session {
    id: u64,
    locator: Locator,
    state: Arc<SessionState>,
}

impl Session {
    pub(crate) fn new(id: u64, locator: Locator, state: Arc<SessionState>) -> Self {
        Self { id, locator, state }
    }

    /// Distributor-unique session number, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint this session connects to.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection()
    }

    /// Returns `true` until the session has fully ended.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }

    /// Why the session ended, once it has.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.state.end_reason()
    }

    /// Blocks until the session ends or `timeout` elapses.
    ///
    /// Returns `true` if the session ended. Every sink has seen
    /// `on_session_ended` by then.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.state.wait_finished(timeout)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("locator", &self.locator.url())
            .field("state", &self.state.connection())
            .finish()
    }
}
