//! Router that fans out access units to attached sinks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::sink::Sink;
use crate::source::StopSignal;
use crate::{CodecParameters, EndReason, EventCallback, MediaUnit, SessionEvent};

/// Identifies an attached sink for later detaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    /// Returns the raw id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// One attached sink plus the format it has been primed with.
struct Subscriber {
    id: SinkId,
    sink: Arc<dyn Sink>,
    primed: Mutex<Option<Arc<CodecParameters>>>,
    detached: AtomicBool,
}

impl Subscriber {
    /// Calls `on_format` unless this exact format was already delivered.
    ///
    /// Attach and delivery may race to prime a late subscriber; the lock
    /// makes sure only one of them wins.
    fn ensure_primed(&self, format: &Arc<CodecParameters>) {
        let mut primed = self.primed.lock();
        if primed.as_ref().is_some_and(|p| Arc::ptr_eq(p, format)) {
            return;
        }
        self.sink.on_format(format);
        *primed = Some(Arc::clone(format));
    }

    fn reset(&self) {
        *self.primed.lock() = None;
    }
}

/// Subscriber registry and broadcast logic.
///
/// The registry lock is only held to copy the subscriber list; every sink
/// call happens on that snapshot, so sinks may attach or detach (even
/// themselves) from inside a callback.
pub(crate) struct Router {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    format: RwLock<Option<Arc<CodecParameters>>>,
    next_id: AtomicU64,
    event_callback: Option<EventCallback>,
}

impl Router {
    pub fn new(event_callback: Option<EventCallback>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            format: RwLock::new(None),
            next_id: AtomicU64::new(1),
            event_callback,
        }
    }

    fn emit_event(&self, event: SessionEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }

    fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().clone()
    }

    /// Attaches a sink. If a session format is known, the sink receives it
    /// before returning.
    pub fn attach(&self, sink: Arc<dyn Sink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscriber = Arc::new(Subscriber {
            id,
            sink,
            primed: Mutex::new(None),
            detached: AtomicBool::new(false),
        });
        self.subscribers.write().push(Arc::clone(&subscriber));
        tracing::info!(sink = subscriber.sink.name(), %id, "sink attached");

        let format = self.format.read().clone();
        if let Some(format) = format {
            subscriber.ensure_primed(&format);
        }
        id
    }

    /// Detaches a sink. Returns `false` if the id is unknown.
    ///
    /// A unit already being delivered to the sink completes; no further
    /// calls are made after this returns, except from a delivery that
    /// started before it.
    pub fn detach(&self, id: SinkId) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write();
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|index| subscribers.remove(index))
        };
        match removed {
            Some(subscriber) => {
                subscriber.detached.store(true, Ordering::SeqCst);
                tracing::info!(sink = subscriber.sink.name(), %id, "sink detached");
                true
            }
            None => false,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn format(&self) -> Option<Arc<CodecParameters>> {
        self.format.read().clone()
    }

    /// Caches the session format and primes every attached sink with it.
    pub fn broadcast_format(&self, params: Arc<CodecParameters>) {
        *self.format.write() = Some(Arc::clone(&params));
        for subscriber in self.snapshot() {
            if subscriber.detached.load(Ordering::SeqCst) {
                continue;
            }
            subscriber.ensure_primed(&params);
        }
    }

    /// Delivers one unit to every attached sink, in attach order.
    ///
    /// Stops early once `stop` fires.
    pub fn deliver(&self, unit: &MediaUnit, stop: &StopSignal) {
        let Some(format) = self.format() else {
            return;
        };

        for subscriber in self.snapshot() {
            if stop.is_stopped() {
                return;
            }
            if subscriber.detached.load(Ordering::SeqCst) {
                continue;
            }

            subscriber.ensure_primed(&format);
            let sink_name = subscriber.sink.name();
            match subscriber.sink.on_unit(unit) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(sink = sink_name, error = %e, "fatal sink error, detaching");
                    let error = e.to_string();
                    self.detach(subscriber.id);
                    self.emit_event(SessionEvent::SinkDetached {
                        sink_name: sink_name.to_string(),
                        error,
                    });
                }
                Err(e) => {
                    tracing::warn!(sink = sink_name, error = %e, track = %unit.track, "sink error");
                    self.emit_event(SessionEvent::SinkError {
                        sink_name: sink_name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Forgets the session format and tells every sink the session is over.
    pub fn end_session(&self, reason: &EndReason) {
        *self.format.write() = None;
        for subscriber in self.snapshot() {
            subscriber.reset();
            if subscriber.detached.load(Ordering::SeqCst) {
                continue;
            }
            subscriber.sink.on_session_ended(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SinkError;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Format(u32),
        Unit(u64),
        Ended(EndReason),
    }

    struct TestSink {
        name: String,
        calls: Mutex<Vec<Call>>,
        fail_with: Mutex<Option<fn() -> SinkError>>,
    }

    impl TestSink {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                calls: Mutex::new(Vec::new()),
                fail_with: Mutex::new(None),
            })
        }

        fn failing(name: &str, error: fn() -> SinkError) -> Arc<Self> {
            let sink = Self::new(name);
            *sink.fail_with.lock() = Some(error);
            sink
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Sink for TestSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_format(&self, params: &Arc<CodecParameters>) {
            self.calls.lock().push(Call::Format(params.video.width));
        }

        fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
            self.calls.lock().push(Call::Unit(unit.timestamp_us()));
            match *self.fail_with.lock() {
                Some(make_error) => Err(make_error()),
                None => Ok(()),
            }
        }

        fn on_session_ended(&self, reason: &EndReason) {
            self.calls.lock().push(Call::Ended(reason.clone()));
        }
    }

    fn params(width: u32) -> Arc<CodecParameters> {
        Arc::new(CodecParameters::new(vec![0x67], vec![0x68], width, 720, 48000, 2))
    }

    fn audio(ts: u64) -> MediaUnit {
        MediaUnit::audio(vec![1, 2], Duration::from_micros(ts))
    }

    fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: EventCallback = Arc::new(move |e| sink.lock().push(e));
        (callback, events)
    }

    #[test]
    fn test_router_delivers_to_all_sinks_in_order() {
        let router = Router::new(None);
        let a = TestSink::new("a");
        let b = TestSink::new("b");
        router.attach(a.clone());
        router.attach(b.clone());

        router.broadcast_format(params(1280));
        let stop = StopSignal::new();
        router.deliver(&audio(1), &stop);
        router.deliver(&audio(2), &stop);

        let expected = vec![Call::Format(1280), Call::Unit(1), Call::Unit(2)];
        assert_eq!(a.calls(), expected);
        assert_eq!(b.calls(), expected);
    }

    #[test]
    fn test_router_drops_units_without_format() {
        let router = Router::new(None);
        let a = TestSink::new("a");
        router.attach(a.clone());

        router.deliver(&audio(1), &StopSignal::new());
        assert!(a.calls().is_empty());
    }

    #[test]
    fn test_late_attach_primed_before_next_unit() {
        let router = Router::new(None);
        let stop = StopSignal::new();
        router.broadcast_format(params(640));
        router.deliver(&audio(1), &stop);

        let late = TestSink::new("late");
        router.attach(late.clone());
        assert_eq!(late.calls(), vec![Call::Format(640)]);

        router.deliver(&audio(2), &stop);
        assert_eq!(late.calls(), vec![Call::Format(640), Call::Unit(2)]);
    }

    #[test]
    fn test_format_delivered_once_per_session() {
        let router = Router::new(None);
        let a = TestSink::new("a");
        router.attach(a.clone());
        let stop = StopSignal::new();

        router.broadcast_format(params(640));
        router.deliver(&audio(1), &stop);
        router.end_session(&EndReason::Disconnected);
        router.broadcast_format(params(1920));
        router.deliver(&audio(2), &stop);

        assert_eq!(
            a.calls(),
            vec![
                Call::Format(640),
                Call::Unit(1),
                Call::Ended(EndReason::Disconnected),
                Call::Format(1920),
                Call::Unit(2),
            ]
        );
    }

    #[test]
    fn test_detach_stops_delivery() {
        let router = Router::new(None);
        let a = TestSink::new("a");
        let id = router.attach(a.clone());
        router.broadcast_format(params(640));

        assert!(router.detach(id));
        assert!(!router.detach(id));
        router.deliver(&audio(1), &StopSignal::new());
        router.end_session(&EndReason::Stopped);

        assert_eq!(a.calls(), vec![Call::Format(640)]);
        assert_eq!(router.sink_count(), 0);
    }

    #[test]
    fn test_recoverable_error_isolated() {
        let (callback, events) = collecting_callback();
        let router = Router::new(Some(callback));
        let bad = TestSink::failing("bad", || SinkError::custom("boom"));
        let good = TestSink::new("good");
        router.attach(bad.clone());
        router.attach(good.clone());
        router.broadcast_format(params(640));

        let stop = StopSignal::new();
        router.deliver(&audio(1), &stop);
        router.deliver(&audio(2), &stop);

        assert_eq!(router.sink_count(), 2);
        assert_eq!(bad.calls().len(), 3);
        assert_eq!(good.calls().len(), 3);
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SessionEvent::SinkError { sink_name, error } if sink_name == "bad" && error == "boom"
        ));
    }

    #[test]
    fn test_fatal_error_detaches_sink() {
        let (callback, events) = collecting_callback();
        let router = Router::new(Some(callback));
        let bad = TestSink::failing("bad", || SinkError::sequencing("no track"));
        let good = TestSink::new("good");
        router.attach(bad.clone());
        router.attach(good.clone());
        router.broadcast_format(params(640));

        let stop = StopSignal::new();
        router.deliver(&audio(1), &stop);
        router.deliver(&audio(2), &stop);

        assert_eq!(bad.calls(), vec![Call::Format(640), Call::Unit(1)]);
        assert_eq!(good.calls().len(), 3);
        assert_eq!(router.sink_count(), 1);
        assert!(matches!(
            &events.lock()[0],
            SessionEvent::SinkDetached { sink_name, .. } if sink_name == "bad"
        ));
    }

    #[test]
    fn test_stop_halts_delivery_between_sinks() {
        struct StoppingSink {
            stop: StopSignal,
        }

        impl Sink for StoppingSink {
            fn name(&self) -> &str {
                "stopper"
            }

            fn on_unit(&self, _unit: &MediaUnit) -> Result<(), SinkError> {
                self.stop.stop();
                Ok(())
            }
        }

        let router = Router::new(None);
        let stop = StopSignal::new();
        router.attach(Arc::new(StoppingSink { stop: stop.clone() }));
        let after = TestSink::new("after");
        router.attach(after.clone());
        router.broadcast_format(params(640));

        router.deliver(&audio(1), &stop);
        assert_eq!(after.calls(), vec![Call::Format(640)]);
    }

    #[test]
    fn test_sink_can_detach_itself_during_delivery() {
        struct SelfDetaching {
            router: Arc<Router>,
            id: Mutex<Option<SinkId>>,
        }

        impl Sink for SelfDetaching {
            fn name(&self) -> &str {
                "self-detaching"
            }

            fn on_unit(&self, _unit: &MediaUnit) -> Result<(), SinkError> {
                if let Some(id) = self.id.lock().take() {
                    self.router.detach(id);
                }
                Ok(())
            }
        }

        let router = Arc::new(Router::new(None));
        let sink = Arc::new(SelfDetaching {
            router: Arc::clone(&router),
            id: Mutex::new(None),
        });
        let id = router.attach(sink.clone());
        *sink.id.lock() = Some(id);
        let other = TestSink::new("other");
        router.attach(other.clone());
        router.broadcast_format(params(640));

        let stop = StopSignal::new();
        router.deliver(&audio(1), &stop);
        router.deliver(&audio(2), &stop);

        assert_eq!(router.sink_count(), 1);
        assert_eq!(other.calls().len(), 3);
    }

    #[test]
    fn test_sink_id_display() {
        let router = Router::new(None);
        let id = router.attach(TestSink::new("a"));
        assert_eq!(id.to_string(), format!("sink-{}", id.as_u64()));
    }
}
