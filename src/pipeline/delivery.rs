//! Delivery bridge - runs one session and forwards its events to the router.
//!
//! The bridge is the single hot path of the distributor. It runs on the
//! session's dedicated thread and is responsible for:
//! - Connecting the source and driving it to completion
//! - Broadcasting codec parameters once per session
//! - Wrapping raw payloads into `MediaUnit`s and handing them to the router
//! - Keeping session statistics and the connection state current
//! - Deciding the end reason and telling every sink the session is over

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;

use crate::event::EventCallback;
use crate::pipeline::Router;
use crate::session::{ConnectionState, SessionState};
use crate::source::{Locator, SourceConnector, SourceListener, StopSignal};
use crate::{CodecParameters, EndReason, FanoutConfig, MediaUnit, SessionEvent, TrackKind};

/// Everything a session thread needs, moved onto that thread.
pub(crate) struct SessionContext {
    pub session_id: u64,
    pub locator: Locator,
    pub router: Arc<Router>,
    pub connector: Arc<dyn SourceConnector>,
    pub config: FanoutConfig,
    pub event_callback: Option<EventCallback>,
    pub state: Arc<SessionState>,
    pub stop: StopSignal,
    pub delivery_thread: Arc<Mutex<Option<ThreadId>>>,
}

impl SessionContext {
    fn emit_event(&self, event: SessionEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Source listener that feeds the router.
struct DeliveryBridge<'a> {
    ctx: &'a SessionContext,
    format_seen: bool,
    unauthorized: bool,
    failure: Option<String>,
    delivered: u64,
}

impl<'a> DeliveryBridge<'a> {
    fn new(ctx: &'a SessionContext) -> Self {
        Self {
            ctx,
            format_seen: false,
            unauthorized: false,
            failure: None,
            delivered: 0,
        }
    }

    fn deliver(&mut self, unit: MediaUnit) {
        let state = &self.ctx.state;
        if !self.format_seen {
            let dropped = state.dropped_units.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                session = self.ctx.session_id,
                track = %unit.track,
                dropped,
                "unit arrived before codec parameters, dropping"
            );
            return;
        }
        if self.ctx.stop.is_stopped() {
            return;
        }

        tracing::trace!(
            track = %unit.track,
            ts_us = unit.timestamp_us(),
            bytes = unit.len(),
            key = unit.is_key_frame,
            "unit"
        );
        self.ctx.router.deliver(&unit, &self.ctx.stop);

        match unit.track {
            TrackKind::Video => {
                state.video_units.fetch_add(1, Ordering::SeqCst);
                if unit.is_key_frame {
                    state.key_frames.fetch_add(1, Ordering::SeqCst);
                }
            }
            TrackKind::Audio => {
                state.audio_units.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.delivered += 1;
        let interval = self.ctx.config.stats_log_interval;
        if interval > 0 && self.delivered % interval == 0 {
            let stats = state.stats();
            tracing::debug!(
                session = self.ctx.session_id,
                video = stats.video_units,
                audio = stats.audio_units,
                key_frames = stats.key_frames,
                sinks = self.ctx.router.sink_count(),
                "delivery progress"
            );
        }
    }

    /// Picks the end reason. An operator stop wins over anything the source
    /// reported while shutting down.
    fn end_reason(&self, run_error: Option<String>) -> EndReason {
        if self.ctx.stop.is_stopped() {
            EndReason::Stopped
        } else if let Some(message) = run_error.or_else(|| self.failure.clone()) {
            EndReason::Failed(message)
        } else if self.unauthorized {
            EndReason::Unauthorized
        } else {
            EndReason::Disconnected
        }
    }
}

impl SourceListener for DeliveryBridge<'_> {
    fn on_connected(&mut self, params: CodecParameters) {
        if self.format_seen {
            tracing::warn!(session = self.ctx.session_id, "source re-sent codec parameters, ignoring");
            return;
        }
        self.format_seen = true;

        let (width, height) = (params.video.width, params.video.height);
        tracing::info!(
            session = self.ctx.session_id,
            width,
            height,
            sample_rate = params.audio.sample_rate_hz,
            channels = params.audio.channels,
            "codec parameters resolved"
        );
        self.ctx.router.broadcast_format(Arc::new(params));
        self.ctx.state.set_connection(ConnectionState::Connected);
        self.ctx.emit_event(SessionEvent::Connected { width, height });
    }

    fn on_video_unit(&mut self, data: &[u8], timestamp: Duration) {
        self.deliver(MediaUnit::video(data, timestamp));
    }

    fn on_audio_unit(&mut self, data: &[u8], timestamp: Duration) {
        self.deliver(MediaUnit::audio(data, timestamp));
    }

    fn on_disconnected(&mut self) {
        tracing::info!(session = self.ctx.session_id, "source disconnected");
    }

    fn on_unauthorized(&mut self) {
        tracing::warn!(session = self.ctx.session_id, "source rejected credentials");
        self.unauthorized = true;
        self.ctx.emit_event(SessionEvent::Unauthorized);
    }

    fn on_failed(&mut self, message: &str) {
        tracing::warn!(session = self.ctx.session_id, error = message, "source failed");
        if self.failure.is_none() {
            self.failure = Some(message.to_string());
        }
    }
}

/// Runs one session to completion on the calling thread.
pub(crate) fn run_session(ctx: &SessionContext) {
    *ctx.delivery_thread.lock() = Some(std::thread::current().id());

    let reason = drive(ctx);
    finish(ctx, reason);
}

fn drive(ctx: &SessionContext) -> EndReason {
    if ctx.stop.is_stopped() {
        return EndReason::Stopped;
    }

    ctx.state.set_connection(ConnectionState::Connecting);
    ctx.emit_event(SessionEvent::Connecting {
        locator: ctx.locator.url().to_string(),
    });
    tracing::info!(
        session = ctx.session_id,
        host = ctx.locator.host(),
        port = ctx.locator.port(),
        "connecting to source"
    );

    let mut source = match ctx.connector.connect(&ctx.locator, ctx.config.connect_timeout) {
        Ok(source) => source,
        Err(e) => {
            tracing::warn!(session = ctx.session_id, error = %e, "source connect failed");
            if ctx.stop.is_stopped() {
                return EndReason::Stopped;
            }
            return EndReason::ConnectFailed(e.to_string());
        }
    };

    let mut bridge = DeliveryBridge::new(ctx);
    let run_error = match source.run(&mut bridge, &ctx.stop) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(session = ctx.session_id, error = %e, "source ended with error");
            Some(e.to_string())
        }
    };
    bridge.end_reason(run_error)
}

fn finish(ctx: &SessionContext, reason: EndReason) {
    ctx.router.end_session(&reason);

    let stats = ctx.state.stats();
    tracing::info!(
        session = ctx.session_id,
        %reason,
        video = stats.video_units,
        audio = stats.audio_units,
        dropped = stats.dropped_units,
        "session ended"
    );
    ctx.state.finish(reason.clone());
    ctx.emit_event(SessionEvent::SessionEnded { reason });

    let mut delivery_thread = ctx.delivery_thread.lock();
    if *delivery_thread == Some(std::thread::current().id()) {
        *delivery_thread = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Sink;
    use crate::source::{MockConnector, MockEvent};
    use crate::SinkError;

    struct Recorder {
        units: Mutex<Vec<(TrackKind, u64)>>,
        formats: Mutex<usize>,
        ended: Mutex<Vec<EndReason>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                units: Mutex::new(Vec::new()),
                formats: Mutex::new(0),
                ended: Mutex::new(Vec::new()),
            })
        }
    }

    impl Sink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_format(&self, _params: &Arc<CodecParameters>) {
            *self.formats.lock() += 1;
        }

        fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
            self.units.lock().push((unit.track, unit.timestamp_us()));
            Ok(())
        }

        fn on_session_ended(&self, reason: &EndReason) {
            self.ended.lock().push(reason.clone());
        }
    }

    fn params() -> CodecParameters {
        CodecParameters::new(vec![0x67], vec![0x68], 1280, 720, 48000, 2)
    }

    fn context(
        connector: impl SourceConnector + 'static,
    ) -> (SessionContext, Arc<Recorder>, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&events);
        let router = Arc::new(Router::new(None));
        let recorder = Recorder::new();
        router.attach(recorder.clone());

        let ctx = SessionContext {
            session_id: 1,
            locator: Locator::parse("rtsp://10.0.0.5/live").unwrap(),
            router,
            connector: Arc::new(connector),
            config: FanoutConfig {
                stats_log_interval: 2,
                ..FanoutConfig::default()
            },
            event_callback: Some(Arc::new(move |e| store.lock().push(e))),
            state: Arc::new(SessionState::new()),
            stop: StopSignal::new(),
            delivery_thread: Arc::new(Mutex::new(None)),
        };
        (ctx, recorder, events)
    }

    fn video(ts: u64, key: bool) -> MockEvent {
        let nal = if key { 0x65 } else { 0x41 };
        MockEvent::Video {
            payload: vec![0, 0, 0, 1, nal],
            timestamp: Duration::from_micros(ts),
        }
    }

    #[test]
    fn test_session_delivers_and_counts() {
        let connector = MockConnector::scripted(vec![
            MockEvent::Connected(params()),
            video(0, true),
            MockEvent::Audio {
                payload: vec![1],
                timestamp: Duration::from_micros(10),
            },
            video(33, false),
            MockEvent::Disconnected,
        ]);
        let (ctx, recorder, events) = context(connector);

        run_session(&ctx);

        assert_eq!(*recorder.formats.lock(), 1);
        assert_eq!(
            *recorder.units.lock(),
            vec![
                (TrackKind::Video, 0),
                (TrackKind::Audio, 10),
                (TrackKind::Video, 33)
            ]
        );
        assert_eq!(*recorder.ended.lock(), vec![EndReason::Disconnected]);

        let stats = ctx.state.stats();
        assert_eq!(stats.video_units, 2);
        assert_eq!(stats.audio_units, 1);
        assert_eq!(stats.key_frames, 1);
        assert!(!ctx.state.is_running());
        assert_eq!(ctx.state.connection(), ConnectionState::Disconnected);
        assert!(ctx.delivery_thread.lock().is_none());

        let events = events.lock();
        assert!(matches!(events[0], SessionEvent::Connecting { .. }));
        assert!(matches!(
            events[1],
            SessionEvent::Connected {
                width: 1280,
                height: 720
            }
        ));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::SessionEnded {
                reason: EndReason::Disconnected
            })
        ));
    }

    #[test]
    fn test_units_before_format_are_dropped() {
        let connector = MockConnector::scripted(vec![
            video(0, true),
            MockEvent::Connected(params()),
            video(40, true),
            MockEvent::Disconnected,
        ]);
        let (ctx, recorder, _events) = context(connector);

        run_session(&ctx);

        assert_eq!(*recorder.units.lock(), vec![(TrackKind::Video, 40)]);
        assert_eq!(ctx.state.stats().dropped_units, 1);
    }

    #[test]
    fn test_connect_failure_ends_session() {
        let connector = MockConnector::new();
        connector.push_refusal("connection refused");
        let (ctx, recorder, events) = context(connector);

        run_session(&ctx);

        assert_eq!(*recorder.formats.lock(), 0);
        assert!(recorder.units.lock().is_empty());
        let ended = recorder.ended.lock();
        assert_eq!(ended.len(), 1);
        assert!(matches!(&ended[0], EndReason::ConnectFailed(msg) if msg.contains("connection refused")));
        assert!(matches!(
            events.lock().last(),
            Some(SessionEvent::SessionEnded {
                reason: EndReason::ConnectFailed(_)
            })
        ));
    }

    #[test]
    fn test_failure_reason_reported() {
        let connector = MockConnector::scripted(vec![
            MockEvent::Connected(params()),
            MockEvent::Failed("socket reset".to_string()),
        ]);
        let (ctx, recorder, _events) = context(connector);

        run_session(&ctx);

        assert_eq!(
            *recorder.ended.lock(),
            vec![EndReason::Failed("socket reset".to_string())]
        );
    }

    #[test]
    fn test_unauthorized_reason_reported() {
        let connector = MockConnector::scripted(vec![MockEvent::Unauthorized, MockEvent::Disconnected]);
        let (ctx, recorder, events) = context(connector);

        run_session(&ctx);

        assert_eq!(*recorder.ended.lock(), vec![EndReason::Unauthorized]);
        assert!(events
            .lock()
            .iter()
            .any(|e| matches!(e, SessionEvent::Unauthorized)));
    }

    #[test]
    fn test_io_error_reported_as_failure() {
        let connector = MockConnector::scripted(vec![
            MockEvent::Connected(params()),
            MockEvent::IoError("broken pipe".to_string()),
        ]);
        let (ctx, recorder, _events) = context(connector);

        run_session(&ctx);

        let ended = recorder.ended.lock();
        assert!(matches!(&ended[0], EndReason::Failed(msg) if msg.contains("broken pipe")));
    }

    #[test]
    fn test_stopped_before_start() {
        let connector = Arc::new(MockConnector::new());
        let (ctx, recorder, _events) = context(Arc::clone(&connector));
        ctx.stop.stop();

        run_session(&ctx);

        assert_eq!(connector.connect_count(), 0);
        assert_eq!(*recorder.ended.lock(), vec![EndReason::Stopped]);
    }
}
