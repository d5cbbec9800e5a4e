//! Relay sink forwarding units to a push-protocol endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::push::{PushClient, PushConnector};
use crate::sink::Sink;
use crate::{
    CodecParameters, EndReason, HealthCallback, MediaUnit, RelayConfig, RelayEvent, SinkError,
    TrackKind,
};

/// Sentinel for "no reset pending". Epochs start at 1.
const NO_RESET: u64 = 0;

#[derive(Default)]
struct RelayState {
    client: Option<Arc<dyn PushClient>>,
    connected: bool,
    /// Set once the client's `connect` has been called for this epoch.
    connect_issued: bool,
    video_only: bool,
    video_descriptor_sent: bool,
    audio_descriptor_sent: bool,
    /// Incremented on every start.
    epoch: u64,
    format: Option<Arc<CodecParameters>>,
    /// Clients to disconnect once the lock is released.
    retired: Vec<Arc<dyn PushClient>>,
}

impl RelayState {
    /// Drops the connection and clears every per-epoch flag.
    fn reset(&mut self) {
        if let Some(client) = self.client.take() {
            self.retired.push(client);
        }
        self.connected = false;
        self.connect_issued = false;
        self.video_only = false;
        self.video_descriptor_sent = false;
        self.audio_descriptor_sent = false;
    }
}

/// State shared with the health callbacks of live clients.
#[derive(Default)]
struct RelayCore {
    state: Mutex<RelayState>,
    /// Epoch whose connection ended but has not been reset yet.
    pending_reset: AtomicU64,
}

impl RelayCore {
    /// Applies a reset recorded by a health callback, if it is for the
    /// current epoch.
    fn apply_pending_reset(&self, state: &mut RelayState) {
        let pending = self.pending_reset.swap(NO_RESET, Ordering::SeqCst);
        if pending != NO_RESET && pending == state.epoch && state.connected {
            tracing::info!(epoch = pending, "relay connection lost, resetting to stopped");
            state.reset();
        }
    }

    /// Runs `f` under the state lock, then disconnects retired clients with
    /// the lock released.
    fn with_state<R>(&self, f: impl FnOnce(&mut RelayState) -> R) -> R {
        let (result, retired) = {
            let mut state = self.state.lock();
            self.apply_pending_reset(&mut state);
            let result = f(&mut state);
            (result, std::mem::take(&mut state.retired))
        };
        for client in retired {
            client.disconnect();
        }
        result
    }

    /// Like [`with_state`](Self::with_state) but gives up if the lock is busy.
    fn try_apply_pending_reset(&self) {
        let retired = match self.state.try_lock() {
            Some(mut state) => {
                self.apply_pending_reset(&mut state);
                std::mem::take(&mut state.retired)
            }
            None => return,
        };
        for client in retired {
            client.disconnect();
        }
    }
}

/// A sink that re-publishes units to a remote broadcast endpoint.
///
/// Each [`start`](Self::start) opens a new connection epoch with a fresh
/// [`PushClient`]. Within an epoch, the codec descriptor of a track is sent
/// exactly once, immediately before the first unit of that track. Nothing is
/// forwarded until codec parameters are known.
///
/// Connection health is reported asynchronously by the client and passed to
/// the observer registered with [`on_health`](Self::on_health) unchanged.
/// When a notification says the connection is gone (failed or disconnected)
/// the relay returns to the stopped state by itself, so `start` is valid
/// again without an intervening `stop`.
///
/// The client's `connect` and `disconnect` are always called without the
/// relay lock held, so a transport may report health from inside them.
///
/// # Example
///
/// ```
/// use media_fanout::push::MockPushConnector;
/// use media_fanout::RelaySink;
///
/// let relay = RelaySink::new(MockPushConnector::new())
///     .on_health(|event| println!("relay: {event:?}"));
/// relay.start("rtmp://live.example.com/app/key", false);
/// assert!(relay.is_connected());
/// relay.stop();
/// ```
pub struct RelaySink {
    name: String,
    connector: Arc<dyn PushConnector>,
    config: RelayConfig,
    observer: Option<HealthCallback>,
    core: Arc<RelayCore>,
}

impl RelaySink {
    /// Creates a stopped relay that creates clients with `connector`.
    pub fn new(connector: impl PushConnector + 'static) -> Self {
        Self {
            name: "relay".to_string(),
            connector: Arc::new(connector),
            config: RelayConfig::default(),
            observer: None,
            core: Arc::new(RelayCore::default()),
        }
    }

    /// Sets a custom name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the relay configuration.
    #[must_use]
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the connection-health observer.
    ///
    /// Runs on whatever thread the transport reports from. A reset caused by
    /// the event is applied before the observer runs when the relay is idle;
    /// while a unit is being forwarded it is applied on the relay's next call
    /// instead, so the observer may still see `is_connected()` return `true`.
    #[must_use]
    pub fn on_health<F>(mut self, callback: F) -> Self
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(callback));
        self
    }

    /// Starts relaying to `url`.
    ///
    /// Does nothing if already connected. The connection is considered up as
    /// soon as the connect is issued; the real outcome arrives through the
    /// health observer. Units arriving while the client's `connect` is still
    /// being called are not forwarded. The announced resolution comes from the current codec
    /// parameters, or [`RelayConfig::fallback_resolution`] before they are known.
    pub fn start(&self, url: &str, video_only: bool) {
        let started = self.core.with_state(|state| {
            if state.connected {
                tracing::debug!(sink = %self.name, "relay already started");
                return None;
            }

            state.epoch += 1;
            let epoch = state.epoch;
            state.video_only = video_only;
            state.connect_issued = false;
            state.video_descriptor_sent = false;
            state.audio_descriptor_sent = false;

            let client = self.connector.create(health_handler(
                Arc::downgrade(&self.core),
                self.observer.clone(),
                epoch,
            ));

            let (width, height) = state
                .format
                .as_ref()
                .map_or(self.config.fallback_resolution, |f| {
                    (f.video.width, f.video.height)
                });
            client.set_video_format(self.config.video_codec, width, height, self.config.frame_rate);
            client.set_video_only(video_only);

            state.client = Some(Arc::clone(&client));
            state.connected = true;

            tracing::info!(
                sink = %self.name,
                url,
                epoch,
                width,
                height,
                video_only,
                "relay starting"
            );
            Some((client, epoch))
        });

        let Some((client, epoch)) = started else {
            return;
        };
        client.connect(url);

        // A stop (or a newer start) may have raced the connect
        let current = self.core.with_state(|state| {
            let current = state.connected && state.epoch == epoch;
            if current {
                state.connect_issued = true;
            }
            current
        });
        if !current {
            client.disconnect();
        }
    }

    /// Stops relaying and resets all state. Does nothing if not connected.
    pub fn stop(&self) {
        self.core.with_state(|state| {
            if state.connected {
                tracing::info!(sink = %self.name, epoch = state.epoch, "relay stopping");
                state.reset();
            }
        });
    }

    /// Returns `true` between `start` and the end of the connection.
    pub fn is_connected(&self) -> bool {
        self.core.with_state(|state| state.connected)
    }

    /// Returns `true` if the video descriptor was sent in this epoch.
    pub fn video_descriptor_sent(&self) -> bool {
        self.core.with_state(|state| state.video_descriptor_sent)
    }

    /// Returns `true` if the audio descriptor was sent in this epoch.
    pub fn audio_descriptor_sent(&self) -> bool {
        self.core.with_state(|state| state.audio_descriptor_sent)
    }

    /// Current connection epoch. Zero before the first start.
    pub fn epoch(&self) -> u64 {
        self.core.with_state(|state| state.epoch)
    }

    fn forward(&self, state: &mut RelayState, unit: &MediaUnit) -> Result<(), SinkError> {
        if !state.connected {
            return Ok(());
        }
        if !state.connect_issued {
            tracing::trace!(sink = %self.name, epoch = state.epoch, "connect not issued yet, skipping unit");
            return Ok(());
        }
        if unit.track == TrackKind::Audio && state.video_only {
            return Ok(());
        }
        let (Some(format), Some(client)) = (state.format.clone(), state.client.clone()) else {
            tracing::trace!(sink = %self.name, "relay has no format yet, skipping unit");
            return Ok(());
        };

        match unit.track {
            TrackKind::Video => {
                if !state.video_descriptor_sent {
                    client.set_video_descriptor(&format.video.sps, &format.video.pps)?;
                    state.video_descriptor_sent = true;
                    tracing::debug!(sink = %self.name, epoch = state.epoch, "video descriptor sent");
                }
                client.send_video(&unit.payload, unit.timestamp, unit.is_key_frame)?;
            }
            TrackKind::Audio => {
                if !state.audio_descriptor_sent {
                    client.set_audio_descriptor(
                        format.audio.sample_rate_hz,
                        format.audio.is_stereo(),
                    )?;
                    state.audio_descriptor_sent = true;
                    tracing::debug!(sink = %self.name, epoch = state.epoch, "audio descriptor sent");
                }
                client.send_audio(&unit.payload, unit.timestamp)?;
            }
        }
        Ok(())
    }
}

/// Builds the health callback for one connection epoch.
///
/// The callback never blocks on the relay lock: it records the reset and
/// applies it only if the lock is free. Otherwise the next locked entry point
/// applies it.
fn health_handler(
    core: Weak<RelayCore>,
    observer: Option<HealthCallback>,
    epoch: u64,
) -> HealthCallback {
    Arc::new(move |event: RelayEvent| {
        tracing::debug!(epoch, ?event, "relay health");

        if event.ends_connection() {
            if let Some(core) = core.upgrade() {
                core.pending_reset.fetch_max(epoch, Ordering::SeqCst);
                core.try_apply_pending_reset();
            }
        }

        if let Some(ref observer) = observer {
            observer(event);
        }
    })
}

impl Sink for RelaySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_format(&self, params: &Arc<CodecParameters>) {
        self.core
            .with_state(|state| state.format = Some(Arc::clone(params)));
    }

    fn on_unit(&self, unit: &MediaUnit) -> Result<(), SinkError> {
        self.core.with_state(|state| self.forward(state, unit))
    }

    fn on_session_ended(&self, reason: &EndReason) {
        self.core.with_state(|state| {
            state.format = None;
            if state.connected {
                tracing::debug!(sink = %self.name, %reason, "session ended, relay idle until next format");
            }
        });
    }
}
