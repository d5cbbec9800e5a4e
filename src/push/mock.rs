//! Mock push client for testing without a broadcast endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{PushClient, PushConnector};
use crate::{HealthCallback, PushError, RelayEvent, VideoCodec};

/// One call made on a [`MockPushClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushCall {
    /// `set_video_format`
    SetVideoFormat {
        /// Codec.
        codec: VideoCodec,
        /// Width.
        width: u32,
        /// Height.
        height: u32,
        /// Frame rate.
        frame_rate: u32,
    },
    /// `set_video_only`
    SetVideoOnly(bool),
    /// `connect`
    Connect {
        /// Remote URL.
        url: String,
    },
    /// `set_video_descriptor`
    VideoDescriptor {
        /// SPS bytes.
        sps: Vec<u8>,
        /// PPS bytes.
        pps: Vec<u8>,
    },
    /// `set_audio_descriptor`
    AudioDescriptor {
        /// Sample rate.
        sample_rate_hz: u32,
        /// Stereo flag.
        is_stereo: bool,
    },
    /// `send_video`
    Video {
        /// Payload.
        payload: Vec<u8>,
        /// Timestamp.
        timestamp: Duration,
        /// Keyframe flag.
        is_key_frame: bool,
    },
    /// `send_audio`
    Audio {
        /// Payload.
        payload: Vec<u8>,
        /// Timestamp.
        timestamp: Duration,
    },
    /// `disconnect`
    Disconnect,
}

impl PushCall {
    /// Returns `true` for media sends (not descriptors or control calls).
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Video { .. } | Self::Audio { .. })
    }
}

/// What a mock client does when `connect` is called.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Reports `ConnectionStarted` and `ConnectionSuccess` synchronously.
    #[default]
    Succeed,
    /// Reports `ConnectionStarted` and then `ConnectionFailed` synchronously.
    Fail(String),
    /// Accepts sends but reports nothing; the test drives health events.
    Silent,
}

/// A push client that records every call.
pub struct MockPushClient {
    health: HealthCallback,
    behavior: ConnectBehavior,
    calls: Mutex<Vec<PushCall>>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockPushClient {
    fn record(&self, call: PushCall) {
        self.calls.lock().push(call);
    }

    fn check_send(&self) -> Result<(), PushError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PushError::Transport("injected send failure".to_string()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PushError::NotConnected);
        }
        Ok(())
    }

    /// Returns every call made so far, in order.
    pub fn calls(&self) -> Vec<PushCall> {
        self.calls.lock().clone()
    }

    /// Returns only the media sends and descriptors, in order.
    pub fn stream_calls(&self) -> Vec<PushCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| {
                call.is_media()
                    || matches!(
                        call,
                        PushCall::VideoDescriptor { .. } | PushCall::AudioDescriptor { .. }
                    )
            })
            .cloned()
            .collect()
    }

    /// Returns `true` while the mock considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Makes every subsequent send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Fires a health event as the transport would.
    pub fn emit(&self, event: RelayEvent) {
        if event.ends_connection() {
            self.connected.store(false, Ordering::SeqCst);
        }
        (self.health)(event);
    }
}

impl PushClient for MockPushClient {
    fn set_video_format(&self, codec: VideoCodec, width: u32, height: u32, frame_rate: u32) {
        self.record(PushCall::SetVideoFormat {
            codec,
            width,
            height,
            frame_rate,
        });
    }

    fn set_video_only(&self, video_only: bool) {
        self.record(PushCall::SetVideoOnly(video_only));
    }

    fn connect(&self, url: &str) {
        self.record(PushCall::Connect {
            url: url.to_string(),
        });
        (self.health)(RelayEvent::ConnectionStarted {
            url: url.to_string(),
        });

        match &self.behavior {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                (self.health)(RelayEvent::ConnectionSuccess);
            }
            ConnectBehavior::Fail(reason) => {
                (self.health)(RelayEvent::ConnectionFailed {
                    reason: reason.clone(),
                });
            }
            ConnectBehavior::Silent => {
                self.connected.store(true, Ordering::SeqCst);
            }
        }
    }

    fn set_video_descriptor(&self, sps: &[u8], pps: &[u8]) -> Result<(), PushError> {
        self.check_send()?;
        self.record(PushCall::VideoDescriptor {
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        });
        Ok(())
    }

    fn set_audio_descriptor(&self, sample_rate_hz: u32, is_stereo: bool) -> Result<(), PushError> {
        self.check_send()?;
        self.record(PushCall::AudioDescriptor {
            sample_rate_hz,
            is_stereo,
        });
        Ok(())
    }

    fn send_video(
        &self,
        payload: &[u8],
        timestamp: Duration,
        is_key_frame: bool,
    ) -> Result<(), PushError> {
        self.check_send()?;
        self.record(PushCall::Video {
            payload: payload.to_vec(),
            timestamp,
            is_key_frame,
        });
        Ok(())
    }

    fn send_audio(&self, payload: &[u8], timestamp: Duration) -> Result<(), PushError> {
        self.check_send()?;
        self.record(PushCall::Audio {
            payload: payload.to_vec(),
            timestamp,
        });
        Ok(())
    }

    fn disconnect(&self) {
        self.record(PushCall::Disconnect);
        if self.connected.swap(false, Ordering::SeqCst) {
            (self.health)(RelayEvent::Disconnected);
        }
    }
}

/// A [`PushConnector`] that hands out [`MockPushClient`]s.
///
/// Clones share the same client list.
#[derive(Clone, Default)]
pub struct MockPushConnector {
    behavior: Arc<Mutex<ConnectBehavior>>,
    clients: Arc<Mutex<Vec<Arc<MockPushClient>>>>,
}

impl MockPushConnector {
    /// Creates a connector whose clients connect successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect behavior for clients created from now on.
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Every client created so far, oldest first. One per relay start.
    pub fn clients(&self) -> Vec<Arc<MockPushClient>> {
        self.clients.lock().clone()
    }

    /// The most recently created client.
    pub fn latest(&self) -> Option<Arc<MockPushClient>> {
        self.clients.lock().last().cloned()
    }
}

impl PushConnector for MockPushConnector {
    fn create(&self, health: HealthCallback) -> Arc<dyn PushClient> {
        let client = Arc::new(MockPushClient {
            health,
            behavior: self.behavior.lock().clone(),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        });
        self.clients.lock().push(Arc::clone(&client));
        client
    }
}
