//! # media-fanout
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Live H.264/AAC stream fan-out with a rotating recorder and a push relay.
//!
//! `media-fanout` takes one upstream session (an RTSP-style camera feed),
//! and hands every encoded access unit to any number of sinks: a recorder
//! that writes keyframe-aligned container files, a relay that re-publishes
//! to a broadcast endpoint, a tokio channel, or your own [`Sink`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use media_fanout::{MediaFanout, RecordingSink, RelaySink, Station};
//! use std::sync::Arc;
//!
//! let distributor = MediaFanout::builder()
//!     .connector(rtsp_connector)
//!     .on_event(|e| tracing::warn!(?e, "session event"))
//!     .build()?;
//!
//! let station = Station::new(
//!     distributor,
//!     Arc::new(RecordingSink::new(mp4_factory)),
//!     Arc::new(RelaySink::new(rtmp_connector).on_health(|e| tracing::info!(?e))),
//! );
//!
//! station.connect("rtsp://192.168.1.20:554/stream1")?;
//! station.start_recording("/var/recordings", "video/avc", 1920, 1080);
//! station.start_streaming("rtmp://live.example.com/app/key", false);
//!
//! // Later: cut the recording at the next keyframe
//! station.request_new_file();
//!
//! station.shutdown()?;
//! ```
//!
//! ## Architecture
//!
//! The crate uses one blocking thread per session:
//!
//! - **Delivery thread**: Drives the session source and calls every sink
//!   synchronously, in attach order. A slow sink slows the whole session
//! - **Sinks**: Each guards its state with one mutex, so operator controls
//!   can be called from any thread while units flow
//! - **Transport threads**: The push client reports connection health on
//!   its own context; the relay resets itself when a connection ends
//!
//! The source, container writer and push client are boundaries: this crate
//! defines the traits ([`source`], [`container`], [`push`]) and ships
//! in-memory implementations for tests.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
pub mod container;
mod distributor;
mod error;
mod event;
pub mod format;
mod pipeline;
pub mod push;
mod session;
mod sink;
pub mod source;
mod station;
mod unit;

pub use builder::{MediaFanout, MediaFanoutBuilder};
pub use config::{FanoutConfig, RecordingConfig, RelayConfig, VideoCodec};
pub use distributor::StreamDistributor;
pub use error::{ContainerError, FanoutError, PushError, SinkError, SourceError};
pub use event::{
    event_callback, health_callback, EndReason, EventCallback, HealthCallback, RecordingCallback,
    RecordingEvent, RelayEvent, SessionEvent,
};
pub use format::CodecParameters;
pub use pipeline::SinkId;
pub use session::{ConnectionState, Session, SessionStats};
pub use sink::{ChannelSink, RecordingSink, RelaySink, Sink};
pub use station::Station;
pub use unit::{MediaUnit, TrackKind};
