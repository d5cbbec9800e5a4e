//! Codec format metadata and bitstream inspection.
//!
//! This module holds the per-session codec description and the small amount
//! of bitstream parsing the core needs:
//! - Codec parameters (SPS/PPS, resolution, audio sample rate and channels)
//! - IDR keyframe detection on Annex-B video access units

mod nal;
mod params;

pub use nal::{is_idr_access_unit, nal_unit_type, IDR_NAL_TYPE};
pub use params::{AudioParameters, CodecParameters, VideoParameters};
