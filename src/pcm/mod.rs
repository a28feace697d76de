//! PCM buffer utilities
//!
//! This module provides:
//! - Raw interleaved/non-interleaved PCM storage
//! - Frame-range segment copies
//! - Per-channel sample access for int16, int32 and float32 data

mod buffer;
mod format;

pub use buffer::{ChannelData, PcmBuffer};
pub use format::{PcmFormat, Sample, SampleFormat};
