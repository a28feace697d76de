//! Downsampling and RMS algorithms
//!
//! Pure functions shared by the live spectrum tap and the waveform engine.

mod downsample;
mod rms;

pub use downsample::{
    downsample_by_bin_size, downsample_by_bins, map_range, spectrum_bars, DisplayableBar, Scale,
    BAR_FLOOR, DEFAULT_SPECTRUM_BINS, HUE_RANGE, SPECTRUM_DOMAIN,
};
pub use rms::{channel_average_rms, normalize, peak, rms, window_rms};
