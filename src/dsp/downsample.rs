//! Amplitude downsampling for the live spectrum display
//!
//! One pipeline for every entry point: absolute value, optional dB
//! conversion clipped to a noise floor, then a moving-average decimation.

use crate::error::{AudioError, AudioResult};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Bin values are mapped from this domain onto [0, 1]
pub const SPECTRUM_DOMAIN: RangeInclusive<f32> = 0.0..=50.0;

/// Lowest displayed bar value so silent bars stay visible
pub const BAR_FLOOR: f32 = 0.01;

/// Hue range bars are tinted across
pub const HUE_RANGE: RangeInclusive<f32> = 0.666..=1.0;

/// Default number of spectrum bars
pub const DEFAULT_SPECTRUM_BINS: usize = 32;

/// Amplitude scale applied after taking absolute values
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scale {
    /// Raw magnitudes
    #[default]
    Linear,
    /// dBFS clipped to `[noise_floor, 0]`, shifted up by `-noise_floor`
    Decibel { noise_floor: f32 },
}

impl Scale {
    /// A decibel floor must be finite and below 0 dBFS
    pub fn validate(self) -> AudioResult<()> {
        match self {
            Scale::Linear => Ok(()),
            Scale::Decibel { noise_floor } if noise_floor.is_finite() && noise_floor < 0.0 => {
                Ok(())
            }
            Scale::Decibel { noise_floor } => Err(AudioError::InvalidArgument(format!(
                "noise floor must be a negative dBFS value, got {}",
                noise_floor
            ))),
        }
    }

    fn apply(self, magnitude: f32) -> f32 {
        match self {
            Scale::Linear => magnitude,
            Scale::Decibel { noise_floor } => {
                let db = 20.0 * magnitude.log10();
                db.clamp(noise_floor, 0.0) - noise_floor
            }
        }
    }
}

/// One bar of the live spectrum
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayableBar {
    pub index: usize,
    /// Normalized height in [BAR_FLOOR, 1]
    pub value: f32,
    pub hue: f32,
}

/// Linear map of `value` between ranges, without clamping
pub fn map_range(value: f32, from: RangeInclusive<f32>, to: RangeInclusive<f32>) -> f32 {
    let span = from.end() - from.start();
    if span == 0.0 {
        return *to.start();
    }
    to.start() + (value - from.start()) / span * (to.end() - to.start())
}

/// Average `bin_size` consecutive magnitudes per output value
///
/// Produces `samples.len() / bin_size` values; a trailing partial window is dropped.
pub fn downsample_by_bin_size(samples: &[f32], bin_size: usize, scale: Scale) -> AudioResult<Vec<f32>> {
    if bin_size == 0 {
        return Err(AudioError::InvalidArgument(
            "bin size must be at least one sample".to_string(),
        ));
    }
    scale.validate()?;

    let processed: Vec<f32> = samples.iter().map(|s| scale.apply(s.abs())).collect();
    let weight = 1.0 / bin_size as f32;

    Ok(processed
        .chunks_exact(bin_size)
        .map(|window| window.iter().map(|s| s * weight).sum())
        .collect())
}

/// Downsample toward `bins` values, using `floor(len / bins)` samples per bin
///
/// When the block length doesn't divide evenly the result can hold more
/// values than `bins`.
pub fn downsample_by_bins(samples: &[f32], bins: usize, scale: Scale) -> AudioResult<Vec<f32>> {
    if bins == 0 {
        return Err(AudioError::InvalidArgument("bin count must be positive".to_string()));
    }
    let bin_size = samples.len() / bins;
    if bin_size == 0 {
        return Err(AudioError::InvalidArgument(format!(
            "{} samples cannot fill {} bins",
            samples.len(),
            bins
        )));
    }
    downsample_by_bin_size(samples, bin_size, scale)
}

/// Spectrum bars for one tap block
pub fn spectrum_bars(samples: &[f32], bins: usize, scale: Scale) -> AudioResult<Vec<DisplayableBar>> {
    let amplitudes = downsample_by_bins(samples, bins, scale)?;

    Ok(amplitudes
        .iter()
        .enumerate()
        .map(|(index, amplitude)| {
            let normalized = map_range(amplitude.abs(), SPECTRUM_DOMAIN, 0.0..=1.0);
            // Hue follows the unclamped value
            let hue = map_range(normalized, 0.0..=1.0, HUE_RANGE);
            DisplayableBar {
                index,
                value: normalized.clamp(BAR_FLOOR, 1.0),
                hue,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_sits_on_floor() {
        let bars = spectrum_bars(&[0.0; 2048], 32, Scale::Linear).unwrap();
        assert_eq!(bars.len(), 32);
        for bar in &bars {
            assert_eq!(bar.value, BAR_FLOOR);
            assert_eq!(bar.hue, 0.666);
        }
    }

    #[test]
    fn test_silence_sits_on_floor_in_decibels() {
        let scale = Scale::Decibel { noise_floor: -50.0 };
        let bars = spectrum_bars(&[0.0; 256], 32, scale).unwrap();
        assert!(bars.iter().all(|b| b.value == BAR_FLOOR));
    }

    #[test]
    fn test_uneven_length_keeps_extra_bins() {
        // 100 / 32 = 3 samples per bin, 100 / 3 = 33 bins
        let bars = spectrum_bars(&[0.5; 100], 32, Scale::Linear).unwrap();
        assert_eq!(bars.len(), 33);
        let indices: Vec<usize> = bars.iter().map(|b| b.index).collect();
        assert_eq!(indices, (0..33).collect::<Vec<_>>());
    }

    #[test]
    fn test_moving_average_of_magnitudes() {
        let samples = [1.0, -3.0, 2.0, -2.0, 4.0, 4.0, 9.0];
        let out = downsample_by_bin_size(&samples, 2, Scale::Linear).unwrap();
        assert_eq!(out, vec![2.0, 2.0, 4.0]);
    }

    #[test]
    fn test_bar_value_and_hue_mapping() {
        let bars = spectrum_bars(&[25.0; 64], 32, Scale::Linear).unwrap();
        assert!((bars[0].value - 0.5).abs() < 1e-6);
        assert!((bars[0].hue - 0.833).abs() < 1e-6);

        // Loud input clamps the value but not the hue
        let bars = spectrum_bars(&[100.0; 64], 32, Scale::Linear).unwrap();
        assert_eq!(bars[0].value, 1.0);
        assert!(bars[0].hue > 1.0);
    }

    #[test]
    fn test_decibel_scale_range() {
        let scale = Scale::Decibel { noise_floor: -50.0 };
        let out = downsample_by_bin_size(&[1.0, 0.1, 0.001, 2.0], 1, scale).unwrap();
        assert!((out[0] - 50.0).abs() < 1e-4);
        assert!((out[1] - 30.0).abs() < 1e-4);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 50.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(downsample_by_bin_size(&[1.0], 0, Scale::Linear).is_err());
        assert!(downsample_by_bins(&[1.0; 4], 0, Scale::Linear).is_err());
        assert!(spectrum_bars(&[1.0; 4], 32, Scale::Linear).is_err());
    }

    #[test]
    fn test_invalid_noise_floor_is_rejected() {
        for noise_floor in [50.0, 0.0, f32::NAN, f32::NEG_INFINITY] {
            let scale = Scale::Decibel { noise_floor };
            assert!(scale.validate().is_err());
            assert!(matches!(
                spectrum_bars(&[0.5; 64], 32, scale),
                Err(AudioError::InvalidArgument(_))
            ));
            assert!(downsample_by_bin_size(&[0.5; 4], 2, scale).is_err());
        }
        assert!(Scale::Decibel { noise_floor: -60.0 }.validate().is_ok());
    }

    #[test]
    fn test_map_range() {
        assert_eq!(map_range(5.0, 0.0..=10.0, 0.0..=1.0), 0.5);
        assert_eq!(map_range(20.0, 0.0..=10.0, 0.0..=1.0), 2.0);
        assert_eq!(map_range(1.0, 1.0..=1.0, 3.0..=4.0), 3.0);
    }
}
