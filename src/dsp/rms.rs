//! RMS and peak measurements over PCM windows

use crate::error::AudioResult;
use crate::pcm::PcmBuffer;

/// Calculate RMS volume from samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Calculate peak volume from samples
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Mean of the per-channel RMS values
pub fn channel_average_rms(channels: &[Vec<f32>]) -> f32 {
    if channels.is_empty() {
        return 0.0;
    }
    let sum: f32 = channels.iter().map(|ch| rms(ch)).sum();
    sum / channels.len() as f32
}

/// Divide by the peak when one is known and non-zero
pub fn normalize(value: f32, peak: Option<f32>) -> f32 {
    match peak {
        Some(p) if p > 0.0 => value / p,
        _ => value,
    }
}

/// Channel-averaged, peak-normalized RMS of a whole buffer
pub fn window_rms(window: &PcmBuffer, peak: Option<f32>) -> AudioResult<f32> {
    let channels = window.to_float_channels()?;
    Ok(normalize(channel_average_rms(&channels), peak))
}
