//! Settings persistence as JSON
//!
//! Settings are stored at `<config_dir>/wavetile/settings.json`. A missing
//! file yields the defaults; unknown or absent keys fall back per field.

use crate::audio::{SessionConfig, WavRecorder, DEFAULT_TAP_BLOCK_SIZE};
use crate::dsp::{Scale, DEFAULT_SPECTRUM_BINS};
use crate::waveform::{CachePolicy, EngineConfig, DEFAULT_SAMPLES_PER_TILE};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// User-tunable settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// RMS values per waveform tile
    pub samples_per_tile: usize,
    /// Bars per live spectrum frame
    pub spectrum_bins: usize,
    /// Samples per live tap block
    pub tap_buffer_size: usize,
    pub spectrum_scale: Scale,
    pub cache_policy: CachePolicy,
    /// Zoom used by the CLI when none is given
    pub default_zoom: f64,
    pub recording_sample_rate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            samples_per_tile: DEFAULT_SAMPLES_PER_TILE,
            spectrum_bins: DEFAULT_SPECTRUM_BINS,
            tap_buffer_size: DEFAULT_TAP_BLOCK_SIZE,
            spectrum_scale: Scale::Linear,
            cache_policy: CachePolicy::Unbounded,
            default_zoom: 1.0,
            recording_sample_rate: 48000,
        }
    }
}

impl Settings {
    /// Replace values that would make the engine or tap unusable
    pub fn validated(mut self) -> Self {
        let defaults = Settings::default();
        if self.samples_per_tile == 0 {
            warn!("samples_per_tile must be positive, using {}", defaults.samples_per_tile);
            self.samples_per_tile = defaults.samples_per_tile;
        }
        if self.spectrum_bins == 0 {
            warn!("spectrum_bins must be positive, using {}", defaults.spectrum_bins);
            self.spectrum_bins = defaults.spectrum_bins;
        }
        if self.tap_buffer_size < self.spectrum_bins {
            warn!(
                "tap_buffer_size {} cannot fill {} bins, using {}",
                self.tap_buffer_size, self.spectrum_bins, defaults.tap_buffer_size
            );
            self.tap_buffer_size = defaults.tap_buffer_size.max(self.spectrum_bins);
        }
        if !(self.default_zoom.is_finite() && self.default_zoom > 0.0) {
            warn!("default_zoom must be positive, using {}", defaults.default_zoom);
            self.default_zoom = defaults.default_zoom;
        }
        if let Err(e) = self.spectrum_scale.validate() {
            warn!("{}, using {:?}", e, defaults.spectrum_scale);
            self.spectrum_scale = defaults.spectrum_scale;
        }
        if self.recording_sample_rate == 0 {
            self.recording_sample_rate = defaults.recording_sample_rate;
        }
        self
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            samples_per_tile: self.samples_per_tile,
            cache_policy: self.cache_policy,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tap_buffer_size: self.tap_buffer_size,
            spectrum_bins: self.spectrum_bins,
            spectrum_scale: self.spectrum_scale,
            recording_sample_rate: self.recording_sample_rate,
            recording_path: WavRecorder::default_path(),
        }
    }
}

/// Reads and writes [`Settings`] on disk
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wavetile")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file doesn't exist
    pub fn load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            debug!("No settings at {}, using defaults", self.path.display());
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        Ok(settings.validated())
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("settings.json"));
        assert_eq!(store.load().unwrap(), Settings::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("nested").join("settings.json"));
        let settings = Settings {
            samples_per_tile: 128,
            spectrum_scale: Scale::Decibel { noise_floor: -60.0 },
            cache_policy: CachePolicy::Lru { capacity: 256 },
            default_zoom: 2.5,
            ..Settings::default()
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"spectrum_bins": 16}"#).unwrap();

        let settings = SettingsStore::with_path(&path).load().unwrap();
        assert_eq!(settings.spectrum_bins, 16);
        assert_eq!(settings.samples_per_tile, DEFAULT_SAMPLES_PER_TILE);
        assert_eq!(settings.tap_buffer_size, 2048);
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        let err = SettingsStore::with_path(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_validated_repairs_degenerate_values() {
        let settings = Settings {
            samples_per_tile: 0,
            spectrum_bins: 64,
            tap_buffer_size: 16,
            default_zoom: -1.0,
            recording_sample_rate: 0,
            ..Settings::default()
        }
        .validated();
        assert_eq!(settings.samples_per_tile, DEFAULT_SAMPLES_PER_TILE);
        assert_eq!(settings.tap_buffer_size, 2048);
        assert_eq!(settings.default_zoom, 1.0);
        assert_eq!(settings.recording_sample_rate, 48000);
    }

    #[test]
    fn test_positive_noise_floor_falls_back_to_linear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"spectrum_scale": {"kind": "decibel", "noise_floor": 50.0}}"#,
        )
        .unwrap();

        let settings = SettingsStore::with_path(&path).load().unwrap();
        assert_eq!(settings.spectrum_scale, Scale::Linear);

        let settings = Settings {
            spectrum_scale: Scale::Decibel { noise_floor: -40.0 },
            ..Settings::default()
        }
        .validated();
        assert_eq!(settings.spectrum_scale, Scale::Decibel { noise_floor: -40.0 });
    }

    #[test]
    fn test_configs() {
        let settings = Settings {
            samples_per_tile: 32,
            spectrum_bins: 8,
            ..Settings::default()
        };
        assert_eq!(settings.engine_config().samples_per_tile, 32);
        assert_eq!(settings.session_config().spectrum_bins, 8);
    }
}
