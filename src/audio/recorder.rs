//! WAV file recording using hound
//!
//! Recordings are written as 32-bit float WAV to a fixed file in the system
//! temporary directory; each new recording overwrites the previous one.

use crate::error::{AudioError, AudioResult};
use crate::models::RecordingInfo;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// File name of the scratch recording
pub const RECORDING_FILE_NAME: &str = "recording.wav";

/// Decoded WAV contents
#[derive(Debug, Clone)]
pub struct LoadedAudio {
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl LoadedAudio {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// WAV file recorder
pub struct WavRecorder {
    spec: WavSpec,
    path: PathBuf,
}

impl WavRecorder {
    /// Create a mono f32 recorder writing to `<tmp>/recording.wav`
    pub fn new(sample_rate: u32) -> Self {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        Self {
            spec,
            path: Self::default_path(),
        }
    }

    pub fn default_path() -> PathBuf {
        std::env::temp_dir().join(RECORDING_FILE_NAME)
    }

    /// Write to `path` instead of the temporary directory
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save mono samples, replacing any previous recording
    pub fn save(&self, samples: &[f32]) -> AudioResult<RecordingInfo> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(&self.path)?;
        let mut wav_writer = WavWriter::new(BufWriter::new(file), self.spec)?;
        for &sample in samples {
            wav_writer.write_sample(sample)?;
        }
        wav_writer.finalize()?;

        Ok(RecordingInfo::new(
            self.path.clone(),
            samples.len(),
            self.spec.sample_rate,
            self.spec.channels,
        ))
    }

    /// Load interleaved samples from a WAV file
    pub fn load(path: impl AsRef<Path>) -> AudioResult<LoadedAudio> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::UnsupportedFormat(format!(
                        "{}-bit integer WAV",
                        spec.bits_per_sample
                    )));
                }
                let max_value = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(LoadedAudio {
            samples,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        })
    }
}
