//! Data records passed to delegates and printed by the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Information about a finished recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub title: String,
    pub date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RecordingInfo {
    pub fn new(path: PathBuf, frame_count: usize, sample_rate: u32, channels: u16) -> Self {
        let now = Utc::now();
        Self {
            path,
            title: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            date: now,
            duration_seconds: frame_count as f64 / sample_rate.max(1) as f64,
            sample_rate,
            channels,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Snapshot of the playback transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaybackStatus {
    pub is_playing: bool,
    pub rate: f32,
    pub is_reversed: bool,
    /// Playhead as a fraction of the file
    pub progress: f32,
    pub current_time: f64,
    pub duration: f64,
}

/// Where the recorder is in its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Recording,
    Paused,
}
