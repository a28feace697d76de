//! Live audio session built on PipeWire
//!
//! This module provides:
//! - Microphone capture with a block tap for live spectrum bars
//! - File playback with seek, rate and reverse transport
//! - WAV recording and loading via hound
//! - The [`AudioManager`] orchestrator and its delegate trait

mod capture;
mod manager;
mod playback;
mod recorder;

pub use capture::{
    mix_to_mono, AudioCapture, CaptureState, SharedCaptureState, TapBlock, DEFAULT_TAP_BLOCK_SIZE,
};
pub use manager::{AudioManager, AudioManagerDelegate, SessionConfig};
pub use playback::{AudioPlayer, SharedPlaybackState, MAX_RATE, MIN_RATE};
pub use recorder::{LoadedAudio, WavRecorder, RECORDING_FILE_NAME};
