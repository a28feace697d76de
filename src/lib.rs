//! wavetile - real-time audio capture and playback with tiled waveform rendering
//!
//! - [`pcm`]: PCM buffers and sample formats
//! - [`dsp`]: RMS and downsampling for waveforms and spectrum bars
//! - [`waveform`]: cached, cancellable waveform tiles
//! - [`audio`]: PipeWire capture, playback and the session orchestrator

pub mod audio;
pub mod cli;
pub mod dsp;
pub mod error;
pub mod models;
pub mod pcm;
pub mod settings;
pub mod tokio_runtime;
pub mod waveform;

pub use error::{AudioError, AudioResult, SessionError, SessionResult, TileError};
