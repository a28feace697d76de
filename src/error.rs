//! Error types shared by the PCM, DSP and waveform modules

use thiserror::Error;

/// Errors surfaced by buffer utilities, downsampling and sources
#[derive(Error, Debug)]
pub enum AudioError {
    /// Negative offsets, non-positive zoom, degenerate frame ranges
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Channel data requested for a sample representation we don't handle
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Requested frame range exceeds the source length
    #[error("Frame range {start}..{end} exceeds length {length}")]
    OutOfRange { start: u64, end: u64, length: u64 },

    /// Buffer allocation failed
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Underlying file or stream read failed
    #[error("Read failure: {0}")]
    ReadFailure(String),

    /// Cooperative abort observed mid-computation
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::ReadFailure(err.to_string())
    }
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::ReadFailure(err.to_string())
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Why a waveform tile could not be produced
#[derive(Error, Debug)]
pub enum TileError {
    #[error("Invalid tile request: {0}")]
    InvalidArgument(String),

    /// The tile starts past the end of the source
    #[error("No tile data: {0}")]
    NotFound(String),

    #[error("Tile computation cancelled")]
    Cancelled,

    #[error("Failed to read tile data: {0}")]
    ReadFailure(AudioError),
}

impl From<AudioError> for TileError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::InvalidArgument(msg) => TileError::InvalidArgument(msg),
            AudioError::OutOfRange { .. } => TileError::NotFound(err.to_string()),
            AudioError::Cancelled => TileError::Cancelled,
            other => TileError::ReadFailure(other),
        }
    }
}

/// Failures of the live audio session
#[derive(Error, Debug)]
pub enum SessionError {
    /// `play` was called before anything was loaded
    #[error("Player has no buffer loaded")]
    PlayerHasNoBuffer,

    #[error("Audio session not started")]
    NotStarted,

    /// PipeWire could not be reached or a stream failed to start
    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
