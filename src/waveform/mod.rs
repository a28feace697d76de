//! Waveform tile extraction
//!
//! This module provides:
//! - Audio sources over WAV files and in-memory buffers
//! - Tiled, peak-normalized RMS extraction at arbitrary zoom
//! - A tile cache keyed by (offset, zoom) with optional LRU eviction
//! - Per-offset cooperative cancellation and background requests

mod cache;
mod cancel;
mod engine;
mod source;
mod worker;

pub use cache::{CachePolicy, Tile, TileCache, TileKey};
pub use cancel::CancellationTable;
pub use engine::{EngineConfig, TileGeometry, WaveformEngine, DEFAULT_SAMPLES_PER_TILE};
pub use source::{AudioSource, BufferBackedSource, FileBackedSource};
pub use worker::{request_tile, request_tile_with_timeout};
