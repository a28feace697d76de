//! Tiled RMS waveform extraction
//!
//! A source is split into windows of `frames_per_window` frames; each tile
//! holds `samples_per_tile` consecutive window RMS values. Zoom sets how many
//! tiles span the whole source.

use super::cache::{CachePolicy, Tile, TileCache, TileKey};
use super::cancel::CancellationTable;
use super::source::AudioSource;
use crate::dsp;
use crate::error::{AudioError, TileError};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Values per tile unless configured otherwise
pub const DEFAULT_SAMPLES_PER_TILE: usize = 64;

/// Engine tuning
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub samples_per_tile: usize,
    pub cache_policy: CachePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samples_per_tile: DEFAULT_SAMPLES_PER_TILE,
            cache_policy: CachePolicy::Unbounded,
        }
    }
}

/// Frame arithmetic for one zoom level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGeometry {
    /// `round(samples_per_tile * zoom)`
    pub frame_size: u64,
    /// Frames averaged into one tile value
    pub frames_per_window: u64,
    pub samples_per_tile: usize,
}

impl TileGeometry {
    pub fn new(total_frames: u64, zoom: f64, samples_per_tile: usize) -> Result<Self, TileError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(TileError::InvalidArgument(format!(
                "zoom must be positive, got {}",
                zoom
            )));
        }
        if samples_per_tile == 0 {
            return Err(TileError::InvalidArgument(
                "samples per tile must be positive".to_string(),
            ));
        }

        let frame_size = (samples_per_tile as f64 * zoom).round();
        if frame_size < 1.0 {
            return Err(TileError::InvalidArgument(format!(
                "zoom {} leaves no frames per subdivision",
                zoom
            )));
        }
        // Saturating cast; anything that large leaves zero frames per window
        let frame_size = frame_size as u64;
        let frames_per_window = total_frames / frame_size;
        if frames_per_window == 0 {
            return Err(TileError::InvalidArgument(format!(
                "zoom {} is too fine for {} frames",
                zoom, total_frames
            )));
        }

        Ok(Self {
            frame_size,
            frames_per_window,
            samples_per_tile,
        })
    }

    pub fn frames_per_tile(&self) -> u64 {
        self.frames_per_window * self.samples_per_tile as u64
    }

    /// First frame of tile `offset`, `None` on overflow
    pub fn tile_start(&self, offset: u64) -> Option<u64> {
        offset.checked_mul(self.frames_per_tile())
    }

    /// Tiles holding at least one complete window
    pub fn tile_count(&self, total_frames: u64) -> u64 {
        let windows = total_frames / self.frames_per_window;
        windows.div_ceil(self.samples_per_tile as u64)
    }
}

/// Computes, caches and cancels waveform tiles for one source
pub struct WaveformEngine<S: AudioSource> {
    source: Mutex<S>,
    samples_per_tile: usize,
    peak: OnceLock<f32>,
    cache: TileCache,
    cancellations: CancellationTable,
}

impl<S: AudioSource> WaveformEngine<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, EngineConfig::default())
    }

    pub fn with_config(source: S, config: EngineConfig) -> Self {
        Self {
            source: Mutex::new(source),
            samples_per_tile: config.samples_per_tile,
            peak: OnceLock::new(),
            cache: TileCache::new(config.cache_policy),
            cancellations: CancellationTable::new(),
        }
    }

    pub fn samples_per_tile(&self) -> usize {
        self.samples_per_tile
    }

    pub fn frame_count(&self) -> u64 {
        self.lock_source().frame_count()
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock_source().sample_rate()
    }

    /// Peak used for normalization, once it has been computed
    pub fn peak_value(&self) -> Option<f32> {
        self.peak.get().copied()
    }

    pub fn cached_tiles(&self) -> usize {
        self.cache.len()
    }

    pub fn is_cached(&self, offset: u64, zoom: f64) -> bool {
        self.cache.contains(&TileKey::new(offset, zoom))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn geometry(&self, zoom: f64) -> Result<TileGeometry, TileError> {
        TileGeometry::new(self.frame_count(), zoom, self.samples_per_tile)
    }

    /// Number of tiles with data at `zoom`
    pub fn tile_count(&self, zoom: f64) -> Result<u64, TileError> {
        let total = self.frame_count();
        Ok(TileGeometry::new(total, zoom, self.samples_per_tile)?.tile_count(total))
    }

    /// Request that an in-flight (or the next) computation for `offset` stops
    pub fn cancel(&self, offset: i64) {
        match u64::try_from(offset) {
            Ok(offset) => {
                debug!("Cancelling waveform tile at offset {}", offset);
                self.cancellations.cancel(offset);
            }
            Err(_) => warn!("Ignoring cancel for negative offset {}", offset),
        }
    }

    /// Drop a cancel for `offset` that no computation observed
    pub(crate) fn clear_cancel(&self, offset: i64) {
        if let Ok(offset) = u64::try_from(offset) {
            self.cancellations.reset(offset);
        }
    }

    /// Tile at `offset` for `zoom`, from the cache when available
    pub fn tile(&self, offset: i64, zoom: f64) -> Result<Tile, TileError> {
        let offset = u64::try_from(offset).map_err(|_| {
            TileError::InvalidArgument(format!("offset must be non-negative, got {}", offset))
        })?;
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(TileError::InvalidArgument(format!(
                "zoom must be positive, got {}",
                zoom
            )));
        }

        let key = TileKey::new(offset, zoom);
        if let Some(tile) = self.cache.get(&key) {
            trace!("Tile cache hit for offset {} zoom {}", offset, zoom);
            return Ok(tile);
        }

        let tile = self.compute_tile(offset, zoom)?;
        self.cache.insert(key, tile.clone());
        Ok(tile)
    }

    /// Like [`tile`](Self::tile), but every failure is reported as `None`
    pub fn get_tile(&self, offset: i64, zoom: f64) -> Option<Tile> {
        match self.tile(offset, zoom) {
            Ok(tile) => Some(tile),
            Err(e) => {
                debug!("No tile at offset {} zoom {}: {}", offset, zoom, e);
                None
            }
        }
    }

    /// Uncached tile whose first window starts at `position` (0.0 - 1.0) of the source
    pub fn tile_at_position(&self, position: f64, zoom: f64) -> Result<Tile, TileError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(TileError::InvalidArgument(format!(
                "position must be within 0..=1, got {}",
                position
            )));
        }

        let mut source = self.lock_source();
        let total = source.frame_count();
        let geometry = TileGeometry::new(total, zoom, self.samples_per_tile)?;
        let peak = self.ensure_peak(&mut *source)?;
        let start = (total as f64 * position) as u64;

        let saved = source.frame_position();
        let result = scan_windows(&mut *source, start, &geometry, peak, || false);
        restore_position(&mut *source, saved);
        Ok(Tile::new(result?))
    }

    /// Whole-source summary of `bins` peak-normalized RMS values
    pub fn overview(&self, bins: usize) -> Result<Vec<f32>, TileError> {
        if bins == 0 {
            return Err(TileError::InvalidArgument("bin count must be positive".to_string()));
        }

        let mut source = self.lock_source();
        let total = source.frame_count();
        let frames_per_bin = total / bins as u64;
        if frames_per_bin == 0 {
            return Err(TileError::InvalidArgument(format!(
                "{} frames cannot fill {} bins",
                total, bins
            )));
        }
        let peak = self.ensure_peak(&mut *source)?;

        let saved = source.frame_position();
        let result = (0..bins as u64)
            .map(|bin| {
                let start = bin * frames_per_bin;
                let window = source.read_segment(start, start + frames_per_bin)?;
                dsp::window_rms(&window, Some(peak))
            })
            .collect::<Result<Vec<f32>, AudioError>>();
        restore_position(&mut *source, saved);
        Ok(result?)
    }

    /// Give the source back, dropping the cache
    pub fn into_source(self) -> S {
        self.source.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_source(&self) -> MutexGuard<'_, S> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_peak(&self, source: &mut S) -> Result<f32, TileError> {
        if let Some(peak) = self.peak.get() {
            return Ok(*peak);
        }

        let saved = source.frame_position();
        let scanned = source.scan_peak();
        restore_position(source, saved);
        let peak = scanned?;

        debug!("Computed source peak {}", peak);
        Ok(*self.peak.get_or_init(|| peak))
    }

    fn compute_tile(&self, offset: u64, zoom: f64) -> Result<Tile, TileError> {
        let mut source = self.lock_source();
        let total = source.frame_count();
        let geometry = TileGeometry::new(total, zoom, self.samples_per_tile)?;
        let peak = self.ensure_peak(&mut *source)?;

        let start = match geometry.tile_start(offset) {
            Some(start) if start <= total => start,
            _ => {
                return Err(TileError::NotFound(format!(
                    "tile {} starts past {} frames",
                    offset, total
                )));
            }
        };

        trace!(
            "Computing tile {} at zoom {} from frame {} ({} frames per window)",
            offset,
            zoom,
            start,
            geometry.frames_per_window
        );

        let token = self.cancellations.token(offset);
        let saved = source.frame_position();
        let result = scan_windows(&mut *source, start, &geometry, peak, || token.is_cancelled());
        restore_position(&mut *source, saved);

        match result {
            Err(AudioError::Cancelled) => {
                debug!("Waveform tile at offset {} aborted", offset);
                self.cancellations.reset(offset);
                Err(TileError::Cancelled)
            }
            Err(e) => {
                self.cancellations.release(offset);
                Err(e.into())
            }
            Ok(values) => {
                self.cancellations.release(offset);
                Ok(Tile::new(values))
            }
        }
    }
}

/// Fill one tile's values starting at `start`, polling `cancelled` before every read
///
/// Stops early, leaving zeros, once the next window would run past the source.
fn scan_windows<S: AudioSource + ?Sized>(
    source: &mut S,
    start: u64,
    geometry: &TileGeometry,
    peak: f32,
    cancelled: impl Fn() -> bool,
) -> Result<Vec<f32>, AudioError> {
    let total = source.frame_count();
    let mut data = vec![0.0f32; geometry.samples_per_tile];
    let mut start = start;

    for value in data.iter_mut() {
        let end = start + geometry.frames_per_window;
        if end > total {
            break;
        }
        if cancelled() {
            return Err(AudioError::Cancelled);
        }

        let window = source.read_segment(start, end)?;
        *value = dsp::window_rms(&window, Some(peak))?;
        start = end;
    }

    Ok(data)
}

fn restore_position<S: AudioSource + ?Sized>(source: &mut S, position: u64) {
    if let Err(e) = source.set_frame_position(position) {
        warn!("Failed to restore source position {}: {}", position, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioResult;
    use crate::pcm::{PcmBuffer, PcmFormat};
    use crate::waveform::source::{BufferBackedSource, FileBackedSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ramp_source(frames: usize, channels: u16) -> BufferBackedSource {
        let samples: Vec<f32> = (0..frames * channels as usize)
            .map(|i| ((i % 97) as f32 / 97.0) - 0.5)
            .collect();
        BufferBackedSource::new(PcmBuffer::from_interleaved(44100, channels, &samples).unwrap())
    }

    /// Counts reads and runs `hook` on the `cancel_after`-th one
    struct CancellingSource {
        inner: BufferBackedSource,
        reads: Arc<AtomicUsize>,
        cancel_after: usize,
        hook: Option<Arc<dyn Fn() + Send + Sync>>,
    }

    impl AudioSource for CancellingSource {
        fn frame_count(&self) -> u64 {
            self.inner.frame_count()
        }
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }
        fn channel_count(&self) -> u16 {
            self.inner.channel_count()
        }
        fn processing_format(&self) -> PcmFormat {
            self.inner.processing_format()
        }
        fn frame_position(&self) -> u64 {
            self.inner.frame_position()
        }
        fn set_frame_position(&mut self, position: u64) -> AudioResult<()> {
            self.inner.set_frame_position(position)
        }
        fn read_segment(&mut self, start: u64, end: u64) -> AudioResult<PcmBuffer> {
            let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if reads == self.cancel_after {
                if let Some(hook) = &self.hook {
                    hook();
                }
            }
            self.inner.read_segment(start, end)
        }
        fn scan_peak(&mut self) -> AudioResult<f32> {
            self.inner.scan_peak()
        }
    }

    #[test]
    fn test_geometry() {
        let geometry = TileGeometry::new(6400, 1.0, 64).unwrap();
        assert_eq!(geometry.frame_size, 64);
        assert_eq!(geometry.frames_per_window, 100);
        assert_eq!(geometry.frames_per_tile(), 6400);
        assert_eq!(geometry.tile_count(6400), 1);

        let geometry = TileGeometry::new(6400, 4.0, 64).unwrap();
        assert_eq!(geometry.frames_per_window, 25);
        assert_eq!(geometry.tile_count(6400), 4);

        // round(64 * 1.51) = 97
        assert_eq!(TileGeometry::new(9700, 1.51, 64).unwrap().frame_size, 97);
    }

    #[test]
    fn test_geometry_rejects_degenerate_zoom() {
        assert!(TileGeometry::new(6400, 0.0, 64).is_err());
        assert!(TileGeometry::new(6400, -1.0, 64).is_err());
        assert!(TileGeometry::new(6400, f64::NAN, 64).is_err());
        assert!(TileGeometry::new(6400, 0.001, 64).is_err());
        // 64 * 1000 frames per subdivision leaves nothing per window
        assert!(TileGeometry::new(6400, 1000.0, 64).is_err());
        assert!(TileGeometry::new(6400, 1e300, 64).is_err());
    }

    #[test]
    fn test_repeated_requests_are_identical() {
        let engine = WaveformEngine::new(ramp_source(10_000, 2));
        let first = engine.tile(1, 2.0).unwrap();
        let second = engine.tile(1, 2.0).unwrap();
        assert_eq!(first, second);
        assert!(first.ptr_eq(&second));
        assert_eq!(engine.cached_tiles(), 1);
    }

    #[test]
    fn test_negative_offset() {
        let engine = WaveformEngine::new(ramp_source(1000, 1));
        assert!(matches!(engine.tile(-1, 1.0), Err(TileError::InvalidArgument(_))));
        assert!(engine.get_tile(-5, 1.0).is_none());
        engine.cancel(-1);
    }

    #[test]
    fn test_offset_past_end_is_not_found() {
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        assert!(matches!(engine.tile(2, 1.0), Err(TileError::NotFound(_))));
        assert!(matches!(engine.tile(i64::MAX, 1.0), Err(TileError::NotFound(_))));
        assert_eq!(engine.cached_tiles(), 0);
    }

    #[test]
    fn test_full_coverage_has_no_trailing_zeros() {
        // 6400 frames at zoom 1: 100 frames per window, 64 windows
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        let tile = engine.tile(0, 1.0).unwrap();
        assert_eq!(tile.len(), 64);
        assert!(tile.values().iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_short_coverage_leaves_trailing_zeros() {
        // zoom 0.5: 200 frames per window, only 32 windows fit
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        let tile = engine.tile(0, 0.5).unwrap();
        assert!(tile.values()[..32].iter().all(|v| *v > 0.0));
        assert!(tile.values()[32..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_trailing_tile() {
        // 6500 frames at zoom 2: 50 frames per window, 130 windows, tile 2 holds 2
        let engine = WaveformEngine::new(ramp_source(6500, 1));
        let tile = engine.tile(2, 2.0).unwrap();
        assert!(tile.values()[..2].iter().all(|v| *v > 0.0));
        assert!(tile.values()[2..].iter().all(|v| *v == 0.0));
        assert_eq!(engine.tile_count(2.0).unwrap(), 3);
    }

    #[test]
    fn test_values_are_normalized() {
        let engine = WaveformEngine::new(ramp_source(20_000, 2));
        assert!(engine.peak_value().is_none());
        engine.tile(0, 1.0).unwrap();
        let peak = engine.peak_value().unwrap();
        assert!((peak - 0.5).abs() < 1e-6);
        for offset in 0..3 {
            let tile = engine.tile(offset, 3.0).unwrap();
            assert!(tile.values().iter().all(|v| (0.0..=1.0 + 1e-5).contains(v)));
        }
    }

    #[test]
    fn test_silent_source_is_not_nan() {
        let buffer = PcmBuffer::from_interleaved(8000, 1, &vec![0i16; 6400]).unwrap();
        let engine = WaveformEngine::new(BufferBackedSource::new(buffer));
        let tile = engine.tile(0, 1.0).unwrap();
        assert!(tile.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_file_and_buffer_sources_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let samples: Vec<f32> = (0..12_800).map(|i| ((i as f32) * 0.01).sin() * 0.8).collect();
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in &samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();

        let from_file = WaveformEngine::new(FileBackedSource::open(&path).unwrap());
        let buffer = PcmBuffer::from_interleaved(8000, 2, &samples).unwrap();
        let from_buffer = WaveformEngine::new(BufferBackedSource::new(buffer));

        let a = from_file.tile(0, 1.0).unwrap();
        let b = from_buffer.tile(0, 1.0).unwrap();
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cancel_before_request_aborts_it() {
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        engine.cancel(0);
        assert!(matches!(engine.tile(0, 1.0), Err(TileError::Cancelled)));
        assert!(!engine.is_cached(0, 1.0));

        // The flag was consumed by the aborted computation
        assert!(engine.tile(0, 1.0).is_ok());
        assert!(engine.is_cached(0, 1.0));
    }

    #[test]
    fn test_cancel_mid_scan_restores_position() {
        let engine = Arc::new(WaveformEngine::new(CancellingSource {
            inner: ramp_source(6400, 1),
            reads: Arc::new(AtomicUsize::new(0)),
            cancel_after: 0,
            hook: None,
        }));
        // Compute the peak up front so the scan is the only reader
        engine.tile(0, 0.5).unwrap();
        engine.clear_cache();
        engine.lock_source().set_frame_position(1234).unwrap();

        let reads = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&engine);
            let mut source = engine.lock_source();
            source.reads = reads.clone();
            source.cancel_after = 5;
            source.hook = Some(Arc::new(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.cancel(0);
                }
            }));
        }

        assert!(matches!(engine.tile(0, 1.0), Err(TileError::Cancelled)));
        assert_eq!(reads.load(Ordering::SeqCst), 5);
        assert_eq!(engine.lock_source().frame_position(), 1234);
        assert!(!engine.is_cached(0, 1.0));
    }

    #[test]
    fn test_cancel_after_last_window_keeps_tile() {
        // zoom 0.5: 32 windows fit, the cancel lands on the last read
        let engine = Arc::new(WaveformEngine::new(CancellingSource {
            inner: ramp_source(6400, 1),
            reads: Arc::new(AtomicUsize::new(0)),
            cancel_after: 32,
            hook: None,
        }));
        let weak = Arc::downgrade(&engine);
        engine.lock_source().hook = Some(Arc::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.cancel(0);
            }
        }));

        let tile = engine.tile(0, 0.5).unwrap();
        assert!(tile.values()[..32].iter().all(|v| *v > 0.0));
        assert!(engine.is_cached(0, 0.5));
    }

    #[test]
    fn test_cancel_other_offset_does_not_abort() {
        let engine = WaveformEngine::new(ramp_source(12_800, 1));
        engine.cancel(1);
        assert!(engine.tile(0, 2.0).is_ok());
        assert!(matches!(engine.tile(1, 2.0), Err(TileError::Cancelled)));
    }

    #[test]
    fn test_cancel_does_not_touch_cached_tiles() {
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        let tile = engine.tile(0, 1.0).unwrap();
        engine.cancel(0);
        assert_eq!(engine.tile(0, 1.0).unwrap(), tile);
    }

    #[test]
    fn test_lru_policy() {
        let config = EngineConfig {
            samples_per_tile: 64,
            cache_policy: CachePolicy::Lru { capacity: 2 },
        };
        let engine = WaveformEngine::with_config(ramp_source(25_600, 1), config);
        for offset in 0..4 {
            engine.tile(offset, 4.0).unwrap();
        }
        assert_eq!(engine.cached_tiles(), 2);
        assert!(engine.is_cached(3, 4.0));
        assert!(!engine.is_cached(0, 4.0));
    }

    #[test]
    fn test_overview() {
        let engine = WaveformEngine::new(ramp_source(8000, 2));
        let bins = engine.overview(80).unwrap();
        assert_eq!(bins.len(), 80);
        assert!(bins.iter().all(|v| (0.0..=1.0 + 1e-5).contains(v)));
        assert!(engine.overview(0).is_err());
        assert!(engine.overview(9000).is_err());
    }

    #[test]
    fn test_tile_at_position() {
        let engine = WaveformEngine::new(ramp_source(6400, 1));
        let start = engine.tile_at_position(0.0, 1.0).unwrap();
        assert_eq!(start, engine.tile(0, 1.0).unwrap());

        let half = engine.tile_at_position(0.5, 1.0).unwrap();
        assert!(half.values()[..32].iter().all(|v| *v > 0.0));
        assert!(half.values()[32..].iter().all(|v| *v == 0.0));
        assert!(engine.tile_at_position(1.5, 1.0).is_err());
        // Positional tiles are never cached
        assert_eq!(engine.cached_tiles(), 1);
    }

    #[test]
    fn test_concurrent_requests() {
        let engine = Arc::new(WaveformEngine::new(ramp_source(64_000, 2)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.tile(i % 4, 4.0).unwrap())
            })
            .collect();
        let tiles: Vec<Tile> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for i in 0..4 {
            assert_eq!(tiles[i], tiles[i + 4]);
        }
        assert_eq!(engine.cached_tiles(), 4);
    }
}
