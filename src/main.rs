//! wavetile command-line entry point

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wavetile::audio::{mix_to_mono, AudioManager, AudioManagerDelegate, WavRecorder};
use wavetile::cli::{self, Args, Command};
use wavetile::dsp::{self, DisplayableBar};
use wavetile::settings::{Settings, SettingsStore};
use wavetile::waveform::{request_tile, AudioSource, FileBackedSource, WaveformEngine};
use wavetile::{tokio_runtime, TileError};

fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(&args);

    let store = SettingsStore::new();
    let settings = store.load().unwrap_or_else(|e| {
        warn!("Ignoring settings at {}: {}", store.path().display(), e);
        Settings::default()
    });

    match args.command {
        Command::Tiles {
            file,
            zoom,
            offset,
            count,
        } => print_tiles(&file, zoom.unwrap_or(settings.default_zoom), offset, count, &settings),
        Command::Overview { file, bins } => print_overview(&file, bins, &settings),
        Command::Spectrum { file, bins, block } => print_spectrum(
            &file,
            bins.unwrap_or(settings.spectrum_bins),
            block.unwrap_or(settings.tap_buffer_size),
            &settings,
        ),
        Command::Record { seconds } => record(seconds, &settings),
        Command::Play {
            file,
            rate,
            reverse,
            seek,
        } => play(&file, rate, reverse, seek, &settings),
    }
}

fn open_engine(file: &Path, settings: &Settings) -> Result<WaveformEngine<FileBackedSource>> {
    let source = FileBackedSource::open(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;
    info!(
        "{}: {} frames, {} Hz, {:.2}s",
        file.display(),
        source.frame_count(),
        source.sample_rate(),
        source.duration_seconds()
    );
    Ok(WaveformEngine::with_config(source, settings.engine_config()))
}

fn print_tiles(
    file: &Path,
    zoom: f64,
    offset: i64,
    count: Option<u64>,
    settings: &Settings,
) -> Result<()> {
    let engine = Arc::new(open_engine(file, settings)?);
    let total = engine.tile_count(zoom)?;
    let count = count.unwrap_or_else(|| total.saturating_sub(offset.max(0) as u64));

    let mut stdout = std::io::stdout().lock();
    for index in 0..count as i64 {
        let tile_offset = offset + index;
        let result = tokio_runtime::block_on(request_tile(engine.clone(), tile_offset, zoom))
            .context("Tile worker failed")?;
        match result {
            Ok(tile) => {
                let line = json!({ "offset": tile_offset, "zoom": zoom, "values": tile.values() });
                writeln!(stdout, "{}", line)?;
            }
            Err(TileError::NotFound(reason)) => {
                info!("Stopping at offset {}: {}", tile_offset, reason);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_overview(file: &Path, bins: usize, settings: &Settings) -> Result<()> {
    let engine = open_engine(file, settings)?;
    let values = engine.overview(bins)?;
    println!("{}", json!({ "bins": bins, "peak": engine.peak_value(), "values": values }));
    Ok(())
}

fn print_spectrum(file: &Path, bins: usize, block: usize, settings: &Settings) -> Result<()> {
    if block == 0 {
        bail!("Block size must be positive");
    }
    let audio = WavRecorder::load(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let mono = mix_to_mono(&audio.samples, audio.channels as usize);

    let mut stdout = std::io::stdout().lock();
    for (index, chunk) in mono.chunks_exact(block).enumerate() {
        let bars = dsp::spectrum_bars(chunk, bins, settings.spectrum_scale)?;
        let time = (index * block) as f64 / audio.sample_rate.max(1) as f64;
        let values: Vec<f32> = bars.iter().map(|bar| bar.value).collect();
        let hues: Vec<f32> = bars.iter().map(|bar| bar.hue).collect();
        writeln!(stdout, "{}", json!({ "time": time, "values": values, "hues": hues }))?;
    }
    Ok(())
}

/// Draws a one-line level meter on stderr while recording
struct MeterDelegate;

impl AudioManagerDelegate for MeterDelegate {
    fn did_start_recording(&self) {
        eprintln!("Recording...");
    }

    fn recording_spectrum(&self, bars: &[DisplayableBar]) {
        let line: String = bars
            .iter()
            .map(|bar| match bar.value {
                v if v > 0.75 => '#',
                v if v > 0.5 => '=',
                v if v > 0.25 => '-',
                v if v > 0.05 => '.',
                _ => ' ',
            })
            .collect();
        eprint!("\r[{}]", line);
    }

    fn recording_duration(&self, elapsed: f64) {
        eprint!(" {:6.2}s", elapsed);
    }

    fn did_stop_playing(&self) {
        info!("Playback stopped");
    }
}

fn record(seconds: f64, settings: &Settings) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("Recording length must be positive, got {}", seconds);
    }

    let mut manager = AudioManager::new(settings.session_config());
    manager.set_delegate(Arc::new(MeterDelegate));
    manager.start()?;
    manager.start_recording()?;
    thread::sleep(Duration::from_secs_f64(seconds));

    let info = manager.stop_recording()?;
    eprintln!();
    manager.stop();

    match info {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => bail!("Recording was interrupted"),
    }
    Ok(())
}

fn play(file: &Path, rate: f32, reverse: bool, seek: Option<f64>, settings: &Settings) -> Result<()> {
    let mut manager = AudioManager::new(settings.session_config());
    manager.set_delegate(Arc::new(MeterDelegate));
    manager.load(file)?;
    manager.set_rate(rate);
    if reverse {
        manager.reverse(true);
    }
    if let Some(fraction) = seek {
        manager.seek(fraction)?;
    }

    manager.start()?;
    manager.play()?;
    while manager.is_playing() {
        thread::sleep(Duration::from_millis(100));
    }

    println!("{}", serde_json::to_string(&manager.playback_status())?);
    manager.stop();
    Ok(())
}
