//! Session orchestration: transport, recording and the live spectrum tap
//!
//! [`AudioManager`] owns the player and the capture stream and reports every
//! state change to an [`AudioManagerDelegate`].

use super::capture::{AudioCapture, TapBlock, DEFAULT_TAP_BLOCK_SIZE};
use super::playback::{AudioPlayer, SharedPlaybackState};
use super::recorder::WavRecorder;
use crate::dsp::{self, DisplayableBar, Scale, DEFAULT_SPECTRUM_BINS};
use crate::error::{SessionError, SessionResult};
use crate::models::{PlaybackStatus, RecordingInfo, RecordingStatus};
use log::{debug, info, warn};
use pipewire as pw;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Tap blocks buffered between the capture callback and the spectrum thread
const TAP_QUEUE_DEPTH: usize = 8;

/// Receives session events
///
/// Callbacks run on whichever thread produced the event: the caller's thread
/// for transport changes, the playback thread when a file plays to the end,
/// and the spectrum thread for live bars and elapsed duration.
pub trait AudioManagerDelegate: Send + Sync {
    fn did_start_playing(&self) {}
    fn did_stop_playing(&self) {}
    fn did_change_rate(&self, _rate: f32) {}
    fn did_change_reverse(&self, _is_reversed: bool) {}
    /// Playhead as a fraction of the loaded file
    fn did_change_playhead(&self, _playhead: f32) {}

    fn did_start_recording(&self) {}
    fn did_pause_recording(&self) {}
    fn did_resume_recording(&self) {}
    fn did_cancel_recording(&self) {}
    fn did_stop_recording(&self, _recording: &RecordingInfo) {}

    fn recording_spectrum(&self, _bars: &[DisplayableBar]) {}
    fn recording_duration(&self, _elapsed: f64) {}
}

/// Tunables for a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tap_buffer_size: usize,
    pub spectrum_bins: usize,
    pub spectrum_scale: Scale,
    pub recording_sample_rate: u32,
    pub recording_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tap_buffer_size: DEFAULT_TAP_BLOCK_SIZE,
            spectrum_bins: DEFAULT_SPECTRUM_BINS,
            spectrum_scale: Scale::default(),
            recording_sample_rate: 48000,
            recording_path: WavRecorder::default_path(),
        }
    }
}

/// Turns tap blocks into spectrum bars on a dedicated thread
pub(crate) struct SpectrumProcessor {
    handle: JoinHandle<()>,
}

impl SpectrumProcessor {
    /// Runs until every sender of `blocks` is dropped
    pub(crate) fn spawn(
        blocks: Receiver<TapBlock>,
        bins: usize,
        scale: Scale,
        delegate: Option<Arc<dyn AudioManagerDelegate>>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("wavetile-spectrum".to_string())
            .spawn(move || {
                for block in blocks {
                    let Some(delegate) = &delegate else {
                        continue;
                    };
                    match dsp::spectrum_bars(&block.samples, bins, scale) {
                        Ok(bars) => delegate.recording_spectrum(&bars),
                        Err(e) => warn!("Dropping tap block: {}", e),
                    }
                    delegate.recording_duration(block.elapsed);
                }
                debug!("Spectrum processor finished");
            })?;
        Ok(Self { handle })
    }

    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            warn!("Spectrum thread panicked");
        }
    }
}

struct ActiveRecording {
    capture: AudioCapture,
    spectrum: SpectrumProcessor,
}

impl ActiveRecording {
    /// Stop the stream and wait for the spectrum thread to drain
    fn finish(mut self) -> SessionResult<(Vec<f32>, u32)> {
        let result = self.capture.stop().map_err(SessionError::Backend);
        let sample_rate = self.capture.shared_state().sample_rate();
        drop(self.capture);
        self.spectrum.join();
        Ok((result?, sample_rate))
    }
}

/// Real-time audio session
pub struct AudioManager {
    config: SessionConfig,
    delegate: Option<Arc<dyn AudioManagerDelegate>>,
    started: bool,
    player: AudioPlayer,
    playback: SharedPlaybackState,
    recording: Option<ActiveRecording>,
    recording_status: RecordingStatus,
}

impl AudioManager {
    pub fn new(config: SessionConfig) -> Self {
        let player = AudioPlayer::new();
        let playback = player.shared_state();
        Self {
            config,
            delegate: None,
            started: false,
            player,
            playback,
            recording: None,
            recording_status: RecordingStatus::Idle,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn AudioManagerDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn notify(&self, event: impl FnOnce(&dyn AudioManagerDelegate)) {
        if let Some(delegate) = &self.delegate {
            event(delegate.as_ref());
        }
    }

    /// Connect to the audio server
    pub fn start(&mut self) -> SessionResult<()> {
        if self.started {
            return Ok(());
        }
        probe_backend().map_err(SessionError::Backend)?;
        self.started = true;
        info!("Audio session started");
        Ok(())
    }

    /// Stop playback, discard any recording in progress and disconnect
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.pause();
        if let Err(e) = self.cancel_recording() {
            warn!("Failed to cancel recording on stop: {}", e);
        }
        self.started = false;
        info!("Audio session stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    // Playback

    /// Load a WAV file into the player; playback is paused first
    pub fn load(&mut self, path: impl AsRef<Path>) -> SessionResult<()> {
        self.pause();
        let audio = WavRecorder::load(path.as_ref())?;
        debug!(
            "Loaded {} ({} frames, {} ch, {} Hz)",
            path.as_ref().display(),
            audio.frame_count(),
            audio.channels,
            audio.sample_rate
        );
        self.playback
            .load(audio.samples, audio.channels, audio.sample_rate);
        Ok(())
    }

    pub fn play(&mut self) -> SessionResult<()> {
        if !self.playback.has_buffer() {
            return Err(SessionError::PlayerHasNoBuffer);
        }
        if !self.started {
            return Err(SessionError::NotStarted);
        }
        if self.player.is_running() {
            return Ok(());
        }

        let delegate = self.delegate.clone();
        self.player
            .play(move || {
                if let Some(delegate) = delegate {
                    delegate.did_stop_playing();
                }
            })
            .map_err(SessionError::Backend)?;
        self.notify(|d| d.did_start_playing());
        Ok(())
    }

    pub fn pause(&mut self) {
        if !self.player.is_running() {
            return;
        }
        self.player.stop();
        self.notify(|d| d.did_stop_playing());
    }

    /// Move the playhead to `fraction` of the file (clamped to 0..=1)
    pub fn seek(&mut self, fraction: f64) -> SessionResult<()> {
        if !self.playback.has_buffer() {
            return Err(SessionError::PlayerHasNoBuffer);
        }
        let applied = self.playback.seek(fraction);
        self.notify(|d| d.did_change_playhead(applied as f32));
        Ok(())
    }

    /// Returns the rate actually applied after clamping
    pub fn set_rate(&mut self, rate: f32) -> f32 {
        let applied = self.playback.set_rate(rate);
        self.notify(|d| d.did_change_rate(applied));
        applied
    }

    /// Change playback direction; playback is paused
    pub fn reverse(&mut self, is_reversed: bool) {
        self.pause();
        self.playback.set_reversed(is_reversed);
        self.notify(|d| d.did_change_reverse(is_reversed));
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_running()
    }

    pub fn rate(&self) -> f32 {
        self.playback.rate()
    }

    /// Playhead as a fraction of the loaded file
    pub fn playhead(&self) -> f32 {
        self.playback.progress()
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        PlaybackStatus {
            is_playing: self.player.is_running(),
            rate: self.playback.rate(),
            is_reversed: self.playback.is_reversed(),
            progress: self.playback.progress(),
            current_time: self.playback.current_time(),
            duration: self.playback.duration(),
        }
    }

    // Recording

    pub fn recording_status(&self) -> RecordingStatus {
        self.recording_status
    }

    pub fn is_recording(&self) -> bool {
        self.recording_status == RecordingStatus::Recording
    }

    /// Seconds captured so far by the current recording
    pub fn recorded_duration(&self) -> f64 {
        self.recording
            .as_ref()
            .map_or(0.0, |r| r.capture.shared_state().duration())
    }

    /// Start a new recording, cancelling one already in progress
    pub fn start_recording(&mut self) -> SessionResult<()> {
        if self.recording.is_some() {
            self.cancel_recording()?;
        }
        if !self.started {
            return Err(SessionError::NotStarted);
        }

        let (tx, rx) = mpsc::sync_channel(TAP_QUEUE_DEPTH);
        let spectrum = SpectrumProcessor::spawn(
            rx,
            self.config.spectrum_bins,
            self.config.spectrum_scale,
            self.delegate.clone(),
        )
        .map_err(|e| SessionError::Backend(format!("Failed to spawn spectrum thread: {}", e)))?;

        let mut capture =
            AudioCapture::new(self.config.recording_sample_rate, self.config.tap_buffer_size);
        if let Err(e) = capture.start(tx) {
            capture.shared_state().detach_tap();
            drop(capture);
            spectrum.join();
            return Err(SessionError::Backend(e));
        }

        self.recording = Some(ActiveRecording { capture, spectrum });
        self.recording_status = RecordingStatus::Recording;
        self.notify(|d| d.did_start_recording());
        Ok(())
    }

    pub fn pause_recording(&mut self) {
        let Some(recording) = &self.recording else {
            return;
        };
        if self.recording_status != RecordingStatus::Recording {
            return;
        }
        recording.capture.pause();
        self.recording_status = RecordingStatus::Paused;
        self.notify(|d| d.did_pause_recording());
    }

    pub fn resume_recording(&mut self) {
        let Some(recording) = &self.recording else {
            return;
        };
        if self.recording_status != RecordingStatus::Paused {
            return;
        }
        recording.capture.resume();
        self.recording_status = RecordingStatus::Recording;
        self.notify(|d| d.did_resume_recording());
    }

    /// Finish the recording and write it to the recording file.
    /// Returns `None` when nothing was being recorded.
    pub fn stop_recording(&mut self) -> SessionResult<Option<RecordingInfo>> {
        let Some(recording) = self.recording.take() else {
            return Ok(None);
        };
        self.recording_status = RecordingStatus::Idle;

        let (samples, sample_rate) = recording.finish()?;
        let info = WavRecorder::new(sample_rate)
            .with_path(&self.config.recording_path)
            .save(&samples)?;
        info!(
            "Saved {:.2}s recording to {}",
            info.duration_seconds,
            info.path.display()
        );

        self.notify(|d| d.did_stop_recording(&info));
        Ok(Some(info))
    }

    /// Discard the recording in progress
    pub fn cancel_recording(&mut self) -> SessionResult<()> {
        let Some(recording) = self.recording.take() else {
            return Ok(());
        };
        self.recording_status = RecordingStatus::Idle;

        if let Err(e) = recording.finish() {
            warn!("Capture ended with an error: {}", e);
        }
        self.notify(|d| d.did_cancel_recording());
        Ok(())
    }
}

impl Default for AudioManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connect to PipeWire once to make sure the server is reachable
fn probe_backend() -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;
    let _core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;
    Ok(())
}
