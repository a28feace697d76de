//! Audio playback using PipeWire
//!
//! Transport state (playhead, rate, direction) lives in [`SharedPlaybackState`]
//! and is advanced from the real-time process callback.

use super::capture::format_pod;
use log::{debug, error, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Slowest supported playback rate
pub const MIN_RATE: f32 = 0.25;
/// Fastest supported playback rate
pub const MAX_RATE: f32 = 4.0;

/// Shared state for audio playback - thread-safe
#[derive(Clone)]
pub struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

struct PlaybackStateInner {
    /// Interleaved samples
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    /// Playhead in frames; fractional while playing at non-unit rates
    position: f64,
    rate: f32,
    reversed: bool,
    is_playing: bool,
}

impl PlaybackStateInner {
    fn frame_count(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn at_end(&self) -> bool {
        if self.reversed {
            self.position <= 0.0
        } else {
            self.position >= self.frame_count() as f64
        }
    }

    /// Interpolated sample of `channel` at the frame under the playhead
    fn sample_at(&self, channel: usize) -> f32 {
        let frames = self.frame_count();
        let index = if self.reversed {
            (self.position - 1.0).max(0.0)
        } else {
            self.position
        };
        let i0 = (index.floor() as usize).min(frames - 1);
        let i1 = (i0 + 1).min(frames - 1);
        let frac = (index - i0 as f64) as f32;

        let a = self.samples[i0 * self.channels + channel];
        let b = self.samples[i1 * self.channels + channel];
        a + (b - a) * frac
    }
}

impl SharedPlaybackState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackStateInner {
                samples: Vec::new(),
                channels: 1,
                sample_rate: 48000,
                position: 0.0,
                rate: 1.0,
                reversed: false,
                is_playing: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load interleaved samples for playback; the playhead moves to the
    /// start of the current direction
    pub fn load(&self, samples: Vec<f32>, channels: u16, sample_rate: u32) {
        let mut inner = self.lock();
        inner.channels = channels.max(1) as usize;
        inner.samples = samples;
        inner.sample_rate = sample_rate;
        inner.is_playing = false;
        inner.position = if inner.reversed {
            inner.frame_count() as f64
        } else {
            0.0
        };
    }

    pub fn has_buffer(&self) -> bool {
        !self.lock().samples.is_empty()
    }

    pub fn channels(&self) -> u16 {
        self.lock().channels as u16
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// Get current playback position in seconds
    pub fn current_time(&self) -> f64 {
        let inner = self.lock();
        inner.position / inner.sample_rate.max(1) as f64
    }

    /// Get total duration in seconds
    pub fn duration(&self) -> f64 {
        let inner = self.lock();
        inner.frame_count() as f64 / inner.sample_rate.max(1) as f64
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing
    }

    pub fn rate(&self) -> f32 {
        self.lock().rate
    }

    pub fn is_reversed(&self) -> bool {
        self.lock().reversed
    }

    /// Playhead as a fraction of the file (0.0 - 1.0)
    pub fn progress(&self) -> f32 {
        let inner = self.lock();
        match inner.frame_count() {
            0 => 0.0,
            frames => (inner.position / frames as f64) as f32,
        }
    }

    /// Whether the playhead sits at the end of the current direction
    pub fn finished(&self) -> bool {
        let inner = self.lock();
        inner.frame_count() > 0 && inner.at_end()
    }

    fn set_playing(&self, playing: bool) {
        self.lock().is_playing = playing;
    }

    /// Move the playhead back to the start of the current direction if it
    /// has run off the end
    pub fn rewind_if_finished(&self) {
        let mut inner = self.lock();
        if inner.at_end() {
            inner.position = if inner.reversed {
                inner.frame_count() as f64
            } else {
                0.0
            };
        }
    }

    /// Seek to a position (fraction 0.0 - 1.0, clamped); returns the
    /// applied fraction
    pub fn seek(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let mut inner = self.lock();
        inner.position = (fraction * inner.frame_count() as f64).round();
        fraction
    }

    /// Set the playback rate, clamped to [`MIN_RATE`]..=[`MAX_RATE`]
    pub fn set_rate(&self, rate: f32) -> f32 {
        let rate = if rate.is_finite() {
            rate.clamp(MIN_RATE, MAX_RATE)
        } else {
            1.0
        };
        self.lock().rate = rate;
        rate
    }

    pub fn set_reversed(&self, reversed: bool) {
        self.lock().reversed = reversed;
    }

    /// Render up to `count` frames into `out_channels` interleaved channels,
    /// advancing the playhead. Returns `None` once the end is reached.
    pub fn get_frames(&self, count: usize, out_channels: usize) -> Option<Vec<f32>> {
        let mut inner = self.lock();
        let out_channels = out_channels.max(1);
        if inner.frame_count() == 0 || inner.at_end() {
            inner.is_playing = false;
            return None;
        }

        let step = if inner.reversed {
            -(inner.rate as f64)
        } else {
            inner.rate as f64
        };
        let mut out = Vec::with_capacity(count * out_channels);
        for _ in 0..count {
            if inner.at_end() {
                break;
            }
            for c in 0..out_channels {
                out.push(inner.sample_at(c % inner.channels));
            }
            inner.position += step;
        }

        let frames = inner.frame_count() as f64;
        inner.position = inner.position.clamp(0.0, frames);
        if inner.at_end() {
            inner.is_playing = false;
        }
        Some(out)
    }
}

impl Default for SharedPlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio player using PipeWire
pub struct AudioPlayer {
    state: SharedPlaybackState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PlaybackCommand>>,
}

enum PlaybackCommand {
    Stop,
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self {
            state: SharedPlaybackState::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }

    /// Get shared playback state for transport queries
    pub fn shared_state(&self) -> SharedPlaybackState {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start playback; `on_finished` runs on the playback thread if the
    /// playhead reaches the end without an explicit stop
    pub fn play<F>(&mut self, on_finished: F) -> Result<(), String>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_running.load(Ordering::SeqCst) {
            return Err("Playback already running".to_string());
        }
        // Reap a thread that ended on its own
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }

        self.state.rewind_if_finished();
        self.state.set_playing(true);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<PlaybackCommand>();
        self.sender = Some(sender);

        let handle = thread::Builder::new()
            .name("wavetile-playback".to_string())
            .spawn(move || {
                if let Err(e) = run_playback_loop(state.clone(), receiver) {
                    error!("Playback failed: {}", e);
                }
                state.set_playing(false);
                is_running.store(false, Ordering::SeqCst);
                if state.finished() {
                    debug!("Playback reached the end");
                    on_finished();
                }
            })
            .map_err(|e| format!("Failed to spawn playback thread: {}", e))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop playback, keeping the playhead where it is
    pub fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Playback thread panicked");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        self.state.set_playing(false);
    }
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire playback loop in a background thread
fn run_playback_loop(
    state: SharedPlaybackState,
    receiver: pw::channel::Receiver<PlaybackCommand>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PlaybackCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let sample_rate = state.sample_rate();
    let channels = state.channels();
    let user_data = UserData {
        format: Default::default(),
        state,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => "wavetile",
    };

    let stream = pw::stream::StreamBox::new(&core, "wavetile-playback", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }
            let Ok((media_type, media_subtype)) = format_utils::parse_format(param) else {
                return;
            };
            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }
            if let Err(e) = user_data.format.parse(param) {
                warn!("Failed to parse playback format: {:?}", e);
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * n_channels;

            let Some(slice) = data.data() else {
                return;
            };
            let n_frames = slice.len() / stride;

            match user_data.state.get_frames(n_frames, n_channels) {
                Some(frames) => {
                    for (dst, sample) in slice.chunks_exact_mut(4).zip(&frames) {
                        dst.copy_from_slice(&sample.to_le_bytes());
                    }
                    let written = frames.len() * std::mem::size_of::<f32>();
                    slice[written..].fill(0);

                    let chunk = data.chunk_mut();
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = written as u32;
                }
                None => {
                    if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                        mainloop.quit();
                    }
                }
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let params_bytes = format_pod(Some(sample_rate), Some(channels))?;
    let mut params = [Pod::from_bytes(&params_bytes)
        .ok_or_else(|| "Failed to build format pod".to_string())?];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    mainloop.run();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(samples: Vec<f32>, channels: u16) -> SharedPlaybackState {
        let state = SharedPlaybackState::new();
        state.load(samples, channels, 4);
        state
    }

    #[test]
    fn test_forward_playback() {
        let state = loaded(vec![0.0, 1.0, 2.0, 3.0], 1);
        assert_eq!(state.duration(), 1.0);
        assert_eq!(state.get_frames(3, 1), Some(vec![0.0, 1.0, 2.0]));
        assert_eq!(state.get_frames(3, 1), Some(vec![3.0]));
        assert!(state.finished());
        assert_eq!(state.get_frames(3, 1), None);
    }

    #[test]
    fn test_reverse_playback() {
        let state = SharedPlaybackState::new();
        state.set_reversed(true);
        state.load(vec![0.0, 1.0, 2.0, 3.0], 1, 4);
        assert_eq!(state.progress(), 1.0);
        assert_eq!(state.get_frames(8, 1), Some(vec![3.0, 2.0, 1.0, 0.0]));
        assert!(state.finished());

        state.rewind_if_finished();
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn test_rate_steps_playhead() {
        let state = loaded(vec![0.0, 1.0, 2.0, 3.0], 1);
        state.set_rate(2.0);
        assert_eq!(state.get_frames(8, 1), Some(vec![0.0, 2.0]));

        state.seek(0.0);
        state.set_rate(0.5);
        let frames = state.get_frames(3, 1).unwrap();
        assert_eq!(frames, vec![0.0, 0.5, 1.0]);
        assert_eq!(state.current_time(), 0.375);
    }

    #[test]
    fn test_rate_is_clamped() {
        let state = SharedPlaybackState::new();
        assert_eq!(state.set_rate(100.0), MAX_RATE);
        assert_eq!(state.set_rate(0.0), MIN_RATE);
        assert_eq!(state.set_rate(f32::NAN), 1.0);
        assert_eq!(state.rate(), 1.0);
    }

    #[test]
    fn test_seek_is_clamped() {
        let state = loaded(vec![0.0; 100], 1);
        assert_eq!(state.seek(0.25), 0.25);
        assert_eq!(state.progress(), 0.25);
        assert_eq!(state.seek(7.0), 1.0);
        assert!(state.finished());
        assert_eq!(state.seek(-1.0), 0.0);
        assert_eq!(state.seek(f64::NAN), 0.0);
        assert!(!state.finished());
    }

    #[test]
    fn test_channel_mapping() {
        // Stereo source to mono output takes the left channel
        let state = loaded(vec![1.0, -1.0, 2.0, -2.0], 2);
        assert_eq!(state.get_frames(2, 1), Some(vec![1.0, 2.0]));

        // Mono source duplicated to stereo output
        let state = loaded(vec![0.5, 0.25], 1);
        assert_eq!(state.get_frames(2, 2), Some(vec![0.5, 0.5, 0.25, 0.25]));
    }

    #[test]
    fn test_empty_state() {
        let state = SharedPlaybackState::new();
        assert!(!state.has_buffer());
        assert_eq!(state.progress(), 0.0);
        assert!(!state.finished());
        assert_eq!(state.get_frames(16, 2), None);
    }
}
