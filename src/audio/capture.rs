//! Microphone capture using PipeWire
//!
//! The real-time callback only mixes to mono and appends to shared state.
//! Complete tap blocks are handed off through a bounded channel so spectrum
//! work never runs on the PipeWire thread.

use log::{debug, error, trace, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Samples per tap block handed to the spectrum processor
pub const DEFAULT_TAP_BLOCK_SIZE: usize = 2048;

/// Current state of audio capture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Paused,
    Error,
}

/// One block of live input for the spectrum processor
#[derive(Clone, Debug)]
pub struct TapBlock {
    pub samples: Vec<f32>,
    /// Recorded duration in seconds when the block completed
    pub elapsed: f64,
}

/// Cuts incoming audio into fixed-size blocks
struct TapBuffer {
    block_size: usize,
    pending: Vec<f32>,
    sender: Option<SyncSender<TapBlock>>,
}

impl TapBuffer {
    fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
            sender: None,
        }
    }

    fn push(&mut self, samples: &[f32], elapsed: f64) {
        let Some(sender) = &self.sender else {
            return;
        };

        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            match sender.try_send(TapBlock {
                samples: block,
                elapsed,
            }) {
                Ok(()) => {}
                // Processor is behind; dropping a display frame is fine
                Err(TrySendError::Full(_)) => trace!("Spectrum tap full, dropping block"),
                Err(TrySendError::Disconnected(_)) => {
                    self.sender = None;
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

/// Shared state for audio capture - thread-safe
#[derive(Clone)]
pub struct SharedCaptureState {
    inner: Arc<Mutex<CaptureStateInner>>,
}

struct CaptureStateInner {
    /// Captured mono samples
    samples: Vec<f32>,
    duration: f64,
    state: CaptureState,
    error: Option<String>,
    sample_rate: u32,
    tap: TapBuffer,
}

impl SharedCaptureState {
    pub fn new(tap_block_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureStateInner {
                samples: Vec::new(),
                duration: 0.0,
                state: CaptureState::Idle,
                error: None,
                sample_rate: 48000,
                tap: TapBuffer::new(tap_block_size),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn duration(&self) -> f64 {
        self.lock().duration
    }

    pub fn samples(&self) -> Vec<f32> {
        self.lock().samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_state(&self, state: CaptureState) {
        self.lock().state = state;
    }

    pub fn set_error(&self, error: String) {
        let mut inner = self.lock();
        inner.error = Some(error);
        inner.state = CaptureState::Error;
    }

    /// Route completed tap blocks to `sender`
    pub fn attach_tap(&self, sender: SyncSender<TapBlock>) {
        let mut inner = self.lock();
        inner.tap.pending.clear();
        inner.tap.sender = Some(sender);
    }

    /// Stop forwarding tap blocks; the receiving side sees a disconnect
    pub fn detach_tap(&self) {
        let mut inner = self.lock();
        inner.tap.sender = None;
        inner.tap.pending.clear();
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.samples.clear();
        inner.duration = 0.0;
        inner.error = None;
        inner.state = CaptureState::Idle;
        inner.tap.pending.clear();
    }

    /// Take the captured samples, leaving the buffer empty
    pub fn take_samples(&self) -> Vec<f32> {
        std::mem::take(&mut self.lock().samples)
    }

    /// Process incoming mono samples; ignored unless capturing
    pub fn process_samples(&self, samples: &[f32], sample_rate: u32) {
        let mut inner = self.lock();
        if inner.state != CaptureState::Capturing || samples.is_empty() {
            return;
        }
        inner.sample_rate = sample_rate;

        inner.samples.extend_from_slice(samples);
        inner.duration = inner.samples.len() as f64 / sample_rate.max(1) as f64;

        let elapsed = inner.duration;
        inner.tap.push(samples, elapsed);
    }
}

/// Average interleaved frames down to one channel
pub fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Audio capture manager using PipeWire
pub struct AudioCapture {
    state: SharedCaptureState,
    sample_rate: u32,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<CaptureCommand>>,
}

enum CaptureCommand {
    Stop,
}

impl AudioCapture {
    /// Capture at `sample_rate` (the graph may still negotiate another rate),
    /// cutting tap blocks of `tap_block_size` samples
    pub fn new(sample_rate: u32, tap_block_size: usize) -> Self {
        Self {
            state: SharedCaptureState::new(tap_block_size),
            sample_rate,
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }

    /// Shared capture state for sample and tap access
    pub fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start capturing, forwarding tap blocks to `tap`
    pub fn start(&mut self, tap: SyncSender<TapBlock>) -> Result<(), String> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err("Capture already running".to_string());
        }

        self.state.reset();
        self.state.attach_tap(tap);
        self.state.set_state(CaptureState::Capturing);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();
        let sample_rate = self.sample_rate;

        let (sender, receiver) = pw::channel::channel::<CaptureCommand>();
        self.sender = Some(sender);

        let handle = thread::Builder::new()
            .name("wavetile-capture".to_string())
            .spawn(move || {
                if let Err(e) = run_capture_loop(state.clone(), sample_rate, receiver) {
                    error!("Capture failed: {}", e);
                    state.set_error(e);
                }
                state.detach_tap();
                is_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| format!("Failed to spawn capture thread: {}", e))?;

        self.thread_handle = Some(handle);
        debug!("Capture started");
        Ok(())
    }

    /// Keep the stream open but stop recording samples
    pub fn pause(&self) {
        if self.state.state() == CaptureState::Capturing {
            self.state.set_state(CaptureState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.state.state() == CaptureState::Paused {
            self.state.set_state(CaptureState::Capturing);
        }
    }

    /// Stop capturing and return the recorded samples
    pub fn stop(&mut self) -> Result<Vec<f32>, String> {
        self.state.detach_tap();
        if self.thread_handle.is_none() {
            return Err("Capture not running".to_string());
        }

        if let Some(sender) = self.sender.take() {
            let _ = sender.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        if let Some(e) = self.state.error() {
            return Err(e);
        }
        self.state.set_state(CaptureState::Idle);
        debug!("Capture stopped after {:.2}s", self.state.duration());

        Ok(self.state.take_samples())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            let _ = self.stop();
        }
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    state: SharedCaptureState,
    sample_rate: u32,
    receiver: pw::channel::Receiver<CaptureCommand>,
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
        CaptureCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        state,
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Production",
        *pw::keys::APP_NAME => "wavetile",
    };

    let stream = pw::stream::StreamBox::new(&core, "wavetile-capture", props)
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
                warn!("Failed to parse capture format: {:?}", e);
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
            let channels = user_data.format.channels().max(1) as usize;
            let sample_rate = user_data.format.rate();
            let size = data.chunk().size() as usize;

            if let Some(raw) = data.data() {
                let raw = &raw[..size.min(raw.len())];
                let interleaved: Vec<f32> = raw
                    .chunks_exact(std::mem::size_of::<f32>())
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                let mono = mix_to_mono(&interleaved, channels);
                user_data.state.process_samples(&mono, sample_rate);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let params_bytes = format_pod(Some(sample_rate), Some(1))?;
    let mut params = [Pod::from_bytes(&params_bytes)
        .ok_or_else(|| "Failed to build format pod".to_string())?];

    stream
        .connect(
            spa::utils::Direction::Input,
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

/// Serialized EnumFormat pod requesting F32LE, optionally pinning rate and
/// channel count
pub(crate) fn format_pod(rate: Option<u32>, channels: Option<u16>) -> Result<Vec<u8>, String> {
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    if let Some(rate) = rate {
        audio_info.set_rate(rate);
    }
    if let Some(channels) = channels {
        audio_info.set_channels(u32::from(channels));
    }

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    Ok(spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner())
}
