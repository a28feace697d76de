//! Audio sources the waveform engine reads from
//!
//! Both sources keep a read cursor. Reading a segment leaves the cursor at the
//! segment's end; the engine restores it after each tile.

use crate::error::{AudioError, AudioResult};
use crate::pcm::{PcmBuffer, PcmFormat};
use hound::{SampleFormat as WavSampleFormat, WavReader, WavSpec};
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Frames read per chunk when scanning a whole source
const SCAN_CHUNK_FRAMES: u64 = 65_536;

/// Random-access PCM data with a stateful read position
pub trait AudioSource: Send {
    /// Total frames in the source
    fn frame_count(&self) -> u64;

    fn sample_rate(&self) -> u32;

    fn channel_count(&self) -> u16;

    /// Format of the buffers `read_segment` returns
    fn processing_format(&self) -> PcmFormat;

    /// Current read position in frames
    fn frame_position(&self) -> u64;

    fn set_frame_position(&mut self, position: u64) -> AudioResult<()>;

    /// Read frames `[start, end)`; the cursor ends up at `end`
    fn read_segment(&mut self, start: u64, end: u64) -> AudioResult<PcmBuffer>;

    /// Largest absolute sample value in the whole source, scanned in chunks
    fn scan_peak(&mut self) -> AudioResult<f32> {
        let total = self.frame_count();
        let mut peak = 0.0f32;
        let mut start = 0;
        while start < total {
            let end = (start + SCAN_CHUNK_FRAMES).min(total);
            peak = peak.max(self.read_segment(start, end)?.peak_amplitude()?);
            start = end;
        }
        Ok(peak)
    }

    fn duration_seconds(&self) -> f64 {
        if self.sample_rate() == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate() as f64
    }
}

fn check_range(start: u64, end: u64, length: u64) -> AudioResult<()> {
    if start > end {
        return Err(AudioError::InvalidArgument(format!(
            "segment start {} is after end {}",
            start, end
        )));
    }
    if end > length {
        return Err(AudioError::OutOfRange { start, end, length });
    }
    Ok(())
}

/// Source over an in-memory buffer of any supported layout
#[derive(Debug, Clone)]
pub struct BufferBackedSource {
    buffer: PcmBuffer,
    position: u64,
}

impl BufferBackedSource {
    pub fn new(buffer: PcmBuffer) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn buffer(&self) -> &PcmBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PcmBuffer {
        self.buffer
    }
}

impl AudioSource for BufferBackedSource {
    fn frame_count(&self) -> u64 {
        self.buffer.frame_length() as u64
    }

    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    fn channel_count(&self) -> u16 {
        self.buffer.format().channels
    }

    fn processing_format(&self) -> PcmFormat {
        *self.buffer.format()
    }

    fn frame_position(&self) -> u64 {
        self.position
    }

    fn set_frame_position(&mut self, position: u64) -> AudioResult<()> {
        check_range(position, position, self.frame_count())?;
        self.position = position;
        Ok(())
    }

    fn read_segment(&mut self, start: u64, end: u64) -> AudioResult<PcmBuffer> {
        let segment = self.buffer.segment(start, end)?;
        self.position = end;
        Ok(segment)
    }
}

/// Source over a WAV file, decoded to non-interleaved float32 on read
pub struct FileBackedSource {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    frame_count: u64,
    position: u64,
}

impl FileBackedSource {
    /// Open a WAV file for reading
    pub fn open(path: impl AsRef<Path>) -> AudioResult<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path)?;
        let spec = reader.spec();
        let frame_count = reader.duration() as u64;

        debug!(
            "Opened {:?}: {} frames, {} Hz, {} channels, {} bit",
            path, frame_count, spec.sample_rate, spec.channels, spec.bits_per_sample
        );

        Ok(Self {
            path,
            reader,
            spec,
            frame_count,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    fn read_interleaved(&mut self, samples: usize) -> AudioResult<Vec<f32>> {
        let read: Result<Vec<f32>, hound::Error> = match self.spec.sample_format {
            WavSampleFormat::Float => self.reader.samples::<f32>().take(samples).collect(),
            WavSampleFormat::Int => {
                let max_value = (1i64 << (self.spec.bits_per_sample - 1)) as f32;
                self.reader
                    .samples::<i32>()
                    .take(samples)
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect()
            }
        };
        let read = read?;
        if read.len() != samples {
            return Err(AudioError::ReadFailure(format!(
                "expected {} samples from {:?}, got {}",
                samples,
                self.path,
                read.len()
            )));
        }
        Ok(read)
    }
}

impl AudioSource for FileBackedSource {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.spec.channels
    }

    fn processing_format(&self) -> PcmFormat {
        PcmFormat::processing(self.spec.sample_rate, self.spec.channels)
    }

    fn frame_position(&self) -> u64 {
        self.position
    }

    fn set_frame_position(&mut self, position: u64) -> AudioResult<()> {
        check_range(position, position, self.frame_count)?;
        self.reader.seek(position as u32)?;
        self.position = position;
        Ok(())
    }

    fn read_segment(&mut self, start: u64, end: u64) -> AudioResult<PcmBuffer> {
        check_range(start, end, self.frame_count)?;
        self.set_frame_position(start)?;

        let channels = self.spec.channels as usize;
        let frames = (end - start) as usize;
        let interleaved = self.read_interleaved(frames * channels)?;
        self.position = end;

        let mut planes = vec![Vec::with_capacity(frames); channels];
        for frame in interleaved.chunks_exact(channels) {
            for (plane, &sample) in planes.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
        PcmBuffer::from_channels(self.spec.sample_rate, &planes, false)
    }
}
