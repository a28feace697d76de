//! Raw PCM storage with frame-range copies and per-channel access
//!
//! Samples are stored little-endian. Interleaved buffers keep frames
//! contiguous; non-interleaved buffers keep one contiguous plane per channel.

use super::format::{PcmFormat, Sample, SampleFormat};
use crate::error::{AudioError, AudioResult};

/// Per-channel sample arrays for the formats with direct access
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Int16(Vec<Vec<i16>>),
    Int32(Vec<Vec<i32>>),
    Float32(Vec<Vec<f32>>),
}

impl ChannelData {
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            ChannelData::Int16(_) => SampleFormat::Int16,
            ChannelData::Int32(_) => SampleFormat::Int32,
            ChannelData::Float32(_) => SampleFormat::Float32,
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            ChannelData::Int16(c) => c.len(),
            ChannelData::Int32(c) => c.len(),
            ChannelData::Float32(c) => c.len(),
        }
    }

    pub fn frame_count(&self) -> usize {
        match self {
            ChannelData::Int16(c) => c.first().map_or(0, Vec::len),
            ChannelData::Int32(c) => c.first().map_or(0, Vec::len),
            ChannelData::Float32(c) => c.first().map_or(0, Vec::len),
        }
    }

    /// Convert every channel to floats in [-1, 1)
    pub fn to_f32(&self) -> Vec<Vec<f32>> {
        fn convert<T: Sample>(channels: &[Vec<T>]) -> Vec<Vec<f32>> {
            channels
                .iter()
                .map(|ch| ch.iter().map(|s| s.to_f32()).collect())
                .collect()
        }

        match self {
            ChannelData::Int16(c) => convert(c),
            ChannelData::Int32(c) => convert(c),
            ChannelData::Float32(c) => c.clone(),
        }
    }
}

/// An owned block of PCM frames
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    format: PcmFormat,
    frame_length: usize,
    data: Vec<u8>,
}

impl PcmBuffer {
    /// Wrap raw little-endian bytes laid out as `format` describes
    pub fn from_raw(format: PcmFormat, frame_length: usize, data: Vec<u8>) -> AudioResult<Self> {
        if format.channels == 0 {
            return Err(AudioError::InvalidArgument(
                "buffer needs at least one channel".to_string(),
            ));
        }
        let expected = frame_length * format.bytes_per_frame();
        if data.len() != expected {
            return Err(AudioError::InvalidArgument(format!(
                "expected {} bytes for {} frames, got {}",
                expected,
                frame_length,
                data.len()
            )));
        }
        Ok(Self {
            format,
            frame_length,
            data,
        })
    }

    /// A zero-filled buffer of `frames` frames
    pub fn silent(format: PcmFormat, frames: usize) -> AudioResult<Self> {
        let mut data = allocate(frames * format.bytes_per_frame())?;
        data.resize(frames * format.bytes_per_frame(), 0);
        Self::from_raw(format, frames, data)
    }

    /// Build an interleaved buffer from frame-major samples
    pub fn from_interleaved<T: Sample>(
        sample_rate: u32,
        channels: u16,
        samples: &[T],
    ) -> AudioResult<Self> {
        if channels == 0 || samples.len() % channels as usize != 0 {
            return Err(AudioError::InvalidArgument(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        let format = PcmFormat::new(sample_rate, channels, T::FORMAT, true);
        let bps = T::FORMAT.bytes_per_sample();
        let mut data = allocate(samples.len() * bps)?;
        data.resize(samples.len() * bps, 0);
        for (chunk, &sample) in data.chunks_exact_mut(bps).zip(samples) {
            sample.write_le(chunk);
        }
        Self::from_raw(format, samples.len() / channels as usize, data)
    }

    /// Build a buffer from one sample array per channel
    pub fn from_channels<T: Sample>(
        sample_rate: u32,
        channels: &[Vec<T>],
        interleaved: bool,
    ) -> AudioResult<Self> {
        let frames = channels.first().map_or(0, Vec::len);
        let format = PcmFormat::new(sample_rate, channels.len() as u16, T::FORMAT, interleaved);
        let mut buffer = Self::silent(format, frames)?;
        buffer.store_channels(channels)?;
        Ok(buffer)
    }

    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn channel_count(&self) -> usize {
        self.format.channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.frame_length == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.format.sample_rate == 0 {
            return 0.0;
        }
        self.frame_length as f64 / self.format.sample_rate as f64
    }

    /// Copy frames `[start, end)` into a new buffer with the same layout
    pub fn segment(&self, start: u64, end: u64) -> AudioResult<PcmBuffer> {
        if start > end {
            return Err(AudioError::InvalidArgument(format!(
                "segment start {} is after end {}",
                start, end
            )));
        }
        if end > self.frame_length as u64 {
            return Err(AudioError::OutOfRange {
                start,
                end,
                length: self.frame_length as u64,
            });
        }

        let (start, end) = (start as usize, end as usize);
        let frames = end - start;
        let bps = self.format.sample_format.bytes_per_sample();
        let mut data = allocate(frames * self.format.bytes_per_frame())?;

        if self.format.interleaved {
            let bpf = self.format.bytes_per_frame();
            data.extend_from_slice(&self.data[start * bpf..end * bpf]);
        } else {
            for channel in 0..self.channel_count() {
                let plane = channel * self.frame_length * bps;
                data.extend_from_slice(&self.data[plane + start * bps..plane + end * bps]);
            }
        }

        Self::from_raw(self.format, frames, data)
    }

    /// Per-channel sample arrays; only int16, int32 and float32 are supported
    pub fn to_channel_data(&self) -> AudioResult<ChannelData> {
        match self.format.sample_format {
            SampleFormat::Int16 => Ok(ChannelData::Int16(self.collect_channels())),
            SampleFormat::Int32 => Ok(ChannelData::Int32(self.collect_channels())),
            SampleFormat::Float32 => Ok(ChannelData::Float32(self.collect_channels())),
            other => Err(AudioError::UnsupportedFormat(other.name().to_string())),
        }
    }

    /// Store per-channel arrays back into this buffer's own layout
    pub fn write_channel_data(&mut self, data: &ChannelData) -> AudioResult<()> {
        if data.sample_format() != self.format.sample_format {
            return Err(AudioError::UnsupportedFormat(format!(
                "cannot write {} channel data into a {} buffer",
                data.sample_format().name(),
                self.format.sample_format.name()
            )));
        }
        match data {
            ChannelData::Int16(c) => self.store_channels(c),
            ChannelData::Int32(c) => self.store_channels(c),
            ChannelData::Float32(c) => self.store_channels(c),
        }
    }

    /// Channel data converted to floats
    pub fn to_float_channels(&self) -> AudioResult<Vec<Vec<f32>>> {
        if self.format.sample_format == SampleFormat::Float32 {
            return Ok(self.collect_channels::<f32>());
        }
        Ok(self.to_channel_data()?.to_f32())
    }

    /// Largest absolute sample value across all channels
    pub fn peak_amplitude(&self) -> AudioResult<f32> {
        let peak = self
            .to_float_channels()?
            .iter()
            .flatten()
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        Ok(peak)
    }

    fn sample_offset(&self, frame: usize, channel: usize) -> usize {
        let bps = self.format.sample_format.bytes_per_sample();
        if self.format.interleaved {
            (frame * self.channel_count() + channel) * bps
        } else {
            (channel * self.frame_length + frame) * bps
        }
    }

    fn collect_channels<T: Sample>(&self) -> Vec<Vec<T>> {
        let bps = T::FORMAT.bytes_per_sample();
        (0..self.channel_count())
            .map(|channel| {
                (0..self.frame_length)
                    .map(|frame| {
                        let at = self.sample_offset(frame, channel);
                        T::read_le(&self.data[at..at + bps])
                    })
                    .collect()
            })
            .collect()
    }

    fn store_channels<T: Sample>(&mut self, channels: &[Vec<T>]) -> AudioResult<()> {
        if channels.len() != self.channel_count()
            || channels.iter().any(|ch| ch.len() != self.frame_length)
        {
            return Err(AudioError::InvalidArgument(format!(
                "channel data shape does not match {} channels x {} frames",
                self.channel_count(),
                self.frame_length
            )));
        }

        let bps = T::FORMAT.bytes_per_sample();
        for (channel, samples) in channels.iter().enumerate() {
            for (frame, &sample) in samples.iter().enumerate() {
                let at = self.sample_offset(frame, channel);
                sample.write_le(&mut self.data[at..at + bps]);
            }
        }
        Ok(())
    }
}

/// Reserve an empty byte vector, reporting allocation failure instead of aborting
fn allocate(bytes: usize) -> AudioResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|e| AudioError::ResourceUnavailable(format!("{} bytes: {}", bytes, e)))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_i16(interleaved: bool) -> PcmBuffer {
        let left: Vec<i16> = (0..10).map(|i| i * 100).collect();
        let right: Vec<i16> = (0..10).map(|i| -i * 100).collect();
        PcmBuffer::from_channels(44100, &[left, right], interleaved).unwrap()
    }

    #[test]
    fn test_segment_interleaved_matches_window() {
        let buffer = stereo_i16(true);
        let segment = buffer.segment(3, 7).unwrap();
        assert_eq!(segment.frame_length(), 4);
        assert!(segment.format().interleaved);

        let ChannelData::Int16(channels) = segment.to_channel_data().unwrap() else {
            panic!("expected int16 data");
        };
        assert_eq!(channels[0], vec![300, 400, 500, 600]);
        assert_eq!(channels[1], vec![-300, -400, -500, -600]);
    }

    #[test]
    fn test_segment_planar_matches_window() {
        let buffer = stereo_i16(false);
        let segment = buffer.segment(0, 2).unwrap();
        assert!(!segment.format().interleaved);

        let ChannelData::Int16(channels) = segment.to_channel_data().unwrap() else {
            panic!("expected int16 data");
        };
        assert_eq!(channels[0], vec![0, 100]);
        assert_eq!(channels[1], vec![0, -100]);
    }

    #[test]
    fn test_segment_float_every_window() {
        let samples: Vec<f32> = (0..24).map(|i| i as f32 / 24.0).collect();
        let buffer = PcmBuffer::from_interleaved(48000, 3, &samples).unwrap();
        let all = buffer.to_float_channels().unwrap();

        for start in 0..=8u64 {
            for end in start..=8u64 {
                let segment = buffer.segment(start, end).unwrap();
                assert_eq!(segment.frame_length() as u64, end - start);
                let channels = segment.to_float_channels().unwrap();
                for (channel, values) in channels.iter().enumerate() {
                    assert_eq!(
                        values.as_slice(),
                        &all[channel][start as usize..end as usize]
                    );
                }
            }
        }
    }

    #[test]
    fn test_segment_int32_both_layouts() {
        let left: Vec<i32> = (0..12).map(|i| i * 1_000_000).collect();
        let right: Vec<i32> = (0..12).map(|i| i32::MIN + i).collect();

        for interleaved in [true, false] {
            let buffer =
                PcmBuffer::from_channels(96000, &[left.clone(), right.clone()], interleaved)
                    .unwrap();
            let segment = buffer.segment(5, 9).unwrap();
            assert_eq!(segment.format().interleaved, interleaved);
            assert_eq!(
                segment.to_channel_data().unwrap(),
                ChannelData::Int32(vec![left[5..9].to_vec(), right[5..9].to_vec()])
            );
        }
    }

    #[test]
    fn test_segment_float_planar() {
        let channels: Vec<Vec<f32>> = (0..3)
            .map(|c| (0..8).map(|i| (c * 8 + i) as f32 * 0.01).collect())
            .collect();
        let buffer = PcmBuffer::from_channels(48000, &channels, false).unwrap();

        for (start, end) in [(0u64, 8u64), (2, 6), (7, 8), (3, 3)] {
            let segment = buffer.segment(start, end).unwrap();
            assert!(!segment.format().interleaved);
            let expected: Vec<Vec<f32>> = channels
                .iter()
                .map(|c| c[start as usize..end as usize].to_vec())
                .collect();
            assert_eq!(
                segment.to_channel_data().unwrap(),
                ChannelData::Float32(expected)
            );
        }
    }

    #[test]
    fn test_segment_empty_range() {
        let buffer = stereo_i16(true);
        let segment = buffer.segment(10, 10).unwrap();
        assert!(segment.is_empty());
    }

    #[test]
    fn test_segment_rejects_bad_ranges() {
        let buffer = stereo_i16(false);
        assert!(matches!(
            buffer.segment(5, 4),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(matches!(
            buffer.segment(5, 11),
            Err(AudioError::OutOfRange { length: 10, .. })
        ));
    }

    #[test]
    fn test_segment_does_not_touch_source() {
        let buffer = stereo_i16(true);
        let before = buffer.clone();
        let _ = buffer.segment(2, 5).unwrap();
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_unsupported_formats() {
        let format = PcmFormat::new(44100, 1, SampleFormat::Int24, true);
        let buffer = PcmBuffer::silent(format, 4).unwrap();
        assert!(matches!(
            buffer.to_channel_data(),
            Err(AudioError::UnsupportedFormat(_))
        ));

        let format = PcmFormat::new(44100, 2, SampleFormat::Float64, false);
        let buffer = PcmBuffer::silent(format, 4).unwrap();
        assert!(matches!(
            buffer.to_float_channels(),
            Err(AudioError::UnsupportedFormat(_))
        ));
        // Segmenting works on any storage format
        assert_eq!(buffer.segment(1, 3).unwrap().frame_length(), 2);
    }

    #[test]
    fn test_write_channel_data() {
        let mut buffer = stereo_i16(true);
        buffer
            .write_channel_data(&ChannelData::Int16(vec![vec![1; 10], vec![2; 10]]))
            .unwrap();
        assert_eq!(&buffer.as_bytes()[..4], &[1, 0, 2, 0]);

        let wrong_format = ChannelData::Float32(vec![vec![0.0; 10], vec![0.0; 10]]);
        assert!(matches!(
            buffer.write_channel_data(&wrong_format),
            Err(AudioError::UnsupportedFormat(_))
        ));

        let wrong_shape = ChannelData::Int16(vec![vec![0; 9], vec![0; 9]]);
        assert!(matches!(
            buffer.write_channel_data(&wrong_shape),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_peak_amplitude() {
        let buffer =
            PcmBuffer::from_channels(8000, &[vec![0.1f32, -0.8, 0.3], vec![0.5, 0.2, -0.1]], false)
                .unwrap();
        assert_eq!(buffer.peak_amplitude().unwrap(), 0.8);
    }

    #[test]
    fn test_from_raw_validates_length() {
        let format = PcmFormat::processing(44100, 2);
        assert!(PcmBuffer::from_raw(format, 2, vec![0; 15]).is_err());
        assert!(PcmBuffer::from_raw(format, 2, vec![0; 16]).is_ok());
    }
}
