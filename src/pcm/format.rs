//! PCM sample formats and the typed sample trait

/// Sample representation of raw PCM storage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Int16,
    /// Packed 3-byte integers (storage only, no channel-data access)
    Int24,
    Int32,
    Float32,
    /// Storage only, no channel-data access
    Float64,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Int32 | SampleFormat::Float32 => 4,
            SampleFormat::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::Float32 | SampleFormat::Float64)
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::Int16 => "int16",
            SampleFormat::Int24 => "int24",
            SampleFormat::Int32 => "int32",
            SampleFormat::Float32 => "float32",
            SampleFormat::Float64 => "float64",
        }
    }
}

/// Layout and encoding of a PCM buffer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Frame-major storage when true, one contiguous plane per channel otherwise
    pub interleaved: bool,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat, interleaved: bool) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
            interleaved,
        }
    }

    /// Non-interleaved 32-bit float, the format sources hand to the RMS engine
    pub fn processing(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleFormat::Float32, false)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

/// A sample type with direct channel-data access
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const FORMAT: SampleFormat;

    /// Decode from little-endian bytes (`bytes.len() == FORMAT.bytes_per_sample()`)
    fn read_le(bytes: &[u8]) -> Self;

    /// Encode into little-endian bytes
    fn write_le(self, out: &mut [u8]);

    /// Scale to a float in [-1, 1)
    fn to_f32(self) -> f32;
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Int16;

    fn read_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn to_f32(self) -> f32 {
        self as f32 / 32_768.0
    }
}

impl Sample for i32 {
    const FORMAT: SampleFormat = SampleFormat::Int32;

    fn read_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn to_f32(self) -> f32 {
        (self as f64 / 2_147_483_648.0) as f32
    }
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float32;

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }

    fn to_f32(self) -> f32 {
        self
    }
}
