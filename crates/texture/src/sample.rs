//! Pixel sample types stored in texture blocks.
//!
//! Blocks hold raw bytes; layers interpret them through [`Sample`], which
//! converts each stored channel to a normalized `f32`.

/// Storage format of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 8-bit unsigned, normalized by 1/255
    U8,
    /// 32-bit float, native endian, used as is
    F32,
}

impl SampleFormat {
    /// Bytes per channel
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::F32 => 4,
        }
    }
}

/// A channel type that can be read out of a block and normalized
pub trait Sample: Copy + Send + Sync + 'static {
    /// Bytes per channel
    const BYTES: usize;
    /// Matching runtime format tag
    const FORMAT: SampleFormat;

    /// Decode one channel from the front of `bytes`
    ///
    /// `bytes` holds at least [`Self::BYTES`] bytes.
    fn read(bytes: &[u8]) -> Self;

    /// Normalized float value
    fn to_f32(self) -> f32;
}

impl Sample for u8 {
    const BYTES: usize = 1;
    const FORMAT: SampleFormat = SampleFormat::U8;

    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }
}

impl Sample for f32 {
    const BYTES: usize = 4;
    const FORMAT: SampleFormat = SampleFormat::F32;

    fn read(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        f32::from_ne_bytes(raw)
    }

    fn to_f32(self) -> f32 {
        self
    }
}

/// Read channel `index` (counted in channels, not bytes) as a normalized
/// float, or `None` past the end of the buffer
pub fn read_normalized<T: Sample>(bytes: &[u8], index: usize) -> Option<f32> {
    let start = index.checked_mul(T::BYTES)?;
    let end = start.checked_add(T::BYTES)?;
    bytes.get(start..end).map(|raw| T::read(raw).to_f32())
}

/// Pack floats into the byte layout `f32` blocks use
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}
