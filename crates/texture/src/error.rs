//! Error types for texture loading and decoding.
//!
//! Lookups never surface these: a failed read degrades to a zero-filled
//! block and a log line. They are returned from constructors, loaders and
//! decode back ends so callers can decide how loudly to fail.

use crate::source::Region;

/// Errors raised while locating, decoding or assembling textures.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    /// The file could not be found on any search path
    #[error("could not locate texture file \"{0}\"")]
    NotFound(String),

    /// I/O error while reading a texture file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TIFF codec rejected the file
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// The generic image codec rejected the file
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Pixel layout the cache cannot represent
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Directory index past the end of the file
    #[error("directory {index} out of range ({count} available)")]
    MissingDirectory { index: usize, count: usize },

    /// A partial read on a tiled directory that does not cover exactly one tile
    #[error("region {region:?} is not aligned to {tile_width}x{tile_height} tiles")]
    MisalignedRegion {
        region: Region,
        tile_width: u32,
        tile_height: u32,
    },

    /// Wrap mode string other than periodic, clamp or black
    #[error("unknown texture wrap mode \"{0}\"")]
    UnknownWrapMode(String),

    /// Metadata string embedded in the file could not be parsed
    #[error("malformed texture description: {0}")]
    BadDescription(String),

    /// Deep shadow file with a bad header or truncated tile table
    #[error("malformed deep shadow map: {0}")]
    BadDeepShadow(String),

    /// File decoded fine but carries no environment or shadow metadata
    #[error("\"{0}\" is not an environment or shadow map")]
    NotAnEnvironment(String),

    /// Pyramid constructed without any layers
    #[error("texture pyramid has no levels")]
    EmptyPyramid,

    /// Tiled layer with a tile size that is not a power of two
    #[error("tile size {0} is not a power of two")]
    BadTileSize(u32),
}

/// Result type for texture operations
pub type TextureResult<T> = Result<T, TextureError>;
