//! Decode back ends that feed pixel data into the cache
//!
//! A [`TextureSource`] describes the directories (resolution levels, cube
//! faces, ...) of one image and reads rectangular regions of raw samples
//! out of them. The cache calls it on every miss, so a region that was
//! evicted is simply read again.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{TextureError, TextureResult};
use crate::sample::SampleFormat;

/// Rectangle of pixels inside one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Create a region
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole of a `width` x `height` image
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Layout of one directory of an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channels per pixel
    pub samples: u32,
    /// Channel storage format
    pub format: SampleFormat,
    /// Tile width and height, if the directory is stored in tiles
    pub tile: Option<(u32, u32)>,
}

impl DirectoryInfo {
    /// Untiled directory
    pub fn new(width: u32, height: u32, samples: u32, format: SampleFormat) -> Self {
        Self {
            width,
            height,
            samples,
            format,
            tile: None,
        }
    }

    /// Same directory stored in `width` x `height` tiles
    pub fn with_tiles(mut self, width: u32, height: u32) -> Self {
        self.tile = Some((width, height));
        self
    }

    /// Bytes per pixel
    pub fn pixel_bytes(&self) -> usize {
        self.samples as usize * self.format.bytes()
    }

    /// Bytes needed for `region`
    pub fn region_bytes(&self, region: Region) -> usize {
        region.width as usize * region.height as usize * self.pixel_bytes()
    }

    /// Whether `region` covers the whole directory
    pub fn is_full(&self, region: Region) -> bool {
        region == Region::full(self.width, self.height)
    }

    /// Check that a partial read on a tiled directory is exactly one tile
    pub fn check_tile_region(&self, region: Region) -> TextureResult<()> {
        let Some((tile_width, tile_height)) = self.tile else {
            return Ok(());
        };
        if self.is_full(region) {
            return Ok(());
        }
        let aligned = region.width == tile_width
            && region.height == tile_height
            && region.x % tile_width == 0
            && region.y % tile_height == 0;
        if aligned {
            Ok(())
        } else {
            Err(TextureError::MisalignedRegion {
                region,
                tile_width,
                tile_height,
            })
        }
    }
}

/// Image decode back end
///
/// Implementations must be safe to call from several render threads at
/// once; reads happen outside the cache lock.
pub trait TextureSource: Send + Sync + fmt::Debug {
    /// Name used in log messages, usually the file path
    fn name(&self) -> &str;

    /// Metadata string stored with the image (pyramid, environment or
    /// shadow description), if any
    fn description(&self) -> Option<&str>;

    /// Number of directories in the image
    fn directory_count(&self) -> usize;

    /// Layout of directory `index`
    fn directory(&self, index: usize) -> TextureResult<DirectoryInfo>;

    /// Read the raw samples of `region` in directory `index`
    ///
    /// The result is row-major, `region.width * pixel_bytes` per row. Pixels
    /// outside the image are zero.
    fn read_region(&self, index: usize, region: Region) -> TextureResult<Vec<u8>>;
}

/// Copy `region` out of a full row-major image, zero padding anything that
/// falls outside it
pub fn crop_region(image: &[u8], info: &DirectoryInfo, region: Region) -> Vec<u8> {
    let pixel = info.pixel_bytes();
    let mut out = vec![0u8; info.region_bytes(region)];
    let row_bytes = region.width as usize * pixel;

    for row in 0..region.height {
        let y = region.y + row;
        if y >= info.height || region.x >= info.width {
            break;
        }
        let columns = (info.width - region.x).min(region.width) as usize;
        let src = (y as usize * info.width as usize + region.x as usize) * pixel;
        let dst = row as usize * row_bytes;
        let len = columns * pixel;
        if let Some(src) = image.get(src..src + len) {
            out[dst..dst + len].copy_from_slice(src);
        }
    }

    out
}

/// Source whose directories live in memory
///
/// Used for procedural textures and wherever a file is not wanted. Tiled
/// directories enforce tile-aligned reads like a tiled file would.
pub struct MemorySource {
    name: String,
    description: Option<String>,
    directories: Vec<(DirectoryInfo, Vec<u8>)>,
    reads: AtomicUsize,
}

impl MemorySource {
    /// Create an empty source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            directories: Vec::new(),
            reads: AtomicUsize::new(0),
        }
    }

    /// Attach a description string
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a directory holding the full row-major image in `data`
    ///
    /// Short data is zero padded to the size the layout needs.
    pub fn with_directory(mut self, info: DirectoryInfo, mut data: Vec<u8>) -> Self {
        data.resize(info.region_bytes(Region::full(info.width, info.height)), 0);
        self.directories.push((info, data));
        self
    }

    /// Append an 8-bit directory
    pub fn with_u8_directory(self, width: u32, height: u32, samples: u32, data: Vec<u8>) -> Self {
        self.with_directory(
            DirectoryInfo::new(width, height, samples, SampleFormat::U8),
            data,
        )
    }

    /// Append a float directory
    pub fn with_f32_directory(
        self,
        width: u32,
        height: u32,
        samples: u32,
        data: &[f32],
    ) -> Self {
        self.with_directory(
            DirectoryInfo::new(width, height, samples, SampleFormat::F32),
            crate::sample::f32_to_bytes(data),
        )
    }

    /// Number of `read_region` calls served so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("directories", &self.directories.len())
            .finish()
    }
}

impl TextureSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn directory_count(&self) -> usize {
        self.directories.len()
    }

    fn directory(&self, index: usize) -> TextureResult<DirectoryInfo> {
        self.directories
            .get(index)
            .map(|(info, _)| *info)
            .ok_or(TextureError::MissingDirectory {
                index,
                count: self.directories.len(),
            })
    }

    fn read_region(&self, index: usize, region: Region) -> TextureResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let (info, data) = self
            .directories
            .get(index)
            .ok_or(TextureError::MissingDirectory {
                index,
                count: self.directories.len(),
            })?;
        info.check_tile_region(region)?;
        Ok(crop_region(data, info, region))
    }
}
