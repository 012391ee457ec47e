//! Texture sources backed by image files on disk
//!
//! TIFF gets its own back end because textures rely on what only TIFF
//! carries: several directories per file (pyramid levels, cube faces),
//! tiled storage and the image description tag. Everything else the
//! `image` crate can decode is served as a single untiled directory.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageDecoder, ImageReader};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{TextureError, TextureResult};
use crate::sample::{f32_to_bytes, SampleFormat};
use crate::source::{crop_region, DirectoryInfo, Region, TextureSource};

/// Open `path` with the back end matching its contents
pub fn open_source(path: impl AsRef<Path>) -> TextureResult<Arc<dyn TextureSource>> {
    let path = path.as_ref();
    if is_tiff(path)? {
        Ok(Arc::new(TiffSource::open(path)?))
    } else {
        Ok(Arc::new(ImageFileSource::open(path)?))
    }
}

fn is_tiff(path: &Path) -> TextureResult<bool> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    let n = file.read(&mut magic)?;
    Ok(n == 4 && matches!(&magic, b"II*\0" | b"MM\0*" | b"II+\0" | b"MM\0+"))
}

/// Multi-directory TIFF file
///
/// Directory layouts are read once at open. Every region read reopens the
/// file, so a source can serve several threads without sharing a decoder.
#[derive(Debug)]
pub struct TiffSource {
    path: PathBuf,
    name: String,
    description: Option<String>,
    directories: Vec<DirectoryInfo>,
}

impl TiffSource {
    /// Open a TIFF file and read the layout of every directory
    pub fn open(path: impl AsRef<Path>) -> TextureResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut decoder = Decoder::new(BufReader::new(File::open(&path)?))?;

        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
        let mut directories = vec![directory_info(&mut decoder)?];
        while decoder.more_images() {
            decoder.next_image()?;
            directories.push(directory_info(&mut decoder)?);
        }

        log::debug!(
            "opened {} ({} directories)",
            path.display(),
            directories.len()
        );

        Ok(Self {
            name: path.display().to_string(),
            path,
            description,
            directories,
        })
    }

    fn decoder_at(&self, index: usize) -> TextureResult<Decoder<BufReader<File>>> {
        let mut decoder = Decoder::new(BufReader::new(File::open(&self.path)?))?;
        for _ in 0..index {
            decoder.next_image()?;
        }
        Ok(decoder)
    }
}

fn directory_info<R: Read + std::io::Seek>(decoder: &mut Decoder<R>) -> TextureResult<DirectoryInfo> {
    let (width, height) = decoder.dimensions()?;
    let (samples, bits) = match decoder.colortype()? {
        ColorType::Gray(bits) => (1, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) => (3, bits),
        ColorType::RGBA(bits) | ColorType::CMYK(bits) => (4, bits),
        other => {
            return Err(TextureError::UnsupportedFormat(format!("{other:?}")));
        }
    };
    let format = match bits {
        8 => SampleFormat::U8,
        16 | 32 | 64 => SampleFormat::F32,
        _ => {
            return Err(TextureError::UnsupportedFormat(format!(
                "{bits} bits per sample"
            )));
        }
    };

    let mut info = DirectoryInfo::new(width, height, samples, format);
    if decoder.find_tag(Tag::TileWidth)?.is_some() {
        let (tile_width, tile_height) = decoder.chunk_dimensions();
        info = info.with_tiles(tile_width, tile_height);
    }
    Ok(info)
}

/// Convert decoded samples into the block byte layout of `format`
fn decoded_bytes(result: DecodingResult, format: SampleFormat) -> TextureResult<Vec<u8>> {
    let floats: Vec<f32> = match (result, format) {
        (DecodingResult::U8(data), SampleFormat::U8) => return Ok(data),
        (DecodingResult::U8(data), SampleFormat::F32) => {
            data.into_iter().map(|v| v as f32 / 255.0).collect()
        }
        (DecodingResult::U16(data), _) => data.into_iter().map(|v| v as f32 / 65535.0).collect(),
        (DecodingResult::U32(data), _) => {
            data.into_iter().map(|v| v as f32 / u32::MAX as f32).collect()
        }
        (DecodingResult::F32(data), _) => data,
        (DecodingResult::F64(data), _) => data.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(TextureError::UnsupportedFormat(
                "signed or 64-bit integer samples".to_string(),
            ));
        }
    };
    if format == SampleFormat::U8 {
        return Err(TextureError::UnsupportedFormat(
            "wide samples in an 8-bit directory".to_string(),
        ));
    }
    Ok(f32_to_bytes(&floats))
}

impl TextureSource for TiffSource {
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
            .copied()
            .ok_or(TextureError::MissingDirectory {
                index,
                count: self.directories.len(),
            })
    }

    fn read_region(&self, index: usize, region: Region) -> TextureResult<Vec<u8>> {
        let info = self.directory(index)?;
        let mut decoder = self.decoder_at(index)?;

        if info.is_full(region) {
            let data = decoded_bytes(decoder.read_image()?, info.format)?;
            return Ok(crop_region(&data, &info, region));
        }

        match info.tile {
            Some((tile_width, tile_height)) => {
                info.check_tile_region(region)?;
                let across = info.width.div_ceil(tile_width);
                let chunk = (region.y / tile_height) * across + region.x / tile_width;
                let (data_width, data_height) = decoder.chunk_data_dimensions(chunk);
                let data = decoded_bytes(decoder.read_chunk(chunk)?, info.format)?;

                // Edge tiles may decode smaller than a full tile
                let chunk_info = DirectoryInfo::new(data_width, data_height, info.samples, info.format);
                Ok(crop_region(
                    &data,
                    &chunk_info,
                    Region::full(tile_width, tile_height),
                ))
            }
            None => {
                let data = decoded_bytes(decoder.read_image()?, info.format)?;
                Ok(crop_region(&data, &info, region))
            }
        }
    }
}

/// Any single image the `image` crate can decode
///
/// The header is read at open; pixels are decoded again on every region
/// read so an evicted block reloads from disk.
#[derive(Debug)]
pub struct ImageFileSource {
    path: PathBuf,
    name: String,
    info: DirectoryInfo,
}

impl ImageFileSource {
    /// Read the header of an image file
    pub fn open(path: impl AsRef<Path>) -> TextureResult<Self> {
        let path = path.as_ref().to_path_buf();
        let decoder = ImageReader::open(&path)?
            .with_guessed_format()?
            .into_decoder()?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();

        let (samples, format) = match color {
            image::ColorType::L8 => (1, SampleFormat::U8),
            image::ColorType::La8 => (2, SampleFormat::U8),
            image::ColorType::Rgb8 => (3, SampleFormat::U8),
            image::ColorType::Rgba8 => (4, SampleFormat::U8),
            other if other.has_alpha() => (4, SampleFormat::F32),
            _ => (3, SampleFormat::F32),
        };

        Ok(Self {
            name: path.display().to_string(),
            path,
            info: DirectoryInfo::new(width, height, samples, format),
        })
    }

    fn decode(&self) -> TextureResult<Vec<u8>> {
        let image: DynamicImage = ImageReader::open(&self.path)?
            .with_guessed_format()?
            .decode()?;
        let data = match (self.info.samples, self.info.format) {
            (1, SampleFormat::U8) => image.into_luma8().into_raw(),
            (2, SampleFormat::U8) => image.into_luma_alpha8().into_raw(),
            (3, SampleFormat::U8) => image.into_rgb8().into_raw(),
            (4, SampleFormat::U8) => image.into_rgba8().into_raw(),
            (4, SampleFormat::F32) => f32_to_bytes(&image.into_rgba32f().into_raw()),
            _ => f32_to_bytes(&image.into_rgb32f().into_raw()),
        };
        Ok(data)
    }
}

impl TextureSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        None
    }

    fn directory_count(&self) -> usize {
        1
    }

    fn directory(&self, index: usize) -> TextureResult<DirectoryInfo> {
        if index == 0 {
            Ok(self.info)
        } else {
            Err(TextureError::MissingDirectory { index, count: 1 })
        }
    }

    fn read_region(&self, index: usize, region: Region) -> TextureResult<Vec<u8>> {
        let info = self.directory(index)?;
        let data = self.decode()?;
        Ok(crop_region(&data, &info, region))
    }
}
