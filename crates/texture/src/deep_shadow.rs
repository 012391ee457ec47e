//! Deep shadow maps
//!
//! Each pixel stores a transmittance function: a run of `(z, r, g, b)`
//! entries with increasing depth, opening at `z = -inf` and closing at
//! `z = +inf`. Transmittance is linear between entries. Pixels are grouped
//! into square tiles, each tile stored contiguously so it can be paged in
//! through the texture cache as one block.
//!
//! File layout, all little-endian:
//!
//! ```text
//! "DSM1"
//! u32 xres, yres, x_tiles, y_tiles, tile_size, tile_shift
//! f32 x 16        world to NDC matrix
//! u32 x tiles     absolute end offset of each tile, row-major
//! tile data       per tile, tile_size^2 runs in row-major pixel order
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::block::BlockId;
use crate::cache::TextureCache;
use crate::error::{TextureError, TextureResult};
use crate::math::{add, lerp, mul_matrix, scale, transform_point, Color, Matrix, Vec3, BLACK};
use crate::options::LookupOptions;
use crate::sampler::SampleSource;
use crate::texture::filtered;

const MAGIC: &[u8; 4] = b"DSM1";
const HEADER_BYTES: u64 = 4 + 6 * 4 + 16 * 4;
const ENTRY_BYTES: usize = 16;

/// One point of a transmittance function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeepSample {
    pub depth: f32,
    pub transmittance: Color,
}

impl DeepSample {
    pub fn new(depth: f32, transmittance: Color) -> Self {
        Self {
            depth,
            transmittance,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Header {
    xres: u32,
    yres: u32,
    x_tiles: u32,
    y_tiles: u32,
    tile_size: u32,
    tile_shift: u32,
    world_to_ndc: Matrix,
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32<R: Read>(reader: &mut R) -> io::Result<f32> {
    read_u32(reader).map(f32::from_bits)
}

impl Header {
    fn parse<R: Read>(reader: &mut R) -> TextureResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(TextureError::BadDeepShadow("bad magic".into()));
        }

        let xres = read_u32(reader)?;
        let yres = read_u32(reader)?;
        let x_tiles = read_u32(reader)?;
        let y_tiles = read_u32(reader)?;
        let tile_size = read_u32(reader)?;
        let tile_shift = read_u32(reader)?;
        let mut world_to_ndc = [0.0; 16];
        for value in &mut world_to_ndc {
            *value = read_f32(reader)?;
        }

        if tile_shift >= 16 || tile_size != 1 << tile_shift {
            return Err(TextureError::BadDeepShadow(format!(
                "tile size {tile_size} does not match shift {tile_shift}"
            )));
        }
        if xres == 0
            || yres == 0
            || x_tiles != xres.div_ceil(tile_size)
            || y_tiles != yres.div_ceil(tile_size)
        {
            return Err(TextureError::BadDeepShadow(format!(
                "{x_tiles}x{y_tiles} tiles cannot cover {xres}x{yres} pixels"
            )));
        }

        Ok(Self {
            xres,
            yres,
            x_tiles,
            y_tiles,
            tile_size,
            tile_shift,
            world_to_ndc,
        })
    }

    fn tile_pixels(&self) -> usize {
        (self.tile_size as usize).pow(2)
    }

    fn tile_count(&self) -> usize {
        self.x_tiles as usize * self.y_tiles as usize
    }

    fn data_start(&self) -> u64 {
        HEADER_BYTES.saturating_add((self.tile_count() as u64).saturating_mul(4))
    }

    /// Smallest valid tile: every pixel run holds at least its two sentinels
    fn min_tile_bytes(&self) -> u64 {
        self.tile_pixels() as u64 * 2 * ENTRY_BYTES as u64
    }
}

/// Where tile bytes are read from
#[derive(Debug)]
enum Backing {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl Backing {
    fn read_range(&self, start: u64, len: usize) -> TextureResult<Vec<u8>> {
        match self {
            Backing::File(path) => {
                let mut file = File::open(path)?;
                file.seek(SeekFrom::Start(start))?;
                let mut buffer = vec![0u8; len];
                file.read_exact(&mut buffer)?;
                Ok(buffer)
            }
            Backing::Memory(bytes) => {
                let start = start as usize;
                bytes
                    .get(start..start + len)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| TextureError::BadDeepShadow("tile past end of data".into()))
            }
        }
    }
}

#[derive(Debug)]
struct DeepTile {
    block: BlockId,
    start: u64,
    len: usize,
    /// First entry of every pixel run, then the total entry count;
    /// `None` once the tile is known to be malformed
    runs: OnceLock<Option<Vec<u32>>>,
    /// Per-pixel entry last used, relative to the run start
    cursors: Vec<AtomicU32>,
}

fn entry(data: &[u8], index: usize) -> Option<[f32; 4]> {
    let bytes = data.get(index * ENTRY_BYTES..(index + 1) * ENTRY_BYTES)?;
    let mut out = [0.0; 4];
    for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(out)
}

/// Run starts for a tile, or `None` if the tile does not hold exactly
/// `pixels` runs
fn scan_runs(data: &[u8], pixels: usize) -> Option<Vec<u32>> {
    let entries = data.len() / ENTRY_BYTES;
    let mut runs = Vec::with_capacity(pixels + 1);
    for index in 0..entries {
        if entry(data, index)?[0] == f32::NEG_INFINITY {
            runs.push(index as u32);
        }
    }
    if runs.len() != pixels || runs.first() != Some(&0) {
        return None;
    }
    runs.push(entries as u32);
    Some(runs)
}

/// A deep shadow map paged through a [`TextureCache`]
#[derive(Debug)]
pub struct DeepShadowMap {
    name: String,
    header: Header,
    to_ndc: Matrix,
    backing: Backing,
    tiles: Vec<DeepTile>,
    cache: TextureCache,
}

impl DeepShadowMap {
    /// Open a map file; only the header and tile table are read here
    ///
    /// `to_world` maps lookup positions into the world space the map was
    /// rendered in.
    pub fn open(
        cache: &TextureCache,
        path: impl AsRef<Path>,
        to_world: &Matrix,
    ) -> TextureResult<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let length = reader.get_ref().metadata()?.len();
        Self::build(
            cache,
            path.display().to_string(),
            &mut reader,
            length,
            Backing::File(path.to_path_buf()),
            to_world,
        )
    }

    /// Map held entirely in memory
    pub fn from_bytes(
        cache: &TextureCache,
        name: impl Into<String>,
        bytes: Vec<u8>,
        to_world: &Matrix,
    ) -> TextureResult<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let length = bytes.len() as u64;
        let mut reader = io::Cursor::new(Arc::clone(&bytes));
        Self::build(
            cache,
            name.into(),
            &mut reader,
            length,
            Backing::Memory(bytes),
            to_world,
        )
    }

    fn build<R: Read>(
        cache: &TextureCache,
        name: String,
        reader: &mut R,
        length: u64,
        backing: Backing,
        to_world: &Matrix,
    ) -> TextureResult<Self> {
        let header = Header::parse(reader)?;
        let pixels = header.tile_pixels();

        let mut start = header.data_start();
        if start > length {
            return Err(TextureError::BadDeepShadow(format!(
                "{} tile offsets do not fit in a {length} byte file",
                header.tile_count()
            )));
        }

        let min_len = header.min_tile_bytes();
        let mut spans = Vec::with_capacity(header.tile_count());
        for index in 0..header.tile_count() {
            let end = u64::from(read_u32(reader)?);
            if end < start
                || end > length
                || end - start < min_len
                || (end - start) % ENTRY_BYTES as u64 != 0
            {
                return Err(TextureError::BadDeepShadow(format!(
                    "tile {index} spans {start}..{end} in a {length} byte file"
                )));
            }
            spans.push((start, (end - start) as usize));
            start = end;
        }

        let tiles: Vec<DeepTile> = spans
            .into_iter()
            .map(|(start, len)| DeepTile {
                block: cache.new_block(len),
                start,
                len,
                runs: OnceLock::new(),
                cursors: (0..pixels).map(|_| AtomicU32::new(0)).collect(),
            })
            .collect();

        log::debug!(
            "opened deep shadow map {} ({}x{}, {} tiles)",
            name,
            header.xres,
            header.yres,
            tiles.len()
        );

        Ok(Self {
            name,
            to_ndc: mul_matrix(to_world, &header.world_to_ndc),
            header,
            backing,
            tiles,
            cache: cache.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.header.xres
    }

    pub fn height(&self) -> u32 {
        self.header.yres
    }

    pub fn tile_size(&self) -> u32 {
        self.header.tile_size
    }

    /// Lookup space to NDC
    pub fn to_ndc(&self) -> &Matrix {
        &self.to_ndc
    }

    /// Transmittance at NDC position `(s, t)` and depth `w`
    ///
    /// `None` outside `[0, 1)` or when the tile cannot be read.
    pub fn transmittance(&self, s: f32, t: f32, w: f32) -> Option<Color> {
        if !(0.0..1.0).contains(&s) || !(0.0..1.0).contains(&t) {
            return None;
        }
        let header = &self.header;
        let px = ((s * header.xres as f32).floor() as u32).min(header.xres - 1);
        let py = ((t * header.yres as f32).floor() as u32).min(header.yres - 1);
        let shift = header.tile_shift;
        let mask = header.tile_size - 1;
        let tile_index = ((py >> shift) * header.x_tiles + (px >> shift)) as usize;
        let pixel = (((py & mask) << shift) + (px & mask)) as usize;

        let tile = self.tiles.get(tile_index)?;
        let data = self.cache.fetch(tile.block, || {
            self.backing.read_range(tile.start, tile.len)
        })?;

        let runs = tile
            .runs
            .get_or_init(|| {
                let runs = scan_runs(&data, header.tile_pixels());
                if runs.is_none() {
                    log::error!(
                        "deep shadow map {}: tile {} has malformed pixel runs",
                        self.name,
                        tile_index
                    );
                }
                runs
            })
            .as_ref()?;

        let (first, end) = (runs[pixel] as usize, runs[pixel + 1] as usize);
        if end < first + 2 {
            return None;
        }

        let cursor = &tile.cursors[pixel];
        let mut i = first + (cursor.load(Ordering::Relaxed) as usize).min(end - first - 2);
        let (mut lo, mut hi) = (entry(&data, i)?, entry(&data, i + 1)?);
        loop {
            if lo[0] > w && i > first {
                i -= 1;
                hi = lo;
                lo = entry(&data, i)?;
            } else if hi[0] < w && i + 2 < end {
                i += 1;
                lo = hi;
                hi = entry(&data, i + 1)?;
            } else {
                break;
            }
        }
        cursor.store((i - first) as u32, Ordering::Relaxed);

        let span = hi[0] - lo[0];
        let alpha = if span.is_finite() && span > 0.0 {
            ((w - lo[0]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some(lerp(
            [lo[1], lo[2], lo[3]],
            [hi[1], hi[2], hi[3]],
            alpha,
        ))
    }

    /// Filtered occlusion around `d` with footprint `du`, `dv`
    ///
    /// Positions off the map count as unoccluded.
    pub fn lookup<S>(
        &self,
        sampler: &mut S,
        d: Vec3,
        du: Vec3,
        dv: Vec3,
        options: &LookupOptions,
    ) -> Color
    where
        S: SampleSource + ?Sized,
    {
        filtered(sampler, options, |u, v| {
            let (x, y) = (u - 0.5, v - 0.5);
            let p = add(add(d, scale(du, x)), scale(dv, y));
            let [s, t, z] = transform_point(&self.to_ndc, p);
            let transmittance = self
                .transmittance(s, t, z - options.shadow_bias)
                .unwrap_or([1.0; 3]);
            Some(transmittance.map(|c| 1.0 - c))
        })
        .unwrap_or(BLACK)
    }
}

impl Drop for DeepShadowMap {
    fn drop(&mut self) {
        for tile in &self.tiles {
            self.cache.release(tile.block);
        }
    }
}

/// Builds deep shadow map files
///
/// Pixels start fully transparent. Runs get their `-inf` and `+inf`
/// sentinels on write.
#[derive(Debug, Clone)]
pub struct DeepShadowWriter {
    xres: u32,
    yres: u32,
    tile_size: u32,
    world_to_ndc: Matrix,
    pixels: Vec<Vec<DeepSample>>,
}

impl DeepShadowWriter {
    /// # Errors
    /// Returns [`TextureError::BadTileSize`] unless `tile_size` is a power
    /// of two.
    pub fn new(xres: u32, yres: u32, tile_size: u32) -> TextureResult<Self> {
        if !tile_size.is_power_of_two() || tile_size > 1 << 15 {
            return Err(TextureError::BadTileSize(tile_size));
        }
        Ok(Self {
            xres: xres.max(1),
            yres: yres.max(1),
            tile_size,
            world_to_ndc: crate::math::IDENTITY,
            pixels: vec![Vec::new(); xres.max(1) as usize * yres.max(1) as usize],
        })
    }

    pub fn with_world_to_ndc(mut self, matrix: Matrix) -> Self {
        self.world_to_ndc = matrix;
        self
    }

    /// Set the transmittance function of pixel `(x, y)`; samples are sorted
    /// by depth. Out of range pixels are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, samples: &[DeepSample]) {
        if x >= self.xres || y >= self.yres {
            log::warn!("deep shadow pixel ({x}, {y}) outside {}x{}", self.xres, self.yres);
            return;
        }
        let mut run = samples.to_vec();
        run.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        self.pixels[(y * self.xres + x) as usize] = run;
    }

    fn run(&self, x: u32, y: u32) -> Vec<DeepSample> {
        let samples: &[DeepSample] = if x < self.xres && y < self.yres {
            &self.pixels[(y * self.xres + x) as usize]
        } else {
            &[]
        };
        let last = samples.last().map_or([1.0; 3], |s| s.transmittance);

        let mut run = Vec::with_capacity(samples.len() + 2);
        run.push(DeepSample::new(f32::NEG_INFINITY, [1.0; 3]));
        run.extend(samples.iter().filter(|s| s.depth.is_finite()));
        run.push(DeepSample::new(f32::INFINITY, last));
        run
    }

    /// Serialize to `out`
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let shift = self.tile_size.trailing_zeros();
        let x_tiles = self.xres.div_ceil(self.tile_size);
        let y_tiles = self.yres.div_ceil(self.tile_size);

        let mut tiles = Vec::with_capacity((x_tiles * y_tiles) as usize);
        for ty in 0..y_tiles {
            for tx in 0..x_tiles {
                let mut bytes = Vec::new();
                for y in 0..self.tile_size {
                    for x in 0..self.tile_size {
                        let run = self.run((tx << shift) + x, (ty << shift) + y);
                        for sample in run {
                            bytes.extend_from_slice(&sample.depth.to_le_bytes());
                            for c in sample.transmittance {
                                bytes.extend_from_slice(&c.to_le_bytes());
                            }
                        }
                    }
                }
                tiles.push(bytes);
            }
        }

        out.write_all(MAGIC)?;
        for value in [self.xres, self.yres, x_tiles, y_tiles, self.tile_size, shift] {
            out.write_all(&value.to_le_bytes())?;
        }
        for value in self.world_to_ndc {
            out.write_all(&value.to_le_bytes())?;
        }

        let mut end = HEADER_BYTES + 4 * tiles.len() as u64;
        for tile in &tiles {
            end += tile.len() as u64;
            let end = u32::try_from(end)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "deep shadow map too large"))?;
            out.write_all(&end.to_le_bytes())?;
        }
        for tile in &tiles {
            out.write_all(tile)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing to a Vec cannot fail short of the size check
        if let Err(e) = self.write(&mut bytes) {
            log::error!("failed to serialize deep shadow map: {e}");
            bytes.clear();
        }
        bytes
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> TextureResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }
}
