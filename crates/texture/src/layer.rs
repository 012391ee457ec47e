//! One resolution level of a texture file
//!
//! A layer is either basic, with the whole level in one block, or tiled,
//! with one block per tile so only the tiles a render touches are ever
//! decoded. Both kinds answer the same 2x2 neighbourhood query; filtering
//! and wrap modes live one level up in [`crate::Texture`].

use std::sync::Arc;

use crate::block::BlockId;
use crate::cache::TextureCache;
use crate::error::{TextureError, TextureResult};
use crate::math::Color;
use crate::sample::{read_normalized, Sample, SampleFormat};
use crate::source::{DirectoryInfo, Region, TextureSource};

/// Depth returned by [`TextureLayer::lookupz`] outside the valid image area
pub const DEPTH_INFINITY: f32 = 1e30;

/// Where a layer's pixels come from and how they are laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// Source name, for log messages
    pub name: String,
    /// Directory index in the source
    pub directory: usize,
    /// Logical size in pixels
    pub width: u32,
    pub height: u32,
    /// Channels per pixel
    pub samples: u32,
    pub format: SampleFormat,
    /// Stored size; rows in a basic layer are `file_width` pixels apart
    pub file_width: u32,
    pub file_height: u32,
}

impl LayerInfo {
    /// Layer covering a whole directory
    pub fn from_directory(name: impl Into<String>, directory: usize, info: &DirectoryInfo) -> Self {
        Self {
            name: name.into(),
            directory,
            width: info.width,
            height: info.height,
            samples: info.samples,
            format: info.format,
            file_width: info.width,
            file_height: info.height,
        }
    }

    fn pixel_bytes(&self) -> usize {
        self.samples as usize * self.format.bytes()
    }
}

#[derive(Debug, Clone, Copy)]
struct Tiling {
    x_tiles: u32,
    shift: u32,
}

/// One resolution level backed by cache blocks
///
/// Dropping the layer returns its blocks to the cache.
#[derive(Debug)]
pub struct TextureLayer {
    info: LayerInfo,
    cache: TextureCache,
    source: Arc<dyn TextureSource>,
    blocks: Vec<BlockId>,
    tiling: Option<Tiling>,
}

impl TextureLayer {
    /// Layer held in a single block
    pub fn basic(cache: &TextureCache, source: Arc<dyn TextureSource>, info: LayerInfo) -> Self {
        let size = info.file_width as usize * info.file_height as usize * info.pixel_bytes();
        let block = cache.new_block(size);
        Self {
            info,
            cache: cache.clone(),
            source,
            blocks: vec![block],
            tiling: None,
        }
    }

    /// Layer split into square tiles of `tile_size` pixels, loaded on demand
    ///
    /// # Errors
    /// Returns [`TextureError::BadTileSize`] unless `tile_size` is a power
    /// of two.
    pub fn tiled(
        cache: &TextureCache,
        source: Arc<dyn TextureSource>,
        info: LayerInfo,
        tile_size: u32,
    ) -> TextureResult<Self> {
        if !tile_size.is_power_of_two() {
            return Err(TextureError::BadTileSize(tile_size));
        }

        let shift = tile_size.trailing_zeros();
        let x_tiles = info.width.div_ceil(tile_size).max(1);
        let y_tiles = info.height.div_ceil(tile_size).max(1);
        let tile_bytes = (tile_size as usize).pow(2) * info.pixel_bytes();
        let blocks = (0..x_tiles * y_tiles)
            .map(|_| cache.new_block(tile_bytes))
            .collect();

        Ok(Self {
            info,
            cache: cache.clone(),
            source,
            blocks,
            tiling: Some(Tiling { x_tiles, shift }),
        })
    }

    pub fn info(&self) -> &LayerInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn is_tiled(&self) -> bool {
        self.tiling.is_some()
    }

    /// Blocks owned by this layer, one per tile in row-major order
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Block and channel offset holding pixel `(x, y)`
    fn locate(&self, x: u32, y: u32, channel: u32) -> (usize, Region, usize) {
        let samples = self.info.samples as usize;
        match self.tiling {
            Some(Tiling { x_tiles, shift }) => {
                let mask = (1u32 << shift) - 1;
                let (tx, ty) = (x >> shift, y >> shift);
                let tile = 1u32 << shift;
                let region = Region::new(tx << shift, ty << shift, tile, tile);
                let offset = ((((y & mask) << shift) + (x & mask)) as usize) * samples
                    + channel as usize;
                ((ty * x_tiles + tx) as usize, region, offset)
            }
            None => {
                let region = Region::full(self.info.file_width, self.info.file_height);
                let offset = (y as usize * self.info.file_width as usize + x as usize) * samples
                    + channel as usize;
                (0, region, offset)
            }
        }
    }

    /// The 2x2 neighbourhood at `(x, y)`: `(x, y)`, `(x+1, y)`, `(x, y+1)`,
    /// `(x+1, y+1)`, wrapping at the image edges
    ///
    /// Each texel holds up to three channels starting at `channel`; missing
    /// channels take the matching `fill` component.
    pub fn lookup_pixel(&self, x: i64, y: i64, channel: u32, fill: Color) -> [Color; 4] {
        match self.info.format {
            SampleFormat::U8 => self.neighbourhood::<u8>(x, y, channel, fill),
            SampleFormat::F32 => self.neighbourhood::<f32>(x, y, channel, fill),
        }
    }

    fn neighbourhood<T: Sample>(&self, x: i64, y: i64, channel: u32, fill: Color) -> [Color; 4] {
        let width = i64::from(self.info.width.max(1));
        let height = i64::from(self.info.height.max(1));
        let x0 = x.rem_euclid(width);
        let y0 = y.rem_euclid(height);
        let x1 = (x0 + 1) % width;
        let y1 = (y0 + 1) % height;

        let count = self.info.samples.saturating_sub(channel).min(3) as usize;
        let mut fetched: Vec<(usize, Arc<[u8]>)> = Vec::with_capacity(4);
        let mut out = [fill; 4];

        for (texel, (px, py)) in out.iter_mut().zip([(x0, y0), (x1, y0), (x0, y1), (x1, y1)]) {
            if count == 0 {
                continue;
            }
            let (block, region, offset) = self.locate(px as u32, py as u32, channel);
            let data = match fetched.iter().find(|(b, _)| *b == block) {
                Some((_, data)) => Arc::clone(data),
                None => {
                    let Some(data) = self.fetch_block(block, region) else {
                        continue;
                    };
                    fetched.push((block, Arc::clone(&data)));
                    data
                }
            };
            for (j, value) in texel.iter_mut().take(count).enumerate() {
                if let Some(v) = read_normalized::<T>(&data, offset + j) {
                    *value = v;
                }
            }
        }

        out
    }

    fn fetch_block(&self, block: usize, region: Region) -> Option<Arc<[u8]>> {
        let id = *self.blocks.get(block)?;
        let directory = self.info.directory;
        self.cache
            .fetch(id, || self.source.read_region(directory, region))
    }

    /// Bilinear point lookup at `(x, y)` in `[0, 1]`
    pub fn lookup(&self, x: f32, y: f32, channel: u32, fill: Color) -> Color {
        let x = x * self.info.width as f32;
        let y = y * self.info.height as f32;
        let xf = x.floor();
        let yf = y.floor();
        let dx = x - xf;
        let dy = y - yf;

        let texels = self.lookup_pixel(xf as i64, yf as i64, channel, fill);
        let weights = [
            (1.0 - dx) * (1.0 - dy),
            dx * (1.0 - dy),
            (1.0 - dx) * dy,
            dx * dy,
        ];

        let mut out = [0.0; 3];
        for (texel, weight) in texels.iter().zip(weights) {
            if weight == 0.0 {
                continue;
            }
            for (o, v) in out.iter_mut().zip(texel) {
                *o += v * weight;
            }
        }
        out
    }

    /// Conservative depth at `(x, y)` in `[0, 1]`: the largest of the four
    /// pixel centres around the point
    ///
    /// Returns [`DEPTH_INFINITY`] where the neighbourhood would leave the
    /// image; depth never wraps.
    pub fn lookupz(&self, x: f32, y: f32) -> f32 {
        let x = x * self.info.width as f32 - 0.5;
        let y = y * self.info.height as f32 - 0.5;
        let xi = x.floor() as i64;
        let yi = y.floor() as i64;

        if xi < 0
            || yi < 0
            || xi >= i64::from(self.info.width) - 1
            || yi >= i64::from(self.info.height) - 1
        {
            return DEPTH_INFINITY;
        }

        self.lookup_pixel(xi, yi, 0, [0.0; 3])
            .iter()
            .map(|texel| texel[0])
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

impl Drop for TextureLayer {
    fn drop(&mut self) {
        for id in self.blocks.drain(..) {
            self.cache.release(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn gray_layer(cache: &TextureCache, width: u32, height: u32, data: Vec<u8>) -> TextureLayer {
        let source = MemorySource::new("gray").with_u8_directory(width, height, 1, data);
        let info = LayerInfo::from_directory("gray", 0, &source.directory(0).unwrap());
        TextureLayer::basic(cache, Arc::new(source), info)
    }

    fn float_layer(cache: &TextureCache, width: u32, height: u32, data: &[f32]) -> TextureLayer {
        let source = MemorySource::new("float").with_f32_directory(width, height, 1, data);
        let info = LayerInfo::from_directory("float", 0, &source.directory(0).unwrap());
        TextureLayer::basic(cache, Arc::new(source), info)
    }

    #[test]
    fn test_lookup_pixel_wraps_toroidally() {
        let cache = TextureCache::new(1 << 20);
        for width in 1..5u32 {
            let data = (0..width * 2).map(|i| (i * 10) as u8).collect();
            let layer = gray_layer(&cache, width, 2, data);

            let texels = layer.lookup_pixel(i64::from(width) - 1, 1, 0, [0.0; 3]);
            let value = |v: u32| ((v * 10) as u8) as f32 / 255.0;
            assert_eq!(texels[0][0], value(2 * width - 1));
            // x wraps to 0, y wraps to row 0
            assert_eq!(texels[1][0], value(width));
            assert_eq!(texels[2][0], value(width - 1));
            assert_eq!(texels[3][0], value(0));
        }
    }

    #[test]
    fn test_aligned_lookup_returns_exact_texel() {
        let cache = TextureCache::new(1 << 20);
        let nan = f32::NAN;
        let layer = float_layer(&cache, 4, 4, &[
            0.25, nan, nan, nan, //
            nan, nan, nan, nan, //
            nan, nan, 0.75, nan, //
            nan, nan, nan, nan,
        ]);

        assert_eq!(layer.lookup(0.0, 0.0, 0, [0.0; 3])[0], 0.25);
        assert_eq!(layer.lookup(0.5, 0.5, 0, [0.0; 3])[0], 0.75);
    }

    #[test]
    fn test_bilinear_blend() {
        let cache = TextureCache::new(1 << 20);
        let layer = float_layer(&cache, 2, 2, &[0.0, 1.0, 2.0, 3.0]);

        // Halfway between all four texels
        let value = layer.lookup(0.25, 0.25, 0, [0.0; 3])[0];
        assert!((value - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_channels_take_fill() {
        let cache = TextureCache::new(1 << 20);
        let layer = gray_layer(&cache, 2, 2, vec![255; 4]);
        let fill = [0.1, 0.2, 0.3];

        assert_eq!(layer.lookup(0.0, 0.0, 0, fill), [1.0, 0.2, 0.3]);
        // Channel past the end: nothing to read
        assert_eq!(layer.lookup(0.0, 0.0, 1, fill), fill);
    }

    #[test]
    fn test_start_channel_offsets_reads() {
        let cache = TextureCache::new(1 << 20);
        let source = MemorySource::new("rgba").with_f32_directory(
            1,
            1,
            4,
            &[0.1, 0.2, 0.3, 0.4],
        );
        let info = LayerInfo::from_directory("rgba", 0, &source.directory(0).unwrap());
        let layer = TextureLayer::basic(&cache, Arc::new(source), info);

        assert_eq!(layer.lookup(0.0, 0.0, 1, [9.0; 3]), [0.2, 0.3, 0.4]);
        assert_eq!(layer.lookup(0.0, 0.0, 2, [9.0; 3]), [0.3, 0.4, 9.0]);
    }

    #[test]
    fn test_lookupz_takes_max_and_guards_edges() {
        let cache = TextureCache::new(1 << 20);
        let layer = float_layer(&cache, 3, 3, &[
            1.0, 2.0, 3.0, //
            4.0, 9.0, 5.0, //
            6.0, 7.0, 8.0,
        ]);

        // Neighbourhood (0..=1, 0..=1)
        assert_eq!(layer.lookupz(0.2, 0.2), 9.0);
        // Neighbourhood (1..=2, 1..=2)
        assert_eq!(layer.lookupz(0.55, 0.55), 9.0);
        // Last column has no right neighbour
        assert_eq!(layer.lookupz(0.95, 0.2), DEPTH_INFINITY);
        assert_eq!(layer.lookupz(0.0, 0.5), DEPTH_INFINITY);
    }

    #[test]
    fn test_tiled_matches_basic() {
        let cache = TextureCache::new(1 << 20);
        let data: Vec<u8> = (0..64u32).map(|i| (i * 3) as u8).collect();

        let basic = gray_layer(&cache, 8, 8, data.clone());
        let info = DirectoryInfo::new(8, 8, 1, SampleFormat::U8).with_tiles(4, 4);
        let source = MemorySource::new("tiled").with_directory(info, data);
        let tiled = TextureLayer::tiled(
            &cache,
            Arc::new(source),
            LayerInfo::from_directory("tiled", 0, &info),
            4,
        )
        .unwrap();

        assert_eq!(tiled.blocks().len(), 4);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(
                    basic.lookup_pixel(x, y, 0, [0.0; 3]),
                    tiled.lookup_pixel(x, y, 0, [0.0; 3]),
                    "pixel ({x}, {y})"
                );
            }
        }
    }

    #[test]
    fn test_tiles_load_lazily_and_once_per_lookup() {
        let cache = TextureCache::new(1 << 20);
        let info = DirectoryInfo::new(8, 8, 1, SampleFormat::U8).with_tiles(4, 4);
        let source = Arc::new(MemorySource::new("tiled").with_directory(info, vec![1; 64]));
        let layer = TextureLayer::tiled(
            &cache,
            source.clone(),
            LayerInfo::from_directory("tiled", 0, &info),
            4,
        )
        .unwrap();

        assert_eq!(source.reads(), 0);
        layer.lookup_pixel(1, 1, 0, [0.0; 3]);
        assert_eq!(source.reads(), 1);
        assert!(cache.is_resident(layer.blocks()[0]));
        assert!(!cache.is_resident(layer.blocks()[3]));

        // Straddles all four tiles
        layer.lookup_pixel(3, 3, 0, [0.0; 3]);
        assert_eq!(source.reads(), 4);
        assert_eq!(cache.stats().references, 5);
    }

    #[test]
    fn test_bad_tile_size() {
        let cache = TextureCache::new(1 << 20);
        let info = DirectoryInfo::new(6, 6, 1, SampleFormat::U8);
        let source = Arc::new(MemorySource::new("x").with_directory(info, vec![0; 36]));
        let result = TextureLayer::tiled(&cache, source, LayerInfo::from_directory("x", 0, &info), 3);
        assert!(matches!(result, Err(TextureError::BadTileSize(3))));
    }

    #[test]
    fn test_drop_releases_blocks() {
        let cache = TextureCache::new(1 << 20);
        {
            let layer = gray_layer(&cache, 4, 4, vec![0; 16]);
            layer.lookup(0.5, 0.5, 0, [0.0; 3]);
            assert_eq!(cache.stats().blocks, 1);
            assert_eq!(cache.memory_used(), 16);
        }
        let stats = cache.stats();
        assert_eq!(stats.blocks, 0);
        assert_eq!(stats.memory_used, 0);
    }

    #[test]
    fn test_reload_after_eviction_is_identical() {
        let cache = TextureCache::new(1 << 20);
        let data: Vec<u8> = (0..16u8).map(|i| i * 16).collect();
        let layer = gray_layer(&cache, 4, 4, data);

        let before: Vec<_> = (0..4).map(|x| layer.lookup_pixel(x, x, 0, [0.0; 3])).collect();
        cache.flush();
        assert!(!cache.is_resident(layer.blocks()[0]));
        let after: Vec<_> = (0..4).map(|x| layer.lookup_pixel(x, x, 0, [0.0; 3])).collect();

        assert_eq!(before, after);
        assert_eq!(cache.stats().misses, 2);
    }
}
