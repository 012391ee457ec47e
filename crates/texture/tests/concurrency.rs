use std::sync::Arc;
use std::thread;

use shaderlib_texture::{
    DirectoryInfo, LayerInfo, LookupOptions, MemorySource, SampleFormat, Texture, TextureCache,
    TextureLayer, TextureSource, WrapMode,
};

const SIZE: u32 = 64;
const TILE: u32 = 8;

fn tiled_source() -> Arc<MemorySource> {
    let info = DirectoryInfo::new(SIZE, SIZE, 1, SampleFormat::U8).with_tiles(TILE, TILE);
    let data = (0..SIZE * SIZE).map(|i| (i * 7 % 251) as u8).collect();
    Arc::new(MemorySource::new("tiles").with_directory(info, data))
}

fn tiled_texture(cache: &TextureCache, source: Arc<MemorySource>) -> Texture {
    let info = LayerInfo::from_directory("tiles", 0, &source.directory(0).unwrap());
    let layer = TextureLayer::tiled(cache, source, info, TILE).unwrap();
    Texture::regular(cache, "tiles", layer, WrapMode::Periodic, WrapMode::Periodic)
}

fn sweep(texture: &Texture, offset: u32) -> Vec<f32> {
    let options = LookupOptions::texture();
    (0..SIZE * SIZE)
        .map(|i| {
            let i = (i + offset) % (SIZE * SIZE);
            let s = (i % SIZE) as f32 / SIZE as f32 + 0.3 / SIZE as f32;
            let t = (i / SIZE) as f32 / SIZE as f32 + 0.6 / SIZE as f32;
            texture.lookup(s, t, &options)[0]
        })
        .collect()
}

#[test]
fn concurrent_lookups_under_eviction_match_reference() {
    let roomy = TextureCache::new(1 << 20);
    let reference: Vec<Vec<f32>> = {
        let texture = tiled_texture(&roomy, tiled_source());
        (0..8).map(|n| sweep(&texture, n * 517)).collect()
    };

    // Room for a handful of the 64 tiles
    let budget = (TILE * TILE * 6) as usize;
    let cache = TextureCache::new(budget);
    let texture = tiled_texture(&cache, tiled_source());

    thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let texture = &texture;
                scope.spawn(move || sweep(texture, n * 517))
            })
            .collect();
        for (n, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), reference[n], "thread {n}");
        }
    });

    let stats = cache.stats();
    assert!(stats.evictions > 0);
    assert!(stats.memory_used <= budget);
    assert!(stats.peak_memory <= budget + (TILE * TILE) as usize);
    assert!(stats.misses > 64);
    assert!(stats.hit_rate() > 0.0 && stats.hit_rate() < 1.0);
}

#[test]
fn cache_handles_are_shared_across_threads() {
    let cache = TextureCache::new(1 << 20);
    let source = tiled_source();
    let texture = Arc::new(tiled_texture(&cache, Arc::clone(&source)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let texture = Arc::clone(&texture);
            thread::spawn(move || sweep(&texture, 0))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));

    // Every tile decoded, and no tile decoded twice by racing threads
    // beyond one extra read per thread
    assert!(source.reads() >= 64);
    assert!(source.reads() <= 64 * 4);
    assert_eq!(cache.stats().resident_blocks, 64);

    drop(texture);
    let stats = cache.stats();
    assert_eq!(stats.blocks, 0);
    assert_eq!(stats.textures, 0);
    assert_eq!(stats.peak_textures, 1);
}
