//! Shared texture block cache
//!
//! [`TextureCache`] is a cheap, cloneable handle to one [`BlockPool`] behind
//! a mutex. Layers and deep shadow tiles register their blocks here and call
//! [`TextureCache::fetch`] on every access. The lock is held only for list
//! and counter updates; decoding a missing block runs outside it so render
//! threads do not serialize on disk reads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::block::{BlockId, BlockPool};
use crate::config::{TextureCacheConfig, DEFAULT_MAX_MEMORY_KB};
use crate::error::TextureResult;

/// How close resident blocks are to forcing a flush
///
/// A flush evicts down to half the budget, so a cache that has flushed
/// recently sits at `Low`. Climbing back towards the budget through misses
/// walks up the levels; `Critical` means the next miss will likely flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// At or under the flush target
    Low,
    /// Refilling, under three quarters of the budget
    Moderate,
    /// Under 90% of the budget
    High,
    /// Within 10% of the budget, or past it while one oversized block is
    /// resident
    Critical,
}

impl MemoryPressure {
    /// Level for `memory_used / memory_limit`
    pub fn from_utilization(utilization: f64) -> Self {
        match utilization {
            u if u <= 0.5 => MemoryPressure::Low,
            u if u < 0.75 => MemoryPressure::Moderate,
            u if u < 0.9 => MemoryPressure::High,
            _ => MemoryPressure::Critical,
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    /// Blocks currently registered
    pub blocks: usize,
    /// Blocks currently holding data
    pub resident_blocks: usize,
    /// Resident bytes
    pub memory_used: usize,
    /// Budget in bytes
    pub memory_limit: usize,
    /// Highest resident byte count seen
    pub peak_memory: usize,
    /// Block accesses
    pub references: u64,
    /// Accesses that had to decode
    pub misses: u64,
    /// Bytes decoded into blocks over the cache's lifetime
    pub transferred_bytes: u64,
    /// Eviction passes
    pub flushes: u64,
    /// Buffers freed by eviction
    pub evictions: u64,
    /// Textures currently open
    pub textures: usize,
    /// Most textures open at once
    pub peak_textures: usize,
}

impl CacheStats {
    /// Fraction of accesses served without decoding (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.references == 0 {
            0.0
        } else {
            (self.references - self.misses) as f64 / self.references as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }

    /// Budget in KB that would have held the working set between flushes
    pub fn ideal_memory_limit_kb(&self) -> u64 {
        self.transferred_bytes / (self.flushes + 1) / 1024
    }

    /// Current pressure level
    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_utilization(self.memory_utilization())
    }
}

struct CacheState {
    pool: BlockPool,
    references: u64,
    misses: u64,
    textures: usize,
    peak_textures: usize,
}

/// Shared, thread-safe texture block cache
///
/// # Example
///
/// ```
/// use shaderlib_texture::TextureCache;
///
/// let cache = TextureCache::with_kb_limit(64);
/// let block = cache.new_block(16);
///
/// let data = cache.fetch(block, || Ok(vec![7u8; 16])).unwrap();
/// assert_eq!(&data[..], &[7u8; 16]);
///
/// // Second access is a hit
/// cache.fetch(block, || unreachable!()).unwrap();
/// assert_eq!(cache.stats().misses, 1);
/// ```
#[derive(Clone)]
pub struct TextureCache {
    state: Arc<Mutex<CacheState>>,
}

impl TextureCache {
    /// Create a cache with a budget in bytes
    pub fn new(max_memory: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                pool: BlockPool::new(max_memory),
                references: 0,
                misses: 0,
                textures: 0,
                peak_textures: 0,
            })),
        }
    }

    /// Create a cache with a budget in kilobytes
    pub fn with_kb_limit(kb: usize) -> Self {
        Self::new(kb * 1024)
    }

    /// Create a cache from configuration
    pub fn from_config(config: &TextureCacheConfig) -> Self {
        Self::new(config.max_memory)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a non-resident block of `size` bytes
    pub fn new_block(&self, size: usize) -> BlockId {
        self.lock().pool.new_block(size)
    }

    /// Return a block to the free pool, dropping its data
    pub fn release(&self, id: BlockId) {
        if !self.lock().pool.release(id) {
            log::warn!("released stale texture block {}", id.index());
        }
    }

    /// Get the data of a block, decoding it with `load` on a miss
    ///
    /// `load` runs without the cache lock held. A failed decode is logged
    /// and replaced by zeros; a buffer of the wrong length is padded or
    /// truncated to the block size. If another thread fills the block
    /// while `load` runs, its buffer wins. Returns `None` only for a block
    /// that has been released.
    pub fn fetch<F>(&self, id: BlockId, load: F) -> Option<Arc<[u8]>>
    where
        F: FnOnce() -> TextureResult<Vec<u8>>,
    {
        let size = {
            let mut state = self.lock();
            state.references += 1;
            if let Some(data) = state.pool.data(id) {
                state.pool.touch(id);
                return Some(data);
            }
            state.misses += 1;
            match state.pool.size(id) {
                Some(size) => size,
                None => {
                    log::warn!("access to stale texture block {}", id.index());
                    return None;
                }
            }
        };

        let mut buffer = match load() {
            Ok(buffer) => buffer,
            Err(e) => {
                log::error!("failed to load texture block {}: {}", id.index(), e);
                vec![0u8; size]
            }
        };
        if buffer.len() != size {
            log::warn!(
                "texture block {} decoded to {} bytes, expected {}",
                id.index(),
                buffer.len(),
                size
            );
            buffer.resize(size, 0);
        }

        let mut state = self.lock();
        let data = state.pool.allocate(id, buffer)?;
        state.pool.touch(id);
        log::debug!("loaded texture block {} ({} bytes)", id.index(), size);
        Some(data)
    }

    /// Whether a block currently holds data
    pub fn is_resident(&self, id: BlockId) -> bool {
        self.lock().pool.is_resident(id)
    }

    /// Drop every resident buffer; blocks reload on next access
    pub fn flush(&self) {
        self.lock().pool.flush_all();
    }

    /// Change the budget, evicting if usage is above the new limit
    pub fn set_memory_limit(&self, max_memory: usize) {
        self.lock().pool.set_budget(max_memory);
    }

    /// Budget in bytes
    pub fn memory_limit(&self) -> usize {
        self.lock().pool.budget()
    }

    /// Resident bytes
    pub fn memory_used(&self) -> usize {
        self.lock().pool.resident_bytes()
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            blocks: state.pool.used_blocks(),
            resident_blocks: state.pool.resident_blocks(),
            memory_used: state.pool.resident_bytes(),
            memory_limit: state.pool.budget(),
            peak_memory: state.pool.peak_bytes(),
            references: state.references,
            misses: state.misses,
            transferred_bytes: state.pool.transferred_bytes(),
            flushes: state.pool.flushes(),
            evictions: state.pool.evictions(),
            textures: state.textures,
            peak_textures: state.peak_textures,
        }
    }

    /// Log the statistics at info level
    pub fn report(&self) {
        let stats = self.stats();
        log::info!(
            "texture cache: {} textures open (peak {}), {} blocks ({} resident)",
            stats.textures,
            stats.peak_textures,
            stats.blocks,
            stats.resident_blocks
        );
        log::info!(
            "texture cache: {} KB used of {} KB, peak {} KB, {:?} pressure",
            stats.memory_used / 1024,
            stats.memory_limit / 1024,
            stats.peak_memory / 1024,
            stats.pressure()
        );
        log::info!(
            "texture cache: {} references, {} misses ({:.2}% hit rate), {} KB transferred",
            stats.references,
            stats.misses,
            stats.hit_rate() * 100.0,
            stats.transferred_bytes / 1024
        );
        log::info!(
            "texture cache: {} flushes, {} evictions, ideal limit {} KB",
            stats.flushes,
            stats.evictions,
            stats.ideal_memory_limit_kb()
        );
    }

    pub(crate) fn texture_opened(&self) {
        let mut state = self.lock();
        state.textures += 1;
        state.peak_textures = state.peak_textures.max(state.textures);
    }

    pub(crate) fn texture_closed(&self) {
        let mut state = self.lock();
        state.textures = state.textures.saturating_sub(1);
    }
}

impl Default for TextureCache {
    /// Cache with the default 16 MB budget
    fn default() -> Self {
        Self::with_kb_limit(DEFAULT_MAX_MEMORY_KB)
    }
}

impl std::fmt::Debug for TextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TextureCache")
            .field("memory_used", &stats.memory_used)
            .field("memory_limit", &stats.memory_limit)
            .field("blocks", &stats.blocks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TextureError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_miss_then_hit() {
        let cache = TextureCache::new(1024);
        let id = cache.new_block(4);
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let data = cache
                .fetch(id, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3, 4])
                })
                .unwrap();
            assert_eq!(&data[..], &[1, 2, 3, 4]);
        }

        let stats = cache.stats();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(stats.references, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_load_is_zero_filled() {
        let cache = TextureCache::new(1024);
        let id = cache.new_block(8);

        let data = cache
            .fetch(id, || Err(TextureError::NotFound("gone.tif".into())))
            .unwrap();
        assert_eq!(&data[..], &[0u8; 8]);
        assert!(cache.is_resident(id));
    }

    #[test]
    fn test_wrong_length_is_fixed_up() {
        let cache = TextureCache::new(1024);
        let short = cache.new_block(4);
        let long = cache.new_block(2);

        assert_eq!(&cache.fetch(short, || Ok(vec![9])).unwrap()[..], &[9, 0, 0, 0]);
        assert_eq!(&cache.fetch(long, || Ok(vec![1, 2, 3])).unwrap()[..], &[1, 2]);
    }

    #[test]
    fn test_released_block_is_not_fetched() {
        let cache = TextureCache::new(1024);
        let id = cache.new_block(4);
        cache.release(id);

        assert!(cache.fetch(id, || Ok(vec![0; 4])).is_none());
        assert_eq!(cache.stats().blocks, 0);
    }

    #[test]
    fn test_eviction_reload_is_identical() {
        let cache = TextureCache::new(100);
        let a = cache.new_block(60);
        let b = cache.new_block(50);
        let pattern = |seed: u8, n: usize| (0..n).map(|i| seed.wrapping_add(i as u8)).collect();

        let first = cache.fetch(a, || Ok(pattern(3, 60))).unwrap().to_vec();
        cache.fetch(b, || Ok(pattern(9, 50))).unwrap();
        assert!(!cache.is_resident(a));

        let again = cache.fetch(a, || Ok(pattern(3, 60))).unwrap();
        assert_eq!(&again[..], &first[..]);
        assert_eq!(cache.stats().misses, 3);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = TextureCache::new(1024);
        let other = cache.clone();
        let id = cache.new_block(16);

        other.fetch(id, || Ok(vec![5; 16])).unwrap();
        assert_eq!(cache.memory_used(), 16);

        cache.set_memory_limit(8);
        assert_eq!(other.memory_limit(), 8);
        assert_eq!(other.memory_used(), 0);
    }

    #[test]
    fn test_flush_drops_data() {
        let cache = TextureCache::new(1024);
        let id = cache.new_block(16);
        cache.fetch(id, || Ok(vec![5; 16])).unwrap();

        cache.flush();
        assert!(!cache.is_resident(id));
        assert_eq!(cache.stats().blocks, 1);
    }

    #[test]
    fn test_concurrent_fetch_loads_consistent_data() {
        let cache = TextureCache::new(4096);
        let ids: Vec<_> = (0..8).map(|_| cache.new_block(64)).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let ids = ids.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        for (i, id) in ids.iter().enumerate() {
                            let data = cache.fetch(*id, || Ok(vec![i as u8; 64])).unwrap();
                            assert!(data.iter().all(|&b| b == i as u8), "round {round}");
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.references, 4 * 50 * 8);
        assert_eq!(stats.resident_blocks, 8);
        assert_eq!(stats.memory_used, 8 * 64);
    }

    #[test]
    fn test_texture_counters() {
        let cache = TextureCache::default();
        cache.texture_opened();
        cache.texture_opened();
        cache.texture_closed();

        let stats = cache.stats();
        assert_eq!(stats.textures, 1);
        assert_eq!(stats.peak_textures, 2);
        assert_eq!(stats.memory_limit, 16384 * 1024);
    }

    #[test]
    fn test_stats_derived_values() {
        let stats = CacheStats {
            memory_used: 80,
            memory_limit: 100,
            transferred_bytes: 8 * 1024,
            flushes: 3,
            ..Default::default()
        };

        assert_eq!(stats.pressure(), MemoryPressure::High);
        assert_eq!(stats.ideal_memory_limit_kb(), 2);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        assert_eq!(CacheStats::default().memory_utilization(), 0.0);
    }

    #[test]
    fn test_flush_brings_pressure_down() {
        let cache = TextureCache::new(100);
        let a = cache.new_block(60);
        let b = cache.new_block(50);

        cache.fetch(a, || Ok(vec![0; 60]));
        assert_eq!(cache.stats().pressure(), MemoryPressure::Moderate);

        cache.fetch(b, || Ok(vec![0; 50]));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().pressure(), MemoryPressure::Low);
    }

    #[test]
    fn test_memory_pressure_levels() {
        assert_eq!(MemoryPressure::from_utilization(0.1), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(0.5), MemoryPressure::Low);
        assert_eq!(MemoryPressure::from_utilization(1.2), MemoryPressure::Critical);
        assert_eq!(MemoryPressure::from_utilization(0.6), MemoryPressure::Moderate);
        assert_eq!(MemoryPressure::from_utilization(0.8), MemoryPressure::High);
        assert_eq!(MemoryPressure::from_utilization(0.95), MemoryPressure::Critical);
        assert!(MemoryPressure::Low < MemoryPressure::Critical);
    }
}
