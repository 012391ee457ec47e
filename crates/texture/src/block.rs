//! Block allocator and LRU evictor
//!
//! Every raw pixel buffer the texture cache holds lives in a block. Blocks
//! are descriptors in a slab: layers keep [`BlockId`]s, the pool owns the
//! descriptors and decides which buffers stay resident. Released
//! descriptors go to a free list and are handed out again by
//! [`BlockPool::new_block`], so a long render does not churn the slab.
//!
//! When resident bytes exceed the budget the pool evicts the least recently
//! touched buffers until usage drops to half the budget.

use std::sync::Arc;

/// Handle to a block descriptor
///
/// The generation changes every time a descriptor is released, so a handle
/// kept past its layer's lifetime is detected instead of aliasing a reused
/// block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl BlockId {
    /// Slot index in the pool
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Which list a descriptor is linked into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Used,
    Free,
}

/// One block descriptor
#[derive(Debug)]
struct Block {
    /// Pixel bytes, `None` while evicted or never loaded
    data: Option<Arc<[u8]>>,
    /// Size of the buffer in bytes
    size: usize,
    /// Clock value of the last access
    stamp: u64,
    generation: u32,
    list: ListKind,
    prev: Option<u32>,
    next: Option<u32>,
}

/// Slab of block descriptors with used/free lists and an eviction policy
///
/// The pool is a plain data structure; [`crate::TextureCache`] puts it
/// behind a mutex.
#[derive(Debug)]
pub struct BlockPool {
    blocks: Vec<Block>,
    used_head: Option<u32>,
    free_head: Option<u32>,
    used_count: usize,
    free_count: usize,
    resident_bytes: usize,
    peak_bytes: usize,
    budget: usize,
    clock: u64,
    flushes: u64,
    evictions: u64,
    transferred_bytes: u64,
}

impl BlockPool {
    /// Create an empty pool with the given budget in bytes
    pub fn new(budget: usize) -> Self {
        Self {
            blocks: Vec::new(),
            used_head: None,
            free_head: None,
            used_count: 0,
            free_count: 0,
            resident_bytes: 0,
            peak_bytes: 0,
            budget,
            clock: 0,
            flushes: 0,
            evictions: 0,
            transferred_bytes: 0,
        }
    }

    fn slot(&self, id: BlockId) -> Option<&Block> {
        self.blocks
            .get(id.index())
            .filter(|b| b.generation == id.generation && b.list == ListKind::Used)
    }

    fn slot_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks
            .get_mut(id.index())
            .filter(|b| b.generation == id.generation && b.list == ListKind::Used)
    }

    fn head_mut(&mut self, list: ListKind) -> &mut Option<u32> {
        match list {
            ListKind::Used => &mut self.used_head,
            ListKind::Free => &mut self.free_head,
        }
    }

    fn push_front(&mut self, index: u32, list: ListKind) {
        let old_head = *self.head_mut(list);
        if let Some(head) = old_head {
            self.blocks[head as usize].prev = Some(index);
        }
        let block = &mut self.blocks[index as usize];
        block.list = list;
        block.prev = None;
        block.next = old_head;
        *self.head_mut(list) = Some(index);
        match list {
            ListKind::Used => self.used_count += 1,
            ListKind::Free => self.free_count += 1,
        }
    }

    fn unlink(&mut self, index: u32) {
        let (list, prev, next) = {
            let block = &self.blocks[index as usize];
            (block.list, block.prev, block.next)
        };
        match prev {
            Some(p) => self.blocks[p as usize].next = next,
            None => *self.head_mut(list) = next,
        }
        if let Some(n) = next {
            self.blocks[n as usize].prev = prev;
        }
        let block = &mut self.blocks[index as usize];
        block.prev = None;
        block.next = None;
        match list {
            ListKind::Used => self.used_count -= 1,
            ListKind::Free => self.free_count -= 1,
        }
    }

    /// Create a non-resident block of `size` bytes on the used list
    ///
    /// Reuses a released descriptor when one is available.
    pub fn new_block(&mut self, size: usize) -> BlockId {
        let index = match self.free_head {
            Some(index) => {
                self.unlink(index);
                index
            }
            None => {
                self.blocks.push(Block {
                    data: None,
                    size: 0,
                    stamp: 0,
                    generation: 0,
                    list: ListKind::Free,
                    prev: None,
                    next: None,
                });
                (self.blocks.len() - 1) as u32
            }
        };

        let clock = self.clock;
        let block = &mut self.blocks[index as usize];
        block.data = None;
        block.size = size;
        block.stamp = clock;
        let generation = block.generation;
        self.push_front(index, ListKind::Used);

        BlockId { index, generation }
    }

    /// Attach a freshly read buffer to a block
    ///
    /// Counts the bytes as resident and, when the budget is exceeded, evicts
    /// every other block it can (least recently used first) until usage is
    /// at or below half the budget. The block being filled is never evicted.
    ///
    /// If the block is already resident the existing buffer is returned and
    /// `buffer` is dropped. Returns `None` for a stale id.
    pub fn allocate(&mut self, id: BlockId, buffer: Vec<u8>) -> Option<Arc<[u8]>> {
        let block = self.slot_mut(id)?;
        if let Some(data) = &block.data {
            return Some(Arc::clone(data));
        }

        let size = block.size;
        let data: Arc<[u8]> = buffer.into();
        block.data = Some(Arc::clone(&data));

        self.resident_bytes += size;
        self.transferred_bytes += size as u64;
        self.peak_bytes = self.peak_bytes.max(self.resident_bytes);

        if self.resident_bytes > self.budget {
            self.evict(Some(id));
            if size > self.budget {
                log::warn!(
                    "texture block of {} bytes exceeds the {} byte cache budget",
                    size,
                    self.budget
                );
            }
        }

        Some(data)
    }

    /// Free resident buffers, oldest stamp first, until usage is at most half
    /// the budget
    ///
    /// `exclude` is the block currently being filled and is skipped. Returns
    /// whether anything was freed.
    pub fn evict(&mut self, exclude: Option<BlockId>) -> bool {
        self.flushes += 1;

        let exclude = exclude.map(|id| id.index);
        let mut candidates = Vec::new();
        let mut cursor = self.used_head;
        while let Some(index) = cursor {
            let block = &self.blocks[index as usize];
            if block.data.is_some() && Some(index) != exclude {
                candidates.push(index);
            }
            cursor = block.next;
        }

        candidates.sort_unstable_by_key(|&index| self.blocks[index as usize].stamp);

        let target = self.budget / 2;
        let mut evicted = false;
        for index in candidates {
            if self.resident_bytes <= target {
                break;
            }
            let block = &mut self.blocks[index as usize];
            block.data = None;
            self.resident_bytes -= block.size;
            self.evictions += 1;
            evicted = true;
        }

        log::debug!(
            "texture cache flush: {} bytes resident of {} budget",
            self.resident_bytes,
            self.budget
        );

        evicted
    }

    /// Drop a block: free its buffer and return the descriptor to the free
    /// pool
    ///
    /// Returns `false` for a stale id.
    pub fn release(&mut self, id: BlockId) -> bool {
        let Some(block) = self.slot_mut(id) else {
            return false;
        };
        let freed = block.data.take().map(|_| block.size).unwrap_or(0);
        block.generation = block.generation.wrapping_add(1);
        block.size = 0;
        self.resident_bytes -= freed;

        self.unlink(id.index);
        self.push_front(id.index, ListKind::Free);
        true
    }

    /// Stamp a block with the current clock and advance the clock
    pub fn touch(&mut self, id: BlockId) {
        let clock = self.clock;
        match self.slot_mut(id) {
            Some(block) => block.stamp = clock,
            None => return,
        }
        self.clock += 1;
    }

    /// Drop every resident buffer, keeping all descriptors
    pub fn flush_all(&mut self) {
        let mut cursor = self.used_head;
        while let Some(index) = cursor {
            let block = &mut self.blocks[index as usize];
            if block.data.take().is_some() {
                self.evictions += 1;
            }
            cursor = block.next;
        }
        self.resident_bytes = 0;
    }

    /// Change the budget, evicting if usage is now above it
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
        if self.resident_bytes > budget {
            self.evict(None);
        }
    }

    /// Whether the block currently holds data
    pub fn is_resident(&self, id: BlockId) -> bool {
        self.slot(id).map(|b| b.data.is_some()).unwrap_or(false)
    }

    /// Shared handle to the block's buffer, if resident
    pub fn data(&self, id: BlockId) -> Option<Arc<[u8]>> {
        self.slot(id).and_then(|b| b.data.clone())
    }

    /// Last access stamp
    pub fn stamp(&self, id: BlockId) -> Option<u64> {
        self.slot(id).map(|b| b.stamp)
    }

    /// Block size in bytes
    pub fn size(&self, id: BlockId) -> Option<usize> {
        self.slot(id).map(|b| b.size)
    }

    /// Bytes held by resident blocks
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Highest resident byte count seen
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes
    }

    /// Budget in bytes
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of blocks on the used list
    pub fn used_blocks(&self) -> usize {
        self.used_count
    }

    /// Number of descriptors waiting for reuse
    pub fn free_blocks(&self) -> usize {
        self.free_count
    }

    /// Number of blocks holding data
    pub fn resident_blocks(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.list == ListKind::Used && b.data.is_some())
            .count()
    }

    /// Number of eviction passes run
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Number of buffers freed by eviction
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Total bytes ever attached to blocks
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }
}
