//! Allocator façade: owns the arena, the buddy, the LRU-node raw slab,
//! and a size-sorted ladder of compacting slabs for entry payloads.

use crate::config::AllocatorConfig;
use crate::error::{Result, WarpCacheError};

use super::buddy::Buddy;
use super::compacting_slab::CompactingSlab;
use super::raw_slab::RawSlab;
use super::Arena;

pub struct Allocator {
    _arena: Arena,
    buddy: Buddy,
    lru_slab: RawSlab,
    /// Sorted ascending by `elem_size`, matching `AllocatorConfig::slabs`.
    slabs: Vec<CompactingSlab>,
}

impl Allocator {
    pub fn new(config: &AllocatorConfig) -> Result<Self> {
        config.validate()?;

        let min_size_log = config
            .slabs
            .iter()
            .map(|s| s.chunk_size_log)
            .min()
            .unwrap(); // validate() guarantees slabs is non-empty and min >= 6

        let block_size = 1u64 << min_size_log;
        let size_multiple_u64 = config.mem_limit.div_ceil(block_size);
        let size_multiple: u32 = size_multiple_u64
            .try_into()
            .map_err(|_| WarpCacheError::ArenaTooLarge)?;

        let arena_bytes = (size_multiple as u64)
            .checked_mul(block_size)
            .ok_or(WarpCacheError::ArenaTooLarge)?;
        if arena_bytes > u32::MAX as u64 + 1 {
            return Err(WarpCacheError::ArenaTooLarge);
        }

        let mut arena = Arena::new(arena_bytes as usize);
        let buddy = Buddy::init(min_size_log, size_multiple, arena.as_mut_ptr());

        let lru_slab = RawSlab::new(config.lru_entry_size, min_size_log);
        let slabs = config
            .slabs
            .iter()
            .map(|s| CompactingSlab::new(s.elem_size, s.chunk_size_log))
            .collect();

        Ok(Allocator {
            _arena: arena,
            buddy,
            lru_slab,
            slabs,
        })
    }

    /// Index of the smallest slab class whose `elem_size >= size`, via
    /// binary search over the ascending-sorted slab ladder.
    fn class_idx(&self, size: u32) -> Option<usize> {
        let idx = self.slabs.partition_point(|s| s.elem_size() < size);
        if idx < self.slabs.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// The element size of the slab class chosen for `size`, or `None`
    /// if no configured class is large enough.
    pub fn get_slab_size(&self, size: u32) -> Option<u32> {
        self.class_idx(size).map(|i| self.slabs[i].elem_size())
    }

    /// Allocate `size` bytes from the smallest fitting slab class.
    pub fn allocate(&mut self, size: u32) -> (u32, bool) {
        let Some(idx) = self.class_idx(size) else {
            tracing::trace!(size, "allocate: no slab class large enough");
            return (0, false);
        };
        self.slabs[idx].allocate(&mut self.buddy)
    }

    /// Deallocate a `size`-byte entry previously allocated with
    /// [`Allocator::allocate`]. Returns `(moved_from, true)` if the
    /// compacting slab relocated another live element into `offset` —
    /// callers must update their external reference accordingly.
    pub fn deallocate(&mut self, offset: u32, size: u32) -> (u32, bool) {
        let idx = self
            .class_idx(size)
            .expect("deallocate called with a size that was never successfully allocated");
        self.slabs[idx].deallocate(&mut self.buddy, offset)
    }

    pub fn lru_slab_allocate(&mut self) -> (u32, bool) {
        self.lru_slab.allocate(&mut self.buddy)
    }

    pub fn lru_slab_deallocate(&mut self, addr: u32) {
        self.lru_slab.deallocate(&self.buddy, addr);
    }

    pub fn lru_to_real_addr(&self, offset: u32) -> *mut u8 {
        self.buddy.to_real_addr(offset)
    }

    pub fn to_real_addr(&self, offset: u32) -> *mut u8 {
        self.buddy.to_real_addr(offset)
    }
}
