//! Non-compacting fixed-size element allocator.
//!
//! Elements never move once allocated, so their offsets are stable for
//! as long as they live — this is what backs the LRU list nodes, whose
//! addresses are stored inside entry headers (`EntryHeader::lru_addr`)
//! and must stay valid across unrelated allocator activity.

use super::buddy::Buddy;
use super::NULL_OFFSET;

#[repr(C)]
struct FreeListHead {
    next: u32,
}

pub struct RawSlab {
    elem_size: u32,
    chunk_size_log: u32,
    num_elem_per_chunk: u32,
    unused_bytes: u64,
    memory_usage: u64,
    free_list: u32,
}

impl RawSlab {
    pub fn new(elem_size: u32, chunk_size_log: u32) -> Self {
        let chunk_size = 1u64 << chunk_size_log;
        RawSlab {
            elem_size,
            chunk_size_log,
            num_elem_per_chunk: (chunk_size / elem_size as u64) as u32,
            unused_bytes: chunk_size % elem_size as u64,
            memory_usage: 0,
            free_list: NULL_OFFSET,
        }
    }

    unsafe fn head(&self, buddy: &Buddy, offset: u32) -> *mut FreeListHead {
        buddy.to_real_addr(offset) as *mut FreeListHead
    }

    fn init_chunk(&mut self, buddy: &Buddy, chunk_addr: u32) {
        self.free_list = chunk_addr;
        for i in 0..self.num_elem_per_chunk {
            let addr = chunk_addr + i * self.elem_size;
            let next = if i + 1 == self.num_elem_per_chunk {
                NULL_OFFSET
            } else {
                addr + self.elem_size
            };
            unsafe { (*self.head(buddy, addr)).next = next };
        }
        self.memory_usage += self.unused_bytes;
    }

    /// Allocate one element, requesting a new chunk from `buddy` if the
    /// free list is empty.
    pub fn allocate(&mut self, buddy: &mut Buddy) -> (u32, bool) {
        if self.free_list == NULL_OFFSET {
            let (chunk_addr, ok) = buddy.allocate(self.chunk_size_log);
            if !ok {
                return (0, false);
            }
            self.init_chunk(buddy, chunk_addr);
        }

        let result = self.free_list;
        self.free_list = unsafe { (*self.head(buddy, result)).next };
        self.memory_usage += self.elem_size as u64;
        (result, true)
    }

    /// Return an element to the free list. Chunks are never returned to
    /// the buddy — raw-slab elements are meant to have stable addresses.
    pub fn deallocate(&mut self, buddy: &Buddy, addr: u32) {
        self.memory_usage -= self.elem_size as u64;
        unsafe { (*self.head(buddy, addr)).next = self.free_list };
        self.free_list = addr;
    }

    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_usage
    }

    #[cfg(test)]
    fn free_list_contents(&self, buddy: &Buddy) -> Vec<u32> {
        let mut result = Vec::new();
        let mut addr = self.free_list;
        while addr != NULL_OFFSET {
            result.push(addr);
            addr = unsafe { (*self.head(buddy, addr)).next };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(min_size_log: u32, size_multiple: u32) -> (Vec<u64>, Buddy) {
        let words = ((size_multiple as usize) << min_size_log).div_ceil(8);
        let mut storage = vec![0u64; words];
        let base = storage.as_mut_ptr() as *mut u8;
        (storage, Buddy::init(min_size_log, size_multiple, base))
    }

    #[test]
    fn allocate_then_deallocate_all_resets_memory_usage_and_releases_chunk() {
        let (_storage, mut buddy) = harness(12, 16);
        let mut slab = RawSlab::new(32, 12); // 128 elems per chunk

        let mut addrs = Vec::new();
        for _ in 0..10 {
            let (addr, ok) = slab.allocate(&mut buddy);
            assert!(ok);
            addrs.push(addr);
        }
        assert!(slab.memory_usage() > 0);

        for addr in addrs {
            slab.deallocate(&buddy, addr);
        }
        assert_eq!(slab.memory_usage(), 0);

        // the raw slab's chunk (offset 0) is never returned to the buddy,
        // so the next buddy allocation of the same size must land
        // elsewhere.
        let (chunk_addr, ok) = buddy.allocate(12);
        assert!(ok);
        assert_ne!(chunk_addr, 0);
    }

    #[test]
    fn free_list_has_no_cycles_and_matches_capacity_minus_live() {
        let (_storage, mut buddy) = harness(12, 16);
        let mut slab = RawSlab::new(64, 12); // 64 elems per chunk

        let (a, _) = slab.allocate(&mut buddy);
        let (b, _) = slab.allocate(&mut buddy);
        let (c, _) = slab.allocate(&mut buddy);
        slab.deallocate(&buddy, b);

        let free = slab.free_list_contents(&buddy);
        assert_eq!(free.len(), 64 - 3 + 1);
        assert!(free.contains(&b));
        assert!(!free.contains(&a));
        assert!(!free.contains(&c));
    }
}
