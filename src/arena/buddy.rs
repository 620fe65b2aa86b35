//! Buddy allocator: subdivides the arena into power-of-two blocks.
//!
//! Handles arenas whose size is an arbitrary positive multiple of
//! `2^min_size_log`, not just a power of two: every coalesce candidate is
//! checked for both its free bit and its recorded `bucket_offset` before
//! merging, since a non-power-of-two arena can have free blocks of
//! different sizes sharing the same aligned region.

use super::NULL_OFFSET;

/// Free-list node written into the first bytes of every free block.
#[repr(C)]
struct FreeListHead {
    next: u32,
    prev: u32,
    bucket_offset: u32,
}

/// Splits a contiguous arena into power-of-two blocks and hands them out
/// by size class ("size log").
///
/// `buckets[k]` is the head offset of the free list for blocks of size
/// `2^(min_size_log + k)`. `bitset` has one bit per minimum-size block,
/// set iff a free block starts there.
pub struct Buddy {
    base: *mut u8,
    min_size_log: u32,
    /// Number of minimum-size blocks the arena holds; need not be a
    /// power of two.
    size_multiple: u32,
    max_k: u32,
    buckets: Vec<u32>,
    bitset: Vec<u64>,
}

impl Buddy {
    /// `base` must point to at least `size_multiple << min_size_log`
    /// bytes, 8-byte aligned, owned for the buddy's lifetime.
    pub fn init(min_size_log: u32, size_multiple: u32, base: *mut u8) -> Self {
        assert!(min_size_log >= 6, "min_size_log must be >= 6");
        assert!(size_multiple > 0, "size_multiple must be > 0");

        let max_k = 31 - size_multiple.leading_zeros(); // highest set bit
        let num_buckets = max_k as usize + 1;
        let bitset_words = (size_multiple as usize).div_ceil(64);

        let mut buddy = Buddy {
            base,
            min_size_log,
            size_multiple,
            max_k,
            buckets: vec![NULL_OFFSET; num_buckets],
            bitset: vec![0u64; bitset_words],
        };

        // Lay out the minimal set of power-of-two free blocks matching
        // the binary expansion of size_multiple, largest-first.
        let mut block_start: u32 = 0; // in min-size-block units
        for k in (0..num_buckets as u32).rev() {
            if size_multiple & (1 << k) == 0 {
                continue;
            }
            let byte_offset = block_start << min_size_log;
            buddy.push_free(k, byte_offset);
            block_start += 1 << k;
        }

        buddy
    }

    #[inline]
    fn bit_index(&self, offset: u32) -> u32 {
        offset >> self.min_size_log
    }

    fn set_bit(&mut self, offset: u32) {
        let idx = self.bit_index(offset) as usize;
        self.bitset[idx / 64] |= 1u64 << (idx % 64);
    }

    fn clear_bit(&mut self, offset: u32) {
        let idx = self.bit_index(offset) as usize;
        self.bitset[idx / 64] &= !(1u64 << (idx % 64));
    }

    fn is_bit_set(&self, offset: u32) -> bool {
        let idx = self.bit_index(offset) as usize;
        self.bitset[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    unsafe fn head(&self, offset: u32) -> *mut FreeListHead {
        self.base.add(offset as usize) as *mut FreeListHead
    }

    /// Push a free block of bucket `k` at `offset` onto its free list,
    /// and mark its start bit.
    fn push_free(&mut self, k: u32, offset: u32) {
        let bucket = &mut self.buckets[k as usize];
        unsafe {
            let node = self.head(offset);
            (*node).next = *bucket;
            (*node).prev = NULL_OFFSET;
            (*node).bucket_offset = k;
            if *bucket != NULL_OFFSET {
                (*self.head(*bucket)).prev = offset;
            }
        }
        *bucket = offset;
        self.set_bit(offset);
    }

    /// Pop the head of bucket `k`'s free list. Caller must have checked
    /// it is non-empty.
    fn pop_free(&mut self, k: u32) -> u32 {
        let offset = self.buckets[k as usize];
        debug_assert!(offset != NULL_OFFSET);
        unsafe {
            let next = (*self.head(offset)).next;
            self.buckets[k as usize] = next;
            if next != NULL_OFFSET {
                (*self.head(next)).prev = NULL_OFFSET;
            }
        }
        self.clear_bit(offset);
        offset
    }

    /// Remove an arbitrary (non-head) node from its free list, using its
    /// own stored prev/next — O(1), no list scan.
    unsafe fn unlink(&mut self, k: u32, offset: u32) {
        let node = self.head(offset);
        let prev = (*node).prev;
        let next = (*node).next;
        if prev != NULL_OFFSET {
            (*self.head(prev)).next = next;
        } else {
            self.buckets[k as usize] = next;
        }
        if next != NULL_OFFSET {
            (*self.head(next)).prev = prev;
        }
        self.clear_bit(offset);
    }

    /// Allocate a block of size `2^size_log`. Returns `(offset, true)`
    /// on success, `(0, false)` if no free block of sufficient size
    /// exists.
    pub fn allocate(&mut self, size_log: u32) -> (u32, bool) {
        let k0 = size_log - self.min_size_log;
        if k0 > self.max_k {
            return (0, false);
        }

        let mut k = k0;
        while k <= self.max_k && self.buckets[k as usize] == NULL_OFFSET {
            k += 1;
        }
        if k > self.max_k {
            tracing::trace!(size_log, "buddy allocate: no free block of sufficient size");
            return (0, false);
        }

        let offset = self.pop_free(k);

        // Split downward, keeping the left half and freeing the right.
        let mut j = k;
        while j > k0 {
            j -= 1;
            let half_size = 1u32 << (j + self.min_size_log);
            self.push_free(j, offset + half_size);
        }

        tracing::trace!(size_log, offset, "buddy allocate");
        (offset, true)
    }

    /// Free a block of size `2^size_log` previously returned by
    /// [`Buddy::allocate`].
    pub fn deallocate(&mut self, offset: u32, size_log: u32) {
        let mut k = size_log - self.min_size_log;
        let mut offset = offset;

        while k < self.max_k {
            let buddy_offset = offset ^ (1u32 << (k + self.min_size_log));
            let buddy_block_index = buddy_offset >> self.min_size_log;

            if buddy_block_index >= self.size_multiple {
                break; // buddy would lie outside the arena
            }
            if !self.is_bit_set(buddy_offset) {
                break; // buddy is allocated
            }
            let buddy_k = unsafe { (*self.head(buddy_offset)).bucket_offset };
            if buddy_k != k {
                break; // same-aligned region but a different-sized free block
            }

            unsafe { self.unlink(k, buddy_offset) };
            offset = offset.min(buddy_offset);
            k += 1;
        }

        self.push_free(k, offset);
        tracing::trace!(offset, size_log, "buddy deallocate");
    }

    /// Resolve an offset allocated from this buddy to a real pointer.
    pub fn to_real_addr(&self, offset: u32) -> *mut u8 {
        unsafe { self.base.add(offset as usize) }
    }

    #[cfg(test)]
    fn free_blocks(&self) -> Vec<(u32, u32)> {
        let mut result = Vec::new();
        for k in 0..=self.max_k {
            let mut addr = self.buckets[k as usize];
            while addr != NULL_OFFSET {
                result.push((addr, k));
                addr = unsafe { (*self.head(addr)).next };
            }
        }
        result.sort();
        result
    }
}
