//! Intrusive doubly-linked LRU list over raw-slab-allocated nodes.
//!
//! Three instances (admission / probation / protected) share one
//! `RawSlab`; each tracks its own head/tail/size/limit. Nodes are linked
//! by offset (prev/next), with `NULL_OFFSET` marking list ends.

use crate::arena::allocator::Allocator;
use crate::arena::NULL_OFFSET;

/// Node layout written into raw-slab elements. 16 logical bytes
/// (next/prev/hash) padded to 24 so the configured LRU element size has
/// slack for alignment and any future per-node metadata.
#[repr(C)]
struct LruNode {
    next: u32,
    prev: u32,
    hash: u64,
    // Explicit padding to 24 bytes: 24 - 16 = 8
    _pad: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<LruNode>() == 24);

pub struct Lru {
    limit: u32,
    size: u32,
    head: u32,
    tail: u32,
}

impl Lru {
    pub fn new(limit: u32) -> Self {
        Lru {
            limit,
            size: 0,
            head: NULL_OFFSET,
            tail: NULL_OFFSET,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn set_limit(&mut self, new_limit: u32) {
        self.limit = new_limit;
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    unsafe fn node(&self, alloc: &Allocator, addr: u32) -> *mut LruNode {
        alloc.lru_to_real_addr(addr) as *mut LruNode
    }

    /// Push `hash` at the head. Fails if at the limit or the backing
    /// slab is exhausted.
    pub fn put(&mut self, alloc: &mut Allocator, hash: u64) -> (u32, bool) {
        if self.size >= self.limit {
            return (0, false);
        }
        let (addr, ok) = alloc.lru_slab_allocate();
        if !ok {
            return (0, false);
        }

        unsafe {
            let n = self.node(alloc, addr);
            (*n).hash = hash;
            (*n).next = self.head;
            (*n).prev = NULL_OFFSET;
            if self.head != NULL_OFFSET {
                (*self.node(alloc, self.head)).prev = addr;
            } else {
                self.tail = addr;
            }
        }
        self.head = addr;
        self.size += 1;
        (addr, true)
    }

    /// The tail node's offset and hash, if the list is non-empty.
    pub fn last(&self, alloc: &Allocator) -> Option<(u32, u64)> {
        if self.tail == NULL_OFFSET {
            return None;
        }
        let hash = unsafe { (*self.node(alloc, self.tail)).hash };
        Some((self.tail, hash))
    }

    /// Unlink `addr` and return its slab node to the allocator.
    pub fn delete(&mut self, alloc: &mut Allocator, addr: u32) {
        self.unlink(alloc, addr);
        alloc.lru_slab_deallocate(addr);
        self.size -= 1;
    }

    /// Unlink `addr` from the list without freeing its slab node — used
    /// when the node is about to be relinked into a different segment.
    fn unlink(&mut self, alloc: &Allocator, addr: u32) {
        unsafe {
            let n = self.node(alloc, addr);
            let prev = (*n).prev;
            let next = (*n).next;
            if prev != NULL_OFFSET {
                (*self.node(alloc, prev)).next = next;
            } else {
                self.head = next;
            }
            if next != NULL_OFFSET {
                (*self.node(alloc, next)).prev = prev;
            } else {
                self.tail = prev;
            }
        }
    }

    /// Move `addr` to the head (touch).
    pub fn touch(&mut self, alloc: &mut Allocator, addr: u32) {
        if self.head == addr {
            return;
        }
        self.unlink(alloc, addr);
        unsafe {
            let n = self.node(alloc, addr);
            (*n).next = self.head;
            (*n).prev = NULL_OFFSET;
            if self.head != NULL_OFFSET {
                (*self.node(alloc, self.head)).prev = addr;
            } else {
                self.tail = addr;
            }
        }
        self.head = addr;
    }

    #[cfg(test)]
    fn to_vec(&self, alloc: &Allocator) -> Vec<u64> {
        let mut result = Vec::new();
        let mut addr = self.head;
        while addr != NULL_OFFSET {
            unsafe {
                let n = self.node(alloc, addr);
                result.push((*n).hash);
                addr = (*n).next;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocatorConfig, SlabConfig};

    fn new_allocator() -> Allocator {
        let cfg = AllocatorConfig {
            mem_limit: 1 << 20,
            lru_entry_size: 24,
            slabs: vec![SlabConfig {
                elem_size: 64,
                chunk_size_log: 12,
            }],
        };
        Allocator::new(&cfg).unwrap()
    }

    #[test]
    fn put_respects_limit() {
        let mut alloc = new_allocator();
        let mut lru = Lru::new(2);
        assert!(lru.put(&mut alloc, 1).1);
        assert!(lru.put(&mut alloc, 2).1);
        assert!(!lru.put(&mut alloc, 3).1);
        assert_eq!(lru.size(), 2);
    }

    #[test]
    fn head_to_tail_order_and_size_invariant() {
        let mut alloc = new_allocator();
        let mut lru = Lru::new(10);
        lru.put(&mut alloc, 1);
        lru.put(&mut alloc, 2);
        lru.put(&mut alloc, 3);
        assert_eq!(lru.to_vec(&alloc), vec![3, 2, 1]);
        assert_eq!(lru.last(&alloc), Some((lru.tail, 1)));
    }

    #[test]
    fn touch_is_idempotent() {
        let mut alloc = new_allocator();
        let mut lru = Lru::new(10);
        let (a1, _) = lru.put(&mut alloc, 1);
        lru.put(&mut alloc, 2);
        lru.put(&mut alloc, 3);

        lru.touch(&mut alloc, a1);
        let after_one = lru.to_vec(&alloc);
        lru.touch(&mut alloc, a1);
        let after_two = lru.to_vec(&alloc);
        assert_eq!(after_one, after_two);
        assert_eq!(after_one, vec![1, 3, 2]);
    }

    #[test]
    fn delete_updates_size_and_terminals() {
        let mut alloc = new_allocator();
        let mut lru = Lru::new(10);
        let (a1, _) = lru.put(&mut alloc, 1);
        lru.put(&mut alloc, 2);
        lru.delete(&mut alloc, a1);
        assert_eq!(lru.size(), 1);
        assert_eq!(lru.to_vec(&alloc), vec![2]);
    }
}
