//! The packed entry header stored at the start of every payload
//! allocation, followed by the key bytes and then the value bytes.

/// Lifecycle state of an entry. `Invalid` is reserved for a future
/// lazy-tombstone path; the present implementation tears an entry down
/// via `Partition::remove_entry`/`evict` rather than ever writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EntryStatus {
    Leasing = 0,
    Valid = 1,
    Invalid = 2,
}

impl EntryStatus {
    fn from_u16(v: u16) -> Self {
        match v {
            0 => EntryStatus::Leasing,
            1 => EntryStatus::Valid,
            2 => EntryStatus::Invalid,
            other => panic!("invalid EntryStatus discriminant {other}"),
        }
    }
}

/// Which segmented-LRU list currently holds this entry's LRU node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LruSegment {
    Admission = 0,
    Protected = 1,
    Probation = 2,
}

impl LruSegment {
    fn from_u16(v: u16) -> Self {
        match v {
            0 => LruSegment::Admission,
            1 => LruSegment::Protected,
            2 => LruSegment::Probation,
            other => panic!("invalid LruSegment discriminant {other}"),
        }
    }
}

/// 32-byte packed header. u64 fields lead so the struct needs no
/// implicit alignment padding.
#[repr(C)]
pub struct EntryHeader {
    pub size: u32,
    pub key_size: u32,
    pub lease_id: u64,
    pub hash: u64,
    pub lru_addr: u32,
    status: u16,
    lru_list: u16,
}

const _: () = assert!(std::mem::size_of::<EntryHeader>() == 32);

pub const HEADER_SIZE: usize = std::mem::size_of::<EntryHeader>();

impl EntryHeader {
    pub fn status(&self) -> EntryStatus {
        EntryStatus::from_u16(self.status)
    }

    pub fn set_status(&mut self, status: EntryStatus) {
        self.status = status as u16;
    }

    pub fn lru_list(&self) -> LruSegment {
        LruSegment::from_u16(self.lru_list)
    }

    pub fn set_lru_list(&mut self, segment: LruSegment) {
        self.lru_list = segment as u16;
    }

    /// Pointer to the key bytes, which immediately follow the header.
    ///
    /// # Safety
    /// `header_ptr` must point at a live `EntryHeader` whose allocation
    /// is at least `HEADER_SIZE + key_size` bytes.
    pub unsafe fn key_ptr(header_ptr: *const EntryHeader) -> *const u8 {
        (header_ptr as *const u8).add(HEADER_SIZE)
    }

    /// Pointer to the value bytes, which follow the key bytes.
    ///
    /// # Safety
    /// Same requirements as [`EntryHeader::key_ptr`], plus the
    /// allocation must be at least `size` bytes.
    pub unsafe fn value_ptr(header_ptr: *const EntryHeader, key_size: u32) -> *const u8 {
        Self::key_ptr(header_ptr).add(key_size as usize)
    }
}
