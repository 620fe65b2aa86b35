//! `warp_cache_core` — the memory/cache engine underneath a single shard
//! of a process-wide cache.
//!
//! A [`partition::Partition`] owns one fixed-size [`arena::Arena`],
//! addressed entirely by 32-bit offsets (see the pointer-as-offset
//! discipline below), and implements lease-get/lease-set coordination for
//! cache-miss fills with W-TinyLFU-style admission and eviction. A
//! partition is single-owner and single-threaded by design: [`Partition`]
//! and [`arena::allocator::Allocator`] hold raw pointers into the arena
//! and are deliberately not `Send`/`Sync`. Sharding across many
//! partitions, network transport, configuration loading from disk, and
//! durable persistence are all the job of an embedding process; this
//! crate only exposes the lease-get/lease-set surface that such a
//! façade consumes.
//!
//! # Pointer-as-offset discipline
//!
//! Every structure that lives inside the arena — buddy free lists, slab
//! free lists, LRU nodes, entry headers — addresses other arena-resident
//! structures by `u32` offset, never by native pointer. This keeps the
//! arena relocatable and trivially bitwise-copyable; see [`arena`] for
//! the allocators built on top of it.
//!
//! [`Partition`]: partition::Partition

pub mod arena;
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod lru;
pub mod partition;
pub mod sketch;

pub use config::{AllocatorConfig, PartitionConfig, Rational, SlabConfig};
pub use error::{Result, WarpCacheError};
pub use hash::default_hash;
pub use partition::{LeaseGetResult, Partition};
