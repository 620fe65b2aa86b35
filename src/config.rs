//! Configuration types for the allocator and partition.
//!
//! These derive `serde` so an embedding process can load partition
//! topology from a config file, though the core itself never touches disk.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarpCacheError};

/// One size class handled by the compacting-slab tier of the allocator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlabConfig {
    pub elem_size: u32,
    pub chunk_size_log: u32,
}

/// Top-level allocator configuration: one raw slab (LRU nodes) plus a
/// size-sorted ladder of compacting slabs for entry payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    pub mem_limit: u64,
    pub lru_entry_size: u32,
    pub slabs: Vec<SlabConfig>,
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mem_limit == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "mem_limit",
            });
        }
        if self.lru_entry_size == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "lru_entry_size",
            });
        }
        if self.slabs.is_empty() {
            return Err(WarpCacheError::EmptySlabList);
        }
        for s in &self.slabs {
            if s.elem_size == 0 || s.chunk_size_log == 0 {
                return Err(WarpCacheError::InvalidLimit { field: "elem_size" });
            }
        }
        if !self.slabs.windows(2).all(|w| w[0].elem_size < w[1].elem_size) {
            return Err(WarpCacheError::UnsortedSlabList);
        }
        // The arena's min_size_log (the smallest configured chunk_size_log)
        // must be at least 6, per the arena's block-size floor.
        if self.slabs.iter().map(|s| s.chunk_size_log).min().unwrap() < 6 {
            return Err(WarpCacheError::MinSizeLogTooSmall);
        }
        Ok(())
    }
}

/// A non-negative rational `numerator / denominator`, used for the
/// protected-segment sizing ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

impl Rational {
    pub fn new(numerator: u64, denominator: u64) -> Self {
        Rational {
            numerator,
            denominator,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.numerator == 0 || self.denominator == 0 {
            return Err(WarpCacheError::InvalidRatio);
        }
        Ok(())
    }

    /// `floor(v * numerator / denominator)`.
    pub fn mul_u32(&self, v: u32) -> u32 {
        ((v as u64) * self.numerator / self.denominator) as u32
    }
}

/// Partition-level configuration: allocator config plus segmented-LRU and
/// frequency-sketch sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub allocator_config: AllocatorConfig,
    pub init_admission_limit: u32,
    pub protected_ratio: Rational,
    pub min_protected_limit: u32,
    pub num_counters: u64,
    pub sketch_min_cache_size: u64,
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<()> {
        self.allocator_config.validate()?;
        self.protected_ratio.validate()?;
        if self.init_admission_limit == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "init_admission_limit",
            });
        }
        if self.min_protected_limit == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "min_protected_limit",
            });
        }
        if self.num_counters == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "num_counters",
            });
        }
        if self.sketch_min_cache_size == 0 {
            return Err(WarpCacheError::InvalidLimit {
                field: "sketch_min_cache_size",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_allocator_config() -> AllocatorConfig {
        AllocatorConfig {
            mem_limit: 1 << 20,
            lru_entry_size: 32,
            slabs: vec![
                SlabConfig {
                    elem_size: 64,
                    chunk_size_log: 12,
                },
                SlabConfig {
                    elem_size: 128,
                    chunk_size_log: 12,
                },
            ],
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(valid_allocator_config().validate().is_ok());
    }

    #[test]
    fn rejects_empty_slab_list() {
        let mut cfg = valid_allocator_config();
        cfg.slabs.clear();
        assert_eq!(cfg.validate(), Err(WarpCacheError::EmptySlabList));
    }

    #[test]
    fn rejects_unsorted_slab_list() {
        let mut cfg = valid_allocator_config();
        cfg.slabs.reverse();
        assert_eq!(cfg.validate(), Err(WarpCacheError::UnsortedSlabList));
    }

    #[test]
    fn rejects_zero_mem_limit() {
        let mut cfg = valid_allocator_config();
        cfg.mem_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_chunk_size_log_below_minimum() {
        let mut cfg = valid_allocator_config();
        cfg.slabs[0].chunk_size_log = 5;
        assert_eq!(cfg.validate(), Err(WarpCacheError::MinSizeLogTooSmall));
    }

    #[test]
    fn rational_rejects_zero_denominator() {
        assert!(Rational::new(1, 0).validate().is_err());
    }

    #[test]
    fn rational_mul_rounds_down() {
        let r = Rational::new(4, 5);
        assert_eq!(r.mul_u32(9), 7); // 36/5 = 7.2 -> 7
    }
}
