//! Construction-time error types.
//!
//! Every fallible constructor in this crate (`Allocator::new`,
//! `Partition::new`, `FrequencySketch::new`) validates its configuration
//! and returns one of these variants rather than panicking. The caller
//! decides whether a misconfiguration is fatal (it always is, per the
//! core's contract — see the crate root docs).

use thiserror::Error;

/// Configuration or construction failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WarpCacheError {
    #[error("slab list must not be empty")]
    EmptySlabList,

    #[error("slab classes must be sorted ascending by elem_size with no duplicates")]
    UnsortedSlabList,

    #[error("invalid value for {field}: must be > 0")]
    InvalidLimit { field: &'static str },

    #[error("invalid ratio: numerator and denominator must both be > 0")]
    InvalidRatio,

    #[error("arena size (size_multiple << min_size_log) overflows a 32-bit offset space")]
    ArenaTooLarge,

    #[error("min_size_log must be >= 6")]
    MinSizeLogTooSmall,
}

pub type Result<T> = std::result::Result<T, WarpCacheError>;
