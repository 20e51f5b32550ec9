//! Error types for table operations.

use thiserror::Error;

/// Everything a table operation can report instead of succeeding.
///
/// `DuplicateKey` and `KeyNotFound` are ordinary outcomes rather than faults;
/// the table is left untouched whenever one of these is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum TableError {
    #[error("capacity {0} must be a nonzero power of two no larger than 2^31")]
    InvalidCapacity(usize),

    #[error("capacity {requested} is too small to hold the current {size} entries")]
    CapacityTooSmall { requested: usize, size: usize },

    #[error("keys must be at least one byte long")]
    EmptyKey,

    #[error("table is full ({0} slots occupied)")]
    TableFull(usize),

    #[error("key is already present")]
    DuplicateKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("max load factor {0} must be in (0, 1)")]
    InvalidLoadFactor(f64),
}

pub type Result<T> = std::result::Result<T, TableError>;
