//! # sso-table
//!
//! An open-addressed map from byte-string keys to values, with inline storage
//! for short keys.
//!
//! Keys of up to one machine word (8 bytes on 64-bit targets) are packed into
//! the slot itself; longer keys get an owned heap buffer. Slots are probed
//! with a triangular sequence over a power-of-two array, and the table doubles
//! once its load factor passes 0.75.
//!
//! ## Example
//!
//! ```rust
//! use sso_table::{SsoTable, TableError};
//!
//! let mut table: SsoTable<u64> = SsoTable::new(8)?;
//! table.insert(b"hello", 1)?;
//! table.insert(b"a key that lives on the heap", 2)?;
//!
//! assert_eq!(table.lookup(b"hello"), Ok(&1));
//! assert!(!table.insert(b"hello", 3)?.is_new());
//!
//! table.delete(b"hello")?;
//! assert_eq!(table.lookup(b"hello"), Err(TableError::KeyNotFound));
//! # Ok::<(), TableError>(())
//! ```

#![deny(unsafe_code)]

/// Emit a `tracing` event only when the table's diagnostics are switched on.
macro_rules! diag {
    ($config:expr, $level:ident, $($arg:tt)+) => {
        if $config.diagnostics {
            tracing::$level!(target: "sso_table", $($arg)+);
        }
    };
}

pub mod error;
pub mod finalizer;
pub mod key;
mod slot;
pub mod table;

pub use error::{Result, TableError};
pub use finalizer::{Finalizer, NoFinalizer};
pub use key::{InlineKey, KeyRef, INLINE_CAPACITY};
pub use table::{Inserted, Iter, SsoTable, TableStats};

// =============================================================================
// Configuration
// =============================================================================

/// Largest capacity a table may have.
pub const MAX_CAPACITY: usize = 1 << 31;

/// Load factor past which an insert doubles the table.
pub const DEFAULT_MAX_LOAD_FACTOR: f64 = 0.75;

/// Per-table tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableConfig {
    /// Grow (or purge vacated slots) once `len / capacity` exceeds this.
    /// Must lie strictly between 0 and 1.
    pub max_load_factor: f64,
    /// Let plain inserts grow the table. When off, inserts fail with
    /// [`TableError::TableFull`] once every slot is taken. `merge` always grows.
    pub auto_resize: bool,
    /// Emit `tracing` events for every operation.
    pub diagnostics: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            auto_resize: true,
            diagnostics: false,
        }
    }
}

impl TableConfig {
    pub fn with_max_load_factor(mut self, max_load_factor: f64) -> Self {
        self.max_load_factor = max_load_factor;
        self
    }

    pub fn with_auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = auto_resize;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        // NaN fails both comparisons.
        if !(self.max_load_factor > 0.0 && self.max_load_factor < 1.0) {
            return Err(TableError::InvalidLoadFactor(self.max_load_factor));
        }
        Ok(())
    }
}

/// Reject capacities that are zero, not a power of two, or above [`MAX_CAPACITY`].
pub(crate) fn check_capacity(capacity: usize) -> Result<()> {
    if !capacity.is_power_of_two() || capacity > MAX_CAPACITY {
        return Err(TableError::InvalidCapacity(capacity));
    }
    Ok(())
}

#[cfg(test)]
mod proptests;
