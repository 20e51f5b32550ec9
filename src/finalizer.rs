//! Per-slot cleanup hook.

use crate::key::KeyRef;

/// Called once for every entry a table releases.
///
/// The hook runs on `delete`, `clear`, and when the table is dropped. It is not
/// called for entries that are moved during a resize, nor for a value handed
/// back by a rejected duplicate insert.
pub trait Finalizer<V> {
    fn finalize(&mut self, key: KeyRef<'_>, value: V);
}

/// Lets values clean up after themselves through `Drop`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFinalizer;

impl<V> Finalizer<V> for NoFinalizer {
    #[inline]
    fn finalize(&mut self, _key: KeyRef<'_>, _value: V) {}
}
