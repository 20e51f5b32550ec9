//! Slot layout.

use crate::key::{InlineKey, KeyRef};
#[cfg(test)]
use crate::key::{hash_bytes, hash_inline};

/// An owned key on its way into a slot.
pub(crate) enum StoredKey {
    Inline(InlineKey),
    Heap(Box<[u8]>),
}

impl StoredKey {
    /// Copy a key view into owned storage. Inline keys stay inline.
    pub(crate) fn copy_from(key: KeyRef<'_>) -> Self {
        match key {
            KeyRef::Inline(inline) => StoredKey::Inline(inline),
            KeyRef::Bytes(bytes) => StoredKey::Heap(bytes.into()),
        }
    }

    /// Take ownership of `bytes`, packing them inline when they fit.
    pub(crate) fn from_vec(bytes: Vec<u8>) -> Self {
        match InlineKey::new(&bytes) {
            Some(inline) => StoredKey::Inline(inline),
            None => StoredKey::Heap(bytes.into_boxed_slice()),
        }
    }

    pub(crate) fn view(&self) -> KeyRef<'_> {
        match self {
            StoredKey::Inline(inline) => KeyRef::Inline(*inline),
            StoredKey::Heap(bytes) => KeyRef::Bytes(bytes),
        }
    }
}

/// One element of the table's array.
///
/// `Vacated` marks a deleted entry: lookups probe past it, inserts may reuse it.
pub(crate) enum Slot<V> {
    Empty,
    Vacated,
    Inline { key: InlineKey, value: V },
    Heap { key: Box<[u8]>, value: V },
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Slot::Empty
    }
}

impl<V> Slot<V> {
    #[inline]
    pub(crate) fn occupied(key: StoredKey, value: V) -> Self {
        match key {
            StoredKey::Inline(key) => Slot::Inline { key, value },
            StoredKey::Heap(key) => Slot::Heap { key, value },
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    #[inline]
    pub(crate) fn is_vacated(&self) -> bool {
        matches!(self, Slot::Vacated)
    }

    #[cfg(test)]
    pub(crate) fn is_occupied(&self) -> bool {
        matches!(self, Slot::Inline { .. } | Slot::Heap { .. })
    }

    /// Hash of the stored key, or `None` for a free slot.
    #[cfg(test)]
    pub(crate) fn hash(&self) -> Option<u32> {
        match self {
            Slot::Inline { key, .. } => Some(hash_inline(*key)),
            Slot::Heap { key, .. } => Some(hash_bytes(key)),
            Slot::Empty | Slot::Vacated => None,
        }
    }

    /// Tag-aware key comparison.
    #[inline]
    pub(crate) fn matches(&self, probe: KeyRef<'_>) -> bool {
        match (self, probe) {
            (Slot::Inline { key, .. }, KeyRef::Inline(other)) => *key == other,
            (Slot::Inline { key, .. }, KeyRef::Bytes(other)) => key.eq_bytes(other),
            (Slot::Heap { key, .. }, KeyRef::Inline(other)) => other.eq_bytes(key),
            (Slot::Heap { key, .. }, KeyRef::Bytes(other)) => **key == *other,
            (Slot::Empty | Slot::Vacated, _) => false,
        }
    }

    pub(crate) fn entry(&self) -> Option<(KeyRef<'_>, &V)> {
        match self {
            Slot::Inline { key, value } => Some((KeyRef::Inline(*key), value)),
            Slot::Heap { key, value } => Some((KeyRef::Bytes(key), value)),
            Slot::Empty | Slot::Vacated => None,
        }
    }

    #[inline]
    pub(crate) fn value(&self) -> Option<&V> {
        match self {
            Slot::Inline { value, .. } | Slot::Heap { value, .. } => Some(value),
            Slot::Empty | Slot::Vacated => None,
        }
    }

    #[inline]
    pub(crate) fn value_mut(&mut self) -> Option<&mut V> {
        match self {
            Slot::Inline { value, .. } | Slot::Heap { value, .. } => Some(value),
            Slot::Empty | Slot::Vacated => None,
        }
    }

    /// Replace this slot with `with`, returning the key and value it held.
    pub(crate) fn evict(&mut self, with: Slot<V>) -> Option<(StoredKey, V)> {
        match std::mem::replace(self, with) {
            Slot::Inline { key, value } => Some((StoredKey::Inline(key), value)),
            Slot::Heap { key, value } => Some((StoredKey::Heap(key), value)),
            Slot::Empty | Slot::Vacated => None,
        }
    }
}
