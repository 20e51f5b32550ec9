//! The table: a flat array of slots with triangular probing.

use std::fmt;

use crate::error::{Result, TableError};
use crate::finalizer::{Finalizer, NoFinalizer};
use crate::key::{InlineKey, KeyRef};
use crate::slot::{Slot, StoredKey};
use crate::{check_capacity, TableConfig, MAX_CAPACITY};

// =============================================================================
// Probe sequence
// =============================================================================

/// Slot indices `(base + p(p+1)/2) & mask` for `p` in `0..=mask`.
///
/// With a power-of-two array this visits every slot exactly once.
#[derive(Clone, Copy, Debug)]
struct ProbeSeq {
    pos: usize,
    step: usize,
    mask: usize,
}

impl ProbeSeq {
    #[inline]
    fn new(hash: u32, mask: usize) -> Self {
        Self {
            pos: hash as usize & mask,
            step: 0,
            mask,
        }
    }
}

impl Iterator for ProbeSeq {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.step > self.mask {
            return None;
        }
        let pos = self.pos;
        self.step += 1;
        self.pos = (self.pos + self.step) & self.mask;
        Some(pos)
    }
}

// =============================================================================
// Slot storage
// =============================================================================

/// Where an insert should go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Claim {
    Vacant(usize),
    Occupied(usize),
}

/// Everything a swap exchanges: the array and its counters.
pub(crate) struct RawSlots<V> {
    pub(crate) slots: Box<[Slot<V>]>,
    /// Occupied slots.
    pub(crate) len: usize,
    /// Slots marked `Vacated` by deletes.
    pub(crate) vacated: usize,
}

impl<V> RawSlots<V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(Slot::default).take(capacity).collect(),
            len: 0,
            vacated: 0,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn probe(&self, hash: u32) -> ProbeSeq {
        ProbeSeq::new(hash, self.slots.len() - 1)
    }

    fn find(&self, key: KeyRef<'_>) -> Option<usize> {
        for idx in self.probe(key.hash()) {
            match &self.slots[idx] {
                Slot::Empty => return None,
                slot if slot.matches(key) => return Some(idx),
                _ => {}
            }
        }
        None
    }

    fn claim(&self, key: KeyRef<'_>) -> Result<Claim> {
        if self.len == self.capacity() {
            return Err(TableError::TableFull(self.capacity()));
        }

        let mut reuse = None;
        for idx in self.probe(key.hash()) {
            match &self.slots[idx] {
                Slot::Empty => return Ok(Claim::Vacant(reuse.unwrap_or(idx))),
                Slot::Vacated => {
                    reuse.get_or_insert(idx);
                }
                slot if slot.matches(key) => return Ok(Claim::Occupied(idx)),
                _ => {}
            }
        }
        // Every slot was probed: no match, no empty slot, so `len < capacity`
        // leaves at least one vacated slot behind.
        reuse
            .map(Claim::Vacant)
            .ok_or(TableError::TableFull(self.capacity()))
    }

    /// Put an entry known to be absent into an array without vacated slots.
    fn place(&mut self, key: StoredKey, value: V) -> usize {
        let idx = self
            .probe(key.view().hash())
            .find(|&idx| self.slots[idx].is_empty())
            .expect("rebuilt array has room for every entry");
        self.slots[idx] = Slot::occupied(key, value);
        self.len += 1;
        idx
    }
}

// =============================================================================
// Public types
// =============================================================================

/// Outcome of an insert that got past validation.
#[derive(Debug)]
pub enum Inserted<'a, V> {
    /// The key was absent and now maps to the new value.
    New(&'a mut V),
    /// The key was already present. The stored value is untouched and the
    /// value passed to the insert is handed back.
    Duplicate { existing: &'a mut V, rejected: V },
}

impl<'a, V> Inserted<'a, V> {
    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, Inserted::New(_))
    }

    /// The value now stored under the key, whichever way the insert went.
    pub fn into_mut(self) -> &'a mut V {
        match self {
            Inserted::New(value) => value,
            Inserted::Duplicate { existing, .. } => existing,
        }
    }

    /// The freshly inserted value, or [`TableError::DuplicateKey`].
    pub fn into_new(self) -> Result<&'a mut V> {
        match self {
            Inserted::New(value) => Ok(value),
            Inserted::Duplicate { .. } => Err(TableError::DuplicateKey),
        }
    }
}

/// Occupancy snapshot of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub capacity: usize,
    pub len: usize,
    pub inline_keys: usize,
    pub heap_keys: usize,
    pub vacated: usize,
    /// Bytes held by heap-allocated keys.
    pub heap_key_bytes: usize,
}

// =============================================================================
// SsoTable
// =============================================================================

/// An open-addressed map from non-empty byte strings to `V`.
///
/// - Capacity is a power of two in `1..=2^31`; `len() <= capacity()` always.
/// - Keys up to [`INLINE_CAPACITY`](crate::INLINE_CAPACITY) bytes are stored
///   inline, longer keys in an owned buffer.
/// - `F` is called for every entry the table releases (delete, clear, drop).
pub struct SsoTable<V, F: Finalizer<V> = NoFinalizer> {
    pub(crate) raw: RawSlots<V>,
    config: TableConfig,
    finalizer: F,
}

impl<V> SsoTable<V> {
    /// An empty table with the default configuration.
    ///
    /// Fails with [`TableError::InvalidCapacity`] unless `capacity` is a power
    /// of two no larger than [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(capacity, TableConfig::default())
    }

    pub fn with_config(capacity: usize, config: TableConfig) -> Result<Self> {
        Self::with_finalizer(capacity, config, NoFinalizer)
    }
}

impl<V, F: Finalizer<V>> SsoTable<V, F> {
    pub fn with_finalizer(capacity: usize, config: TableConfig, finalizer: F) -> Result<Self> {
        if let Err(err) = check_capacity(capacity).and_then(|()| config.validate()) {
            diag!(config, error, op = "init", capacity, "{}", err);
            return Err(err);
        }

        diag!(config, info, op = "init", capacity, "created table");
        Ok(Self {
            raw: RawSlots::with_capacity(capacity),
            config,
            finalizer,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    #[inline]
    pub fn load_factor(&self) -> f64 {
        self.raw.len as f64 / self.capacity() as f64
    }

    #[inline]
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            capacity: self.capacity(),
            len: self.raw.len,
            vacated: self.raw.vacated,
            ..TableStats::default()
        };
        for slot in self.raw.slots.iter() {
            match slot {
                Slot::Inline { .. } => stats.inline_keys += 1,
                Slot::Heap { key, .. } => {
                    stats.heap_keys += 1;
                    stats.heap_key_bytes += key.len();
                }
                Slot::Empty | Slot::Vacated => {}
            }
        }
        stats
    }

    /// Bytes owned by the table: the slot array plus heap key buffers.
    pub fn memory_usage(&self) -> usize {
        self.capacity() * std::mem::size_of::<Slot<V>>() + self.stats().heap_key_bytes
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            slots: self.raw.slots.iter(),
            remaining: self.raw.len,
        }
    }

    // -------------------------------------------------------------------------
    // Insert
    // -------------------------------------------------------------------------

    /// Insert a copy of `key`.
    ///
    /// Fails with [`TableError::EmptyKey`] for a zero-length key and with
    /// [`TableError::TableFull`] when every slot is taken, even if the key is
    /// already present. If the insert pushes the load factor over the limit
    /// the table doubles, and the returned reference points into the new array.
    pub fn insert(&mut self, key: &[u8], value: V) -> Result<Inserted<'_, V>> {
        let key = KeyRef::new(key)?;
        match self.claim("insert", key)? {
            Claim::Occupied(idx) => Ok(self.duplicate(idx, value)),
            Claim::Vacant(idx) => {
                diag!(self.config, debug, op = "insert", key = ?key, "inserted");
                let grow = self.config.auto_resize;
                Ok(self.occupy(idx, StoredKey::copy_from(key), value, grow))
            }
        }
    }

    /// Insert taking ownership of `key`; a long key's buffer becomes the
    /// slot's storage without a copy.
    pub fn insert_owned(&mut self, key: Vec<u8>, value: V) -> Result<Inserted<'_, V>> {
        let claim = self.claim("insert_owned", KeyRef::new(&key)?)?;
        match claim {
            Claim::Occupied(idx) => Ok(self.duplicate(idx, value)),
            Claim::Vacant(idx) => {
                let key = StoredKey::from_vec(key);
                diag!(self.config, debug, op = "insert_owned", key = ?key.view(), "inserted");
                let grow = self.config.auto_resize;
                Ok(self.occupy(idx, key, value, grow))
            }
        }
    }

    fn claim(&self, op: &'static str, key: KeyRef<'_>) -> Result<Claim> {
        let claim = self.raw.claim(key);
        match claim {
            Err(_) => diag!(
                self.config,
                warn,
                op,
                key = ?key,
                capacity = self.capacity(),
                "insert failed, table is full"
            ),
            Ok(Claim::Occupied(_)) => {
                diag!(self.config, warn, op, key = ?key, "insert failed, duplicate key")
            }
            Ok(Claim::Vacant(_)) => {}
        }
        claim
    }

    fn duplicate(&mut self, idx: usize, value: V) -> Inserted<'_, V> {
        let existing = self.raw.slots[idx]
            .value_mut()
            .expect("claimed slot holds the duplicate key");
        Inserted::Duplicate {
            existing,
            rejected: value,
        }
    }

    fn occupy(&mut self, idx: usize, key: StoredKey, value: V, grow: bool) -> Inserted<'_, V> {
        if self.raw.slots[idx].is_vacated() {
            self.raw.vacated -= 1;
        }
        self.raw.slots[idx] = Slot::occupied(key, value);
        self.raw.len += 1;

        let idx = if grow { self.grow_if_needed(idx) } else { idx };
        Inserted::New(
            self.raw.slots[idx]
                .value_mut()
                .expect("inserted slot is occupied"),
        )
    }

    #[inline]
    fn over_load(&self, count: usize) -> bool {
        count as f64 / self.capacity() as f64 > self.config.max_load_factor
    }

    /// Double when over the load limit, or rebuild in place when vacated
    /// slots alone push it over. Returns the new index of slot `idx`.
    fn grow_if_needed(&mut self, idx: usize) -> usize {
        let capacity = self.capacity();
        if self.over_load(self.raw.len) && capacity < MAX_CAPACITY {
            diag!(
                self.config,
                info,
                op = "insert",
                from = capacity,
                to = capacity << 1,
                "load factor exceeded, growing"
            );
            return self.rebuild(capacity << 1, Some(idx)).unwrap_or(idx);
        }
        if self.raw.vacated > 0 && self.over_load(self.raw.len + self.raw.vacated) {
            diag!(
                self.config,
                debug,
                op = "insert",
                vacated = self.raw.vacated,
                "purging vacated slots"
            );
            return self.rebuild(capacity, Some(idx)).unwrap_or(idx);
        }
        idx
    }

    // -------------------------------------------------------------------------
    // Lookup / delete
    // -------------------------------------------------------------------------

    fn locate(&self, op: &'static str, key: KeyRef<'_>) -> Result<usize> {
        match self.raw.find(key) {
            Some(idx) => {
                diag!(self.config, debug, op, key = ?key, "found");
                Ok(idx)
            }
            None => {
                diag!(self.config, debug, op, key = ?key, "not found");
                Err(TableError::KeyNotFound)
            }
        }
    }

    pub fn lookup(&self, key: &[u8]) -> Result<&V> {
        let idx = self.locate("lookup", KeyRef::new(key)?)?;
        self.raw.slots[idx].value().ok_or(TableError::KeyNotFound)
    }

    pub fn lookup_mut(&mut self, key: &[u8]) -> Result<&mut V> {
        let idx = self.locate("lookup_mut", KeyRef::new(key)?)?;
        self.raw.slots[idx]
            .value_mut()
            .ok_or(TableError::KeyNotFound)
    }

    /// Lookup with a key that is already packed.
    pub fn lookup_inline(&self, key: InlineKey) -> Result<&V> {
        let idx = self.locate("lookup_inline", KeyRef::Inline(key))?;
        self.raw.slots[idx].value().ok_or(TableError::KeyNotFound)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        KeyRef::new(key).is_ok_and(|key| self.raw.find(key).is_some())
    }

    /// Remove `key`, handing its value to the finalizer.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.delete_key("delete", KeyRef::new(key)?)
    }

    pub fn delete_inline(&mut self, key: InlineKey) -> Result<()> {
        self.delete_key("delete_inline", KeyRef::Inline(key))
    }

    fn delete_key(&mut self, op: &'static str, key: KeyRef<'_>) -> Result<()> {
        let idx = match self.raw.find(key) {
            Some(idx) => idx,
            None => {
                diag!(self.config, warn, op, key = ?key, "delete failed, not found");
                return Err(TableError::KeyNotFound);
            }
        };

        if let Some((stored, value)) = self.raw.slots[idx].evict(Slot::Vacated) {
            self.raw.len -= 1;
            self.raw.vacated += 1;
            self.finalizer.finalize(stored.view(), value);
        }
        diag!(self.config, debug, op, key = ?key, "deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Whole-table operations
    // -------------------------------------------------------------------------

    /// Move every entry into a fresh array of `capacity` slots and drop the
    /// old one. Keys and values are moved, never copied or finalized.
    /// Returns where the entry at `track` ended up.
    fn rebuild(&mut self, capacity: usize, track: Option<usize>) -> Option<usize> {
        let mut fresh = RawSlots::with_capacity(capacity);
        let mut tracked = None;
        for (idx, slot) in self.raw.slots.iter_mut().enumerate() {
            if let Some((key, value)) = slot.evict(Slot::Empty) {
                let at = fresh.place(key, value);
                if track == Some(idx) {
                    tracked = Some(at);
                }
            }
        }
        self.raw = fresh;
        tracked
    }

    /// Move all entries into an array of `new_capacity` slots.
    ///
    /// Returns the capacity afterwards. Nothing changes on error.
    pub fn resize(&mut self, new_capacity: usize) -> Result<usize> {
        let capacity = self.capacity();
        if new_capacity == capacity {
            return Ok(capacity);
        }

        let check = if new_capacity > MAX_CAPACITY {
            Err(TableError::InvalidCapacity(new_capacity))
        } else if new_capacity < self.raw.len {
            Err(TableError::CapacityTooSmall {
                requested: new_capacity,
                size: self.raw.len,
            })
        } else {
            check_capacity(new_capacity)
        };
        if let Err(err) = check {
            diag!(self.config, error, op = "resize", new_capacity, "{}", err);
            return Err(err);
        }

        self.rebuild(new_capacity, None);
        diag!(self.config, info, op = "resize", from = capacity, to = new_capacity, "resized");
        Ok(new_capacity)
    }

    /// Shrink to the smallest power of two that holds the current entries.
    ///
    /// Vacated slots are dropped as well. Returns the capacity afterwards.
    pub fn squash(&mut self) -> usize {
        let capacity = self.capacity();
        let Some(target) = squash_target(self.raw.len, capacity) else {
            diag!(self.config, warn, op = "squash", "unable to squash, max capacity needed");
            return capacity;
        };
        if target != capacity || self.raw.vacated > 0 {
            self.rebuild(target, None);
        }
        diag!(self.config, info, op = "squash", capacity = target, "squashed to min capacity");
        target
    }

    /// Finalize every entry and reset all slots. Capacity is unchanged.
    ///
    /// Returns the number of entries removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.release_all();
        diag!(self.config, info, op = "clear", removed, "cleared");
        removed
    }

    fn release_all(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.raw.slots.iter_mut() {
            if let Some((key, value)) = slot.evict(Slot::Empty) {
                self.finalizer.finalize(key.view(), value);
                removed += 1;
            }
        }
        self.raw.len = 0;
        self.raw.vacated = 0;
        removed
    }

    /// Exchange contents with `other`. Configuration and finalizers stay put.
    pub fn swap<G: Finalizer<V>>(&mut self, other: &mut SsoTable<V, G>) {
        std::mem::swap(&mut self.raw, &mut other.raw);
        diag!(self.config, debug, op = "swap", len = self.raw.len, other_len = other.raw.len, "swapped");
    }

    /// Copy every entry of `src` that `self` lacks into `self`, growing as
    /// needed regardless of `auto_resize`.
    ///
    /// Keys present in both keep the value from `self`. Returns whether any
    /// such conflict occurred. `src` is never modified. Fails with
    /// [`TableError::TableFull`], before touching `self`, only if the merged
    /// table could not fit in [`MAX_CAPACITY`] slots.
    pub fn merge<G: Finalizer<V>>(&mut self, src: &SsoTable<V, G>) -> Result<bool>
    where
        V: Clone,
    {
        if self.raw.len + src.raw.len > MAX_CAPACITY {
            let incoming = src
                .iter()
                .filter(|(key, _)| self.raw.find(*key).is_none())
                .count();
            if self.raw.len + incoming > MAX_CAPACITY {
                diag!(self.config, error, op = "merge", incoming, "merged table would exceed max capacity");
                return Err(TableError::TableFull(self.capacity()));
            }
        }

        // A full table (possible with `auto_resize` off) has no slot to claim.
        let capacity = self.capacity();
        if !src.is_empty() && self.raw.len == capacity && capacity < MAX_CAPACITY {
            diag!(self.config, info, op = "merge", from = capacity, to = capacity << 1, "growing full table");
            self.rebuild(capacity << 1, None);
        }

        let mut conflict = false;
        for (key, value) in src.iter() {
            if self.raw.find(key).is_some() {
                diag!(self.config, warn, op = "merge", key = ?key, "found conflicting key");
                conflict = true;
                continue;
            }
            if let Claim::Vacant(idx) = self.raw.claim(key)? {
                self.occupy(idx, StoredKey::copy_from(key), value.clone(), true);
            }
        }
        diag!(
            self.config,
            info,
            op = "merge",
            len = self.raw.len,
            conflict,
            "finished merge"
        );
        Ok(conflict)
    }

    /// Deep copy with the same capacity and configuration.
    pub fn copy(&self) -> Self
    where
        V: Clone,
        F: Clone,
    {
        let mut raw = RawSlots::with_capacity(self.capacity());
        for (key, value) in self.iter() {
            raw.place(StoredKey::copy_from(key), value.clone());
        }
        diag!(
            self.config,
            info,
            op = "copy",
            len = raw.len,
            capacity = raw.capacity(),
            "copied table"
        );
        Self {
            raw,
            config: self.config,
            finalizer: self.finalizer.clone(),
        }
    }
}

/// Capacity `squash` shrinks to, or `None` when a table already at
/// [`MAX_CAPACITY`] needs all of it.
fn squash_target(len: usize, capacity: usize) -> Option<usize> {
    let target = len.max(1).next_power_of_two();
    if target == capacity && capacity == MAX_CAPACITY {
        return None;
    }
    Some(target)
}

impl<V, F: Finalizer<V>> Drop for SsoTable<V, F> {
    fn drop(&mut self) {
        diag!(
            self.config,
            debug,
            op = "drop",
            len = self.raw.len,
            capacity = self.capacity(),
            "destroying table"
        );
        self.release_all();
    }
}

impl<V: Clone, F: Finalizer<V> + Clone> Clone for SsoTable<V, F> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<V: fmt::Debug, F: Finalizer<V>> fmt::Debug for SsoTable<V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V, F: Finalizer<V>> IntoIterator for &'a SsoTable<V, F> {
    type Item = (KeyRef<'a>, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Occupied entries in slot order.
pub struct Iter<'a, V> {
    slots: std::slice::Iter<'a, Slot<V>>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (KeyRef<'a>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.slots.find_map(Slot::entry)?;
        self.remaining -= 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<V> fmt::Debug for Iter<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("remaining", &self.remaining)
            .finish()
    }
}
