//! Key encoding and hashing.
//!
//! Keys up to one machine word long are packed into a `usize`, first byte in
//! the least significant position. Longer keys live in an owned heap buffer.
//! The encoding is canonical: a key is inline exactly when it fits, so two
//! keys of different representation are never equal.
//!
//! Both representations hash to the same value:
//!
//! ```text
//! "key1" -> 0x00000000_3179656b (len 4)
//!           ^^^^^^^^ padding     ^^ 'k'
//! hash_bytes(b"key1") == hash_inline(InlineKey::new(b"key1"))
//! ```

use std::fmt;

use crate::error::{Result, TableError};

/// Longest key that is stored without a heap allocation.
pub const INLINE_CAPACITY: usize = std::mem::size_of::<usize>();

const DJB2_SEED: u32 = 5381;

#[inline]
fn djb2_step(hash: u32, byte: u8) -> u32 {
    (hash << 5).wrapping_add(hash).wrapping_add(byte as u32)
}

/// djb2 over a byte buffer.
#[inline]
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    bytes.iter().fold(DJB2_SEED, |h, &b| djb2_step(h, b))
}

/// djb2 over an inline key, unpacking bytes in the order they were packed.
#[inline]
pub fn hash_inline(key: InlineKey) -> u32 {
    let mut packed = key.packed;
    let mut hash = DJB2_SEED;
    for _ in 0..key.len {
        hash = djb2_step(hash, packed as u8);
        packed >>= 8;
    }
    hash
}

// =============================================================================
// Inline keys
// =============================================================================

/// A key of 1..=[`INLINE_CAPACITY`] bytes packed into a single word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineKey {
    packed: usize,
    len: u8,
}

impl InlineKey {
    /// Pack `bytes`, or `None` if the key is empty or too long to inline.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > INLINE_CAPACITY {
            return None;
        }
        let mut word = [0u8; INLINE_CAPACITY];
        word[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            packed: usize::from_le_bytes(word),
            len: bytes.len() as u8,
        })
    }

    /// Number of key bytes, always in `1..=INLINE_CAPACITY`.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(self) -> usize {
        self.len as usize
    }

    /// The packed word. Bytes past `len()` are zero.
    #[inline]
    pub fn packed(self) -> usize {
        self.packed
    }

    /// Unpack into a word-sized buffer; only the first `len()` bytes are key bytes.
    #[inline]
    pub fn to_bytes(self) -> [u8; INLINE_CAPACITY] {
        self.packed.to_le_bytes()
    }

    /// Compare against raw bytes by shifting them out of the packed word.
    pub fn eq_bytes(self, bytes: &[u8]) -> bool {
        if bytes.len() != self.len() {
            return false;
        }
        let mut packed = self.packed;
        for &b in bytes {
            if packed as u8 != b {
                return false;
            }
            packed >>= 8;
        }
        true
    }
}

impl fmt::Debug for InlineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InlineKey({:?})", KeyRef::Inline(*self))
    }
}

// =============================================================================
// Borrowed key view
// =============================================================================

/// A key as stored in, or searched for in, a table.
///
/// Tables only produce `Bytes` for keys longer than [`INLINE_CAPACITY`].
#[derive(Clone, Copy)]
pub enum KeyRef<'a> {
    Inline(InlineKey),
    Bytes(&'a [u8]),
}

impl<'a> KeyRef<'a> {
    /// Canonical form of `bytes`: inline when it fits.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TableError::EmptyKey);
        }
        Ok(match InlineKey::new(bytes) {
            Some(inline) => KeyRef::Inline(inline),
            None => KeyRef::Bytes(bytes),
        })
    }

    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            KeyRef::Inline(key) => key.len(),
            KeyRef::Bytes(bytes) => bytes.len(),
        }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self, KeyRef::Inline(_))
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        match self {
            KeyRef::Inline(key) => hash_inline(*key),
            KeyRef::Bytes(bytes) => hash_bytes(bytes),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            KeyRef::Inline(key) => key.to_bytes()[..key.len()].to_vec(),
            KeyRef::Bytes(bytes) => bytes.to_vec(),
        }
    }

    /// Run `f` over the key bytes without allocating.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            KeyRef::Inline(key) => f(&key.to_bytes()[..key.len()]),
            KeyRef::Bytes(bytes) => f(bytes),
        }
    }
}

impl PartialEq for KeyRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyRef::Inline(a), KeyRef::Inline(b)) => a == b,
            (KeyRef::Inline(a), KeyRef::Bytes(b)) | (KeyRef::Bytes(b), KeyRef::Inline(a)) => {
                a.eq_bytes(b)
            }
            (KeyRef::Bytes(a), KeyRef::Bytes(b)) => a == b,
        }
    }
}

impl Eq for KeyRef<'_> {}

impl PartialEq<[u8]> for KeyRef<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        match self {
            KeyRef::Inline(key) => key.eq_bytes(other),
            KeyRef::Bytes(bytes) => *bytes == other,
        }
    }
}

impl PartialEq<&[u8]> for KeyRef<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        *self == **other
    }
}

impl fmt::Debug for KeyRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with_bytes(|bytes| {
            f.write_str("b\"")?;
            for &b in bytes {
                write!(f, "{}", std::ascii::escape_default(b))?;
            }
            f.write_str("\"")
        })
    }
}
