//! Content-hash string interning.
//!
//! Resolves the "pointer identity vs content identity" open question the
//! interner design raises: two calls to `intern` with equal bytes must return
//! the same `StringId`, so interning is keyed by content hash (via `ahash`),
//! not by allocation order. Grounded on the teacher's
//! `gc/string_interner.rs::StringInterner`, adapted to hold ids instead of
//! raw `StringPtr`s since this crate never aliases GC objects through raw
//! pointers.

use ahash::RandomState;
use std::collections::HashMap;

use super::ids::StringId;

/// Strings longer than this many bytes are still heap GC objects, but are
/// not deduplicated through the intern table (mirrors the teacher's
/// `short_string_limit`).
pub const SHORT_STRING_LIMIT: usize = 40;

/// The spec's per-string hash (§3): `h = 5381; for b: h = h*33 + b`. Computed
/// on the raw bytes, independent of the `HashMap`'s own bucketing hasher
/// (`ahash`, used only to index `by_hash` itself).
pub fn djb2(bytes: &[u8]) -> u64 {
    let mut h: u64 = 5381;
    for &b in bytes {
        h = h.wrapping_mul(33).wrapping_add(b as u64);
    }
    h
}

pub struct StringInterner {
    by_hash: HashMap<u64, Vec<StringId>, RandomState>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner { by_hash: HashMap::with_capacity_and_hasher(256, RandomState::new()) }
    }

    pub fn hash_of(&self, s: &str) -> u64 {
        djb2(s.as_bytes())
    }

    /// Look up an already-interned id for `s` given its content hash, probing
    /// `lookup` (a pool accessor) to compare actual bytes and skip collisions.
    pub fn find(&self, hash: u64, s: &str, lookup: impl Fn(StringId) -> Option<String>) -> Option<StringId> {
        let ids = self.by_hash.get(&hash)?;
        ids.iter().copied().find(|&id| lookup(id).as_deref() == Some(s))
    }

    pub fn record(&mut self, hash: u64, id: StringId) {
        self.by_hash.entry(hash).or_default().push(id);
    }

    /// Drop an interned id's entry once the GC has swept the string itself.
    pub fn forget(&mut self, hash: u64, id: StringId) {
        if let Some(ids) = self.by_hash.get_mut(&hash) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_hash.remove(&hash);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
