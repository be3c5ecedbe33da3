//! Hybrid array/hash table, grounded on the teacher's
//! `lua_value/lua_table/mod.rs` split representation but simplified to a
//! single dense array part plus an insertion-ordered hash part (the teacher's
//! `type_array`/`value_array` split is a micro-optimization this crate has no
//! use for).

use ahash::RandomState;
use indexmap::IndexMap;

use super::LuaValue;
use crate::gc::ids::GcRef;
use crate::gc::object::Trace;

#[derive(Default)]
pub struct LuaTable {
    /// 1-based dense run; `array[0]` holds the value for integer key `1`.
    array: Vec<LuaValue>,
    hash: IndexMap<LuaValue, LuaValue, RandomState>,
}

/// An integer-valued key narrows to its array-part slot when it falls
/// exactly on `len(array) + 1`, matching Lua's array/hash border behavior.
fn as_array_index(key: &LuaValue) -> Option<i64> {
    match key {
        LuaValue::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= i64::MAX as f64 => {
            Some(*n as i64)
        }
        _ => None,
    }
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable { array: Vec::new(), hash: IndexMap::with_hasher(RandomState::new()) }
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = as_array_index(key) {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[(i - 1) as usize];
            }
        }
        self.hash.get(key).copied().unwrap_or(LuaValue::Nil)
    }

    /// Assigns `value` to `key`. A `nil` value removes the key. After an
    /// insertion at the array's current border (`len+1`), repeatedly pulls
    /// any hash-part entries that now continue the dense run into the array
    /// part (the "merge-up" invariant).
    pub fn set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(i) = as_array_index(&key) {
            let idx = i as usize;
            if idx >= 1 && idx <= self.array.len() {
                if value.is_nil() && idx == self.array.len() {
                    self.array.pop();
                } else {
                    self.array[idx - 1] = value;
                }
                return;
            }
            if idx == self.array.len() + 1 {
                if value.is_nil() {
                    self.hash.swap_remove(&key);
                    return;
                }
                self.array.push(value);
                self.merge_up();
                return;
            }
        }
        if value.is_nil() {
            self.hash.swap_remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// Appends `value` as the array part's new last element unconditionally
    /// — no nil-erase, no merge-up. Used for a table constructor's any-count
    /// trailing item, which the VM drains left-to-right in already-known
    /// array order rather than through `set`'s single-key semantics.
    pub fn append(&mut self, value: LuaValue) {
        self.array.push(value);
    }

    /// Pulls consecutive integer keys `len(array)+1, len(array)+2, ...` out
    /// of the hash part into the array part, as long as they exist.
    fn merge_up(&mut self) {
        loop {
            let next_key = LuaValue::Number((self.array.len() + 1) as f64);
            match self.hash.swap_remove(&next_key) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// Lua's `#` border operator: any `n` such that `t[n] ~= nil` and
    /// `t[n+1] == nil`. With no holes in the array part this is simply its
    /// length.
    pub fn length(&self) -> i64 {
        self.array.len() as i64
    }

    /// Size of the hash part, independent of `length()`'s array-only border.
    /// Exists for introspection (tests, debugging) — no opcode reads it.
    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    /// Stateless iteration for `next`, keyed on insertion order: array part
    /// first (in index order), then the hash part (in insertion order, via
    /// `IndexMap`) — resolving the open question of what order `next` visits
    /// keys in.
    pub fn next_key(&self, key: &LuaValue) -> Option<(LuaValue, LuaValue)> {
        match key {
            LuaValue::Nil => {
                if let Some(v) = self.array.first() {
                    return Some((LuaValue::Number(1.0), *v));
                }
                self.hash.get_index(0).map(|(&k, &v)| (k, v))
            }
            _ => {
                if let Some(i) = as_array_index(key) {
                    let idx = i as usize;
                    if idx >= 1 && idx < self.array.len() {
                        return Some((LuaValue::Number((idx + 1) as f64), self.array[idx]));
                    }
                    if idx == self.array.len() {
                        return self.hash.get_index(0).map(|(&k, &v)| (k, v));
                    }
                }
                let pos = self.hash.get_index_of(key)?;
                self.hash.get_index(pos + 1).map(|(&k, &v)| (k, v))
            }
        }
    }
}

impl Trace for LuaTable {
    fn trace(&self, out: &mut Vec<GcRef>) {
        for v in &self.array {
            v.trace(out);
        }
        for (k, v) in &self.hash {
            k.trace(out);
            v.trace(out);
        }
    }
}
