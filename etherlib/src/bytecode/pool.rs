use std::collections::HashMap;

use super::{FunctionCode, MAX_POOL, PoolEntry};

/// Deduplication key; floats compare by bit pattern so `0.0` and `-0.0`
/// stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Null,
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Str(String),
    Unresolved(String),
}

/// Unit-wide constant pool under construction.
#[derive(Debug, Default)]
pub struct Pool {
    entries: Vec<PoolEntry>,
    index: HashMap<Key, u16>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `None` once the pool is full.
    fn intern(&mut self, key: Key, entry: PoolEntry) -> Option<u16> {
        if let Some(i) = self.index.get(&key) {
            return Some(*i);
        }
        let i = self.push(entry)?;
        self.index.insert(key, i);
        Some(i)
    }

    fn push(&mut self, entry: PoolEntry) -> Option<u16> {
        if self.entries.len() >= MAX_POOL {
            return None;
        }
        let i = u16::try_from(self.entries.len()).ok()?;
        self.entries.push(entry);
        Some(i)
    }

    pub fn null(&mut self) -> Option<u16> {
        self.intern(Key::Null, PoolEntry::Null)
    }

    pub fn int(&mut self, v: i32) -> Option<u16> {
        self.intern(Key::Int(v), PoolEntry::Int(v))
    }

    pub fn long(&mut self, v: i64) -> Option<u16> {
        self.intern(Key::Long(v), PoolEntry::Long(v))
    }

    pub fn float(&mut self, v: f32) -> Option<u16> {
        self.intern(Key::Float(v.to_bits()), PoolEntry::Float(v))
    }

    pub fn double(&mut self, v: f64) -> Option<u16> {
        self.intern(Key::Double(v.to_bits()), PoolEntry::Double(v))
    }

    pub fn string(&mut self, s: &str) -> Option<u16> {
        self.intern(Key::Str(s.to_string()), PoolEntry::Str(s.to_string()))
    }

    pub fn unresolved(&mut self, name: &str) -> Option<u16> {
        self.intern(
            Key::Unresolved(name.to_string()),
            PoolEntry::Unresolved(name.to_string()),
        )
    }

    /// Reserves an entry for a function whose code is filled in later.
    pub fn reserve_function(&mut self, name: &str) -> Option<u16> {
        self.push(PoolEntry::Func(FunctionCode {
            name: name.to_string(),
            ..FunctionCode::default()
        }))
    }

    pub fn set_function(&mut self, index: u16, code: FunctionCode) {
        if let Some(slot) = self.entries.get_mut(usize::from(index)) {
            *slot = PoolEntry::Func(code);
        }
    }

    pub fn into_entries(self) -> Vec<PoolEntry> {
        self.entries
    }
}
