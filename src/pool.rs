use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::Value;

/// Exact identity of a pooled value: tag plus verbatim text. Unlike `Value`
/// equality, decimals of different scale stay distinct, so `1.0` and `1.00`
/// get separate slots and each rule returns the literal it was written with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Null,
    Bool(bool),
    Number(String),
    Float(u64),
    String(String),
    Array(Vec<ValueKey>),
}

impl From<&Value> for ValueKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Number(d) => ValueKey::Number(d.to_string()),
            Value::Float(f) => ValueKey::Float(f.to_bits()),
            Value::String(s) => ValueKey::String(s.clone()),
            Value::Array(items) => ValueKey::Array(items.iter().map(ValueKey::from).collect()),
        }
    }
}

/// Content that can be deduplicated in the pool.
pub(crate) trait PoolEntry: Clone {
    type Key: Eq + Hash + Debug;

    fn pool_key(&self) -> Self::Key;
}

impl PoolEntry for Value {
    type Key = ValueKey;

    fn pool_key(&self) -> ValueKey {
        ValueKey::from(self)
    }
}

impl PoolEntry for Vec<(Value, u64)> {
    type Key = Vec<(ValueKey, u64)>;

    fn pool_key(&self) -> Self::Key {
        self.iter().map(|(v, w)| (ValueKey::from(v), *w)).collect()
    }
}

impl PoolEntry for Vec<Value> {
    type Key = Vec<ValueKey>;

    fn pool_key(&self) -> Self::Key {
        self.iter().map(ValueKey::from).collect()
    }
}

/// Deduplicating, index-addressed table. Index `i` is the `i`-th distinct
/// entry interned, in first-use order.
#[derive(Debug)]
pub(crate) struct Interner<T: PoolEntry> {
    indices: HashMap<T::Key, usize>,
    entries: Vec<T>,
}

impl<T: PoolEntry> Interner<T> {
    pub(crate) fn new() -> Self {
        Self {
            indices: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Return the index of `entry`, assigning the next free one on first use.
    pub(crate) fn intern(&mut self, entry: &T) -> usize {
        let key = entry.pool_key();
        if let Some(&index) = self.indices.get(&key) {
            return index;
        }
        let index = self.entries.len();
        self.indices.insert(key, index);
        self.entries.push(entry.clone());
        index
    }

    fn freeze(self) -> Box<[T]> {
        self.entries.into_boxed_slice()
    }
}

/// Constant pool under construction: scalar literals, weighted tables and
/// uniform tables, each deduplicated by content.
#[derive(Debug)]
pub(crate) struct PoolBuilder {
    pub(crate) values: Interner<Value>,
    pub(crate) weighted: Interner<Vec<(Value, u64)>>,
    pub(crate) uniform: Interner<Vec<Value>>,
}

/// The frozen pool a compiled evaluator reads from. Never mutated.
#[derive(Debug)]
pub(crate) struct ConstantPool {
    pub(crate) values: Box<[Value]>,
    pub(crate) weighted: Box<[Vec<(Value, u64)>]>,
    pub(crate) uniform: Box<[Vec<Value>]>,
}

impl PoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            values: Interner::new(),
            weighted: Interner::new(),
            uniform: Interner::new(),
        }
    }

    pub(crate) fn freeze(self) -> ConstantPool {
        ConstantPool {
            values: self.values.freeze(),
            weighted: self.weighted.freeze(),
            uniform: self.uniform.freeze(),
        }
    }
}
