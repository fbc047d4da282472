use std::collections::BTreeMap;

use super::Value;

/// Key under which callers supply the reference clock for time-window tests.
pub const SYSTEM_TIME_KEY: &str = "system.time_utc";

/// One dotted property access against the caller's request context.
///
/// Any `Fn(&str) -> Option<Value>` closure is a lookup, and so is [`Context`].
/// The engine calls it synchronously and never caches across calls.
pub trait ContextLookup {
    fn lookup(&self, key: &str) -> Option<Value>;
}

impl<F> ContextLookup for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn lookup(&self, key: &str) -> Option<Value> {
        self(key)
    }
}

/// Owned request context: a tree of properties addressed by dotted keys such
/// as `"user.@@id"` or `"device.os.version"`.
///
/// A key resolves only to a leaf. Asking for an inner node (`"device.os"`)
/// yields nothing, and writing below an existing leaf replaces that leaf.
#[derive(Debug, Clone, Default)]
pub struct Context {
    root: BTreeMap<String, Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Value),
    Inner(BTreeMap<String, Node>),
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert()`](Self::insert).
    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Set the owner identity used for bucketing, i.e. `<owner_type>.@@id`.
    #[must_use]
    pub fn owner(self, owner_type: &str, id: impl Into<Value>) -> Self {
        self.set(&format!("{owner_type}.@@id"), id)
    }

    /// Set the reference clock read by time-window tests.
    #[must_use]
    pub fn now(self, timestamp: &str) -> Self {
        self.set(SYSTEM_TIME_KEY, timestamp)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        let (parents, name) = match key.rsplit_once('.') {
            Some((parents, name)) => (Some(parents), name),
            None => (None, key),
        };
        let mut level = &mut self.root;
        for segment in parents.into_iter().flat_map(|p| p.split('.')) {
            let node = level
                .entry(segment.to_owned())
                .or_insert_with(|| Node::Inner(BTreeMap::new()));
            if let Node::Leaf(_) = node {
                *node = Node::Inner(BTreeMap::new());
            }
            level = match node {
                Node::Inner(children) => children,
                Node::Leaf(_) => return,
            };
        }
        level.insert(name.to_owned(), Node::Leaf(value));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let mut node = self.root.get(segments.next()?)?;
        for segment in segments {
            node = match node {
                Node::Inner(children) => children.get(segment)?,
                Node::Leaf(_) => return None,
            };
        }
        match node {
            Node::Leaf(value) => Some(value),
            Node::Inner(_) => None,
        }
    }

    /// Build a context from a JSON document. Objects become nested keys;
    /// every other JSON value is stored as a leaf.
    #[cfg(feature = "serde")]
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        let mut ctx = Self::new();
        if let serde_json::Value::Object(map) = json {
            for (key, value) in map {
                ctx.insert_json(key, value);
            }
        }
        ctx
    }

    #[cfg(feature = "serde")]
    fn insert_json(&mut self, key: String, json: serde_json::Value) {
        match json {
            serde_json::Value::Object(map) => {
                for (child, value) in map {
                    self.insert_json(format!("{key}.{child}"), value);
                }
            }
            other => self.insert(&key, Value::from(other)),
        }
    }
}

impl ContextLookup for Context {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}
