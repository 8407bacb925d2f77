//! Dynamic Composite Data
//!
//! Component state that is not a single scalar lives in [`Data`]: a small
//! JSON-like value whose composite variant is a shared [`Node`]. Nodes have
//! identity. Cloning a `Data::Composite` clones the handle, not the contents,
//! and two handles are the "same" value only if they point at the same node.
//!
//! # Why a Custom Value Type
//!
//! The reactive engine needs to observe writes anywhere inside a state tree.
//! Rust has no transparent property interception, so every write goes through
//! an explicit method on [`Node`] (`set`, `delete`, `push`). Once a node has
//! been made reactive (see [`reactive`]), those methods notify the owning
//! effect after each real change.
//!
//! # Submodules
//!
//! - [`tagging`]: the hidden "already reactive" marker.
//! - [`proxy`]: deep wrapping and the intercepted write contract.
//!
//! # Cycles
//!
//! A node may contain itself, directly or indirectly. Wrapping handles this
//! (nodes are marked before their children are visited), but the recursive
//! conversions ([`Data::to_json`] and `Serialize`) do not.

mod proxy;
mod tagging;

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

pub use proxy::{reactive, MAX_ARRAY_GAP};
pub use tagging::{can_be_reactive, is_reactive, mark_as_reactive};

/// Zero-argument callback invoked after a reactive write.
pub type Effect = Arc<dyn Fn() + Send + Sync>;

/// A dynamically typed state value.
#[derive(Clone, Default)]
pub enum Data {
    /// The absence of a value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. Like JSON, all numbers are `f64`.
    Number(f64),
    /// An immutable string.
    String(Arc<str>),
    /// A shared object or array.
    Composite(Node),
}

impl Data {
    /// Create an empty object.
    pub fn object() -> Self {
        Data::Composite(Node::object())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Data::Composite(Node::array())
    }

    /// Build an object from key/value pairs, preserving order.
    pub fn object_from<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Data)>,
    {
        Data::Composite(Node::object_from(entries))
    }

    /// Build an array from values.
    pub fn array_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Data>,
    {
        Data::Composite(Node::array_from(items))
    }

    /// Strict identity comparison.
    ///
    /// Scalars compare by value (`NaN` is never the same as anything).
    /// Composites compare by node identity, never by contents.
    pub fn same(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Null, Data::Null) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => a == b,
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Composite(a), Data::Composite(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Data::Composite(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Data::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Data::Composite(node) => Some(node),
            _ => None,
        }
    }

    /// Read a property of a composite value. Scalars have no properties.
    pub fn get(&self, key: impl Into<Key>) -> Option<Data> {
        self.as_node().and_then(|node| node.get(key))
    }

    /// Deep-copy into a `serde_json::Value`.
    ///
    /// Non-finite numbers become `null`, as in JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Data::Null => serde_json::Value::Null,
            Data::Bool(b) => serde_json::Value::Bool(*b),
            Data::Number(n) => match as_integer(*n) {
                Some(i) => serde_json::Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
            },
            Data::String(s) => serde_json::Value::String(s.to_string()),
            Data::Composite(node) => node.to_json(),
        }
    }
}

/// Integral numbers that round-trip exactly through `i64`.
fn as_integer(n: f64) -> Option<i64> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    (n.fract() == 0.0 && n.abs() <= MAX_EXACT).then_some(n as i64)
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Null => f.write_str("Null"),
            Data::Bool(b) => write!(f, "Bool({b})"),
            Data::Number(n) => write!(f, "Number({n})"),
            Data::String(s) => write!(f, "String({s:?})"),
            Data::Composite(node) => fmt::Debug::fmt(node, f),
        }
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Bool(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Number(value)
    }
}

impl From<i32> for Data {
    fn from(value: i32) -> Self {
        Data::Number(f64::from(value))
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::String(Arc::from(value))
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::String(Arc::from(value))
    }
}

impl From<Node> for Data {
    fn from(node: Node) -> Self {
        Data::Composite(node)
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Data::Null,
            serde_json::Value::Bool(b) => Data::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Data::Number).unwrap_or(Data::Null),
            serde_json::Value::String(s) => Data::from(s),
            serde_json::Value::Array(items) => Data::array_from(items.into_iter().map(Data::from)),
            serde_json::Value::Object(map) => {
                Data::object_from(map.into_iter().map(|(k, v)| (k, Data::from(v))))
            }
        }
    }
}

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Null => serializer.serialize_unit(),
            Data::Bool(b) => serializer.serialize_bool(*b),
            Data::Number(n) => match as_integer(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
            Data::String(s) => serializer.serialize_str(s),
            Data::Composite(node) => node.serialize(serializer),
        }
    }
}

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// A property key: an object field or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl Key {
    /// The key as an object field name. Indices are rendered in decimal.
    fn into_field(self) -> String {
        match self {
            Key::Field(name) => name,
            Key::Index(i) => i.to_string(),
        }
    }

    /// The key as an array index, if it is one (or a canonical decimal field
    /// name: digits only, no sign, no leading zero).
    fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Field(name) => {
                let canonical = match name.as_bytes() {
                    [] => false,
                    [b'0', _, ..] => false,
                    bytes => bytes.iter().all(u8::is_ascii_digit),
                };
                if canonical {
                    name.parse().ok()
                } else {
                    None
                }
            }
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

// ----------------------------------------------------------------------------
// Nodes
// ----------------------------------------------------------------------------

/// Storage behind a node.
enum Body {
    Object(IndexMap<String, Data>),
    Array(Vec<Data>),
}

struct NodeInner {
    /// Visible entries. This is the node's whole enumerable shape.
    body: RwLock<Body>,

    /// Hidden reactive marker. Set at most once and holds the effect that
    /// writes through this node invoke.
    marker: OnceLock<Effect>,
}

/// A shared, identity-bearing object or array.
///
/// Reads go through [`get`](Node::get) and friends; writes go through the
/// intercepted methods in the `proxy` submodule.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    fn with_body(body: Body) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                body: RwLock::new(body),
                marker: OnceLock::new(),
            }),
        }
    }

    /// Create an empty object node.
    pub fn object() -> Self {
        Self::with_body(Body::Object(IndexMap::new()))
    }

    /// Create an empty array node.
    pub fn array() -> Self {
        Self::with_body(Body::Array(Vec::new()))
    }

    /// Create an object node from key/value pairs.
    pub fn object_from<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Data)>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::with_body(Body::Object(map))
    }

    /// Create an array node from values.
    pub fn array_from<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Data>,
    {
        Self::with_body(Body::Array(items.into_iter().collect()))
    }

    /// Whether two handles point at the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.inner.body.read(), Body::Array(_))
    }

    /// Number of entries (fields for objects, slots for arrays).
    pub fn len(&self) -> usize {
        match &*self.inner.body.read() {
            Body::Object(map) => map.len(),
            Body::Array(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one entry.
    pub fn get(&self, key: impl Into<Key>) -> Option<Data> {
        let key = key.into();
        match &*self.inner.body.read() {
            Body::Object(map) => map.get(&key.into_field()).cloned(),
            Body::Array(items) => key.as_index().and_then(|i| items.get(i).cloned()),
        }
    }

    /// Whether an entry exists.
    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        self.get(key).is_some()
    }

    /// Enumerable keys in order. The reactive marker never appears here.
    pub fn keys(&self) -> Vec<Key> {
        match &*self.inner.body.read() {
            Body::Object(map) => map.keys().cloned().map(Key::Field).collect(),
            Body::Array(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    /// Snapshot of the entry values in order.
    pub fn values(&self) -> Vec<Data> {
        match &*self.inner.body.read() {
            Body::Object(map) => map.values().cloned().collect(),
            Body::Array(items) => items.clone(),
        }
    }

    /// Effect attached by the hidden marker, if this node is reactive.
    pub(crate) fn effect(&self) -> Option<Effect> {
        self.inner.marker.get().cloned()
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.inner.marker.get().is_some()
    }

    /// Attach the marker. Returns `false` if the node was already marked.
    pub(crate) fn set_marker(&self, effect: Effect) -> bool {
        self.inner.marker.set(effect).is_ok()
    }

    /// Composite children, snapshotted so no lock is held while visiting them.
    pub(crate) fn composite_children(&self) -> Vec<Node> {
        self.values()
            .into_iter()
            .filter_map(|value| match value {
                Data::Composite(node) => Some(node),
                _ => None,
            })
            .collect()
    }

    fn to_json(&self) -> serde_json::Value {
        match &*self.inner.body.read() {
            Body::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Body::Array(items) => {
                serde_json::Value::Array(items.iter().map(Data::to_json).collect())
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if self.is_array() { "Array" } else { "Object" })
            .field("len", &self.len())
            .field("reactive", &self.is_marked())
            .finish()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let body = self.inner.body.read();
        match &*body {
            Body::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Body::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for v in items {
                    out.serialize_element(v)?;
                }
                out.end()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
