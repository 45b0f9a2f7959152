//! Public value types shared by every storage driver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Globally unique node identifier. Assigned monotonically, never reused.
pub type NodeId = u64;

/// Attribute map of a node or an edge.
pub type Attrs = BTreeMap<String, Value>;

/// Typed attribute value.
///
/// Serialized untagged so MessagePack and JSON carry the natural
/// representation of each variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

/// Build an [`Attrs`] map from `key => value` pairs.
///
/// ```
/// let a = graphie::attrs! { "name" => "Ada", "born" => 1815 };
/// assert_eq!(a.len(), 2);
/// ```
#[macro_export]
macro_rules! attrs {
    () => { $crate::Attrs::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Attrs::new();
        $( map.insert(($key).to_string(), $crate::Value::from($value)); )+
        map
    }};
}

/// One side of an edge as seen from a node: the node at the other end
/// plus the edge attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub other: NodeId,
    pub attrs: Attrs,
}

impl Link {
    pub fn new(other: NodeId, attrs: Attrs) -> Self {
        Self { other, attrs }
    }
}

/// Resolved node returned to callers. Always an independent copy of
/// stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub attrs: Attrs,
    pub links_out: Vec<Link>,
    pub links_in: Vec<Link>,
}
