//! Closed value variant for application state
//!
//! [`Value`] represents every shape the shared state can take: scalars,
//! sequences, and nested mappings. Path walking and copy-on-write logic
//! pattern-match on it exhaustively instead of probing types at runtime.
//!
//! Containers are wrapped in [`Arc`], so cloning a value is cheap and a
//! "modified" value shares every untouched subtree with its ancestor.

use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A sequence of map keys addressing a location in nested state.
///
/// Paths are short in practice, so the first few segments live inline.
pub type Path = SmallVec<[String; 4]>;

/// Build a [`Path`] from string-ish segments.
#[macro_export]
macro_rules! path {
    ($($k:expr),* $(,)?) => {{
        let mut p = $crate::value::Path::new();
        $( p.push(String::from($k)); )*
        p
    }};
}

/// Build a [`Value::Map`] from `key => value` pairs; values go through
/// `Value::from`, so literals and nested `vmap!`s both work.
#[macro_export]
macro_rules! vmap {
    () => { $crate::value::Value::empty_map() };
    ($($k:expr => $v:expr),+ $(,)?) => {{
        let mut m = ::std::collections::BTreeMap::new();
        $( m.insert(String::from($k), $crate::value::Value::from($v)); )+
        $crate::value::Value::Map(::std::sync::Arc::new(m))
    }};
}

/// An immutable nested state value.
///
/// Equality is reflexive, including for NaN floats: every compare-and-swap
/// retry loop in the runtime compares a value against its own clone, so a
/// non-reflexive leaf would spin those loops forever. Floats therefore
/// compare by bit pattern (which also distinguishes `0.0` from `-0.0`).
#[derive(Clone, Debug)]
pub enum Value {
    /// No value / null
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Ordered sequence of values
    Seq(Arc<Vec<Value>>),
    /// Nested associative mapping
    Map(Arc<BTreeMap<String, Value>>),
}

impl Value {
    /// An empty mapping.
    pub fn empty_map() -> Self {
        Value::Map(Arc::new(BTreeMap::new()))
    }

    /// Returns true if this is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this is a mapping.
    #[inline]
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Returns true if this is a sequence.
    #[inline]
    pub fn is_seq(&self) -> bool {
        matches!(self, Value::Seq(_))
    }

    /// Try to convert to i64, truncating from Float if needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Try to convert to f64, coercing from Int if needed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the mapping entries, if this is a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the sequence items, if this is a sequence.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(v) => Some(v),
            _ => None,
        }
    }

    /// The variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(Arc::new(v))
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Value::Map(Arc::new(iter.into_iter().collect()))
    }
}
