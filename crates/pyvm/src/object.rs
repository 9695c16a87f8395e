use std::fmt::{self, Write};

use num_bigint::BigInt;
use num_traits::ToPrimitive;

/// A Python value that can cross the command interface.
///
/// This is the public-facing value type for `set` and `get`. It owns all its data
/// and can be freely cloned, serialized, or stored. Runtimes convert their own
/// internal values into `Object` when answering `get`, and refuse values that have
/// no `Object` mapping (functions, modules, exceptions) as unrepresentable.
///
/// # JSON mapping
///
/// [`Object::from_json_value`] is how `Vm::set_serialized` turns serde output
/// into a value:
///
/// - JSON `null` → `None`
/// - JSON `true`/`false` → `Bool`
/// - JSON integer → `Int` (integers beyond `i64` become `BigInt`)
/// - JSON float → `Float`
/// - JSON string → `String`
/// - JSON array → `List`
/// - JSON object → `Dict` with string keys
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Object {
    /// Python's `None` singleton.
    None,
    /// Python boolean (`True` or `False`).
    Bool(bool),
    /// Python integer (64-bit signed).
    Int(i64),
    /// Python arbitrary-precision integer (larger than i64).
    BigInt(BigInt),
    /// Python float (64-bit IEEE 754).
    Float(f64),
    /// Python string (UTF-8).
    String(String),
    /// Python bytes object.
    Bytes(Vec<u8>),
    /// Python list (mutable sequence).
    List(Vec<Self>),
    /// Python tuple (immutable sequence).
    Tuple(Vec<Self>),
    /// Python dictionary (insertion-ordered mapping).
    Dict(DictPairs),
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            _ => self.repr_fmt(f),
        }
    }
}

impl Object {
    /// Returns the Python type name of this value (e.g. `"int"`, `"list"`).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
        }
    }

    /// Whether this value may be used as a dict key.
    ///
    /// Lists and dicts are unhashable; tuples are hashable when all their items are.
    #[must_use]
    pub fn is_hashable(&self) -> bool {
        match self {
            Self::List(_) | Self::Dict(_) => false,
            Self::Tuple(items) => items.iter().all(Self::is_hashable),
            _ => true,
        }
    }

    /// Checks that this value can be handed to a runtime.
    ///
    /// Every dict key, at any depth, must be hashable.
    pub fn validate(&self) -> Result<(), InvalidInputError> {
        match self {
            Self::List(items) | Self::Tuple(items) => items.iter().try_for_each(Self::validate),
            Self::Dict(pairs) => pairs.iter().try_for_each(|(key, value)| {
                if !key.is_hashable() {
                    return Err(InvalidInputError::unhashable(key.type_name()));
                }
                key.validate()?;
                value.validate()
            }),
            _ => Ok(()),
        }
    }

    /// Returns the Python `repr()` of this value.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut s = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut s);
        s
    }

    /// Builds an `Object` from a JSON value using the natural mapping.
    ///
    /// Integers that do not fit in `i64` become `BigInt`. Numbers that are neither
    /// integers nor finite floats are rejected.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, InvalidInputError> {
        use serde_json::Value as JV;
        Ok(match value {
            JV::Null => Self::None,
            JV::Bool(b) => Self::Bool(b),
            JV::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::BigInt(BigInt::from(u))
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    return Err(InvalidInputError::InvalidType("number"));
                }
            }
            JV::String(s) => Self::String(s),
            JV::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json_value)
                    .collect::<Result<_, _>>()?,
            ),
            JV::Object(map) => Self::Dict(
                map.into_iter()
                    .map(|(k, v)| Ok((Self::String(k), Self::from_json_value(v)?)))
                    .collect::<Result<DictPairs, InvalidInputError>>()?,
            ),
        })
    }

    fn repr_fmt(&self, f: &mut impl Write) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::String(s) => string_repr_fmt(s, f),
            Self::Bytes(b) => bytes_repr_fmt(b, f),
            Self::List(l) => {
                f.write_char('[')?;
                write_items(l, f)?;
                f.write_char(']')
            }
            Self::Tuple(t) => {
                f.write_char('(')?;
                write_items(t, f)?;
                if t.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(d) => {
                f.write_char('{')?;
                let mut iter = d.iter();
                if let Some((k, v)) = iter.next() {
                    k.repr_fmt(f)?;
                    f.write_str(": ")?;
                    v.repr_fmt(f)?;
                    for (k, v) in iter {
                        f.write_str(", ")?;
                        k.repr_fmt(f)?;
                        f.write_str(": ")?;
                        v.repr_fmt(f)?;
                    }
                }
                f.write_char('}')
            }
        }
    }
}

fn write_items(items: &[Object], f: &mut impl Write) -> fmt::Result {
    let mut iter = items.iter();
    if let Some(first) = iter.next() {
        first.repr_fmt(f)?;
        for item in iter {
            f.write_str(", ")?;
            item.repr_fmt(f)?;
        }
    }
    Ok(())
}

/// Writes a float the way Python's `repr(float)` does for common values.
pub fn float_repr_fmt(v: f64, f: &mut impl Write) -> fmt::Result {
    if v.is_nan() {
        return f.write_str("nan");
    }
    if v.is_infinite() {
        return f.write_str(if v > 0.0 { "inf" } else { "-inf" });
    }
    let s = v.to_string();
    f.write_str(&s)?;
    if !s.contains('.') && !s.contains('e') {
        f.write_str(".0")?;
    }
    Ok(())
}

/// Writes a string with Python's quoting rules for `repr(str)`.
///
/// Single quotes are preferred; double quotes are used when the string contains
/// a single quote but no double quote.
pub fn string_repr_fmt(s: &str, f: &mut impl Write) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if c.is_control() => write!(f, "\\x{:02x}", u32::from(c))?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

/// Writes a bytes literal the way Python's `repr(bytes)` does.
pub fn bytes_repr_fmt(bytes: &[u8], f: &mut impl Write) -> fmt::Result {
    let has_single = bytes.contains(&b'\'');
    let has_double = bytes.contains(&b'"');
    let quote = if has_single && !has_double { '"' } else { '\'' };

    f.write_char('b')?;
    f.write_char(quote)?;
    for &byte in bytes {
        match byte {
            b'\\' => f.write_str("\\\\")?,
            b'\t' => f.write_str("\\t")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\'' if quote == '\'' => f.write_str("\\'")?,
            b'"' if quote == '"' => f.write_str("\\\"")?,
            // printable ASCII
            0x20..=0x7e => f.write_char(byte as char)?,
            _ => write!(f, "\\x{byte:02x}")?,
        }
    }
    f.write_char(quote)
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Int(a), Self::BigInt(b)) | (Self::BigInt(b), Self::Int(a)) => BigInt::from(*a) == *b,
            // bit equality keeps NaN == NaN for round-trip comparisons
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<BigInt> for Object {
    fn from(value: BigInt) -> Self {
        match value.to_i64() {
            Some(i) => Self::Int(i),
            None => Self::BigInt(value),
        }
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Object {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Object {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Self>> for Object {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl From<()> for Object {
    fn from((): ()) -> Self {
        Self::None
    }
}

/// Error returned when a value cannot be handed to a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidInputError {
    /// The input type has no runtime representation.
    InvalidType(&'static str),
    /// A dict key of the given type is not hashable.
    Unhashable(&'static str),
    /// The value could not be serialized into an `Object`.
    Serialize(String),
    /// A binding name that is not a usable Python identifier.
    InvalidName(String),
    /// Source text containing a NUL character.
    NulInSource,
}

impl InvalidInputError {
    /// Creates a new `InvalidInputError` for an unhashable key type.
    #[must_use]
    pub fn unhashable(type_name: &'static str) -> Self {
        Self::Unhashable(type_name)
    }
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidType(type_name) => write!(f, "'{type_name}' is not a valid input value"),
            Self::Unhashable(type_name) => write!(f, "unhashable type: '{type_name}'"),
            Self::Serialize(msg) => write!(f, "value is not representable: {msg}"),
            Self::InvalidName(name) => write!(f, "{name:?} is not a valid variable name"),
            Self::NulInSource => f.write_str("source code cannot contain null bytes"),
        }
    }
}

impl std::error::Error for InvalidInputError {}

/// A collection of key-value pairs representing Python dictionary contents.
///
/// Used by `Object::Dict` to store dictionary entries while preserving
/// insertion order. Keys and values are both `Object` instances.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DictPairs(Vec<(Object, Object)>);

impl From<Vec<(Object, Object)>> for DictPairs {
    fn from(pairs: Vec<(Object, Object)>) -> Self {
        Self(pairs)
    }
}

impl IntoIterator for DictPairs {
    type Item = (Object, Object);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DictPairs {
    type Item = &'a (Object, Object);
    type IntoIter = std::slice::Iter<'a, (Object, Object)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(Object, Object)> for DictPairs {
    fn from_iter<T: IntoIterator<Item = (Object, Object)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl DictPairs {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Object, Object)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        let value = Object::List(vec![
            Object::Int(1),
            Object::Float(2.0),
            Object::String("it's".to_owned()),
            Object::Tuple(vec![Object::None]),
            Object::Bool(true),
        ]);
        assert_eq!(value.py_repr(), "[1, 2.0, \"it's\", (None,), True]");
        assert_eq!(Object::String("hi".to_owned()).to_string(), "hi");
    }

    #[test]
    fn json_integers_beyond_i64_become_bigint() {
        let obj = Object::from_json_value(serde_json::json!(u64::MAX)).unwrap();
        assert_eq!(obj, Object::BigInt(BigInt::from(u64::MAX)));
        assert_eq!(obj.type_name(), "int");
    }

    #[test]
    fn dict_with_list_key_is_invalid() {
        let dict = Object::Dict(vec![(Object::List(vec![]), Object::None)].into());
        assert_eq!(dict.validate(), Err(InvalidInputError::Unhashable("list")));
    }
}
