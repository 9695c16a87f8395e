use std::{
    cell::RefCell,
    fmt::{self, Write},
    rc::Rc,
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use pyvm::{Object, Stream, bytes_repr_fmt, float_repr_fmt, string_repr_fmt};

use crate::{
    builtins::{Builtin, Method},
    exception_private::{ExcType, RunResult, SimpleException},
};

/// Top-level bindings of a program.
pub(crate) type Namespace = IndexMap<String, Value>;

/// A value inside the interpreter.
///
/// Mutable containers are shared through `Rc<RefCell<_>>`, so aliasing behaves like
/// Python: `b = a; b.append(1)` is visible through `a`.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Only used for integers outside `i64`; see [`Value::from_bigint`].
    BigInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Self>>>),
    Tuple(Rc<[Self]>),
    Dict(Rc<RefCell<Dict>>),
    Range(Range),
    Module(Rc<Module>),
    Stream(Stream),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    ExcClass(ExcType),
    Exception(Rc<SimpleException>),
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        match i64::try_from(n) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::BigInt(Rc::new(BigInt::from(n))),
        }
    }
}

impl Value {
    /// Wraps a big integer, demoting it to `Int` when it fits.
    pub(crate) fn from_bigint(b: BigInt) -> Self {
        match b.to_i64() {
            Some(i) => Self::Int(i),
            None => Self::BigInt(Rc::new(b)),
        }
    }

    pub(crate) fn new_dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range(_) => "range",
            Self::Module(_) => "module",
            Self::Stream(_) => "TextIOWrapper",
            Self::Builtin(b) if b.is_type() => "type",
            Self::Builtin(_) | Self::Method(_) => "builtin_function_or_method",
            Self::ExcClass(_) => "type",
            Self::Exception(exc) => exc.exc_type.into(),
        }
    }

    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(b) => !b.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::Dict(d) => !d.borrow().is_empty(),
            Self::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    /// `int` view of a value usable as an index or count, including `bool`.
    pub(crate) fn as_index(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Hash key for dict storage.
    ///
    /// Numbers that compare equal share a key: `1`, `1.0` and `True` all hit the
    /// same slot. Returns the offending type name for unhashable values.
    pub(crate) fn key(&self) -> Result<Key, &'static str> {
        Ok(match self {
            Self::None => Key::None,
            Self::Bool(b) => Key::Int(i64::from(*b)),
            Self::Int(i) => Key::Int(*i),
            Self::BigInt(b) => Key::BigInt(BigInt::clone(b)),
            Self::Float(f) => float_key(*f),
            Self::Str(s) => Key::Str(Rc::clone(s)),
            Self::Bytes(b) => Key::Bytes(Rc::clone(b)),
            Self::Tuple(items) => Key::Tuple(items.iter().map(Self::key).collect::<Result<_, _>>()?),
            Self::Range(r) => Key::Range(*r),
            Self::Module(m) => Key::Module(m.name),
            Self::Stream(s) => Key::Stream(*s),
            Self::Builtin(b) => Key::Builtin(*b),
            Self::ExcClass(e) => Key::ExcClass(*e),
            Self::Exception(e) => Key::Identity(Rc::as_ptr(e).cast::<()>() as usize),
            Self::Method(m) => Key::Identity(Rc::as_ptr(m).cast::<()>() as usize),
            Self::List(_) | Self::Dict(_) => return Err(self.type_name()),
        })
    }

    pub(crate) fn py_repr(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.repr_fmt(&mut out, &mut Vec::new());
        out
    }

    /// `str(value)`: strings as-is, everything else as its repr.
    pub(crate) fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.py_str(),
            _ => self.py_repr(),
        }
    }

    /// `seen` holds the containers currently being printed, so cycles render as `[...]`.
    fn repr_fmt(&self, f: &mut String, seen: &mut Vec<usize>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Float(v) => float_repr_fmt(*v, f),
            Self::Str(s) => string_repr_fmt(s, f),
            Self::Bytes(b) => bytes_repr_fmt(b, f),
            Self::List(list) => {
                let id = Rc::as_ptr(list).cast::<()>() as usize;
                if seen.contains(&id) {
                    return f.write_str("[...]");
                }
                seen.push(id);
                f.write_char('[')?;
                write_items(&list.borrow(), f, seen)?;
                seen.pop();
                f.write_char(']')
            }
            Self::Tuple(items) => {
                f.write_char('(')?;
                write_items(items, f, seen)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            Self::Dict(dict) => {
                let id = Rc::as_ptr(dict).cast::<()>() as usize;
                if seen.contains(&id) {
                    return f.write_str("{...}");
                }
                seen.push(id);
                f.write_char('{')?;
                for (i, (k, v)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    k.repr_fmt(f, seen)?;
                    f.write_str(": ")?;
                    v.repr_fmt(f, seen)?;
                }
                seen.pop();
                f.write_char('}')
            }
            Self::Range(r) => {
                if r.step == 1 {
                    write!(f, "range({}, {})", r.start, r.stop)
                } else {
                    write!(f, "range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Self::Module(m) => write!(f, "<module '{}' (built-in)>", m.name),
            Self::Stream(s) => write!(f, "<_io.TextIOWrapper name='<{s}>' mode='w' encoding='utf-8'>"),
            Self::Builtin(b) if b.is_type() => write!(f, "<class '{b}'>"),
            Self::Builtin(b) => write!(f, "<built-in function {b}>"),
            Self::Method(m) => write!(
                f,
                "<built-in method {} of {} object>",
                m.method.short_name(),
                m.receiver.type_name()
            ),
            Self::ExcClass(e) => write!(f, "<class '{e}'>"),
            Self::Exception(exc) => f.write_str(&exc.py_repr()),
        }
    }

    /// Converts to the public form, or `None` when this value (or something it
    /// contains) has no `Object` mapping. Returns the offending type name then.
    pub(crate) fn to_object(&self) -> Result<Object, &'static str> {
        self.to_object_inner(&mut Vec::new())
    }

    fn to_object_inner(&self, seen: &mut Vec<usize>) -> Result<Object, &'static str> {
        Ok(match self {
            Self::None => Object::None,
            Self::Bool(b) => Object::Bool(*b),
            Self::Int(i) => Object::Int(*i),
            Self::BigInt(b) => Object::BigInt(BigInt::clone(b)),
            Self::Float(f) => Object::Float(*f),
            Self::Str(s) => Object::String(s.to_string()),
            Self::Bytes(b) => Object::Bytes(b.to_vec()),
            Self::List(list) => {
                let id = Rc::as_ptr(list).cast::<()>() as usize;
                if seen.contains(&id) {
                    return Err("list");
                }
                seen.push(id);
                let items = list
                    .borrow()
                    .iter()
                    .map(|v| v.to_object_inner(seen))
                    .collect::<Result<_, _>>()?;
                seen.pop();
                Object::List(items)
            }
            Self::Tuple(items) => Object::Tuple(
                items
                    .iter()
                    .map(|v| v.to_object_inner(seen))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Dict(dict) => {
                let id = Rc::as_ptr(dict).cast::<()>() as usize;
                if seen.contains(&id) {
                    return Err("dict");
                }
                seen.push(id);
                let pairs = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| -> Result<_, &'static str> { Ok((k.to_object_inner(seen)?, v.to_object_inner(seen)?)) })
                    .collect::<Result<_, _>>()?;
                seen.pop();
                Object::Dict(pairs)
            }
            other => return Err(other.type_name()),
        })
    }

    /// Builds a runtime value from a caller-supplied `Object`.
    pub(crate) fn from_object(obj: Object) -> RunResult<Self> {
        Ok(match obj {
            Object::None => Self::None,
            Object::Bool(b) => Self::Bool(b),
            Object::Int(i) => Self::Int(i),
            Object::BigInt(b) => Self::from_bigint(b),
            Object::Float(f) => Self::Float(f),
            Object::String(s) => Self::from(s),
            Object::Bytes(b) => Self::Bytes(b.into()),
            Object::List(items) => Self::from(items.into_iter().map(Self::from_object).collect::<RunResult<Vec<_>>>()?),
            Object::Tuple(items) => {
                Self::Tuple(items.into_iter().map(Self::from_object).collect::<RunResult<Rc<[_]>>>()?)
            }
            Object::Dict(pairs) => {
                let mut dict = Dict::default();
                for (k, v) in pairs {
                    dict.insert(Self::from_object(k)?, Self::from_object(v)?)?;
                }
                Self::new_dict(dict)
            }
        })
    }
}

fn write_items(items: &[Value], f: &mut String, seen: &mut Vec<usize>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.repr_fmt(f, seen)?;
    }
    Ok(())
}

#[expect(clippy::cast_possible_truncation, reason = "guarded by the fract and range checks")]
fn float_key(f: f64) -> Key {
    if f.fract() == 0.0 && f.abs() < 9.2e18 {
        Key::Int(f as i64)
    } else {
        Key::Float(f.to_bits())
    }
}

/// Hashable identity of a [`Value`] used by [`Dict`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Key {
    None,
    Int(i64),
    BigInt(BigInt),
    Float(u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<Key>),
    Range(Range),
    Module(&'static str),
    Stream(Stream),
    Builtin(Builtin),
    ExcClass(ExcType),
    Identity(usize),
}

/// Insertion-ordered dict; each slot keeps the key as first inserted.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict {
    map: IndexMap<Key, (Value, Value)>,
}

impl Dict {
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.values().map(|(k, v)| (k, v))
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|(k, _)| k)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.map.values().map(|(_, v)| v)
    }

    pub(crate) fn insert(&mut self, key: Value, value: Value) -> RunResult<()> {
        let hashed = key.key().map_err(ExcType::type_error_unhashable_dict_key)?;
        match self.map.get_mut(&hashed) {
            Some(slot) => slot.1 = value,
            None => {
                self.map.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &Value) -> RunResult<Option<&Value>> {
        let hashed = key.key().map_err(unhashable)?;
        Ok(self.map.get(&hashed).map(|(_, v)| v))
    }

    pub(crate) fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        let hashed = key.key().map_err(unhashable)?;
        Ok(self.map.shift_remove(&hashed).map(|(_, v)| v))
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }
}

fn unhashable(type_name: &'static str) -> crate::exception_private::RunError {
    ExcType::TypeError.msg(format!("unhashable type: '{type_name}'"))
}

/// `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub(crate) fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (i128::from(self.start), i128::from(self.stop), i128::from(self.step))
        } else {
            (i128::from(self.stop), i128::from(self.start), -i128::from(self.step))
        };
        if lo >= hi {
            0
        } else {
            usize::try_from((hi - lo - 1) / step + 1).unwrap_or(usize::MAX)
        }
    }

    /// The `index`th element, if in range.
    pub(crate) fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i128::try_from(index).ok()? * i128::from(self.step);
        i64::try_from(i128::from(self.start) + offset).ok()
    }

    pub(crate) fn contains(&self, n: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= n && n < self.stop
        } else {
            self.stop < n && n <= self.start
        };
        in_bounds && (i128::from(n) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// A built-in module.
#[derive(Debug)]
pub(crate) struct Module {
    pub name: &'static str,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

/// A method looked up on a value, ready to be called.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

/// Iteration over a value, following Python's semantics for live lists: items
/// appended while looping are visited.
#[derive(Debug)]
pub(crate) enum ValueIter {
    List { list: Rc<RefCell<Vec<Value>>>, index: usize },
    Items(std::vec::IntoIter<Value>),
    Range { range: Range, index: usize },
    Chars { s: Rc<str>, offset: usize },
}

impl ValueIter {
    pub(crate) fn new(value: &Value) -> RunResult<Self> {
        Ok(match value {
            Value::List(list) => Self::List {
                list: Rc::clone(list),
                index: 0,
            },
            Value::Tuple(items) => Self::Items(items.to_vec().into_iter()),
            Value::Dict(dict) => Self::Items(dict.borrow().keys().cloned().collect::<Vec<_>>().into_iter()),
            Value::Bytes(bytes) => Self::Items(
                bytes
                    .iter()
                    .map(|b| Value::Int(i64::from(*b)))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Range(range) => Self::Range {
                range: *range,
                index: 0,
            },
            Value::Str(s) => Self::Chars {
                s: Rc::clone(s),
                offset: 0,
            },
            other => return Err(ExcType::type_error_not_iterable(other)),
        })
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            Self::Items(items) => items.next(),
            Self::Range { range, index } => {
                let item = range.get(*index).map(Value::Int);
                *index += 1;
                item
            }
            Self::Chars { s, offset } => {
                let c = s[*offset..].chars().next()?;
                *offset += c.len_utf8();
                Some(Value::from(c.to_string()))
            }
        }
    }
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let at = if index < 0 { index + len } else { index };
    if (0..len).contains(&at) { usize::try_from(at).ok() } else { None }
}

/// Collects any iterable into a `Vec`.
pub(crate) fn collect(value: &Value) -> RunResult<Vec<Value>> {
    match value {
        Value::List(list) => Ok(list.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Ok(ValueIter::new(other)?.collect()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn equal_numbers_share_a_dict_slot() {
        let mut dict = Dict::default();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(Value::new_dict(dict).py_repr(), "{1: 'bool'}");
    }

    #[test]
    fn lists_are_unhashable() {
        let mut dict = Dict::default();
        let err = dict.insert(Value::from(vec![]), Value::None).unwrap_err();
        assert_eq!(
            err.raise_ref().exc.py_str(),
            "cannot use 'list' as a dict key (unhashable type: 'list')"
        );
    }

    #[test]
    fn recursive_list_repr() {
        let list = Rc::new(RefCell::new(vec![Value::Int(1)]));
        list.borrow_mut().push(Value::List(Rc::clone(&list)));
        let value = Value::List(Rc::clone(&list));
        assert_eq!(value.py_repr(), "[1, [...]]");
        assert_eq!(value.to_object(), Err("list"));
        // break the cycle so the test does not leak
        list.borrow_mut().clear();
    }

    #[test]
    fn range_arithmetic() {
        let r = Range {
            start: 10,
            stop: 0,
            step: -3,
        };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(1));
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert!(!r.contains(0));
    }

    #[test]
    fn objects_convert_both_ways() {
        let obj = Object::Dict(
            vec![(
                Object::String("k".to_owned()),
                Object::Tuple(vec![Object::Int(1), Object::Bytes(b"x".to_vec())]),
            )]
            .into(),
        );
        let value = Value::from_object(obj.clone()).unwrap();
        assert_eq!(value.py_repr(), "{'k': (1, b'x')}");
        assert_eq!(value.to_object(), Ok(obj));
    }
}
