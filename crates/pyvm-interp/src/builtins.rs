//! Built-in functions, methods on built-in types, and call dispatch.

use std::{cell::RefCell, cmp::Ordering, rc::Rc, str::FromStr};

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed};
use pyvm::{OutputChannel, Stream};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    exception_private::{ExcType, RunError, RunResult, SimpleException},
    expressions::{CmpOperator, Operator},
    ops::{binary_op, py_cmp, py_eq},
    value::{BoundMethod, Dict, Range, Value, ValueIter, collect, normalize_index},
};

type Kwargs = Vec<(String, Value)>;

/// Functions and types available without import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    Chr,
    Dict,
    Divmod,
    Enumerate,
    Float,
    Int,
    Isinstance,
    Len,
    List,
    Max,
    Min,
    Ord,
    Pow,
    Print,
    Range,
    Repr,
    Reversed,
    Round,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
}

impl Builtin {
    /// Whether this builtin is a class (`int`, `str`, ...) rather than a function.
    pub(crate) fn is_type(self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Dict | Self::Float | Self::Int | Self::List | Self::Range | Self::Str | Self::Tuple
        )
    }

    /// `isinstance(value, self)` for class builtins.
    fn is_instance(self, value: &Value) -> bool {
        match self {
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::Int => matches!(value, Value::Int(_) | Value::BigInt(_) | Value::Bool(_)),
            Self::Float => matches!(value, Value::Float(_)),
            Self::Str => matches!(value, Value::Str(_)),
            Self::List => matches!(value, Value::List(_)),
            Self::Tuple => matches!(value, Value::Tuple(_)),
            Self::Dict => matches!(value, Value::Dict(_)),
            Self::Range => matches!(value, Value::Range(_)),
            _ => false,
        }
    }
}

/// Methods of built-in types, named `type.method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub(crate) enum Method {
    #[strum(serialize = "list.append")]
    ListAppend,
    #[strum(serialize = "list.extend")]
    ListExtend,
    #[strum(serialize = "list.insert")]
    ListInsert,
    #[strum(serialize = "list.pop")]
    ListPop,
    #[strum(serialize = "list.remove")]
    ListRemove,
    #[strum(serialize = "list.index")]
    ListIndex,
    #[strum(serialize = "list.count")]
    ListCount,
    #[strum(serialize = "list.clear")]
    ListClear,
    #[strum(serialize = "list.reverse")]
    ListReverse,
    #[strum(serialize = "list.sort")]
    ListSort,
    #[strum(serialize = "list.copy")]
    ListCopy,
    #[strum(serialize = "dict.get")]
    DictGet,
    #[strum(serialize = "dict.keys")]
    DictKeys,
    #[strum(serialize = "dict.values")]
    DictValues,
    #[strum(serialize = "dict.items")]
    DictItems,
    #[strum(serialize = "dict.pop")]
    DictPop,
    #[strum(serialize = "dict.update")]
    DictUpdate,
    #[strum(serialize = "dict.setdefault")]
    DictSetdefault,
    #[strum(serialize = "dict.clear")]
    DictClear,
    #[strum(serialize = "dict.copy")]
    DictCopy,
    #[strum(serialize = "str.upper")]
    StrUpper,
    #[strum(serialize = "str.lower")]
    StrLower,
    #[strum(serialize = "str.strip")]
    StrStrip,
    #[strum(serialize = "str.lstrip")]
    StrLstrip,
    #[strum(serialize = "str.rstrip")]
    StrRstrip,
    #[strum(serialize = "str.split")]
    StrSplit,
    #[strum(serialize = "str.join")]
    StrJoin,
    #[strum(serialize = "str.startswith")]
    StrStartswith,
    #[strum(serialize = "str.endswith")]
    StrEndswith,
    #[strum(serialize = "str.replace")]
    StrReplace,
    #[strum(serialize = "str.find")]
    StrFind,
    #[strum(serialize = "str.count")]
    StrCount,
    #[strum(serialize = "TextIOWrapper.write")]
    StreamWrite,
    #[strum(serialize = "TextIOWrapper.flush")]
    StreamFlush,
}

impl Method {
    fn lookup(receiver: &Value, attr: &str) -> Option<Self> {
        Self::from_str(&format!("{}.{attr}", receiver.type_name())).ok()
    }

    /// Name without the type prefix, e.g. `append`.
    pub(crate) fn short_name(self) -> &'static str {
        let full: &'static str = self.into();
        full.split_once('.').map_or(full, |(_, name)| name)
    }
}

/// `value.attr`
pub(crate) fn get_attr(value: &Value, attr: &str) -> RunResult<Value> {
    match value {
        Value::Module(module) => {
            if let Some(found) = module.attrs.borrow().get(attr) {
                return Ok(found.clone());
            }
        }
        Value::Exception(exc) if attr == "args" => return Ok(Value::Tuple(exc.args.as_slice().into())),
        _ => {}
    }
    match Method::lookup(value, attr) {
        Some(method) => Ok(Value::Method(Rc::new(BoundMethod {
            receiver: value.clone(),
            method,
        }))),
        None => Err(ExcType::attribute_error(value, attr)),
    }
}

/// `value.attr = new`
pub(crate) fn set_attr(value: &Value, attr: &str, new: Value) -> RunResult<()> {
    match value {
        Value::Module(module) => {
            module.attrs.borrow_mut().insert(attr.to_owned(), new);
            Ok(())
        }
        _ => Err(ExcType::attribute_error(value, attr)),
    }
}

/// `func(*args, **kwargs)`
pub(crate) fn call(func: &Value, args: Vec<Value>, kwargs: Kwargs, output: &OutputChannel) -> RunResult<Value> {
    match func {
        Value::Builtin(builtin) => call_builtin(*builtin, args, kwargs, output),
        Value::Method(bound) => call_method(bound, args, kwargs, output),
        Value::ExcClass(exc_type) => {
            no_kwargs(&exc_type.to_string(), &kwargs)?;
            Ok(Value::Exception(Rc::new(SimpleException::new(*exc_type, args))))
        }
        other => Err(ExcType::TypeError.msg(format!("'{}' object is not callable", other.type_name()))),
    }
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> RunResult<()> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(ExcType::type_error_no_kwargs(name))
    }
}

/// Sorts keyword arguments into the slots named by `allowed`, refusing any other keyword.
fn take_kwargs<const N: usize>(name: &str, kwargs: Kwargs, allowed: [&str; N]) -> RunResult<[Option<Value>; N]> {
    let mut found: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (key, value) in kwargs {
        match allowed.iter().position(|a| *a == key) {
            Some(i) => found[i] = Some(value),
            None => return Err(ExcType::type_error_unexpected_kwarg(name, &key)),
        }
    }
    Ok(found)
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> RunResult<[Value; N]> {
    let len = args.len();
    args.try_into()
        .map_err(|_| ExcType::type_error_arg_count(name, N, len))
}

/// Splits off between `min` and `max` positional arguments.
fn between(name: &str, args: Vec<Value>, min: usize, max: usize) -> RunResult<Vec<Value>> {
    let n = args.len();
    if n < min {
        let plural = if min == 1 { "" } else { "s" };
        return Err(ExcType::TypeError.msg(format!("{name} expected at least {min} argument{plural}, got {n}")));
    }
    if n > max {
        let plural = if max == 1 { "" } else { "s" };
        return Err(ExcType::TypeError.msg(format!("{name} expected at most {max} argument{plural}, got {n}")));
    }
    Ok(args)
}

fn index_arg(value: &Value) -> RunResult<i64> {
    value.as_index().ok_or_else(|| ExcType::type_error_not_integer(value))
}

fn str_arg<'a>(name: &str, value: &'a Value) -> RunResult<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ExcType::TypeError.msg(format!(
            "{name}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn call_builtin(builtin: Builtin, args: Vec<Value>, kwargs: Kwargs, output: &OutputChannel) -> RunResult<Value> {
    let name: &'static str = builtin.into();
    match builtin {
        Builtin::Print => {
            let [sep, end, file, _flush] = take_kwargs(name, kwargs, ["sep", "end", "file", "flush"])?;
            let sep = optional_str("sep", sep)?.unwrap_or_else(|| " ".to_owned());
            let end = optional_str("end", end)?.unwrap_or_else(|| "\n".to_owned());
            let stream = match file {
                None | Some(Value::None) => Stream::Stdout,
                Some(Value::Stream(stream)) => stream,
                Some(other) => return Err(ExcType::attribute_error(&other, "write")),
            };
            let mut text = args.iter().map(Value::py_str).collect::<Vec<_>>().join(&sep);
            text.push_str(&end);
            output.write(stream, &text);
            Ok(Value::None)
        }
        Builtin::Isinstance => {
            no_kwargs(name, &kwargs)?;
            let [value, classes] = exact(name, args)?;
            isinstance(&value, &classes).map(Value::Bool)
        }
        Builtin::Dict => {
            let args = between(name, args, 0, 1)?;
            let mut dict = Dict::default();
            if let Some(source) = args.first() {
                update_dict(&mut dict, source)?;
            }
            for (key, value) in kwargs {
                dict.insert(Value::from(key), value)?;
            }
            Ok(Value::new_dict(dict))
        }
        Builtin::Max | Builtin::Min => {
            let [default] = take_kwargs(name, kwargs, ["default"])?;
            let items = match args.len() {
                0 => return Err(ExcType::TypeError.msg(format!("{name} expected at least 1 argument, got 0"))),
                1 => collect(&args[0])?,
                _ => args,
            };
            let want = if builtin == Builtin::Max { CmpOperator::Gt } else { CmpOperator::Lt };
            let mut iter = items.into_iter();
            let Some(mut best) = iter.next() else {
                return default.ok_or_else(|| ExcType::ValueError.msg(format!("{name}() iterable argument is empty")));
            };
            for item in iter {
                if crate::ops::compare(want, &item, &best)? {
                    best = item;
                }
            }
            Ok(best)
        }
        Builtin::Sum => {
            let [start] = take_kwargs(name, kwargs, ["start"])?;
            let mut args = between(name, args, 1, 2)?;
            let start = if args.len() == 2 { args.pop() } else { start };
            let mut total = start.unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(ExcType::TypeError.msg("sum() can't sum strings [use ''.join(seq) instead]"));
            }
            for item in ValueIter::new(&args[0])? {
                total = binary_op(Operator::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Sorted => {
            let [reverse] = take_kwargs(name, kwargs, ["reverse"])?;
            let [iterable] = exact(name, args)?;
            let mut items = collect(&iterable)?;
            sort_values(&mut items, reverse.is_some_and(|r| r.is_truthy()))?;
            Ok(Value::from(items))
        }
        Builtin::Enumerate => {
            let [start] = take_kwargs(name, kwargs, ["start"])?;
            let mut args = between(name, args, 1, 2)?;
            let start = if args.len() == 2 { args.pop() } else { start };
            let mut n = start.as_ref().map_or(Ok(0), index_arg)?;
            let mut pairs = Vec::new();
            for item in ValueIter::new(&args[0])? {
                pairs.push(Value::Tuple(Rc::from([Value::Int(n), item])));
                n += 1;
            }
            Ok(Value::from(pairs))
        }
        Builtin::Round => {
            let [ndigits] = take_kwargs(name, kwargs, ["ndigits"])?;
            let mut args = between(name, args, 1, 2)?;
            let ndigits = if args.len() == 2 { args.pop() } else { ndigits };
            round(&args[0], ndigits.filter(|n| !matches!(n, Value::None)))
        }
        _ => {
            no_kwargs(name, &kwargs)?;
            call_simple(builtin, name, args)
        }
    }
}

/// Builtins that take positional arguments only.
fn call_simple(builtin: Builtin, name: &'static str, args: Vec<Value>) -> RunResult<Value> {
    match builtin {
        Builtin::Len => {
            let [value] = exact(name, args)?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::List(l) => l.borrow().len(),
                Value::Tuple(t) => t.len(),
                Value::Dict(d) => d.borrow().len(),
                Value::Range(r) => r.len(),
                other => {
                    return Err(ExcType::TypeError.msg(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::from(len))
        }
        Builtin::Str => Ok(match between(name, args, 0, 1)?.first() {
            Some(value) => Value::from(value.py_str()),
            None => Value::from(""),
        }),
        Builtin::Repr => {
            let [value] = exact(name, args)?;
            Ok(Value::from(value.py_repr()))
        }
        Builtin::Bool => Ok(Value::Bool(
            between(name, args, 0, 1)?.first().is_some_and(Value::is_truthy),
        )),
        Builtin::Int => {
            let args = between(name, args, 0, 2)?;
            match args.as_slice() {
                [] => Ok(Value::Int(0)),
                [value] => to_int(value),
                [Value::Str(s), base] => {
                    let base = u32::try_from(index_arg(base)?)
                        .ok()
                        .filter(|b| *b == 0 || (2..=36).contains(b))
                        .ok_or_else(|| ExcType::ValueError.msg("int() base must be >= 2 and <= 36, or 0"))?;
                    parse_int(s, base)
                }
                [_, _] => Err(ExcType::TypeError.msg("int() can't convert non-string with explicit base")),
                _ => Ok(Value::None),
            }
        }
        Builtin::Float => match between(name, args, 0, 1)?.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Float(f)) => Ok(Value::Float(*f)),
            Some(Value::Str(s)) => parse_float(s).map(Value::Float),
            Some(other) => match binary_op(Operator::Mult, other, &Value::Float(1.0)) {
                Ok(value) => Ok(value),
                Err(_) => Err(ExcType::TypeError.msg(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ))),
            },
        },
        Builtin::Abs => {
            let [value] = exact(name, args)?;
            match &value {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::BigInt(b) => Ok(Value::from_bigint(b.abs())),
                other => match other.as_index() {
                    Some(i) => Ok(i.checked_abs().map_or_else(|| Value::from_bigint(BigInt::from(i).abs()), Value::Int)),
                    None => Err(ExcType::TypeError.msg(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::Range => {
            let args = between(name, args, 1, 3)?;
            let ints = args.iter().map(index_arg).collect::<RunResult<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(ExcType::ValueError.msg("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        Builtin::List => Ok(Value::from(match between(name, args, 0, 1)?.first() {
            Some(iterable) => collect(iterable)?,
            None => Vec::new(),
        })),
        Builtin::Tuple => Ok(match between(name, args, 0, 1)?.first() {
            Some(Value::Tuple(items)) => Value::Tuple(Rc::clone(items)),
            Some(iterable) => Value::Tuple(collect(iterable)?.into()),
            None => Value::Tuple(Rc::from([])),
        }),
        Builtin::Reversed => {
            let [seq] = exact(name, args)?;
            if matches!(seq, Value::Dict(_)) {
                return Err(ExcType::TypeError.msg("'dict' object is not reversible"));
            }
            let mut items = collect(&seq)?;
            items.reverse();
            Ok(Value::from(items))
        }
        Builtin::Zip => {
            let mut columns = args.iter().map(ValueIter::new).collect::<RunResult<Vec<_>>>()?;
            let mut rows = Vec::new();
            if columns.is_empty() {
                return Ok(Value::from(rows));
            }
            'outer: loop {
                let mut row = Vec::with_capacity(columns.len());
                for column in &mut columns {
                    match column.next() {
                        Some(item) => row.push(item),
                        None => break 'outer,
                    }
                }
                rows.push(Value::Tuple(row.into()));
            }
            Ok(Value::from(rows))
        }
        Builtin::Any => {
            let [iterable] = exact(name, args)?;
            Ok(Value::Bool(ValueIter::new(&iterable)?.any(|v| v.is_truthy())))
        }
        Builtin::All => {
            let [iterable] = exact(name, args)?;
            Ok(Value::Bool(ValueIter::new(&iterable)?.all(|v| v.is_truthy())))
        }
        Builtin::Ord => {
            let [value] = exact(name, args)?;
            let s = str_arg(name, &value)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => Err(ExcType::TypeError.msg(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        Builtin::Chr => {
            let [value] = exact(name, args)?;
            u32::try_from(index_arg(&value)?)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| ExcType::ValueError.msg("chr() arg not in range(0x110000)"))
        }
        Builtin::Divmod => {
            let [a, b] = exact(name, args)?;
            let quotient = binary_op(Operator::FloorDiv, &a, &b)?;
            let remainder = binary_op(Operator::Mod, &a, &b)?;
            Ok(Value::Tuple(Rc::from([quotient, remainder])))
        }
        Builtin::Pow => {
            let [a, b] = exact(name, args)?;
            binary_op(Operator::Pow, &a, &b)
        }
        Builtin::Print
        | Builtin::Isinstance
        | Builtin::Dict
        | Builtin::Max
        | Builtin::Min
        | Builtin::Sum
        | Builtin::Sorted
        | Builtin::Enumerate
        | Builtin::Round => Ok(Value::None),
    }
}

fn optional_str(name: &str, value: Option<Value>) -> RunResult<Option<String>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => Err(ExcType::TypeError.msg(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn isinstance(value: &Value, classes: &Value) -> RunResult<bool> {
    match classes {
        Value::Builtin(builtin) if builtin.is_type() => Ok(builtin.is_instance(value)),
        Value::ExcClass(exc_type) => Ok(matches!(value, Value::Exception(exc) if exc.exc_type.is_subclass_of(*exc_type))),
        Value::Tuple(options) => {
            for option in options.iter() {
                if isinstance(value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(ExcType::TypeError.msg("isinstance() arg 2 must be a type, a tuple of types, or a union")),
    }
}

fn to_int(value: &Value) -> RunResult<Value> {
    match value {
        Value::Int(_) | Value::BigInt(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => float_to_int(f.trunc()),
        Value::Str(s) => parse_int(s, 10),
        other => Err(ExcType::TypeError.msg(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::ValueError.msg("cannot convert float NaN to integer"));
    }
    BigInt::from_f64(f)
        .map(Value::from_bigint)
        .ok_or_else(|| ExcType::OverflowError.msg("cannot convert float infinity to integer"))
}

/// `int(s, base)`, accepting surrounding whitespace, a sign, underscores between
/// digits, and a radix prefix matching `base` (any prefix when `base` is 0).
fn parse_int(s: &str, base: u32) -> RunResult<Value> {
    let invalid = || ExcType::ValueError.msg(format!("invalid literal for int() with base {base}: {}", Value::from(s).py_repr()));
    let trimmed = s.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |p: &str, radix: u32| (base == 0 || base == radix) && lower.starts_with(p);
    let (radix, digits) = if prefixed("0x", 16) {
        (16, lower[2..].strip_prefix('_').unwrap_or(&lower[2..]))
    } else if prefixed("0o", 8) {
        (8, lower[2..].strip_prefix('_').unwrap_or(&lower[2..]))
    } else if prefixed("0b", 2) {
        (2, lower[2..].strip_prefix('_').unwrap_or(&lower[2..]))
    } else {
        (if base == 0 { 10 } else { base }, lower.as_str())
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), radix).ok_or_else(invalid)?;
    Ok(Value::from_bigint(if negative { -magnitude } else { magnitude }))
}

fn parse_float(s: &str) -> RunResult<f64> {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    let special = match unsigned {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(value) = special {
        return Ok(if lower.starts_with('-') { -value } else { value });
    }
    if unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        if let Ok(value) = lower.parse() {
            return Ok(value);
        }
    }
    Err(ExcType::ValueError.msg(format!(
        "could not convert string to float: {}",
        Value::from(s).py_repr()
    )))
}

fn round(value: &Value, ndigits: Option<Value>) -> RunResult<Value> {
    match (value, ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()),
        (Value::Float(f), Some(n)) => {
            let n = i32::try_from(index_arg(&n)?).unwrap_or(i32::MAX);
            let scale = 10f64.powi(n);
            let scaled = f * scale;
            if scaled.is_finite() {
                Ok(Value::Float(scaled.round_ties_even() / scale))
            } else {
                Ok(Value::Float(*f))
            }
        }
        (other, _) if other.as_index().is_some() || matches!(other, Value::BigInt(_)) => to_int(other),
        (other, _) => Err(ExcType::TypeError.msg(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

/// Stable sort by `<`; on a comparison error the first error is reported.
pub(crate) fn sort_values(items: &mut [Value], reverse: bool) -> RunResult<()> {
    let mut error: Option<RunError> = None;
    items.sort_by(|a, b| {
        if error.is_some() {
            return Ordering::Equal;
        }
        match py_cmp(CmpOperator::Lt, a, b) {
            Ok(Some(ord)) if reverse => ord.reverse(),
            Ok(Some(ord)) => ord,
            Ok(None) => Ordering::Equal,
            Err(err) => {
                error = Some(err);
                Ordering::Equal
            }
        }
    });
    error.map_or(Ok(()), Err)
}

/// `dict.update(source)`: from another dict or from an iterable of pairs.
fn update_dict(dict: &mut Dict, source: &Value) -> RunResult<()> {
    if let Value::Dict(other) = source {
        let pairs: Vec<_> = other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        return Ok(());
    }
    for (i, item) in ValueIter::new(source)?.enumerate() {
        let pair = collect(&item).map_err(|_| {
            ExcType::TypeError.msg(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ExcType::ValueError.msg(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

fn call_method(bound: &BoundMethod, args: Vec<Value>, kwargs: Kwargs, output: &OutputChannel) -> RunResult<Value> {
    let name: &'static str = bound.method.into();
    if bound.method == Method::ListSort {
        let [reverse] = take_kwargs(name, kwargs, ["reverse"])?;
        if !args.is_empty() {
            return Err(ExcType::TypeError.msg("sort() takes no positional arguments"));
        }
        if let Value::List(list) = &bound.receiver {
            let mut items = std::mem::take(&mut *list.borrow_mut());
            let result = sort_values(&mut items, reverse.is_some_and(|r| r.is_truthy()));
            *list.borrow_mut() = items;
            result?;
        }
        return Ok(Value::None);
    }
    no_kwargs(name, &kwargs)?;
    match &bound.receiver {
        Value::List(list) => list_method(bound.method, name, list, args),
        Value::Dict(dict) => dict_method(bound.method, name, dict, args),
        Value::Str(s) => str_method(bound.method, name, s, args),
        Value::Stream(stream) => match bound.method {
            Method::StreamWrite => {
                let [text] = exact(name, args)?;
                let text = match &text {
                    Value::Str(s) => s,
                    other => {
                        return Err(ExcType::TypeError.msg(format!(
                            "write() argument must be str, not {}",
                            other.type_name()
                        )));
                    }
                };
                output.write(*stream, text);
                Ok(Value::from(text.chars().count()))
            }
            _ => {
                exact::<0>(name, args)?;
                Ok(Value::None)
            }
        },
        other => Err(ExcType::attribute_error(other, bound.method.short_name())),
    }
}

fn list_method(
    method: Method,
    name: &str,
    list: &Rc<RefCell<Vec<Value>>>,
    args: Vec<Value>,
) -> RunResult<Value> {
    match method {
        Method::ListAppend => {
            let [item] = exact(name, args)?;
            list.borrow_mut().push(item);
            Ok(Value::None)
        }
        Method::ListExtend => {
            let [iterable] = exact(name, args)?;
            let items = collect(&iterable)?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        Method::ListInsert => {
            let [index, item] = exact(name, args)?;
            let index = index_arg(&index)?;
            let mut items = list.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(usize::try_from(at).unwrap_or(0), item);
            Ok(Value::None)
        }
        Method::ListPop => {
            let args = between(name, args, 0, 1)?;
            let index = args.first().map_or(Ok(-1), index_arg)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(ExcType::IndexError.msg("pop from empty list"));
            }
            let at = normalize_index(index, items.len()).ok_or_else(|| ExcType::IndexError.msg("pop index out of range"))?;
            Ok(items.remove(at))
        }
        Method::ListRemove => {
            let [item] = exact(name, args)?;
            let position = list.borrow().iter().position(|v| py_eq(v, &item));
            match position {
                Some(at) => {
                    list.borrow_mut().remove(at);
                    Ok(Value::None)
                }
                None => Err(ExcType::ValueError.msg("list.remove(x): x not in list")),
            }
        }
        Method::ListIndex => {
            let [item] = exact(name, args)?;
            let position = list.borrow().iter().position(|v| py_eq(v, &item));
            position
                .map(Value::from)
                .ok_or_else(|| ExcType::ValueError.msg(format!("{} is not in list", item.py_repr())))
        }
        Method::ListCount => {
            let [item] = exact(name, args)?;
            let count = list.borrow().iter().filter(|v| py_eq(v, &item)).count();
            Ok(Value::from(count))
        }
        Method::ListClear => {
            exact::<0>(name, args)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        Method::ListReverse => {
            exact::<0>(name, args)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        Method::ListCopy => {
            exact::<0>(name, args)?;
            Ok(Value::from(list.borrow().clone()))
        }
        _ => Err(ExcType::attribute_error(&Value::List(Rc::clone(list)), method.short_name())),
    }
}

fn dict_method(
    method: Method,
    name: &str,
    dict: &Rc<RefCell<Dict>>,
    args: Vec<Value>,
) -> RunResult<Value> {
    match method {
        Method::DictGet => {
            let mut args = between(name, args, 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let found = dict.borrow().get(&args[0])?.cloned();
            Ok(found.or(default).unwrap_or(Value::None))
        }
        Method::DictKeys => {
            exact::<0>(name, args)?;
            Ok(Value::from(dict.borrow().keys().cloned().collect::<Vec<_>>()))
        }
        Method::DictValues => {
            exact::<0>(name, args)?;
            Ok(Value::from(dict.borrow().values().cloned().collect::<Vec<_>>()))
        }
        Method::DictItems => {
            exact::<0>(name, args)?;
            let items = dict
                .borrow()
                .iter()
                .map(|(k, v)| Value::Tuple(Rc::from([k.clone(), v.clone()])))
                .collect::<Vec<_>>();
            Ok(Value::from(items))
        }
        Method::DictPop => {
            let mut args = between(name, args, 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let key = args.swap_remove(0);
            let removed = dict.borrow_mut().remove(&key)?;
            removed.or(default).ok_or_else(|| ExcType::key_error(key))
        }
        Method::DictUpdate => {
            let args = between(name, args, 0, 1)?;
            if let Some(source) = args.first() {
                let mut staged = dict.borrow().clone();
                update_dict(&mut staged, source)?;
                *dict.borrow_mut() = staged;
            }
            Ok(Value::None)
        }
        Method::DictSetdefault => {
            let mut args = between(name, args, 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None }.unwrap_or(Value::None);
            let key = args.swap_remove(0);
            let existing = dict.borrow().get(&key)?.cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    dict.borrow_mut().insert(key, default.clone())?;
                    Ok(default)
                }
            }
        }
        Method::DictClear => {
            exact::<0>(name, args)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        Method::DictCopy => {
            exact::<0>(name, args)?;
            Ok(Value::new_dict(dict.borrow().clone()))
        }
        _ => Err(ExcType::attribute_error(&Value::Dict(Rc::clone(dict)), method.short_name())),
    }
}

fn str_method(method: Method, name: &str, s: &Rc<str>, args: Vec<Value>) -> RunResult<Value> {
    match method {
        Method::StrUpper => {
            exact::<0>(name, args)?;
            Ok(Value::from(s.to_uppercase()))
        }
        Method::StrLower => {
            exact::<0>(name, args)?;
            Ok(Value::from(s.to_lowercase()))
        }
        Method::StrStrip | Method::StrLstrip | Method::StrRstrip => {
            let args = between(name, args, 0, 1)?;
            let chars = match args.first() {
                None | Some(Value::None) => None,
                Some(Value::Str(chars)) => Some(chars.clone()),
                Some(other) => {
                    return Err(ExcType::TypeError.msg(format!(
                        "strip arg must be None or str, not {}",
                        other.type_name()
                    )));
                }
            };
            let strip = |c: char| chars.as_ref().map_or(c.is_whitespace(), |set| set.contains(c));
            let out = match method {
                Method::StrLstrip => s.trim_start_matches(strip),
                Method::StrRstrip => s.trim_end_matches(strip),
                _ => s.trim_matches(strip),
            };
            Ok(Value::from(out))
        }
        Method::StrSplit => {
            let args = between(name, args, 0, 2)?;
            let maxsplit = match args.get(1) {
                Some(n) => usize::try_from(index_arg(n)?).ok(),
                None => None,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => split_whitespace(s, maxsplit),
                Some(Value::Str(sep)) if sep.is_empty() => return Err(ExcType::ValueError.msg("empty separator")),
                Some(Value::Str(sep)) => match maxsplit {
                    Some(n) => s.splitn(n + 1, &**sep).map(Value::from).collect(),
                    None => s.split(&**sep).map(Value::from).collect(),
                },
                Some(other) => {
                    return Err(ExcType::TypeError.msg(format!(
                        "must be str or None, not {}",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::from(parts))
        }
        Method::StrJoin => {
            let [iterable] = exact(name, args)?;
            let mut pieces = Vec::new();
            for (i, item) in ValueIter::new(&iterable)?.enumerate() {
                match item {
                    Value::Str(piece) => pieces.push(piece),
                    other => {
                        return Err(ExcType::TypeError.msg(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::from(pieces.iter().map(|p| &**p).collect::<Vec<_>>().join(&**s)))
        }
        Method::StrStartswith | Method::StrEndswith => {
            let [affix] = exact(name, args)?;
            let options = match &affix {
                Value::Tuple(items) => items.to_vec(),
                _ => vec![affix.clone()],
            };
            for option in &options {
                let option = match option {
                    Value::Str(o) => o,
                    other => {
                        return Err(ExcType::TypeError.msg(format!(
                            "{} first arg must be str or a tuple of str, not {}",
                            method.short_name(),
                            other.type_name()
                        )));
                    }
                };
                let hit = if method == Method::StrStartswith {
                    s.starts_with(&**option)
                } else {
                    s.ends_with(&**option)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Method::StrReplace => {
            let args = between(name, args, 2, 3)?;
            let old = str_arg("replace", &args[0])?;
            let new = str_arg("replace", &args[1])?;
            let count = args.get(2).map(index_arg).transpose()?;
            Ok(Value::from(match count.and_then(|c| usize::try_from(c).ok()) {
                Some(n) => s.replacen(old, new, n),
                None => s.replace(old, new),
            }))
        }
        Method::StrFind => {
            let [sub] = exact(name, args)?;
            let sub = str_arg("find", &sub)?;
            Ok(match s.find(sub) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::Int(-1),
            })
        }
        Method::StrCount => {
            let [sub] = exact(name, args)?;
            let sub = str_arg("count", &sub)?;
            Ok(Value::from(if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub).count()
            }))
        }
        _ => Err(ExcType::attribute_error(&Value::Str(Rc::clone(s)), method.short_name())),
    }
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|n| parts.len() == n) {
            parts.push(Value::from(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(Value::from(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    parts
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run(builtin: Builtin, args: Vec<Value>) -> RunResult<Value> {
        call_builtin(builtin, args, Vec::new(), &OutputChannel::default())
    }

    fn method(receiver: Value, attr: &str, args: Vec<Value>) -> RunResult<Value> {
        let bound = get_attr(&receiver, attr)?;
        call(&bound, args, Vec::new(), &OutputChannel::default())
    }

    #[test]
    fn int_parsing() {
        assert_eq!(run(Builtin::Int, vec![Value::from(" -1_000 ")]).unwrap().py_repr(), "-1000");
        assert_eq!(
            call_builtin(
                Builtin::Int,
                vec![Value::from("0x1f"), Value::Int(0)],
                Vec::new(),
                &OutputChannel::default()
            )
            .unwrap()
            .py_repr(),
            "31"
        );
        let err = run(Builtin::Int, vec![Value::from("1.5")]).unwrap_err();
        assert_eq!(
            err.raise_ref().exc.py_str(),
            "invalid literal for int() with base 10: '1.5'"
        );
    }

    #[test]
    fn float_parsing() {
        assert!(matches!(run(Builtin::Float, vec![Value::from("-inf")]), Ok(Value::Float(f)) if f == f64::NEG_INFINITY));
        assert!(matches!(run(Builtin::Float, vec![Value::from("2.5")]), Ok(Value::Float(f)) if f == 2.5));
        assert!(run(Builtin::Float, vec![Value::from("abc")]).is_err());
    }

    #[test]
    fn bankers_rounding() {
        assert_eq!(run(Builtin::Round, vec![Value::Float(2.5)]).unwrap().py_repr(), "2");
        assert_eq!(run(Builtin::Round, vec![Value::Float(3.5)]).unwrap().py_repr(), "4");
    }

    #[test]
    fn sorted_reports_incomparable_items() {
        let items = Value::from(vec![Value::Int(1), Value::from("a")]);
        let err = run(Builtin::Sorted, vec![items]).unwrap_err();
        assert_eq!(err.raise_ref().exc.exc_type, ExcType::TypeError);
    }

    #[test]
    fn string_methods() {
        let s = Value::from("  a b  c ");
        assert_eq!(method(s.clone(), "split", vec![]).unwrap().py_repr(), "['a', 'b', 'c']");
        assert_eq!(
            method(s, "split", vec![Value::None, Value::Int(1)]).unwrap().py_repr(),
            "['a', 'b  c ']"
        );
        let joined = method(
            Value::from(", "),
            "join",
            vec![Value::from(vec![Value::from("x"), Value::from("y")])],
        )
        .unwrap();
        assert_eq!(joined.py_str(), "x, y");
        assert_eq!(method(Value::from("héllo"), "find", vec![Value::from("l")]).unwrap().py_repr(), "2");
    }

    #[test]
    fn list_methods_mutate_shared_storage() {
        let list = Value::from(vec![Value::Int(3), Value::Int(1)]);
        method(list.clone(), "append", vec![Value::Int(2)]).unwrap();
        method(list.clone(), "sort", vec![]).unwrap();
        assert_eq!(list.py_repr(), "[1, 2, 3]");
        assert_eq!(method(list.clone(), "pop", vec![]).unwrap().py_repr(), "3");
        let err = method(Value::from(vec![]), "pop", vec![]).unwrap_err();
        assert_eq!(err.raise_ref().exc.py_str(), "pop from empty list");
    }

    #[test]
    fn unknown_attribute() {
        let err = get_attr(&Value::Int(1), "append").unwrap_err();
        assert_eq!(err.raise_ref().exc.py_str(), "'int' object has no attribute 'append'");
    }

    #[test]
    fn print_joins_with_sep_and_end() {
        let output = OutputChannel::default();
        let kwargs = vec![("sep".to_owned(), Value::from("-")), ("end".to_owned(), Value::from("!"))];
        call_builtin(Builtin::Print, vec![Value::Int(1), Value::from("a")], kwargs, &output).unwrap();
        assert_eq!(output.take_buffered(Stream::Stdout), "1-a!");
    }
}
