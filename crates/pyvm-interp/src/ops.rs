//! Operators: arithmetic, comparison, identity and membership.

use std::{cmp::Ordering, rc::Rc};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::{
    exception_private::{ExcType, RunResult},
    expressions::{CmpOperator, Operator, UnaryOperator},
    value::{Dict, Value},
};

/// Largest integer result, in bits, that `**` and `<<` will build.
const MAX_INT_BITS: u64 = 1 << 24;

/// Largest sequence that `*` will build.
const MAX_REPEAT_LEN: usize = 1 << 28;

/// Numeric view of a value: `bool` counts as `int`.
#[derive(Debug, Clone)]
enum Num {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::BigInt(b) => Some(Self::Big(BigInt::clone(b))),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    fn to_big(&self) -> Option<BigInt> {
        match self {
            Self::Int(i) => Some(BigInt::from(*i)),
            Self::Big(b) => Some(b.clone()),
            Self::Float(_) => None,
        }
    }

    fn to_f64(&self) -> RunResult<f64> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Big(b) => b
                .to_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| ExcType::OverflowError.msg("int too large to convert to float")),
            Self::Float(f) => Ok(*f),
        }
    }
}

pub(crate) fn binary_op(op: Operator, left: &Value, right: &Value) -> RunResult<Value> {
    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        match op {
            Operator::BitAnd => return Ok(Value::Bool(a & b)),
            Operator::BitOr => return Ok(Value::Bool(a | b)),
            Operator::BitXor => return Ok(Value::Bool(a ^ b)),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return match numeric_op(op, a, b)? {
            Some(value) => Ok(value),
            None => Err(ExcType::type_error_unsupported_binop(op, left, right)),
        };
    }
    match (op, left, right) {
        (Operator::Add, Value::Str(a), Value::Str(b)) => Ok(Value::from(format!("{a}{b}"))),
        (Operator::Add, Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([&a[..], &b[..]].concat().into())),
        (Operator::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::from(items))
        }
        (Operator::Add, Value::Tuple(a), Value::Tuple(b)) => Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect())),
        (Operator::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => Err(ExcType::TypeError.msg(format!(
            "can only concatenate {} (not \"{}\") to {}",
            left.type_name(),
            other.type_name(),
            left.type_name()
        ))),
        (Operator::Mult, seq, count) | (Operator::Mult, count, seq) if is_sequence(seq) && count.as_index().is_some() => {
            repeat(seq, count.as_index().unwrap_or_default())
        }
        (Operator::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = a.borrow().clone();
            for (k, v) in b.borrow().iter() {
                merged.insert(k.clone(), v.clone())?;
            }
            Ok(Value::new_dict(merged))
        }
        _ => Err(ExcType::type_error_unsupported_binop(op, left, right)),
    }
}

fn is_sequence(value: &Value) -> bool {
    matches!(value, Value::Str(_) | Value::Bytes(_) | Value::List(_) | Value::Tuple(_))
}

fn repeat(seq: &Value, count: i64) -> RunResult<Value> {
    let n = usize::try_from(count).unwrap_or(0);
    let len = match seq {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        _ => 0,
    };
    if len.saturating_mul(n) > MAX_REPEAT_LEN {
        return Err(ExcType::MemoryError.msg("repeated sequence is too large"));
    }
    Ok(match seq {
        Value::Str(s) => Value::from(s.repeat(n)),
        Value::Bytes(b) => Value::Bytes(b.repeat(n).into()),
        Value::List(l) => Value::from(l.borrow().repeat(n)),
        Value::Tuple(t) => Value::Tuple(t.repeat(n).into()),
        other => other.clone(),
    })
}

fn numeric_op(op: Operator, a: Num, b: Num) -> RunResult<Option<Value>> {
    if matches!(a, Num::Float(_)) || matches!(b, Num::Float(_)) {
        return float_op(op, a.to_f64()?, b.to_f64()?);
    }
    if let (Num::Int(x), Num::Int(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        let fast = match op {
            Operator::Add => x.checked_add(y),
            Operator::Sub => x.checked_sub(y),
            Operator::Mult => x.checked_mul(y),
            Operator::FloorDiv if y != 0 && !(x == i64::MIN && y == -1) => Some(x.div_floor(&y)),
            Operator::Mod if y != 0 && y != -1 => Some(x.mod_floor(&y)),
            Operator::BitAnd => Some(x & y),
            Operator::BitOr => Some(x | y),
            Operator::BitXor => Some(x ^ y),
            _ => None,
        };
        if let Some(result) = fast {
            return Ok(Some(Value::Int(result)));
        }
    }
    match (a.to_big(), b.to_big()) {
        (Some(x), Some(y)) => int_op(op, x, y),
        _ => Ok(None),
    }
}

fn int_op(op: Operator, x: BigInt, y: BigInt) -> RunResult<Option<Value>> {
    let value = match op {
        Operator::Add => Value::from_bigint(x + y),
        Operator::Sub => Value::from_bigint(x - y),
        Operator::Mult => Value::from_bigint(x * y),
        Operator::Div => {
            if y.is_zero() {
                return Err(ExcType::ZeroDivisionError.msg("division by zero"));
            }
            let result = Num::Big(x).to_f64()? / Num::Big(y).to_f64()?;
            Value::Float(result)
        }
        Operator::FloorDiv => {
            if y.is_zero() {
                return Err(ExcType::ZeroDivisionError.msg("integer division or modulo by zero"));
            }
            Value::from_bigint(x.div_floor(&y))
        }
        Operator::Mod => {
            if y.is_zero() {
                return Err(ExcType::ZeroDivisionError.msg("integer modulo by zero"));
            }
            Value::from_bigint(x.mod_floor(&y))
        }
        Operator::Pow => {
            if y.is_negative() {
                return float_op(op, Num::Big(x).to_f64()?, Num::Big(y).to_f64()?);
            }
            let exp = y.to_u32().filter(|e| x.bits().saturating_mul(u64::from(*e)) <= MAX_INT_BITS);
            match exp {
                Some(exp) => Value::from_bigint(x.pow(exp)),
                None if x.is_zero() || x.abs() == BigInt::from(1) => {
                    let odd = y.is_odd();
                    Value::from_bigint(if x.is_negative() && !odd { -x } else { x })
                }
                None => return Err(ExcType::MemoryError.msg("integer power result is too large")),
            }
        }
        Operator::LShift => {
            let shift = shift_count(&y)?;
            if x.is_zero() {
                Value::Int(0)
            } else if x.bits().saturating_add(shift) > MAX_INT_BITS {
                return Err(ExcType::MemoryError.msg("integer shift result is too large"));
            } else {
                Value::from_bigint(x << shift)
            }
        }
        Operator::RShift => {
            let shift = shift_count(&y)?;
            if shift >= x.bits() {
                Value::Int(if x.is_negative() { -1 } else { 0 })
            } else {
                Value::from_bigint(x >> shift)
            }
        }
        Operator::BitAnd => Value::from_bigint(x & y),
        Operator::BitOr => Value::from_bigint(x | y),
        Operator::BitXor => Value::from_bigint(x ^ y),
        Operator::MatMult => return Ok(None),
    };
    Ok(Some(value))
}

fn shift_count(y: &BigInt) -> RunResult<u64> {
    if y.is_negative() {
        return Err(ExcType::ValueError.msg("negative shift count"));
    }
    Ok(y.to_u64().unwrap_or(u64::MAX))
}

fn float_op(op: Operator, x: f64, y: f64) -> RunResult<Option<Value>> {
    let result = match op {
        Operator::Add => x + y,
        Operator::Sub => x - y,
        Operator::Mult => x * y,
        Operator::Div => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float division by zero"));
            }
            x / y
        }
        Operator::FloorDiv => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float floor division by zero"));
            }
            (x / y).floor()
        }
        Operator::Mod => {
            if y == 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("float modulo by zero"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
        Operator::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(ExcType::ZeroDivisionError.msg("zero to a negative power"));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(ExcType::ValueError.msg("complex results are not supported"));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(ExcType::OverflowError.msg("(34, 'Numerical result out of range')"));
            }
            r
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(result)))
}

pub(crate) fn unary_op(op: UnaryOperator, operand: &Value) -> RunResult<Value> {
    let result = match (op, operand) {
        (UnaryOperator::Not, v) => Some(Value::Bool(!v.is_truthy())),
        (UnaryOperator::Neg, Value::Float(f)) => Some(Value::Float(-f)),
        (UnaryOperator::Neg, Value::BigInt(b)) => Some(Value::from_bigint(-BigInt::clone(b))),
        (UnaryOperator::Neg, v) => v.as_index().map(|i| match i.checked_neg() {
            Some(n) => Value::Int(n),
            None => Value::from_bigint(-BigInt::from(i)),
        }),
        (UnaryOperator::Pos, Value::Float(_) | Value::BigInt(_)) => Some(operand.clone()),
        (UnaryOperator::Pos, v) => v.as_index().map(Value::Int),
        (UnaryOperator::Invert, Value::BigInt(b)) => Some(Value::from_bigint(-(BigInt::clone(b) + 1))),
        (UnaryOperator::Invert, v) => v.as_index().map(|i| Value::Int(!i)),
    };
    result.ok_or_else(|| {
        ExcType::TypeError.msg(format!(
            "bad operand type for {op}: '{}'",
            operand.type_name()
        ))
    })
}

pub(crate) fn compare(op: CmpOperator, left: &Value, right: &Value) -> RunResult<bool> {
    let ordered = |want: fn(Ordering) -> bool| -> RunResult<bool> {
        Ok(py_cmp(op, left, right)?.is_some_and(want))
    };
    match op {
        CmpOperator::Eq => Ok(py_eq(left, right)),
        CmpOperator::NotEq => Ok(!py_eq(left, right)),
        CmpOperator::Lt => ordered(Ordering::is_lt),
        CmpOperator::LtE => ordered(Ordering::is_le),
        CmpOperator::Gt => ordered(Ordering::is_gt),
        CmpOperator::GtE => ordered(Ordering::is_ge),
        CmpOperator::Is => Ok(is_same(left, right)),
        CmpOperator::IsNot => Ok(!is_same(left, right)),
        CmpOperator::In => contains(right, left),
        CmpOperator::NotIn => contains(right, left).map(|found| !found),
    }
}

/// `left == right`.
pub(crate) fn py_eq(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return num_cmp(&a, &b) == Some(Ordering::Equal);
    }
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow()),
        (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || dict_eq(&a.borrow(), &b.borrow()),
        (Value::Range(a), Value::Range(b)) => {
            let len = a.len();
            len == b.len() && (len == 0 || (a.start == b.start && (len == 1 || a.step == b.step)))
        }
        _ => is_same(left, right),
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| py_eq(x, y))
}

fn dict_eq(a: &Dict, b: &Dict) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| matches!(b.get(k), Ok(Some(other)) if py_eq(v, other)))
}

/// `left is right`.
pub(crate) fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::BigInt(a), Value::BigInt(b)) => Rc::ptr_eq(a, b),
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Range(a), Value::Range(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
        (Value::Stream(a), Value::Stream(b)) => a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::ExcClass(a), Value::ExcClass(b)) => a == b,
        (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn num_cmp(a: &Num, b: &Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(y)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(y),
        (Num::Float(x), other) => float_int_cmp(*x, &other.to_big()?),
        (other, Num::Float(y)) => float_int_cmp(*y, &other.to_big()?).map(Ordering::reverse),
        (x, y) => Some(x.to_big()?.cmp(&y.to_big()?)),
    }
}

/// Exact comparison of a float with an integer of any size.
fn float_int_cmp(x: f64, i: &BigInt) -> Option<Ordering> {
    if x.is_nan() {
        return None;
    }
    if x.is_infinite() {
        return Some(if x > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    let floor = BigInt::from_f64(x.floor())?;
    match floor.cmp(i) {
        Ordering::Equal if x.fract() > 0.0 => Some(Ordering::Greater),
        ord => Some(ord),
    }
}

/// Ordering for `<`, `<=`, `>` and `>=`; `None` when unordered (NaN).
pub(crate) fn py_cmp(op: CmpOperator, left: &Value, right: &Value) -> RunResult<Option<Ordering>> {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return Ok(num_cmp(&a, &b));
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            seq_cmp(op, &a, &b)
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(op, a, b),
        _ => Err(ExcType::TypeError.msg(format!(
            "'{op}' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn seq_cmp(op: CmpOperator, a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !py_eq(x, y) {
            return py_cmp(op, x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> RunResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(ExcType::TypeError.msg(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(haystack) => match item {
            Value::Bytes(needle) => {
                Ok(needle.is_empty() || haystack.windows(needle.len()).any(|w| w == &needle[..]))
            }
            other => match other.as_index() {
                Some(byte) => match u8::try_from(byte) {
                    Ok(byte) => Ok(haystack.contains(&byte)),
                    Err(_) => Err(ExcType::ValueError.msg("byte must be in range(0, 256)")),
                },
                None => Err(ExcType::TypeError.msg(format!(
                    "a bytes-like object is required, not '{}'",
                    other.type_name()
                ))),
            },
        },
        Value::List(list) => Ok(list.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Dict(dict) => Ok(dict.borrow().get(item)?.is_some()),
        Value::Range(range) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => f.to_i64().is_some_and(|i| range.contains(i)),
            other => other.as_index().is_some_and(|i| range.contains(i)),
        }),
        other => Err(ExcType::TypeError.msg(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// `list += iterable` extends in place; everything else falls back to `binary_op`.
pub(crate) fn inplace_op(op: Operator, left: &Value, right: &Value) -> RunResult<Value> {
    match (op, left) {
        (Operator::Add, Value::List(list)) => {
            let extra = crate::value::collect(right)?;
            list.borrow_mut().extend(extra);
            Ok(left.clone())
        }
        (Operator::Mult, Value::List(list)) if right.as_index().is_some() => {
            let repeated = repeat(left, right.as_index().unwrap_or_default())?;
            if let Value::List(new) = repeated {
                let items = new.borrow().clone();
                *list.borrow_mut() = items;
            }
            Ok(left.clone())
        }
        (Operator::BitOr, Value::Dict(dict)) => {
            let Value::Dict(other) = right else {
                return Err(ExcType::type_error_unsupported_binop("|=", left, right));
            };
            let pairs: Vec<_> = other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut target = dict.borrow_mut();
            for (k, v) in pairs {
                target.insert(k, v)?;
            }
            Ok(left.clone())
        }
        _ => binary_op(op, left, right),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn exc_str(err: &crate::exception_private::RunError) -> String {
        err.raise_ref().exc.to_public().summary()
    }

    #[test]
    fn integer_overflow_promotes() {
        let big = binary_op(Operator::Mult, &Value::Int(i64::MAX), &Value::Int(2)).unwrap();
        assert_eq!(big.py_repr(), "18446744073709551614");
        let back = binary_op(Operator::FloorDiv, &big, &Value::Int(2)).unwrap();
        assert!(matches!(back, Value::Int(i64::MAX)));
    }

    #[test]
    fn division_by_zero_messages() {
        let cases = [
            (Operator::Div, Value::Int(1), Value::Int(0), "ZeroDivisionError: division by zero"),
            (
                Operator::FloorDiv,
                Value::Int(1),
                Value::Int(0),
                "ZeroDivisionError: integer division or modulo by zero",
            ),
            (Operator::Mod, Value::Int(1), Value::Int(0), "ZeroDivisionError: integer modulo by zero"),
            (Operator::Div, Value::Float(1.0), Value::Int(0), "ZeroDivisionError: float division by zero"),
        ];
        for (op, a, b, expected) in cases {
            assert_eq!(exc_str(&binary_op(op, &a, &b).unwrap_err()), expected);
        }
    }

    #[test]
    fn floor_semantics_match_python() {
        let r = binary_op(Operator::Mod, &Value::Int(-7), &Value::Int(3)).unwrap();
        assert!(matches!(r, Value::Int(2)));
        let r = binary_op(Operator::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap();
        assert!(matches!(r, Value::Int(-4)));
        let r = binary_op(Operator::Mod, &Value::Float(-1.0), &Value::Float(3.0)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 2.0));
    }

    #[test]
    fn unsupported_operands() {
        let err = binary_op(Operator::Sub, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(exc_str(&err), "TypeError: unsupported operand type(s) for -: 'str' and 'int'");
        let err = binary_op(Operator::Add, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(exc_str(&err), "TypeError: can only concatenate str (not \"int\") to str");
    }

    #[test]
    fn mixed_comparisons() {
        assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
        assert!(!py_eq(&Value::from(vec![]), &Value::Tuple(Rc::from(vec![]))));
        assert!(compare(CmpOperator::Lt, &Value::Float(0.5), &Value::Int(1)).unwrap());
        assert!(!compare(CmpOperator::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        let err = compare(CmpOperator::Lt, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(exc_str(&err), "TypeError: '<' not supported between instances of 'str' and 'int'");
    }

    #[test]
    fn sequences_compare_lexicographically() {
        let a = Value::Tuple(Rc::from(vec![Value::Int(1), Value::Int(2)]));
        let b = Value::Tuple(Rc::from(vec![Value::Int(1), Value::Int(3)]));
        assert!(compare(CmpOperator::Lt, &a, &b).unwrap());
        let short = Value::Tuple(Rc::from(vec![Value::Int(1)]));
        assert!(compare(CmpOperator::Gt, &a, &short).unwrap());
    }

    #[test]
    fn membership() {
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        let range = Value::Range(crate::value::Range { start: 0, stop: 10, step: 2 });
        assert!(contains(&range, &Value::Int(4)).unwrap());
        assert!(!contains(&range, &Value::Int(5)).unwrap());
        let err = contains(&Value::Int(3), &Value::Int(1)).unwrap_err();
        assert_eq!(exc_str(&err), "TypeError: argument of type 'int' is not iterable");
    }

    #[test]
    fn list_augmented_add_is_in_place() {
        let list = Value::from(vec![Value::Int(1)]);
        let alias = list.clone();
        inplace_op(Operator::Add, &list, &Value::Tuple(Rc::from(vec![Value::Int(2)]))).unwrap();
        assert_eq!(alias.py_repr(), "[1, 2]");
    }
}
