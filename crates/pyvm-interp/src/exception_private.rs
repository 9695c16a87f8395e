use std::rc::Rc;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{config::ResourceError, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Built-in exception classes known to the runtime.
///
/// The string form matches the Python class name exactly, so `ExcType::from_str`
/// doubles as name lookup for code like `except KeyError:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    Exception,

    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    RuntimeError,
    NotImplementedError,
    RecursionError,

    NameError,
    UnboundLocalError,

    ImportError,
    ModuleNotFoundError,

    SyntaxError,
    IndentationError,

    AssertionError,
    AttributeError,
    MemoryError,
    StopIteration,
    TimeoutError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Whether an `except handler:` clause catches `self`.
    pub(crate) fn is_subclass_of(self, handler: Self) -> bool {
        if self == handler {
            return true;
        }
        match handler {
            Self::BaseException => true,
            Self::Exception => !matches!(self, Self::BaseException | Self::SystemExit | Self::KeyboardInterrupt),
            Self::ArithmeticError => matches!(self, Self::OverflowError | Self::ZeroDivisionError),
            Self::LookupError => matches!(self, Self::IndexError | Self::KeyError),
            Self::RuntimeError => matches!(self, Self::NotImplementedError | Self::RecursionError),
            Self::NameError => matches!(self, Self::UnboundLocalError),
            Self::ImportError => matches!(self, Self::ModuleNotFoundError),
            Self::SyntaxError => matches!(self, Self::IndentationError),
            _ => false,
        }
    }

    /// An exception of this type with `msg` as its only argument.
    #[must_use]
    pub(crate) fn msg(self, msg: impl Into<String>) -> RunError {
        SimpleException::new_msg(self, msg).into()
    }

    #[must_use]
    pub(crate) fn type_error_unsupported_binop(op: impl std::fmt::Display, left: &Value, right: &Value) -> RunError {
        Self::TypeError.msg(format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_sub(value: &Value) -> RunError {
        Self::TypeError.msg(format!("'{}' object is not subscriptable", value.type_name()))
    }

    #[must_use]
    pub(crate) fn type_error_not_sub_assignment(value: &Value) -> RunError {
        Self::TypeError.msg(format!("'{}' object does not support item assignment", value.type_name()))
    }

    /// Matches CPython: `TypeError: cannot use 'list' as a dict key (unhashable type: 'list')`
    #[must_use]
    pub(crate) fn type_error_unhashable_dict_key(type_name: &str) -> RunError {
        Self::TypeError.msg(format!(
            "cannot use '{type_name}' as a dict key (unhashable type: '{type_name}')"
        ))
    }

    #[must_use]
    pub(crate) fn type_error_not_iterable(value: &Value) -> RunError {
        Self::TypeError.msg(format!("'{}' object is not iterable", value.type_name()))
    }

    #[must_use]
    pub(crate) fn type_error_not_integer(value: &Value) -> RunError {
        Self::TypeError.msg(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    }

    /// Matches CPython's format:
    /// - for no args: `{name}() takes no arguments ({actual} given)`
    /// - for 1 expected arg: `{name}() takes exactly one argument ({actual} given)`
    /// - for N expected args: `{name} expected {expected} arguments, got {actual}`
    #[must_use]
    pub(crate) fn type_error_arg_count(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 0 {
            Self::TypeError.msg(format!("{name}() takes no arguments ({actual} given)"))
        } else if expected == 1 {
            Self::TypeError.msg(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::TypeError.msg(format!("{name} expected {expected} arguments, got {actual}"))
        }
    }

    #[must_use]
    pub(crate) fn type_error_no_kwargs(name: &str) -> RunError {
        Self::TypeError.msg(format!("{name}() takes no keyword arguments"))
    }

    #[must_use]
    pub(crate) fn type_error_unexpected_kwarg(name: &str, key: &str) -> RunError {
        Self::TypeError.msg(format!("{name}() got an unexpected keyword argument '{key}'"))
    }

    #[must_use]
    pub(crate) fn attribute_error(value: &Value, attr: &str) -> RunError {
        match value {
            Value::Module(module) => {
                Self::AttributeError.msg(format!("module '{}' has no attribute '{attr}'", module.name))
            }
            _ => Self::AttributeError.msg(format!("'{}' object has no attribute '{attr}'", value.type_name())),
        }
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.msg(format!("name '{name}' is not defined"))
    }

    /// `KeyError` carries the missing key itself, so `str()` of it is the key's repr.
    #[must_use]
    pub(crate) fn key_error(key: Value) -> RunError {
        SimpleException::new(Self::KeyError, vec![key]).into()
    }
}

/// An exception instance: its class and the positional arguments it was built with.
#[derive(Debug, Clone)]
pub(crate) struct SimpleException {
    pub exc_type: ExcType,
    pub args: Vec<Value>,
}

impl SimpleException {
    pub(crate) fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self { exc_type, args }
    }

    pub(crate) fn new_msg(exc_type: ExcType, msg: impl Into<String>) -> Self {
        Self::new(exc_type, vec![Value::from(msg.into())])
    }

    /// `str(exc)`: empty without args, the lone argument's `str` (its `repr` for
    /// `KeyError`), otherwise the repr of the args tuple.
    pub(crate) fn py_str(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [arg] if self.exc_type == ExcType::KeyError => arg.py_repr(),
            [arg] => arg.py_str(),
            args => Value::Tuple(args.into()).py_repr(),
        }
    }

    /// `repr(exc)`, e.g. `ValueError('bad')`.
    pub(crate) fn py_repr(&self) -> String {
        match self.args.as_slice() {
            [arg] => format!("{}({})", self.exc_type, arg.py_repr()),
            args => format!("{}{}", self.exc_type, Value::Tuple(args.into()).py_repr()),
        }
    }

    /// Converts to the public exception type, without frames.
    pub(crate) fn to_public(&self) -> pyvm::Exception {
        let msg = self.py_str();
        pyvm::Exception::new(self.exc_type.to_string(), (!msg.is_empty()).then_some(msg))
    }
}

/// A raised exception on its way up, and the line it was raised from once known.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionRaise {
    pub exc: Rc<SimpleException>,
    pub line: Option<usize>,
}

/// Runtime error types that can occur during execution.
#[derive(Debug, Clone)]
pub(crate) enum RunError {
    /// A Python exception that `except` clauses can catch.
    Exc(Box<ExceptionRaise>),
    /// A resource limit was hit; `except` clauses never see it.
    UncatchableExc(Box<ExceptionRaise>),
}

impl RunError {
    pub(crate) fn raise(exc: Rc<SimpleException>) -> Self {
        Self::Exc(Box::new(ExceptionRaise { exc, line: None }))
    }

    pub(crate) fn raise_ref(&self) -> &ExceptionRaise {
        match self {
            Self::Exc(raise) | Self::UncatchableExc(raise) => raise,
        }
    }

    /// Records `line` as the raise site unless a deeper statement already did.
    #[must_use]
    pub(crate) fn at_line(mut self, line: usize) -> Self {
        let (Self::Exc(raise) | Self::UncatchableExc(raise)) = &mut self;
        raise.line.get_or_insert(line);
        self
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::raise(Rc::new(exc))
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc = Rc::new(SimpleException::new_msg(err.exc_type(), err.to_string()));
        let raise = Box::new(ExceptionRaise { exc, line: None });
        match err {
            ResourceError::Operation { .. } => Self::UncatchableExc(raise),
            ResourceError::Recursion { .. } => Self::Exc(raise),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_round_trip() {
        assert_eq!(ExcType::from_str("KeyError"), Ok(ExcType::KeyError));
        assert!(ExcType::from_str("keyerror").is_err());
        assert_eq!(ExcType::ZeroDivisionError.to_string(), "ZeroDivisionError");
    }

    #[test]
    fn hierarchy() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::KeyboardInterrupt.is_subclass_of(ExcType::Exception));
        assert!(ExcType::KeyboardInterrupt.is_subclass_of(ExcType::BaseException));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::TypeError));
    }

    #[test]
    fn str_of_exceptions() {
        let key = SimpleException::new(ExcType::KeyError, vec![Value::from("k".to_owned())]);
        assert_eq!(key.py_str(), "'k'");
        assert_eq!(key.py_repr(), "KeyError('k')");
        let bare = SimpleException::new(ExcType::RuntimeError, vec![]);
        assert_eq!(bare.py_str(), "");
        assert_eq!(bare.to_public().summary(), "RuntimeError");
        let pair = SimpleException::new(ExcType::ValueError, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(pair.py_str(), "(1, 2)");
    }

    #[test]
    fn operation_limit_is_uncatchable() {
        let err = RunError::from(ResourceError::Operation { limit: 1, count: 2 });
        assert!(matches!(err, RunError::UncatchableExc(_)));
        assert_eq!(err.raise_ref().exc.exc_type, ExcType::TimeoutError);
    }
}
