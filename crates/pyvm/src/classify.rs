//! Error taxonomy for the command interface.
//!
//! Runtimes report failures as [`RuntimeFailure`] (or [`BootFailure`] while loading).
//! Callers never see those: [`classify`] folds every raw failure into an
//! [`InterpreterError`] of exactly one [`ErrorKind`], based on the failure itself
//! and the stage ([`Origin`]) it came from.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::{exception::Exception, object::InvalidInputError};

/// The three kinds of failure a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The runtime failed to initialize. Fatal to the handle.
    LoadError,
    /// Caller-supplied code raised. The handle keeps working.
    RuntimeError,
    /// The command itself was malformed or could not be answered.
    ProtocolError,
}

/// An error surfaced to callers of the command interface.
///
/// Immutable once built by [`classify`] (or one of the constructors below).
/// `trace` is only ever present for [`ErrorKind::RuntimeError`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InterpreterError {
    kind: ErrorKind,
    name: String,
    message: String,
    trace: Option<String>,
}

impl InterpreterError {
    /// A `LoadError` with the given message.
    #[must_use]
    pub fn load(message: impl Into<String>) -> Self {
        Self::plain(ErrorKind::LoadError, message)
    }

    /// A `ProtocolError` with the given message.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::plain(ErrorKind::ProtocolError, message)
    }

    /// The `LoadError` reported when the task driving the runtime is gone.
    #[must_use]
    pub fn worker_stopped() -> Self {
        Self::load("interpreter worker stopped")
    }

    /// The `LoadError` a handle is faulted with once its runtime panicked.
    #[must_use]
    pub fn runtime_panicked(detail: &str) -> Self {
        Self::load(format!("runtime panicked: {detail}"))
    }

    fn plain(kind: ErrorKind, message: impl Into<String>) -> Self {
        let name: &'static str = kind.into();
        Self {
            kind,
            name: name.to_owned(),
            message: message.into(),
            trace: None,
        }
    }

    fn raised(exc: &Exception) -> Self {
        Self {
            kind: ErrorKind::RuntimeError,
            name: exc.exc_type().to_owned(),
            message: exc.message().unwrap_or_default().to_owned(),
            trace: Some(exc.traceback()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// For `RuntimeError` the raised type name, otherwise the kind name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Human-readable traceback, only for `RuntimeError`.
    #[must_use]
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    #[must_use]
    pub fn is_load(&self) -> bool {
        self.kind == ErrorKind::LoadError
    }

    #[must_use]
    pub fn is_runtime(&self) -> bool {
        self.kind == ErrorKind::RuntimeError
    }

    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.kind == ErrorKind::ProtocolError
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for InterpreterError {}

impl From<InvalidInputError> for InterpreterError {
    fn from(error: InvalidInputError) -> Self {
        Self::protocol(error.to_string())
    }
}

/// A failure reported by a runtime while answering a command.
#[derive(Debug, Clone)]
pub enum RuntimeFailure {
    /// The interpreted program raised.
    Raised(Exception),
    /// No binding exists for the requested name.
    Unbound(String),
    /// The binding exists but its value has no `Object` mapping.
    Unrepresentable {
        /// Binding name.
        name: String,
        /// Python type name of the value.
        type_name: String,
    },
    /// The runtime refused the command outright.
    Rejected(String),
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(exc) => write!(f, "{exc}"),
            Self::Unbound(name) => write!(f, "name '{name}' is not defined"),
            Self::Unrepresentable { name, type_name } => {
                write!(f, "value of '{name}' has type '{type_name}' which is not representable")
            }
            Self::Rejected(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for RuntimeFailure {}

impl From<Exception> for RuntimeFailure {
    fn from(exc: Exception) -> Self {
        Self::Raised(exc)
    }
}

/// A failure while bootstrapping a runtime.
#[derive(Debug, Clone)]
pub struct BootFailure {
    message: String,
    cause: Option<Exception>,
}

impl BootFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Boot failed because startup code raised.
    #[must_use]
    pub fn raised(message: impl Into<String>, exc: Exception) -> Self {
        Self {
            message: message.into(),
            cause: Some(exc),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(exc) => write!(f, "{} ({exc})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BootFailure {}

/// Where a raw failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Origin {
    /// Runtime bootstrap.
    Boot,
    /// A `Set` dispatch.
    Set,
    /// A `Get` dispatch.
    Get,
    /// An `Exec` dispatch.
    Exec,
}

/// A raw failure before classification.
#[derive(Debug, Clone)]
pub enum RawFailure {
    Boot(BootFailure),
    Runtime(RuntimeFailure),
    Marshal(InvalidInputError),
}

impl From<BootFailure> for RawFailure {
    fn from(failure: BootFailure) -> Self {
        Self::Boot(failure)
    }
}

impl From<RuntimeFailure> for RawFailure {
    fn from(failure: RuntimeFailure) -> Self {
        Self::Runtime(failure)
    }
}

impl From<InvalidInputError> for RawFailure {
    fn from(failure: InvalidInputError) -> Self {
        Self::Marshal(failure)
    }
}

/// Folds a raw failure into the three-kind taxonomy.
///
/// - anything from [`Origin::Boot`], and any [`BootFailure`], is a `LoadError`
/// - a program raise during [`Origin::Exec`] is a `RuntimeError` carrying the traceback
/// - everything else (marshalling, unbound or unrepresentable values, a raise while
///   answering `Set`/`Get`, refused commands) is a `ProtocolError` without trace
#[must_use]
pub fn classify(origin: Origin, failure: impl Into<RawFailure>) -> InterpreterError {
    match (origin, failure.into()) {
        (Origin::Boot, failure) => InterpreterError::load(raw_message(&failure)),
        (_, RawFailure::Boot(failure)) => InterpreterError::load(failure.to_string()),
        (Origin::Exec, RawFailure::Runtime(RuntimeFailure::Raised(exc))) => InterpreterError::raised(&exc),
        (_, failure) => InterpreterError::protocol(raw_message(&failure)),
    }
}

fn raw_message(failure: &RawFailure) -> String {
    match failure {
        RawFailure::Boot(f) => f.to_string(),
        RawFailure::Runtime(f) => f.to_string(),
        RawFailure::Marshal(f) => f.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::StackFrame;

    #[test]
    fn exec_raise_is_runtime_error_with_trace() {
        let exc = Exception::new("ZeroDivisionError", Some("division by zero".to_owned()))
            .with_frame(StackFrame::new("<exec>", 1, "<module>"));
        let err = classify(Origin::Exec, RuntimeFailure::Raised(exc));
        assert_eq!(err.kind(), ErrorKind::RuntimeError);
        assert_eq!(err.name(), "ZeroDivisionError");
        assert_eq!(err.message(), "division by zero");
        assert!(err.trace().unwrap().ends_with("ZeroDivisionError: division by zero\n"));
    }

    #[test]
    fn raise_outside_exec_is_protocol_error() {
        let exc = Exception::new("ValueError", None);
        let err = classify(Origin::Set, RuntimeFailure::Raised(exc));
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert_eq!(err.name(), "ProtocolError");
        assert_eq!(err.trace(), None);
    }

    #[test]
    fn unbound_get_is_protocol_error() {
        let err = classify(Origin::Get, RuntimeFailure::Unbound("x".to_owned()));
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "ProtocolError: name 'x' is not defined");
    }

    #[test]
    fn boot_failure_is_load_error_from_any_origin() {
        let err = classify(Origin::Boot, BootFailure::new("wasm blob missing"));
        assert!(err.is_load());
        assert_eq!(err.name(), "LoadError");
        let err = classify(Origin::Exec, BootFailure::new("late"));
        assert!(err.is_load());
    }
}
