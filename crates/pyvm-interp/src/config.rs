use std::fmt;

use crate::exception_private::ExcType;

/// Recommended maximum nesting depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Script name shown in tracebacks if not otherwise specified.
pub const DEFAULT_SCRIPT_NAME: &str = "<exec>";

/// Configuration of the reference runtime.
///
/// ```
/// use pyvm_interp::{InterpConfig, ResourceLimits};
///
/// let config = InterpConfig::default()
///     .platform("js")
///     .prelude("greeting = 'hello'")
///     .limits(ResourceLimits::new().max_operations(1_000_000));
/// assert_eq!(config.script_name, "<exec>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct InterpConfig {
    /// Filename used in tracebacks.
    pub script_name: String,
    /// Value of `sys.platform`.
    pub platform: String,
    /// Code run once while booting; if it raises, the runtime fails to load.
    pub prelude: Option<String>,
    pub limits: ResourceLimits,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            script_name: DEFAULT_SCRIPT_NAME.to_owned(),
            platform: default_platform().to_owned(),
            prelude: None,
            limits: ResourceLimits::new(),
        }
    }
}

impl InterpConfig {
    #[must_use]
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    #[must_use]
    pub fn prelude(mut self, code: impl Into<String>) -> Self {
        self.prelude = Some(code.into());
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// `sys.platform` spelling of the host OS.
fn default_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Limits applied to every `exec`.
///
/// All limits are optional; `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of statements and loop iterations per `exec`.
    pub max_operations: Option<usize>,
    /// Maximum nesting of evaluation (blocks inside blocks, expressions inside expressions).
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates limits with everything disabled except the recursion depth, which is
    /// set to [`DEFAULT_MAX_RECURSION_DEPTH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// A limit was exceeded while executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourceError {
    Operation { limit: usize, count: usize },
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
            Self::Recursion { .. } => f.write_str("maximum recursion depth exceeded"),
        }
    }
}

impl ResourceError {
    /// `Operation` maps to `TimeoutError`, `Recursion` to `RecursionError`.
    pub(crate) fn exc_type(&self) -> ExcType {
        match self {
            Self::Operation { .. } => ExcType::TimeoutError,
            Self::Recursion { .. } => ExcType::RecursionError,
        }
    }
}

/// Counts work done during one `exec` against [`ResourceLimits`].
#[derive(Debug)]
pub(crate) struct Tracker {
    limits: ResourceLimits,
    operations: usize,
    depth: usize,
}

impl Tracker {
    pub(crate) fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            operations: 0,
            depth: 0,
        }
    }

    pub(crate) fn on_operation(&mut self) -> Result<(), ResourceError> {
        self.operations += 1;
        match self.limits.max_operations {
            Some(limit) if self.operations > limit => Err(ResourceError::Operation {
                limit,
                count: self.operations,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn enter(&mut self) -> Result<(), ResourceError> {
        self.depth += 1;
        match self.limits.max_recursion_depth {
            Some(limit) if self.depth > limit => {
                let depth = self.depth;
                self.depth -= 1;
                Err(ResourceError::Recursion { limit, depth })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_budget_is_exclusive() {
        let mut tracker = Tracker::new(ResourceLimits::new().max_operations(2));
        assert!(tracker.on_operation().is_ok());
        assert!(tracker.on_operation().is_ok());
        let err = tracker.on_operation().unwrap_err();
        assert_eq!(err.to_string(), "operation limit exceeded: 3 > 2");
        assert_eq!(err.exc_type(), ExcType::TimeoutError);
    }

    #[test]
    fn depth_is_restored_after_refusal() {
        let mut tracker = Tracker::new(ResourceLimits::new().max_recursion_depth(Some(1)));
        tracker.enter().unwrap();
        assert!(tracker.enter().is_err());
        tracker.leave();
        assert!(tracker.enter().is_ok());
    }
}
