#![doc = include_str!("../../../README.md")]
mod builtins;
mod config;
mod exception_private;
mod expressions;
mod ops;
mod parse;
mod run;
mod value;

use std::{cell::RefCell, future::Future, rc::Rc};

use indexmap::IndexMap;
use pyvm::{BootFailure, Exception, Object, OutputChannel, Runtime, RuntimeFailure, RuntimeLoader, StackFrame, Stream};

pub use crate::config::{DEFAULT_MAX_RECURSION_DEPTH, DEFAULT_SCRIPT_NAME, InterpConfig, ResourceLimits};
use crate::{
    run::Executor,
    value::{Module, Namespace, Value},
};

/// A tree-walking interpreter for a subset of Python with one persistent
/// top-level namespace.
///
/// Each `exec` parses the whole source first, so a syntax error anywhere means
/// nothing runs. Bindings made by one `exec` are visible to the next.
///
/// ```
/// use pyvm::{Object, OutputChannel, Runtime, Stream};
/// use pyvm_interp::{InterpConfig, Interpreter};
///
/// let output = OutputChannel::default();
/// let mut interp = Interpreter::new(InterpConfig::default());
/// interp.set_global("x", Object::Int(20)).unwrap();
/// interp.exec("y = x * 2 + 2\nprint(y)", &output).unwrap();
/// assert_eq!(interp.get_global("y").unwrap(), Object::Int(42));
/// assert_eq!(output.take_buffered(Stream::Stdout), "42\n");
/// ```
#[derive(Debug)]
pub struct Interpreter {
    config: InterpConfig,
    globals: Namespace,
    sys: Rc<Module>,
}

impl Interpreter {
    /// Creates an interpreter with `__name__` bound to `"__main__"`.
    ///
    /// The prelude, if any, is not run; see [`boot`](Self::boot).
    #[must_use]
    pub fn new(config: InterpConfig) -> Self {
        let mut globals = Namespace::new();
        globals.insert("__name__".to_owned(), Value::from("__main__"));
        let sys = Rc::new(sys_module(&config));
        Self { config, globals, sys }
    }

    /// Creates an interpreter and runs the configured prelude.
    ///
    /// A prelude that fails to parse or raises is a boot failure.
    pub fn boot(config: InterpConfig, output: &OutputChannel) -> Result<Self, BootFailure> {
        let mut interp = Self::new(config);
        if let Some(prelude) = interp.config.prelude.clone() {
            tracing::debug!(bytes = prelude.len(), "running prelude");
            interp
                .run(&prelude, output)
                .map_err(|exc| BootFailure::raised("prelude raised", exc))?;
        }
        Ok(interp)
    }

    /// A loader for [`pyvm::Vm::spawn`] that boots with `config`.
    ///
    /// ```no_run
    /// use pyvm::Vm;
    /// use pyvm_interp::{InterpConfig, Interpreter};
    ///
    /// # async fn demo() {
    /// let vm = Vm::spawn(Interpreter::loader(InterpConfig::default()));
    /// vm.exec("print('hi')").await.unwrap();
    /// # }
    /// ```
    pub fn loader(config: InterpConfig) -> impl RuntimeLoader<Runtime = Self> {
        move |output: OutputChannel| std::future::ready(Self::boot(config, &output))
    }

    /// Like [`loader`](Self::loader), but the runtime only becomes available once
    /// `delay` resolves, for hosts that want to simulate or wait on a slow start.
    pub fn delayed_loader<D>(config: InterpConfig, delay: D) -> impl RuntimeLoader<Runtime = Self>
    where
        D: Future<Output = ()> + 'static,
    {
        move |output: OutputChannel| async move {
            delay.await;
            Self::boot(config, &output)
        }
    }

    fn run(&mut self, source: &str, output: &OutputChannel) -> Result<(), Exception> {
        let nodes = match parse::parse(source) {
            Ok(nodes) => nodes,
            Err(err) => {
                let exc = Exception::new(err.exc_type().to_string(), Some(err.to_string()));
                return Err(self.with_frame(exc, source, Some(err.line())));
            }
        };
        let result = Executor::new(&mut self.globals, &self.sys, output, self.config.limits).run(&nodes);
        result.map_err(|err| {
            let raise = err.raise_ref();
            tracing::debug!(exc_type = %raise.exc.exc_type, line = ?raise.line, "exec raised");
            self.with_frame(raise.exc.to_public(), source, raise.line)
        })
    }

    fn with_frame(&self, exc: Exception, source: &str, line: Option<usize>) -> Exception {
        let Some(line) = line else { return exc };
        let mut frame = StackFrame::new(&self.config.script_name, line, "<module>");
        if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
            frame = frame.with_source_line(text);
        }
        exc.with_frame(frame)
    }
}

impl Runtime for Interpreter {
    fn set_global(&mut self, name: &str, value: Object) -> Result<(), RuntimeFailure> {
        let value = Value::from_object(value)
            .map_err(|err| RuntimeFailure::Rejected(err.raise_ref().exc.to_public().summary()))?;
        self.globals.insert(name.to_owned(), value);
        Ok(())
    }

    fn get_global(&mut self, name: &str) -> Result<Object, RuntimeFailure> {
        let value = self
            .globals
            .get(name)
            .ok_or_else(|| RuntimeFailure::Unbound(name.to_owned()))?;
        value.to_object().map_err(|type_name| RuntimeFailure::Unrepresentable {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
        })
    }

    fn exec(&mut self, source: &str, output: &OutputChannel) -> Result<(), RuntimeFailure> {
        self.run(source, output).map_err(RuntimeFailure::Raised)
    }
}

fn sys_module(config: &InterpConfig) -> Module {
    let mut attrs = IndexMap::new();
    attrs.insert("platform".to_owned(), Value::from(config.platform.as_str()));
    attrs.insert(
        "argv".to_owned(),
        Value::from(vec![Value::from(config.script_name.as_str())]),
    );
    attrs.insert("maxsize".to_owned(), Value::Int(i64::MAX));
    attrs.insert("stdout".to_owned(), Value::Stream(Stream::Stdout));
    attrs.insert("stderr".to_owned(), Value::Stream(Stream::Stderr));
    Module {
        name: "sys",
        attrs: RefCell::new(attrs),
    }
}
