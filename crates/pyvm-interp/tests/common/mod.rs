//! Shared helpers for driving the interpreter directly and through a `Vm`.

use std::{cell::RefCell, future::Future, rc::Rc};

use pyvm::{Object, OutputChannel, Runtime, RuntimeFailure, Stream};
use pyvm_interp::{InterpConfig, Interpreter};

/// Runs `future` inside a `LocalSet` on a current-thread runtime with paused time.
pub fn local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

/// An interpreter with default config plus the channel its output lands in.
pub struct Session {
    pub interp: Interpreter,
    pub output: OutputChannel,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(InterpConfig::default())
    }

    pub fn with_config(config: InterpConfig) -> Self {
        Self {
            interp: Interpreter::new(config),
            output: OutputChannel::default(),
        }
    }

    pub fn exec(&mut self, source: &str) -> Result<(), RuntimeFailure> {
        self.interp.exec(source, &self.output)
    }

    /// Runs `source`, which must not raise, and returns what it printed.
    pub fn stdout_of(&mut self, source: &str) -> String {
        if let Err(failure) = self.exec(source) {
            panic!("{source:?} raised: {failure}");
        }
        self.output.take_buffered(Stream::Stdout)
    }

    /// Runs `source`, which must raise, and returns the exception summary.
    pub fn raised(&mut self, source: &str) -> String {
        match self.exec(source) {
            Err(RuntimeFailure::Raised(exc)) => exc.summary(),
            other => panic!("{source:?} did not raise: {other:?}"),
        }
    }

    pub fn get(&mut self, name: &str) -> Object {
        self.interp.get_global(name).unwrap()
    }
}

/// Ordered record of sink output, tagged by stream.
#[derive(Debug, Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn sink(&self, tag: &'static str) -> impl Fn(&str) + 'static {
        let log = self.clone();
        move |text| log.0.borrow_mut().push(format!("{tag}:{text}"))
    }
}
