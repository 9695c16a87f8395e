use std::{fmt, future::Future, rc::Rc};

use tokio::sync::mpsc;
use tracing::{Instrument, info_span};

use crate::{
    classify::{InterpreterError, Origin, classify},
    gate::{self, ReadinessGate, VmState},
    object::{InvalidInputError, Object},
    output::{DEFAULT_BUFFER_LIMIT, OutputChannel, Sink, Stream},
    queue::{self, Command, CommandFuture, CommandQueue, Reply},
    runtime::RuntimeLoader,
};

/// Construction options for a [`Vm`].
///
/// ```
/// use pyvm::VmOptions;
///
/// let options = VmOptions::default()
///     .label("console")
///     .stdout(|text: &str| print!("{text}"))
///     .buffer_limit(4096);
/// ```
#[derive(Clone)]
pub struct VmOptions {
    label: String,
    stdout: Option<Sink>,
    stderr: Option<Sink>,
    buffer_limit: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            label: "vm".to_owned(),
            stdout: None,
            stderr: None,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}

impl fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmOptions")
            .field("label", &self.label)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("buffer_limit", &self.buffer_limit)
            .finish()
    }
}

impl VmOptions {
    /// Name recorded on the handle's tracing span.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn stdout(mut self, sink: impl Fn(&str) + 'static) -> Self {
        self.stdout = Some(Rc::new(sink));
        self
    }

    #[must_use]
    pub fn stderr(mut self, sink: impl Fn(&str) + 'static) -> Self {
        self.stderr = Some(Rc::new(sink));
        self
    }

    /// Bytes kept per stream while no sink is assigned.
    #[must_use]
    pub fn buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }
}

/// Handle to one interpreter instance and its command queue.
///
/// Cloning a `Vm` gives another reference to the same instance; all clones share
/// one queue, so commands from any of them are dispatched in a single total order.
/// The runtime is dropped once every clone is gone and the queue is drained.
#[derive(Debug, Clone)]
pub struct Vm {
    inner: Rc<Inner>,
}

#[derive(Debug)]
struct Inner {
    label: String,
    gate: ReadinessGate,
    queue: CommandQueue,
    output: OutputChannel,
}

impl Vm {
    /// Starts loading a runtime with default options.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio `LocalSet`.
    pub fn spawn<L: RuntimeLoader>(loader: L) -> Self {
        Self::spawn_with(loader, VmOptions::default())
    }

    /// Starts loading a runtime and returns immediately.
    ///
    /// The worker owning the runtime runs as a local task, so this must be called
    /// from inside a `LocalSet`. Commands may be issued right away; they are held
    /// until the runtime is ready.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio `LocalSet`.
    pub fn spawn_with<L: RuntimeLoader>(loader: L, options: VmOptions) -> Self {
        let VmOptions {
            label,
            stdout,
            stderr,
            buffer_limit,
        } = options;
        let output = OutputChannel::new(buffer_limit);
        if let Some(sink) = stdout {
            output.set_shared_sink(Stream::Stdout, sink);
        }
        if let Some(sink) = stderr {
            output.set_shared_sink(Stream::Stderr, sink);
        }

        let span = info_span!("vm", label = label.as_str());
        let (opener, gate) = gate::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_local(queue::drive(loader, output.clone(), opener, rx).instrument(span.clone()));

        Self {
            inner: Rc::new(Inner {
                label,
                queue: CommandQueue::new(tx, gate.clone(), span),
                gate,
                output,
            }),
        }
    }

    /// Resolves once the runtime is loaded, or rejects with its `LoadError`.
    ///
    /// Can be awaited any number of times; every call sees the same outcome.
    pub fn ready(&self) -> impl Future<Output = Result<(), InterpreterError>> + use<> {
        self.inner.gate.wait()
    }

    #[must_use]
    pub fn state(&self) -> VmState {
        self.inner.gate.state()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Binds `name` to `value` in the top-level scope.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Object>) -> CommandFuture<()> {
        self.inner.queue.submit(Command::set(name, value), queue::unit)
    }

    /// Like [`set`](Self::set), for any value that serializes to JSON.
    ///
    /// The value is converted through its natural JSON form; a value that fails to
    /// serialize rejects immediately with a `ProtocolError`.
    pub fn set_serialized<T>(&self, name: impl Into<String>, value: &T) -> CommandFuture<()>
    where
        T: serde::Serialize + ?Sized,
    {
        let converted = serde_json::to_value(value)
            .map_err(|err| InvalidInputError::Serialize(err.to_string()))
            .and_then(Object::from_json_value);
        match converted {
            Ok(value) => self.set(name, value),
            Err(invalid) => self.inner.queue.reject(classify(Origin::Set, invalid)),
        }
    }

    /// Reads the top-level binding `name`.
    pub fn get(&self, name: impl Into<String>) -> CommandFuture<Object> {
        self.inner.queue.submit(Command::get(name), queue::value)
    }

    /// Runs `source` as the top-level program, with `__name__ == "__main__"`.
    pub fn exec(&self, source: impl Into<String>) -> CommandFuture<()> {
        self.inner.queue.submit(Command::exec(source), queue::unit)
    }

    /// Enqueues an already built command.
    pub fn enqueue(&self, command: Command) -> CommandFuture<Reply> {
        self.inner.queue.submit(command, queue::raw)
    }

    /// The handle's output channel, shared with the runtime.
    #[must_use]
    pub fn output(&self) -> &OutputChannel {
        &self.inner.output
    }

    pub fn set_stdout(&self, sink: impl Fn(&str) + 'static) {
        self.inner.output.set_stdout(sink);
    }

    pub fn set_stderr(&self, sink: impl Fn(&str) + 'static) {
        self.inner.output.set_stderr(sink);
    }

    /// Points both streams at one sink.
    pub fn route_all(&self, sink: impl Fn(&str) + 'static) {
        self.inner.output.route_all(sink);
    }
}
