//! Strictly ordered command dispatch.
//!
//! Callers push [`Command`]s through a [`CommandQueue`]; a single worker task
//! ([`drive`]) owns the runtime and drains them one at a time in enqueue order.
//! Each command carries a oneshot reply which backs the caller's [`CommandFuture`].

use std::{
    any::Any,
    cell::Cell,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{Span, debug, info, trace, warn};

use crate::{
    classify::{InterpreterError, Origin, classify},
    gate::{GateOpener, ReadinessGate},
    object::{InvalidInputError, Object},
    output::OutputChannel,
    runtime::{Runtime, RuntimeLoader},
};

/// Python keywords, which can never be used as binding names.
const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal",
    "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// One request to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Bind `name` to `value` in the top-level scope.
    Set { name: String, value: Object },
    /// Read the top-level binding `name`.
    Get { name: String },
    /// Run `source` as the top-level program.
    Exec { source: String },
}

impl Command {
    #[must_use]
    pub fn set(name: impl Into<String>, value: impl Into<Object>) -> Self {
        Self::Set {
            name: name.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn get(name: impl Into<String>) -> Self {
        Self::Get { name: name.into() }
    }

    #[must_use]
    pub fn exec(source: impl Into<String>) -> Self {
        Self::Exec { source: source.into() }
    }

    /// The dispatch stage this command runs in.
    #[must_use]
    pub fn origin(&self) -> Origin {
        match self {
            Self::Set { .. } => Origin::Set,
            Self::Get { .. } => Origin::Get,
            Self::Exec { .. } => Origin::Exec,
        }
    }

    /// Checks that the payload can be handed to a runtime at all.
    pub fn validate(&self) -> Result<(), InvalidInputError> {
        match self {
            Self::Set { name, value } => {
                check_name(name)?;
                value.validate()
            }
            Self::Get { name } => check_name(name),
            Self::Exec { source } if source.contains('\0') => Err(InvalidInputError::NulInSource),
            Self::Exec { .. } => Ok(()),
        }
    }
}

fn check_name(name: &str) -> Result<(), InvalidInputError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && !KEYWORDS.contains(&name);
    if valid {
        Ok(())
    } else {
        Err(InvalidInputError::InvalidName(name.to_owned()))
    }
}

/// What the runtime answered to a dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `Set` and `Exec` complete without a value.
    Unit,
    /// The value read by `Get`.
    Value(Object),
}

type ReplyResult = Result<Reply, InterpreterError>;

#[derive(Debug)]
pub(crate) struct Envelope {
    seq: u64,
    command: Command,
    reply: oneshot::Sender<ReplyResult>,
}

/// Sending half of a handle's queue; the single serialization point for all callers.
#[derive(Debug)]
pub(crate) struct CommandQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    gate: ReadinessGate,
    next_seq: Cell<u64>,
    span: Span,
}

impl CommandQueue {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, gate: ReadinessGate, span: Span) -> Self {
        Self {
            tx,
            gate,
            next_seq: Cell::new(0),
            span,
        }
    }

    /// Enqueues `command` now, before the returned future is first polled.
    ///
    /// A faulted handle and a malformed payload both settle the future immediately,
    /// and in that order; neither consumes a runtime turn.
    pub(crate) fn submit<T: Unpin>(&self, command: Command, extract: Extract<T>) -> CommandFuture<T> {
        let _entered = self.span.enter();
        if let Some(error) = self.gate.fault() {
            debug!(origin = %command.origin(), "rejected, handle is faulted");
            return CommandFuture::settled(Err(error));
        }
        if let Err(invalid) = command.validate() {
            let error = classify(command.origin(), invalid);
            debug!(origin = %command.origin(), %error, "rejected before dispatch");
            return CommandFuture::settled(Err(error));
        }

        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let origin = command.origin();
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Envelope { seq, command, reply }).is_err() {
            let error = self.gate.fault().unwrap_or_else(InterpreterError::worker_stopped);
            debug!(seq, %origin, %error, "rejected, worker is gone");
            return CommandFuture::settled(Err(error));
        }
        debug!(seq, %origin, "enqueued");
        CommandFuture::waiting(rx, extract, self.gate.clone())
    }

    /// Settles a future with `error` without touching the queue.
    pub(crate) fn reject<T: Unpin>(&self, error: InterpreterError) -> CommandFuture<T> {
        if let Some(fault) = self.gate.fault() {
            return CommandFuture::settled(Err(fault));
        }
        CommandFuture::settled(Err(error))
    }
}

pub(crate) type Extract<T> = fn(Reply) -> Result<T, InterpreterError>;

pub(crate) fn unit(_: Reply) -> Result<(), InterpreterError> {
    Ok(())
}

pub(crate) fn value(reply: Reply) -> Result<Object, InterpreterError> {
    match reply {
        Reply::Value(value) => Ok(value),
        Reply::Unit => Err(InterpreterError::protocol("runtime answered without a value")),
    }
}

pub(crate) fn raw(reply: Reply) -> Result<Reply, InterpreterError> {
    Ok(reply)
}

/// The pending result of one command.
///
/// The command was already enqueued when this future was created; dropping the
/// future does not take it back out of the queue.
#[must_use = "the command runs regardless, but its result is lost"]
#[derive(Debug)]
pub struct CommandFuture<T> {
    state: FutureState<T>,
}

#[derive(Debug)]
enum FutureState<T> {
    Settled(Option<Result<T, InterpreterError>>),
    Waiting {
        rx: oneshot::Receiver<ReplyResult>,
        extract: Extract<T>,
        gate: ReadinessGate,
    },
}

impl<T: Unpin> CommandFuture<T> {
    fn settled(result: Result<T, InterpreterError>) -> Self {
        Self {
            state: FutureState::Settled(Some(result)),
        }
    }

    fn waiting(rx: oneshot::Receiver<ReplyResult>, extract: Extract<T>, gate: ReadinessGate) -> Self {
        Self {
            state: FutureState::Waiting { rx, extract, gate },
        }
    }

    /// Whether the result is already decided without waiting on the runtime.
    ///
    /// True for commands rejected at call time, and for futures that already completed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.state, FutureState::Settled(_))
    }
}

impl<T: Unpin> Future for CommandFuture<T> {
    type Output = Result<T, InterpreterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match &mut self.state {
            FutureState::Settled(result) => match result.take() {
                Some(result) => result,
                None => Err(InterpreterError::protocol("command result already taken")),
            },
            FutureState::Waiting { rx, extract, gate } => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(reply)) => reply.and_then(*extract),
                // the worker went away without answering
                Poll::Ready(Err(_)) => Err(gate.fault().unwrap_or_else(InterpreterError::worker_stopped)),
            },
        };
        self.state = FutureState::Settled(None);
        Poll::Ready(result)
    }
}

/// Worker loop owning the runtime of one handle.
///
/// Boots the runtime, settles the gate, then dispatches commands one at a time
/// until every sender is gone. Commands pushed while loading simply wait in the
/// channel; on a failed load they are all rejected with the same `LoadError`.
///
/// A runtime that panics mid-dispatch is dropped and the gate faulted, exactly
/// as if it had failed to load.
pub(crate) async fn drive<L: RuntimeLoader>(
    loader: L,
    output: OutputChannel,
    opener: GateOpener,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    let mut runtime = match loader.load(output.clone()).await {
        Ok(runtime) => {
            info!("runtime ready");
            opener.open();
            runtime
        }
        Err(failure) => {
            let error = classify(Origin::Boot, failure);
            warn!(%error, "runtime failed to load");
            opener.fault(error.clone());
            reject_held(rx, &error).await;
            return;
        }
    };

    while let Some(Envelope { seq, command, reply }) = rx.recv().await {
        let origin = command.origin();
        debug!(seq, %origin, "dispatching");
        let result = match catch_unwind(AssertUnwindSafe(|| dispatch(&mut runtime, command, &output))) {
            Ok(result) => result,
            Err(payload) => {
                let error = InterpreterError::runtime_panicked(&panic_detail(payload.as_ref()));
                warn!(seq, %error, "runtime panicked, faulting handle");
                drop(runtime);
                opener.fault(error.clone());
                let _ = reply.send(Err(error.clone()));
                reject_held(rx, &error).await;
                return;
            }
        };
        match &result {
            Ok(_) => debug!(seq, "settled"),
            Err(error) => debug!(seq, %error, "rejected"),
        }
        if reply.send(result).is_err() {
            trace!(seq, "result dropped by caller");
        }
        // let callers woken by this reply run before the next dispatch
        tokio::task::yield_now().await;
    }
    debug!("all handles dropped, worker exiting");
}

/// Stops accepting commands and rejects everything still in the channel with `error`.
async fn reject_held(mut rx: mpsc::UnboundedReceiver<Envelope>, error: &InterpreterError) {
    rx.close();
    while let Some(Envelope { seq, reply, .. }) = rx.recv().await {
        debug!(seq, "rejecting held command");
        let _ = reply.send(Err(error.clone()));
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_owned()
    }
}

fn dispatch<R: Runtime>(runtime: &mut R, command: Command, output: &OutputChannel) -> ReplyResult {
    let origin = command.origin();
    let result = match command {
        Command::Set { name, value } => runtime.set_global(&name, value).map(|()| Reply::Unit),
        Command::Get { name } => runtime.get_global(&name).map(Reply::Value),
        Command::Exec { source } => runtime.exec(&source, output).map(|()| Reply::Unit),
    };
    result.map_err(|failure| classify(origin, failure))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_must_be_identifiers() {
        assert!(Command::get("x").validate().is_ok());
        assert!(Command::get("_private2").validate().is_ok());
        assert!(Command::get("café").validate().is_ok());
        for bad in ["", "2x", "a-b", "a b", "class", "None"] {
            assert_eq!(
                Command::get(bad).validate(),
                Err(InvalidInputError::InvalidName(bad.to_owned())),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn exec_source_rejects_nul() {
        assert!(Command::exec("x = 1\n").validate().is_ok());
        assert_eq!(
            Command::exec("x = '\0'").validate(),
            Err(InvalidInputError::NulInSource)
        );
    }

    #[test]
    fn set_checks_value_shape() {
        let bad = Object::Dict(vec![(Object::List(vec![]), Object::None)].into());
        assert_eq!(
            Command::set("d", bad).validate(),
            Err(InvalidInputError::Unhashable("list"))
        );
    }
}
