//! Readiness of a runtime that loads asynchronously.

use std::future::Future;

use strum::{Display, IntoStaticStr};
use tokio::sync::watch;

use crate::classify::InterpreterError;

/// Lifecycle of a handle.
///
/// `Faulted` is terminal. `Ready` only gives way to `Faulted` when the runtime
/// dies after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum VmState {
    Loading,
    Ready,
    Faulted,
}

#[derive(Debug, Clone)]
enum GateState {
    Loading,
    Ready,
    Faulted(InterpreterError),
}

/// Creates a gate in the `Loading` state along with the one-shot opener that settles it.
pub(crate) fn channel() -> (GateOpener, ReadinessGate) {
    let (tx, rx) = watch::channel(GateState::Loading);
    (GateOpener { tx }, ReadinessGate { rx })
}

/// Settles a [`ReadinessGate`]. Opening borrows, so the worker can still fault
/// the gate later; faulting consumes.
///
/// Dropping the opener faults every observer with
/// [`InterpreterError::worker_stopped`] unless it was faulted explicitly.
#[derive(Debug)]
pub(crate) struct GateOpener {
    tx: watch::Sender<GateState>,
}

impl GateOpener {
    pub(crate) fn open(&self) {
        self.tx.send_replace(GateState::Ready);
    }

    pub(crate) fn fault(self, error: InterpreterError) {
        self.tx.send_replace(GateState::Faulted(error));
    }
}

/// Observes whether the runtime behind a handle finished loading.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    rx: watch::Receiver<GateState>,
}

impl ReadinessGate {
    /// Current state, without waiting.
    #[must_use]
    pub fn state(&self) -> VmState {
        match &*self.rx.borrow() {
            GateState::Faulted(_) => VmState::Faulted,
            _ if self.opener_gone() => VmState::Faulted,
            GateState::Ready => VmState::Ready,
            GateState::Loading => VmState::Loading,
        }
    }

    /// The error every command on this handle now fails with, if the gate is faulted.
    #[must_use]
    pub fn fault(&self) -> Option<InterpreterError> {
        match &*self.rx.borrow() {
            GateState::Faulted(error) => Some(error.clone()),
            _ if self.opener_gone() => Some(InterpreterError::worker_stopped()),
            _ => None,
        }
    }

    /// Resolves once loading finished; rejects with the `LoadError` if it failed.
    ///
    /// Every call, before or after the gate settled, observes the same outcome.
    /// The returned future does not borrow the gate.
    pub fn wait(&self) -> impl Future<Output = Result<(), InterpreterError>> + use<> {
        let mut rx = self.rx.clone();
        async move {
            let state = rx
                .wait_for(|state| !matches!(state, GateState::Loading))
                .await
                .map_err(|_| InterpreterError::worker_stopped())?;
            let faulted = match &*state {
                GateState::Faulted(error) => Some(error.clone()),
                _ => None,
            };
            drop(state);
            match faulted {
                Some(error) => Err(error),
                None if rx.has_changed().is_err() => Err(InterpreterError::worker_stopped()),
                None => Ok(()),
            }
        }
    }

    fn opener_gone(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn opened_gate_is_ready_for_every_waiter() {
        let (opener, gate) = channel();
        let early = gate.wait();
        assert_eq!(gate.state(), VmState::Loading);
        opener.open();
        assert_eq!(gate.state(), VmState::Ready);
        block_on(async {
            early.await.unwrap();
            gate.wait().await.unwrap();
        });
        assert!(gate.fault().is_none());
    }

    #[test]
    fn faulted_gate_repeats_the_same_error() {
        let (opener, gate) = channel();
        opener.fault(InterpreterError::load("no runtime"));
        let first = block_on(gate.wait()).unwrap_err();
        let second = block_on(gate.wait()).unwrap_err();
        assert_eq!(first, second);
        assert_eq!(first.message(), "no runtime");
        assert_eq!(gate.fault(), Some(first));
    }

    #[test]
    fn ready_gate_faults_when_the_worker_goes_away() {
        let (opener, gate) = channel();
        opener.open();
        assert_eq!(gate.state(), VmState::Ready);
        drop(opener);
        assert_eq!(gate.state(), VmState::Faulted);
        assert_eq!(gate.fault(), Some(InterpreterError::worker_stopped()));
        assert_eq!(block_on(gate.wait()), Err(InterpreterError::worker_stopped()));
    }

    #[test]
    fn opened_gate_can_still_be_faulted() {
        let (opener, gate) = channel();
        opener.open();
        opener.fault(InterpreterError::load("runtime panicked: boom"));
        assert_eq!(gate.state(), VmState::Faulted);
        assert_eq!(block_on(gate.wait()).unwrap_err().message(), "runtime panicked: boom");
    }

    #[test]
    fn dropped_opener_faults_the_gate() {
        let (opener, gate) = channel();
        drop(opener);
        assert_eq!(gate.state(), VmState::Faulted);
        let err = block_on(gate.wait()).unwrap_err();
        assert_eq!(err, InterpreterError::worker_stopped());
    }
}
