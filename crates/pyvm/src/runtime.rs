//! The seam between the command interface and an interpreter runtime.

use std::future::Future;

use crate::{
    classify::{BootFailure, RuntimeFailure},
    object::Object,
    output::OutputChannel,
};

/// An interpreter runtime driven by a [`Vm`](crate::Vm) worker.
///
/// Every method runs to completion before the next command is dispatched, so
/// implementations never see concurrent calls. Text produced while executing goes
/// through the `OutputChannel` as it is produced, not when `exec` returns.
pub trait Runtime: 'static {
    /// Binds `name` in the top-level scope.
    fn set_global(&mut self, name: &str, value: Object) -> Result<(), RuntimeFailure>;

    /// Reads the top-level binding `name`.
    ///
    /// Returns [`RuntimeFailure::Unbound`] when nothing is bound and
    /// [`RuntimeFailure::Unrepresentable`] when the value has no `Object` form.
    fn get_global(&mut self, name: &str) -> Result<Object, RuntimeFailure>;

    /// Runs `source` as a top-level program in the persistent scope.
    fn exec(&mut self, source: &str, output: &OutputChannel) -> Result<(), RuntimeFailure>;
}

/// Produces a [`Runtime`] asynchronously.
///
/// Implemented for any `FnOnce(OutputChannel) -> impl Future<Output = Result<R, BootFailure>>`,
/// so a plain `async fn` taking the channel can be handed to [`Vm::spawn`](crate::Vm::spawn).
/// The channel given to the loader is the handle's own, so text written while
/// loading (a banner, say) reaches the same sinks as later program output.
pub trait RuntimeLoader: 'static {
    type Runtime: Runtime;
    type Future: Future<Output = Result<Self::Runtime, BootFailure>> + 'static;

    fn load(self, output: OutputChannel) -> Self::Future;
}

impl<F, Fut, R> RuntimeLoader for F
where
    F: FnOnce(OutputChannel) -> Fut + 'static,
    Fut: Future<Output = Result<R, BootFailure>> + 'static,
    R: Runtime,
{
    type Runtime = R;
    type Future = Fut;

    fn load(self, output: OutputChannel) -> Fut {
        self(output)
    }
}
