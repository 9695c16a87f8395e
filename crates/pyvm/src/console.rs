//! One read-eval-print step on top of a [`Vm`].

use std::{fmt, future::Future, rc::Rc, time::Duration};

use tokio::time::Instant;

use crate::{classify::InterpreterError, vm::Vm};

/// Options for a single [`ConsoleBridge::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Report successful runs on the status sink too, not only failures.
    pub verbose: bool,
}

impl RunOptions {
    #[must_use]
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    #[must_use]
    pub fn quiet() -> Self {
        Self { verbose: false }
    }
}

/// What happened during one [`ConsoleBridge::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub error: Option<InterpreterError>,
}

impl RunOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs code on a [`Vm`] and reports the outcome to a status sink.
///
/// Failures are never propagated: they are written to the status sink and the
/// error's traceback goes to the handle's `stderr`.
#[derive(Clone)]
pub struct ConsoleBridge {
    vm: Vm,
    status: Rc<dyn Fn(&str)>,
}

impl fmt::Debug for ConsoleBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleBridge").field("vm", &self.vm).finish_non_exhaustive()
    }
}

impl ConsoleBridge {
    #[must_use]
    pub fn new(vm: Vm, status: impl Fn(&str) + 'static) -> Self {
        Self {
            vm,
            status: Rc::new(status),
        }
    }

    #[must_use]
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Executes `source` and reports the result.
    ///
    /// The `Exec` is enqueued by this call, not when the returned future is first
    /// polled. The future always resolves:
    ///
    /// - success, verbose: status `"Run in {elapsed} (OK)"`
    /// - success, quiet: nothing
    /// - failure: status `"Run in {elapsed} ({name}: {message}!)"` and the trace on `stderr`
    pub fn run(&self, source: &str, options: RunOptions) -> impl Future<Output = RunOutcome> + use<> {
        let start = Instant::now();
        let pending = self.vm.exec(source);
        let vm = self.vm.clone();
        let status = Rc::clone(&self.status);
        async move {
            let result = pending.await;
            let elapsed = start.elapsed();
            match result {
                Ok(()) => {
                    if options.verbose {
                        status(&format!("Run in {} (OK)", format_elapsed(elapsed)));
                    }
                    RunOutcome { elapsed, error: None }
                }
                Err(error) => {
                    status(&format!("Run in {} ({error}!)", format_elapsed(elapsed)));
                    match error.trace() {
                        Some(trace) => vm.output().stderr(trace),
                        None => vm.output().stderr(&format!("{error}\n")),
                    }
                    RunOutcome {
                        elapsed,
                        error: Some(error),
                    }
                }
            }
        }
    }
}

/// Renders a duration for humans: `"42ms"`, `"3.5s"`, `"2min 5s"`.
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}min {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_units() {
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0ms");
        assert_eq!(format_elapsed(Duration::from_millis(999)), "999ms");
        assert_eq!(format_elapsed(Duration::from_millis(3_500)), "3.5s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2min 5s");
    }
}
