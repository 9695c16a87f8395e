//! Tests for `ConsoleBridge::run`: status reporting, timing and stderr traces.
//!
//! Time is paused, so elapsed durations only grow when a loader sleeps.

mod common;

use std::time::Duration;

use common::{Log, delayed, failing, instant, local};
use pretty_assertions::assert_eq;
use pyvm::{ConsoleBridge, ErrorKind, RunOptions, Vm, VmOptions};

fn bridge(vm: Vm, log: &Log) -> ConsoleBridge {
    ConsoleBridge::new(vm, log.sink("status"))
}

fn console_vm(loader: impl pyvm::RuntimeLoader, log: &Log) -> Vm {
    Vm::spawn_with(
        loader,
        VmOptions::default().stdout(log.sink("out")).stderr(log.sink("err")),
    )
}

/// Entries other than the runtime's own start/end bookkeeping.
fn visible(log: &Log) -> Vec<String> {
    log.entries()
        .into_iter()
        .filter(|entry| !entry.starts_with("start ") && !entry.starts_with("end ") && entry != "boot")
        .collect()
}

// ============================================================================
// success
// ============================================================================

/// A quiet successful run writes nothing to the status sink.
#[test]
fn quiet_success_is_silent() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(instant(&log), &log), &log);
        let outcome = console.run("print Welcome!", RunOptions::quiet()).await;
        assert!(outcome.is_ok());
        assert_eq!(visible(&log), vec!["out:Welcome!\n"]);
    });
}

/// A verbose successful run reports its duration.
#[test]
fn verbose_success_reports_elapsed() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(instant(&log), &log), &log);
        let outcome = console.run("print hi", RunOptions::verbose()).await;
        assert_eq!(outcome.elapsed, Duration::ZERO);
        assert_eq!(visible(&log), vec!["out:hi\n", "status:Run in 0ms (OK)"]);
    });
}

/// Time spent waiting for the runtime to load counts towards the run.
#[test]
fn run_before_ready_includes_load_time() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(delayed(&log, Duration::from_millis(1_500)), &log), &log);
        let outcome = console.run("pass", RunOptions::verbose()).await;
        assert!(outcome.elapsed >= Duration::from_millis(1_500));
        assert_eq!(visible(&log), vec!["status:Run in 1.5s (OK)"]);
    });
}

// ============================================================================
// failure
// ============================================================================

/// A raising program is reported on the status sink and its trace goes to stderr,
/// even when quiet; the run itself still resolves.
#[test]
fn failure_reports_status_and_trace_even_when_quiet() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(instant(&log), &log), &log);
        let outcome = console.run("raise ValueError bad input", RunOptions::quiet()).await;

        let error = outcome.error.unwrap();
        assert_eq!(error.kind(), ErrorKind::RuntimeError);
        assert_eq!(
            visible(&log),
            vec![
                "status:Run in 0ms (ValueError: bad input!)",
                "err:Traceback (most recent call last):\n  File \"<exec>\", line 1, in <module>\n    raise ValueError bad input\nValueError: bad input\n",
            ]
        );
    });
}

/// Errors without a trace write their one-line form to stderr.
#[test]
fn protocol_failure_writes_summary_line() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(instant(&log), &log), &log);
        let outcome = console.run("print \0", RunOptions::verbose()).await;
        assert_eq!(outcome.error.unwrap().kind(), ErrorKind::ProtocolError);
        assert_eq!(
            visible(&log),
            vec![
                "status:Run in 0ms (ProtocolError: source code cannot contain null bytes!)",
                "err:ProtocolError: source code cannot contain null bytes\n",
            ]
        );
    });
}

/// On a handle whose runtime failed to load every run reports the `LoadError`.
#[test]
fn load_failure_is_reported_per_run() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(failing(&log, Duration::from_secs(2), "no wasm"), &log), &log);
        let first = console.run("print a", RunOptions::quiet()).await;
        let second = console.run("print b", RunOptions::quiet()).await;
        assert_eq!(first.error, second.error);
        assert!(first.elapsed >= Duration::from_secs(2));
        assert_eq!(second.elapsed, Duration::ZERO);
        assert_eq!(
            visible(&log),
            vec![
                "status:Run in 2.0s (LoadError: no wasm!)",
                "err:LoadError: no wasm\n",
                "status:Run in 0ms (LoadError: no wasm!)",
                "err:LoadError: no wasm\n",
            ]
        );
    });
}

/// A failed run does not poison the console for the next one.
#[test]
fn console_recovers_after_failure() {
    local(async {
        let log = Log::default();
        let console = bridge(console_vm(instant(&log), &log), &log);
        assert!(!console.run("raise KeyError", RunOptions::quiet()).await.is_ok());
        assert!(console.run("print fine", RunOptions::quiet()).await.is_ok());
        assert_eq!(console.vm().state(), pyvm::VmState::Ready);
        assert!(visible(&log).contains(&"status:Run in 0ms (KeyError!)".to_owned()));
    });
}
