//! Tests for the command interface of `Vm`: readiness, strict FIFO dispatch,
//! error classification and output routing.
//!
//! Every test drives a `Scripted` runtime (see `common`) that records each
//! dispatch, so ordering is asserted on what the runtime actually saw.

mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use common::{Log, delayed, failing, instant, local, with_banner};
use pretty_assertions::assert_eq;
use pyvm::{Command, ErrorKind, Object, Reply, Stream, Vm, VmOptions, VmState};

// ============================================================================
// readiness
// ============================================================================

/// `ready` resolves for every caller, before and after the gate opened.
#[test]
fn ready_is_idempotent() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(delayed(&log, Duration::from_secs(2)));
        assert_eq!(vm.state(), VmState::Loading);
        let early = vm.ready();
        early.await.unwrap();
        vm.ready().await.unwrap();
        vm.ready().await.unwrap();
        assert_eq!(vm.state(), VmState::Ready);
        assert_eq!(log.entries(), vec!["boot"]);
    });
}

/// Commands issued while loading are held, then dispatched in issue order.
#[test]
fn commands_issued_while_loading_run_in_order_once_ready() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(delayed(&log, Duration::from_secs(5)));
        let set = vm.set("x", 7);
        let double = vm.exec("double x");
        let get = vm.get("x");
        assert_eq!(vm.state(), VmState::Loading);
        assert!(!get.is_settled());

        assert_eq!(get.await.unwrap(), Object::Int(14));
        set.await.unwrap();
        double.await.unwrap();
        assert_eq!(
            log.entries(),
            vec![
                "boot",
                "start set x",
                "end set x",
                "start exec double x",
                "end exec double x",
                "start get x",
                "end get x",
            ]
        );
    });
}

/// A failed load rejects `ready`, every held command, and every later command
/// with the very same `LoadError`.
#[test]
fn load_failure_rejects_everything_with_the_same_error() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(failing(&log, Duration::from_secs(1), "runtime image missing"));
        let held = [vm.exec("print never"), vm.set("x", 1), vm.exec("print nope")];

        let error = vm.ready().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::LoadError);
        assert_eq!(error.name(), "LoadError");
        assert_eq!(error.message(), "runtime image missing");
        assert_eq!(error.trace(), None);
        assert_eq!(vm.state(), VmState::Faulted);

        for command in held {
            assert_eq!(command.await.unwrap_err(), error);
        }

        let later = vm.get("x");
        assert!(later.is_settled(), "a faulted handle rejects without queueing");
        assert_eq!(later.await.unwrap_err(), error);
        assert_eq!(vm.ready().await.unwrap_err(), error);
        assert_eq!(log.entries(), vec!["boot"], "nothing reached a runtime");
    });
}

/// The fault check comes before payload validation.
#[test]
fn faulted_handle_reports_load_error_even_for_malformed_commands() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(failing(&log, Duration::ZERO, "boom"));
        vm.ready().await.unwrap_err();
        let error = vm.get("not a name").await.unwrap_err();
        assert!(error.is_load());
    });
}

// ============================================================================
// ordering
// ============================================================================

/// The runtime sees commands in issue order and never two at once.
#[test]
fn dispatch_is_fifo_and_never_overlaps() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        let pending: Vec<_> = (0..5).map(|i| vm.exec(format!("step {i}"))).collect();
        // await in reverse so settlement order cannot come from await order
        for future in pending.into_iter().rev() {
            future.await.unwrap();
        }

        let mut expected = vec!["boot".to_owned()];
        for i in 0..5 {
            expected.push(format!("start exec step {i}"));
            expected.push(format!("end exec step {i}"));
        }
        assert_eq!(log.entries(), expected);
    });
}

/// Futures settle in enqueue order even when many callers share one handle.
#[test]
fn concurrent_callers_settle_in_enqueue_order() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        let issued = Rc::new(RefCell::new(Vec::new()));
        let settled = Rc::new(RefCell::new(Vec::new()));

        let mut tasks = Vec::new();
        for caller in 0..3 {
            let vm = vm.clone();
            let issued = Rc::clone(&issued);
            let settled = Rc::clone(&settled);
            tasks.push(tokio::task::spawn_local(async move {
                for round in 0..4 {
                    let tag = format!("{caller}-{round}");
                    issued.borrow_mut().push(tag.clone());
                    vm.exec(format!("step {tag}")).await.unwrap();
                    settled.borrow_mut().push(tag);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let issued = issued.borrow().clone();
        let dispatched: Vec<String> = log
            .entries()
            .iter()
            .filter_map(|entry| entry.strip_prefix("start exec step "))
            .map(str::to_owned)
            .collect();
        assert_eq!(issued.len(), 12);
        assert_eq!(dispatched, issued);
        assert_eq!(*settled.borrow(), issued);
    });
}

/// A rejected command does not stop the ones queued behind it.
#[test]
fn failures_do_not_abort_later_commands() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        let first = vm.exec("raise ValueError bad");
        let second = vm.get("missing");
        let third = vm.set("y", 3);
        let fourth = vm.get("y");

        assert!(first.await.unwrap_err().is_runtime());
        assert!(second.await.unwrap_err().is_protocol());
        third.await.unwrap();
        assert_eq!(fourth.await.unwrap(), Object::Int(3));
        assert_eq!(vm.state(), VmState::Ready);
    });
}

/// A runtime that panics mid-command faults the handle: the panicking command,
/// everything queued behind it and every later command reject with one `LoadError`.
#[test]
fn panicking_runtime_faults_the_handle() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        vm.ready().await.unwrap();
        let boom = vm.exec("panic boom");
        let behind = vm.get("__name__");

        let error = boom.await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::LoadError);
        assert_eq!(error.message(), "runtime panicked: boom");
        assert_eq!(behind.await.unwrap_err(), error);
        assert_eq!(vm.state(), VmState::Faulted);
        assert_eq!(vm.ready().await.unwrap_err(), error);

        let later = vm.exec("print after");
        assert!(later.is_settled());
        assert_eq!(later.await.unwrap_err(), error);
        assert_eq!(log.entries(), vec!["boot", "start exec panic boom"]);
    });
}

/// Dropping a result future does not take the command back out of the queue.
#[test]
fn dropped_future_still_runs() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        drop(vm.set("x", 21));
        drop(vm.exec("double x"));
        assert_eq!(vm.get("x").await.unwrap(), Object::Int(42));
    });
}

// ============================================================================
// errors
// ============================================================================

/// A raising program rejects with `RuntimeError` carrying name, message and trace;
/// the handle keeps working.
#[test]
fn raising_program_is_runtime_error() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        let error = vm.exec("print ok\nraise ZeroDivisionError division by zero").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::RuntimeError);
        assert_eq!(error.name(), "ZeroDivisionError");
        assert_eq!(error.message(), "division by zero");
        assert_eq!(
            error.trace(),
            Some(
                "Traceback (most recent call last):\n  File \"<exec>\", line 2, in <module>\n    raise ZeroDivisionError division by zero\nZeroDivisionError: division by zero\n"
            )
        );
        assert_eq!(error.to_string(), "ZeroDivisionError: division by zero");

        vm.exec("print still alive").await.unwrap();
        assert_eq!(vm.state(), VmState::Ready);
    });
}

/// Malformed payloads reject synchronously and never reach the runtime.
#[test]
fn malformed_commands_are_rejected_at_call_time() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        vm.ready().await.unwrap();

        let bad_dict = Object::Dict(vec![(Object::List(vec![]), Object::None)].into());
        let pending = [vm.set("1x", 1), vm.set("ok", bad_dict), vm.exec("print \0")];
        for future in pending {
            assert!(future.is_settled());
            let error = future.await.unwrap_err();
            assert_eq!(error.kind(), ErrorKind::ProtocolError);
            assert_eq!(error.trace(), None);
        }
        let keyword = vm.get("while");
        assert!(keyword.is_settled());
        assert_eq!(
            keyword.await.unwrap_err().to_string(),
            "ProtocolError: \"while\" is not a valid variable name"
        );
        assert_eq!(log.entries(), vec!["boot"]);
    });
}

/// Unbound and unrepresentable values are protocol errors raised by the runtime.
#[test]
fn get_of_unbound_or_unrepresentable_is_protocol_error() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        let unbound = vm.get("nope").await.unwrap_err();
        assert!(unbound.is_protocol());
        assert_eq!(unbound.message(), "name 'nope' is not defined");

        let func = vm.get("func").await.unwrap_err();
        assert!(func.is_protocol());
        assert_eq!(func.message(), "value of 'func' has type 'function' which is not representable");
    });
}

/// `set_serialized` goes through the natural JSON mapping.
#[test]
fn set_serialized_uses_json_mapping() {
    #[derive(serde::Serialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        vm.set_serialized("p", &Point { x: 1, y: 2 }).await.unwrap();
        let expected = Object::Dict(
            vec![
                (Object::from("x"), Object::Int(1)),
                (Object::from("y"), Object::Int(2)),
            ]
            .into(),
        );
        assert_eq!(vm.get("p").await.unwrap(), expected);

        let mut tuple_keys = std::collections::BTreeMap::new();
        tuple_keys.insert((1, 2), "a");
        let rejected = vm.set_serialized("bad", &tuple_keys);
        assert!(rejected.is_settled());
        assert!(rejected.await.unwrap_err().is_protocol());
    });
}

/// `enqueue` accepts prebuilt commands and reports the raw reply.
#[test]
fn enqueue_returns_raw_replies() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(instant(&log));
        assert_eq!(vm.enqueue(Command::set("n", 5)).await.unwrap(), Reply::Unit);
        assert_eq!(vm.enqueue(Command::get("n")).await.unwrap(), Reply::Value(Object::Int(5)));
        assert_eq!(
            vm.enqueue(Command::get("__name__")).await.unwrap(),
            Reply::Value(Object::from("__main__"))
        );
    });
}

// ============================================================================
// output
// ============================================================================

/// Output reaches the sink while the exec runs, before its future settles.
#[test]
fn output_is_delivered_before_exec_settles() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn_with(
            instant(&log),
            VmOptions::default().stdout(log.sink("out")).stderr(log.sink("err")),
        );
        vm.exec("print one\nwarn two").await.unwrap();
        log.push("settled");
        assert_eq!(
            log.entries(),
            vec![
                "boot",
                "start exec print one\nwarn two",
                "out:one\n",
                "err:two\n",
                "end exec print one\nwarn two",
                "settled",
            ]
        );
    });
}

/// Text written before any sink is assigned is buffered, and reassignment takes
/// effect for the next emission.
#[test]
fn early_output_is_buffered_until_a_sink_is_assigned() {
    local(async {
        let log = Log::default();
        let vm = Vm::spawn(with_banner(&log, "Loading...\n"));
        vm.ready().await.unwrap();
        assert_eq!(vm.output().take_buffered(Stream::Stdout), "Loading...\n");

        vm.route_all(log.sink("console"));
        vm.exec("print a\nwarn b").await.unwrap();
        vm.set_stderr(log.sink("errors"));
        vm.exec("warn c").await.unwrap();

        let output: Vec<String> = log
            .entries()
            .into_iter()
            .filter(|entry| !entry.starts_with("start") && !entry.starts_with("end"))
            .collect();
        assert_eq!(output, vec!["boot", "console:a\n", "console:b\n", "errors:c\n"]);
    });
}

/// Two handles are independent: one faulting does not affect the other.
#[test]
fn handles_are_independent() {
    local(async {
        let good_log = Log::default();
        let bad_log = Log::default();
        let good = Vm::spawn_with(instant(&good_log), VmOptions::default().label("good"));
        let bad = Vm::spawn_with(failing(&bad_log, Duration::ZERO, "nope"), VmOptions::default().label("bad"));
        good.set("x", 1).await.unwrap();
        assert!(bad.set("x", 1).await.unwrap_err().is_load());
        assert_eq!(good.get("x").await.unwrap(), Object::Int(1));
        assert_eq!(good.label(), "good");
        assert_eq!(bad.state(), VmState::Faulted);
    });
}
