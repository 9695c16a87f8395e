//! Shared fixtures: a scripted runtime that records every dispatch, a few
//! loaders for it, and a helper that runs a future on a paused local runtime.

use std::{cell::RefCell, collections::HashMap, future::Future, rc::Rc, time::Duration};

use pyvm::{BootFailure, Exception, Object, OutputChannel, Runtime, RuntimeFailure, RuntimeLoader, StackFrame};

/// Runs `future` inside a `LocalSet` on a current-thread runtime with paused time.
///
/// Paused time auto-advances whenever every task is idle, so sleeps in loaders
/// complete instantly and elapsed durations are exact.
pub fn local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();
    tokio::task::LocalSet::new().block_on(&runtime, future)
}

/// Ordered record of what happened, shared between a test and its fixtures.
#[derive(Debug, Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// A sink that records each chunk as `"{tag}:{text}"`.
    pub fn sink(&self, tag: &'static str) -> impl Fn(&str) + 'static {
        let log = self.clone();
        move |text| log.push(format!("{tag}:{text}"))
    }
}

/// Runtime driven by a line-oriented script instead of Python.
///
/// Each `exec` line is `op [arg]`:
/// - `print TEXT` / `warn TEXT` write `TEXT\n` to stdout / stderr
/// - `double NAME` doubles an integer global
/// - `raise TYPE [MESSAGE]` raises
/// - `panic TEXT` panics, taking the runtime down with it
/// - anything else only gets recorded
///
/// Every dispatch is logged as `start ...` / `end ...` so tests can check that
/// commands never overlap and run in enqueue order.
#[derive(Debug)]
pub struct Scripted {
    globals: HashMap<String, Object>,
    log: Log,
}

impl Scripted {
    pub fn new(log: Log) -> Self {
        let mut globals = HashMap::new();
        globals.insert("__name__".to_owned(), Object::from("__main__"));
        Self { globals, log }
    }

    fn run_line(&mut self, index: usize, line: &str, output: &OutputChannel) -> Result<(), RuntimeFailure> {
        let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
        match op {
            "print" => output.stdout(&format!("{arg}\n")),
            "warn" => output.stderr(&format!("{arg}\n")),
            "double" => {
                let doubled = match self.globals.get(arg) {
                    Some(Object::Int(value)) => value * 2,
                    _ => return Err(raise("TypeError", Some("not an int"), index, line)),
                };
                self.globals.insert(arg.to_owned(), Object::Int(doubled));
            }
            "raise" => {
                let (exc_type, message) = match arg.split_once(' ') {
                    Some((exc_type, message)) => (exc_type, Some(message)),
                    None => (arg, None),
                };
                return Err(raise(exc_type, message, index, line));
            }
            "panic" => panic!("{arg}"),
            _ => {}
        }
        Ok(())
    }
}

fn raise(exc_type: &str, message: Option<&str>, index: usize, line: &str) -> RuntimeFailure {
    Exception::new(exc_type, message.map(str::to_owned))
        .with_frame(StackFrame::new("<exec>", index + 1, "<module>").with_source_line(line))
        .into()
}

impl Runtime for Scripted {
    fn set_global(&mut self, name: &str, value: Object) -> Result<(), RuntimeFailure> {
        self.log.push(format!("start set {name}"));
        self.globals.insert(name.to_owned(), value);
        self.log.push(format!("end set {name}"));
        Ok(())
    }

    fn get_global(&mut self, name: &str) -> Result<Object, RuntimeFailure> {
        self.log.push(format!("start get {name}"));
        let result = match name {
            "func" => Err(RuntimeFailure::Unrepresentable {
                name: name.to_owned(),
                type_name: "function".to_owned(),
            }),
            _ => self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeFailure::Unbound(name.to_owned())),
        };
        self.log.push(format!("end get {name}"));
        result
    }

    fn exec(&mut self, source: &str, output: &OutputChannel) -> Result<(), RuntimeFailure> {
        self.log.push(format!("start exec {source}"));
        let result = source
            .lines()
            .enumerate()
            .try_for_each(|(index, line)| self.run_line(index, line, output));
        self.log.push(format!("end exec {source}"));
        result
    }
}

async fn boot(log: Log, delay: Duration, failure: Option<&'static str>) -> Result<Scripted, BootFailure> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    log.push("boot");
    match failure {
        Some(message) => Err(BootFailure::new(message)),
        None => Ok(Scripted::new(log)),
    }
}

/// Loads as soon as the worker first runs.
pub fn instant(log: &Log) -> impl RuntimeLoader<Runtime = Scripted> {
    let log = log.clone();
    move |_: OutputChannel| boot(log, Duration::ZERO, None)
}

/// Loads after `delay` of (paused) time.
pub fn delayed(log: &Log, delay: Duration) -> impl RuntimeLoader<Runtime = Scripted> {
    let log = log.clone();
    move |_: OutputChannel| boot(log, delay, None)
}

/// Fails to load after `delay`.
pub fn failing(log: &Log, delay: Duration, message: &'static str) -> impl RuntimeLoader<Runtime = Scripted> {
    let log = log.clone();
    move |_: OutputChannel| boot(log, delay, Some(message))
}

/// Writes a banner to stdout while loading.
pub fn with_banner(log: &Log, banner: &'static str) -> impl RuntimeLoader<Runtime = Scripted> {
    let log = log.clone();
    move |output: OutputChannel| {
        output.stdout(banner);
        boot(log, Duration::from_millis(10), None)
    }
}
