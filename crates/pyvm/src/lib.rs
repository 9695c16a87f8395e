#![doc = include_str!("../../../README.md")]
mod classify;
mod console;
mod exception;
mod gate;
mod object;
mod output;
mod queue;
mod runtime;
mod vm;

pub use crate::{
    classify::{BootFailure, ErrorKind, InterpreterError, Origin, RawFailure, RuntimeFailure, classify},
    console::{ConsoleBridge, RunOptions, RunOutcome, format_elapsed},
    exception::{Exception, StackFrame},
    gate::{ReadinessGate, VmState},
    object::{DictPairs, InvalidInputError, Object, bytes_repr_fmt, float_repr_fmt, string_repr_fmt},
    output::{DEFAULT_BUFFER_LIMIT, OutputChannel, OutputEvent, Sink, Stream},
    queue::{Command, CommandFuture, Reply},
    runtime::{Runtime, RuntimeLoader},
    vm::{Vm, VmOptions},
};
