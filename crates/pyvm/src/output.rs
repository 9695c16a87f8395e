//! Output multiplexing between a runtime and its caller.
//!
//! A runtime writes text through an [`OutputChannel`]; each chunk is delivered
//! synchronously to the sink currently registered for its [`Stream`]. Until a sink
//! is assigned, text is kept in a bounded buffer so early output (for example a
//! banner printed while loading) is neither lost nor able to crash anything.

use std::{cell::RefCell, fmt, rc::Rc};

use strum::{Display, IntoStaticStr};

/// Default cap, in bytes, for text buffered on a stream without a sink.
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// The two output streams a runtime can write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One chunk of runtime-generated text and the stream it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent<'a> {
    pub stream: Stream,
    pub text: &'a str,
}

/// A caller-supplied text sink.
pub type Sink = Rc<dyn Fn(&str)>;

enum Target {
    Buffer(String),
    Sink(Sink),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buf) => f.debug_tuple("Buffer").field(&buf.len()).finish(),
            Self::Sink(_) => f.write_str("Sink"),
        }
    }
}

#[derive(Debug)]
struct Targets {
    stdout: Target,
    stderr: Target,
    buffer_limit: usize,
}

impl Targets {
    fn get_mut(&mut self, stream: Stream) -> &mut Target {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

/// The `stdout`/`stderr` pair a runtime writes through.
///
/// Cloning yields another handle to the same pair of sinks. All access happens on
/// one cooperative thread; whoever holds a handle may reassign a sink at any time,
/// including from inside a sink callback, and the change applies to the next
/// emission.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    targets: Rc<RefCell<Targets>>,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}

impl OutputChannel {
    /// Creates a channel whose streams buffer up to `buffer_limit` bytes each
    /// until a sink is assigned.
    #[must_use]
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            targets: Rc::new(RefCell::new(Targets {
                stdout: Target::Buffer(String::new()),
                stderr: Target::Buffer(String::new()),
                buffer_limit,
            })),
        }
    }

    /// Replaces the sink for `stream`.
    pub fn set_sink(&self, stream: Stream, sink: impl Fn(&str) + 'static) {
        self.set_shared_sink(stream, Rc::new(sink));
    }

    /// Replaces the sink for `stream` with an already shared sink.
    pub fn set_shared_sink(&self, stream: Stream, sink: Sink) {
        *self.targets.borrow_mut().get_mut(stream) = Target::Sink(sink);
    }

    pub fn set_stdout(&self, sink: impl Fn(&str) + 'static) {
        self.set_sink(Stream::Stdout, sink);
    }

    pub fn set_stderr(&self, sink: impl Fn(&str) + 'static) {
        self.set_sink(Stream::Stderr, sink);
    }

    /// Sends both streams to the same sink.
    pub fn route_all(&self, sink: impl Fn(&str) + 'static) {
        let sink: Sink = Rc::new(sink);
        self.set_shared_sink(Stream::Stdout, Rc::clone(&sink));
        self.set_shared_sink(Stream::Stderr, sink);
    }

    /// Returns and clears whatever text was buffered on `stream`.
    ///
    /// Always empty while a sink is assigned.
    pub fn take_buffered(&self, stream: Stream) -> String {
        match self.targets.borrow_mut().get_mut(stream) {
            Target::Buffer(buf) => std::mem::take(buf),
            Target::Sink(_) => String::new(),
        }
    }

    /// Delivers one chunk to the sink registered for its stream.
    pub fn emit(&self, event: OutputEvent<'_>) {
        if event.text.is_empty() {
            return;
        }
        // the borrow must end before the sink runs: sinks may reassign sinks
        let sink = {
            let mut targets = self.targets.borrow_mut();
            let limit = targets.buffer_limit;
            match targets.get_mut(event.stream) {
                Target::Sink(sink) => Rc::clone(sink),
                Target::Buffer(buf) => {
                    let room = limit.saturating_sub(buf.len());
                    if event.text.len() <= room {
                        buf.push_str(event.text);
                    } else {
                        let cut = floor_char_boundary(event.text, room);
                        buf.push_str(&event.text[..cut]);
                        tracing::trace!(
                            stream = %event.stream,
                            dropped = event.text.len() - cut,
                            "output buffer full, dropping text"
                        );
                    }
                    return;
                }
            }
        };
        sink(event.text);
    }

    pub fn write(&self, stream: Stream, text: &str) {
        self.emit(OutputEvent { stream, text });
    }

    pub fn stdout(&self, text: &str) {
        self.write(Stream::Stdout, text);
    }

    pub fn stderr(&self, text: &str) {
        self.write(Stream::Stderr, text);
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
