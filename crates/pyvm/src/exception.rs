use std::fmt::{self, Write};

/// A location in interpreted source, as it appears in a traceback.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StackFrame {
    /// Script name shown after `File`, e.g. `"<exec>"`.
    pub filename: String,
    /// 1-based line number.
    pub line: usize,
    /// Scope name, `"<module>"` for top-level code.
    pub name: String,
    /// The offending source line, if the runtime kept it.
    pub source_line: Option<String>,
}

impl StackFrame {
    #[must_use]
    pub fn new(filename: impl Into<String>, line: usize, name: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            line,
            name: name.into(),
            source_line: None,
        }
    }

    #[must_use]
    pub fn with_source_line(mut self, source_line: impl Into<String>) -> Self {
        self.source_line = Some(source_line.into());
        self
    }
}

/// An exception raised by an interpreted program.
///
/// This is how a runtime reports that caller-supplied code raised. It carries the
/// raised type's name, the `str()` of the exception, and the frames that were
/// active when it escaped, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Exception {
    exc_type: String,
    message: Option<String>,
    frames: Vec<StackFrame>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: impl Into<String>, message: Option<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message,
            frames: Vec::new(),
        }
    }

    /// Appends a frame; frames are kept outermost first.
    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Name of the raised type, e.g. `"ValueError"`.
    #[must_use]
    pub fn exc_type(&self) -> &str {
        &self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// `"Type: message"`, or just `"Type"` when there is no message.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.message.as_deref() {
            Some(msg) if !msg.is_empty() => format!("{}: {msg}", self.exc_type),
            _ => self.exc_type.clone(),
        }
    }

    /// Renders the full human-readable traceback, CPython style.
    ///
    /// ```text
    /// Traceback (most recent call last):
    ///   File "<exec>", line 1, in <module>
    ///     raise RuntimeError
    /// RuntimeError
    /// ```
    #[must_use]
    pub fn traceback(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.traceback_fmt(&mut out);
        out
    }

    fn traceback_fmt(&self, f: &mut impl Write) -> fmt::Result {
        if !self.frames.is_empty() {
            f.write_str("Traceback (most recent call last):\n")?;
        }
        for frame in &self.frames {
            writeln!(f, "  File \"{}\", line {}, in {}", frame.filename, frame.line, frame.name)?;
            if let Some(line) = frame.source_line.as_deref() {
                let line = line.trim();
                if !line.is_empty() {
                    writeln!(f, "    {line}")?;
                }
            }
        }
        writeln!(f, "{}", self.summary())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceback_lists_frames_then_summary() {
        let exc = Exception::new("ValueError", Some("bad".to_owned()))
            .with_frame(StackFrame::new("<exec>", 3, "<module>").with_source_line("  raise ValueError('bad')"));
        assert_eq!(
            exc.traceback(),
            "Traceback (most recent call last):\n  File \"<exec>\", line 3, in <module>\n    raise ValueError('bad')\nValueError: bad\n"
        );
    }

    #[test]
    fn summary_without_message_is_type_name() {
        assert_eq!(Exception::new("RuntimeError", None).summary(), "RuntimeError");
        assert_eq!(Exception::new("RuntimeError", Some(String::new())).summary(), "RuntimeError");
    }
}
