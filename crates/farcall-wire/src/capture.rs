//! Per-invocation output capture.
//!
//! A [`CaptureScope`] is opened immediately before a target method runs and
//! closed immediately after, whatever the outcome. The target receives the
//! scope itself as its output channel, so concurrent invocations each write
//! into their own buffer and can never see each other's output.

use std::fmt;
use std::io;

/// Buffer collecting everything one invocation writes.
#[derive(Debug, Default)]
pub struct CaptureScope {
    buf: Vec<u8>,
}

impl CaptureScope {
    /// Open a new, empty scope.
    pub fn begin() -> Self {
        Self::default()
    }

    /// Close the scope and return what was written. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn end(self) -> String {
        match String::from_utf8(self.buf) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    pub fn print(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    /// Backs `write!`/`writeln!` without importing a `Write` trait. Writing
    /// into the buffer cannot fail.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self.print(s),
            None => self.print(&args.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl io::Write for CaptureScope {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for CaptureScope {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}
