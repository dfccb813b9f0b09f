//! # Operator console output
//!
//! The console loop and every pump worker print through one shared
//! [`Console`]. Each call to [`Console::emit`] writes a whole block of lines
//! under a single lock, so output from concurrent workers can interleave
//! between blocks but never inside a line.

use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Instant;

#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// A console that records everything written to it.
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(captured.clone()), captured)
    }

    /// Writes `block` followed by a newline as one atomic unit.
    pub fn emit(&self, block: impl AsRef<str>) {
        self.write_atomic(block.as_ref(), true);
    }

    /// Writes the prompt without a trailing newline.
    pub fn prompt(&self, prompt: &str) {
        self.write_atomic(prompt, false);
    }

    fn write_atomic(&self, text: &str, newline: bool) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        if newline {
            line.push('\n');
        }
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            tracing::error!(error = %e, "console write failed");
        }
    }
}

/// The elapsed-time line printed after a command or a late result.
pub fn elapsed_line(started: Instant) -> String {
    format!("\t## time (msec): {}", started.elapsed().as_millis())
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// In-memory sink behind [`Console::capture`].
#[derive(Clone, Default, Debug)]
pub struct Captured {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Empties the buffer and returns what it held.
    pub fn take(&self) -> String {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let taken = std::mem::take(&mut *buf);
        String::from_utf8_lossy(&taken).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
