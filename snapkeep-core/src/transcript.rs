/*!
Run transcript capture.

The [`Transcript`] is an appendable, shareable text buffer. The CLI installs it
as the `tracing` writer at process start so every log line of the run is
captured. A [`TranscriptGuard`] owns delivery: it hands the captured text to a
[`Notifier`] exactly once, either through [`TranscriptGuard::finish`] or, on
any other exit path, when it is dropped.
*/

use chrono::{DateTime, Utc};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

use crate::notify::Notifier;
use crate::Result;

/// Shared buffer collecting the textual output of one run.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line of text.
    pub fn append_line(&self, line: &str) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(line.as_bytes());
            buffer.push(b'\n');
        }
    }

    /// Everything captured so far.
    pub fn contents(&self) -> String {
        match self.buffer.lock() {
            Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().map(|b| b.is_empty()).unwrap_or(true)
    }

    pub fn writer(&self) -> TranscriptWriter {
        TranscriptWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// `io::Write` handle appending to a [`Transcript`].
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for TranscriptWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "transcript lock poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Transcript {
    type Writer = TranscriptWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer()
    }
}

/// Delivers the transcript when the run ends, whichever way it ends.
pub struct TranscriptGuard<N: Notifier> {
    transcript: Transcript,
    notifier: N,
    delivered: bool,
}

impl<N: Notifier> TranscriptGuard<N> {
    pub fn new(transcript: Transcript, notifier: N) -> Self {
        Self {
            transcript,
            notifier,
            delivered: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Deliver now, stamped with the current time.
    pub fn finish(mut self) -> Result<()> {
        self.deliver(Utc::now())
    }

    /// Deliver with an explicit completion time.
    pub fn finish_at(mut self, completed_at: DateTime<Utc>) -> Result<()> {
        self.deliver(completed_at)
    }

    fn deliver(&mut self, completed_at: DateTime<Utc>) -> Result<()> {
        if self.delivered {
            return Ok(());
        }
        self.delivered = true;
        self.notifier
            .deliver(&self.transcript.contents(), completed_at)
    }
}

impl<N: Notifier> Drop for TranscriptGuard<N> {
    fn drop(&mut self) {
        if let Err(e) = self.deliver(Utc::now()) {
            eprintln!("Failed to deliver run transcript: {e}");
            eprint!("{}", self.transcript.contents());
        }
    }
}
