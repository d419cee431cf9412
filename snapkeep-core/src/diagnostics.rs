/*!
Error reporting into the run transcript.

Every error the orchestrator sees is turned into a [`Diagnostic`] and handed
to a [`DiagnosticsObserver`] before the run decides whether to continue. The
default observer writes through `tracing`, so diagnostics land in the same
transcript as the progress messages.
*/

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use tracing::{error, warn};

use crate::error::{ErrorKind, SnapkeepError};

/// One-line description of an error plus the call trace where it was seen.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<&'static Location<'static>>,
    pub backtrace: String,
}

impl Diagnostic {
    /// Capture a diagnostic for `error`, located at the caller.
    #[track_caller]
    pub fn capture(error: &SnapkeepError) -> Self {
        Self {
            code: error.code(),
            kind: error.kind(),
            message: error.to_string(),
            location: Some(Location::caller()),
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// An informational condition that does not stop the run.
    #[track_caller]
    pub fn notice<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self {
            code,
            kind: ErrorKind::Notice,
            message: message.into(),
            location: Some(Location::caller()),
            backtrace: String::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    /// `[code] message at file:line`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(location) = self.location {
            write!(f, " at {}:{}", location.file(), location.line())?;
        }
        Ok(())
    }
}

/// Receives every diagnostic raised during a run.
pub trait DiagnosticsObserver {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<D: DiagnosticsObserver + ?Sized> DiagnosticsObserver for &D {
    fn report(&self, diagnostic: &Diagnostic) {
        (**self).report(diagnostic)
    }
}

/// Writes diagnostics through `tracing`: notices at WARN, fatal errors at
/// ERROR followed by the captured call trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsObserver for TracingDiagnostics {
    fn report(&self, diagnostic: &Diagnostic) {
        match diagnostic.kind {
            ErrorKind::Notice => warn!(code = diagnostic.code, "{}", diagnostic),
            ErrorKind::Fatal => {
                error!(code = diagnostic.code, "{}", diagnostic);
                error!("call trace:\n{}", diagnostic.backtrace);
            }
        }
    }
}
