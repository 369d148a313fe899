//! Process-wide tracing init and a bounded diagnostic ring buffer.
//!
//! Grounded on the teacher's telemetry init pattern: a single
//! `tracing_subscriber::EnvFilter` + fmt layer installed once per process.

use std::sync::Once;

use parking_lot::Mutex;

use crate::error::{CoreError, ErrorCode, SourceLocation};

static TRACING_INIT: Once = Once::new();

/// Installs a global `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`). Safe to call more than once; only the first call takes effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

/// One recorded diagnostic: an error code, a human message, and an optional
/// source location for syntax-category errors.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: &'static str,
    pub message: String,
    pub location: Option<SourceLocation>,
}

const DEFAULT_CAPACITY: usize = 256;

/// A fixed-capacity ring buffer of diagnostics. Every non-internal
/// `CoreError` produced anywhere in the workspace is expected to be
/// appended here by its caller.
pub struct DiagnosticBuffer {
    capacity: usize,
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.remove(0);
        }
        entries.push(diagnostic);
    }

    /// Records `err` if it is a diagnostic-category error; internal errors
    /// are not buffered, per the escalation policy.
    pub fn record(&self, err: &CoreError) {
        if !err.is_diagnostic() {
            return;
        }
        let location = match err {
            CoreError::Syntax(crate::error::SyntaxError::Lexer { location, .. })
            | CoreError::Syntax(crate::error::SyntaxError::Parser { location, .. }) => {
                Some(*location)
            }
            _ => None,
        };
        self.push(Diagnostic {
            code: err.code(),
            message: err.to_string(),
            location,
        });
    }

    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiagnosticBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

static GLOBAL_DIAGNOSTICS: once_cell::sync::Lazy<DiagnosticBuffer> =
    once_cell::sync::Lazy::new(DiagnosticBuffer::default);

/// The process-wide diagnostic buffer. Any crate in the workspace may push
/// to this via [`DiagnosticBuffer::record`] without threading a handle
/// through every call site.
pub fn global() -> &'static DiagnosticBuffer {
    &GLOBAL_DIAGNOSTICS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let buf = DiagnosticBuffer::new(2);
        buf.record(&CoreError::Readonly("a".into()));
        buf.record(&CoreError::Readonly("b".into()));
        buf.record(&CoreError::Readonly("c".into()));
        let entries = buf.drain();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].message.contains('b'));
        assert!(entries[1].message.contains('c'));
    }

    #[test]
    fn internal_errors_are_not_recorded() {
        let buf = DiagnosticBuffer::new(4);
        buf.record(&CoreError::Internal("bug".into()));
        assert!(buf.is_empty());
    }
}
