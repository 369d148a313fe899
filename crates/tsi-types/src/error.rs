//! Core error taxonomy for the tsi-kernel workspace.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// A (line, column) pair identifying where a lexer/parser error occurred.
/// Both fields are 1-based; `line=1, column=1` is the start of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Errors raised while lexing or parsing grammar/instruction text.
#[derive(Error, Debug)]
pub enum SyntaxError {
    /// Lexer rejected the input at a given source location.
    #[error("syntax error at {location}: {message}")]
    Lexer {
        location: SourceLocation,
        message: String,
    },
    /// Parser rejected a well-lexed token stream.
    #[error("syntax error at {location}: {message}")]
    Parser {
        location: SourceLocation,
        message: String,
    },
}

impl ErrorCode for SyntaxError {
    fn code(&self) -> &'static str {
        "SYNTAX"
    }
}

/// An unresolved reference: NonTerminal, bind target, or canonical type.
#[derive(Error, Debug)]
#[error("unresolved reference: {0}")]
pub struct ReferenceError(pub String);

impl ErrorCode for ReferenceError {
    fn code(&self) -> &'static str {
        "REFERENCE"
    }
}

/// Two alternatives of a rule share a first terminal set.
#[derive(Error, Debug)]
#[error("ambiguous grammar: {0}")]
pub struct AmbiguityError(pub String);

impl ErrorCode for AmbiguityError {
    fn code(&self) -> &'static str {
        "AMBIGUITY"
    }
}

/// Instruction parsed but violates a semantic contract.
#[derive(Error, Debug)]
#[error("semantic violation: {0}")]
pub struct SemanticError(pub String);

impl ErrorCode for SemanticError {
    fn code(&self) -> &'static str {
        "SEMANTIC"
    }
}

/// The umbrella error type returned by every public fallible operation in
/// the workspace. Individual crates return this directly or convert their
/// own narrower error into it at the crate boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Ambiguity(#[from] AmbiguityError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    /// A referenced file does not exist or cannot be opened.
    #[error("missing io resource: {0}")]
    IoMissing(String),
    /// Binary file shape mismatch (raw vs normalized) or record-count mismatch.
    #[error("corrupt io resource: {0}")]
    IoCorrupt(String),
    /// Encrypted store opened with the wrong passphrase.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Mutation attempted on a read-only store.
    #[error("store is read-only: {0}")]
    Readonly(String),
    /// Artifact dispatch for an unregistered canonical type.
    #[error("no driver registered for canonical type: {0}")]
    NoDriver(String),
    /// Dataloader worker queue empty past deadline.
    #[error("dataloader timed out waiting for a batch")]
    DataloaderTimeout,
    /// Binding run was cancelled cooperatively.
    #[error("run was cancelled")]
    Cancelled,
    /// Binding run exhausted its wallclock or step budget.
    #[error("run exhausted its budget")]
    BudgetExhausted,
    /// An invariant was violated; always a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),
    /// Wraps an opaque I/O error from the standard library.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Syntax(e) => e.code(),
            Self::Reference(e) => e.code(),
            Self::Ambiguity(e) => e.code(),
            Self::Semantic(e) => e.code(),
            Self::IoMissing(_) => "IO_MISSING",
            Self::IoCorrupt(_) => "IO_CORRUPT",
            Self::Auth(_) => "AUTH",
            Self::Readonly(_) => "READONLY",
            Self::NoDriver(_) => "NO_DRIVER",
            Self::DataloaderTimeout => "DATALOADER_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::Internal(_) => "INTERNAL",
            Self::Io(_) => "IO_MISSING",
        }
    }
}

impl CoreError {
    /// True for every category except `Internal`, matching the propagation
    /// policy in which internal errors are escalated rather than buffered.
    pub fn is_diagnostic(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_carries_location() {
        let err = CoreError::Syntax(SyntaxError::Lexer {
            location: SourceLocation::new(3, 7),
            message: "unterminated nonterminal".into(),
        });
        assert_eq!(err.code(), "SYNTAX");
        assert!(err.to_string().contains("3:7"));
    }

    #[test]
    fn internal_errors_are_not_diagnostic() {
        let err = CoreError::Internal("should never happen".into());
        assert!(!err.is_diagnostic());
        let err = CoreError::Readonly("db".into());
        assert!(err.is_diagnostic());
    }
}
