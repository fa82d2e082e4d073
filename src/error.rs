//! Error types for the tapescript compiler and tape machine

use std::fmt;
use thiserror::Error;

/// tapescript errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Parse errors
    /// Syntax error encountered during parsing
    ///
    /// **Triggered by:** A structural problem the parser cannot skip over
    /// **Example:** `if (x) {` with no closing brace before end of input
    #[error("Syntax error at line {line}: {message}")]
    SyntaxError {
        /// Line number where error occurred (1-indexed)
        line: usize,
        /// Error description
        message: String,
    },

    /// General parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    // Lowering errors
    /// Reference to a variable that was never declared
    ///
    /// **Triggered by:** Reading an identifier before its declaration
    /// **Example:** `console.log(y)` with no earlier `let y = ...`
    #[error("Undefined variable: {name}")]
    UndefinedVariable {
        /// Variable name
        name: String,
    },

    /// Attempt to reassign a constant value
    #[error("Cannot reassign constant: {name}")]
    ConstantReassignment {
        /// Constant name
        name: String,
    },

    // Memory errors
    /// Allocation request cannot be satisfied even after a forced collection
    ///
    /// **Triggered by:** Declaring more cells than the configured memory size
    /// **Recovery:** A single forced GC pass runs before this is raised
    #[error("Out of memory: cannot allocate {requested} cell(s) for '{identifier}' (memory size {memory_size})")]
    OutOfMemory {
        /// Identifier being allocated
        identifier: String,
        /// Requested size in cells
        requested: usize,
        /// Configured memory size in cells
        memory_size: usize,
    },

    /// Configuration rejected before a run starts
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // Runtime errors
    /// Bracket without a partner, detected before execution starts
    #[error("Unmatched '{bracket}' at position {position}")]
    UnmatchedBracket {
        /// Offending bracket
        bracket: char,
        /// Character offset in the program text
        position: usize,
    },

    /// Pointer moved off the tape in strict pointer mode
    #[error("Tape pointer out of bounds at position {position} (tape size {tape_size})")]
    PointerOutOfBounds {
        /// Character offset of the move instruction
        position: usize,
        /// Tape size in cells
        tape_size: usize,
    },

    /// A compile-side resource guard tripped
    #[error("Resource limit exceeded: {what} (limit: {limit})")]
    ResourceLimit {
        /// Which guard tripped
        what: String,
        /// Configured limit
        limit: usize,
    },

    /// Compiler error
    #[error("Compiler error: {0}")]
    CompilerError(String),

    /// Fault that should not happen on any input
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error that cannot be recovered from
    Fatal,
    /// Recoverable error that may be retried
    Recoverable,
    /// Warning that doesn't prevent execution
    Warning,
}

/// Coarse error category used to tag reported messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed source or internal parser fault
    Parse,
    /// Allocation failures and memory configuration
    Memory,
    /// Tape machine execution faults
    Runtime,
    /// Everything else
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ErrorCategory::Parse => "parse",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(tag)
    }
}

impl Error {
    /// Create a compiler error with a message
    pub fn compiler(msg: impl Into<String>) -> Self {
        Error::CompilerError(msg.into())
    }

    /// Create a syntax error at a source line
    pub fn syntax(line: usize, msg: impl Into<String>) -> Self {
        Error::SyntaxError {
            line,
            message: msg.into(),
        }
    }

    /// Category this error is reported under
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::SyntaxError { .. }
            | Error::ParseError(_)
            | Error::UndefinedVariable { .. }
            | Error::ConstantReassignment { .. } => ErrorCategory::Parse,

            Error::OutOfMemory { .. } | Error::InvalidConfiguration(_) => ErrorCategory::Memory,

            Error::UnmatchedBracket { .. } | Error::PointerOutOfBounds { .. } => {
                ErrorCategory::Runtime
            }

            Error::ResourceLimit { .. } | Error::CompilerError(_) | Error::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Message prefixed with its category, e.g. `[parse] Syntax error ...`
    pub fn tagged(&self) -> String {
        format!("[{}] {}", self.category(), self)
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::SyntaxError { .. } => ErrorSeverity::Fatal,
            Error::ParseError(_) => ErrorSeverity::Fatal,
            Error::OutOfMemory { .. } => ErrorSeverity::Fatal,
            Error::UnmatchedBracket { .. } => ErrorSeverity::Fatal,
            Error::Internal(_) => ErrorSeverity::Fatal,

            Error::ResourceLimit { .. } => ErrorSeverity::Recoverable,
            Error::PointerOutOfBounds { .. } => ErrorSeverity::Recoverable,

            _ => ErrorSeverity::Recoverable,
        }
    }
}

/// Result type for tapescript operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_message_carries_category() {
        let err = Error::syntax(3, "block never closed");
        assert_eq!(err.category(), ErrorCategory::Parse);
        assert_eq!(
            err.tagged(),
            "[parse] Syntax error at line 3: block never closed"
        );

        let oom = Error::OutOfMemory {
            identifier: "big".to_string(),
            requested: 40,
            memory_size: 16,
        };
        assert_eq!(oom.category(), ErrorCategory::Memory);
        assert!(oom.tagged().starts_with("[memory] Out of memory"));
        assert!(oom.to_string().contains("'big'"));
    }

    #[test]
    fn test_runtime_faults_are_runtime_category() {
        let err = Error::UnmatchedBracket {
            bracket: ']',
            position: 7,
        };
        assert_eq!(err.category(), ErrorCategory::Runtime);
        assert_eq!(err.classify(), ErrorSeverity::Fatal);
    }
}
