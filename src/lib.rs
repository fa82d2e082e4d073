#![warn(missing_docs)]
//! # tapescript - JavaScript to Tape Code
//!
//! A compiler from a line-oriented JavaScript subset to an extended
//! Brainfuck-style tape language, plus the tape machine that runs it.
//!
//! ## Features
//!
//! - **Four allocation policies** - static, dynamic, hybrid and segmented,
//!   with mark/sweep garbage collection and compaction
//! - **Tiered optimizer** - levels 0-4: folding, dead-store removal, update
//!   merging, memory reordering, common subexpressions
//! - **Working control flow** - `if`/`else` and `for` become bracket loops
//!   over flag cells and survive stripping to the eight base symbols
//! - **Bounded execution** - the interpreter halts at an operation ceiling
//!
//! ## Quick Start
//!
//! ```rust
//! use tapescript::{Compiler, CompileOptions};
//!
//! # fn main() -> tapescript::Result<()> {
//! let compiler = Compiler::new(CompileOptions::default());
//! let result = compiler.compile("let greeting = \"Hi\"\nconsole.log(greeting)")?;
//! println!("{}", result.code);
//!
//! let execution = compiler.run("console.log(\"A\")", b"")?;
//! assert_eq!(execution.output, "A");
//! # Ok(())
//! # }
//! ```
//!
//! ### Stripped output
//!
//! ```rust
//! use tapescript::{strip, Interpreter, InterpreterConfig, Compiler};
//!
//! # fn main() -> tapescript::Result<()> {
//! let result = Compiler::default().compile("for (let i = 0; i < 3; i++) {\nconsole.log(\"a\")\n}")?;
//! let base = strip(&result.code);
//! let mut interpreter = Interpreter::new(InterpreterConfig::default());
//! assert_eq!(interpreter.run(&base, b"")?.output, "aaa");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Source → Parser → Syntax tree → IrLowerer (+ MemoryPlanner) → IR
//!        → Optimizer → Emitter (+ StdlibTable) → extended code → strip → base code
//!        → Interpreter → output
//! ```
//!
//! ### Main Components
//!
//! - [`parser`] - Line-oriented parser producing the syntax tree
//! - [`compiler`] - Memory planner, IR, optimizer and emitter
//! - [`runtime`] - Tape machine interpreter
//! - [`error`] - Error types and categories
//!
//! ## Error Handling
//!
//! Every stage returns [`Result`]. [`Error::tagged`] prefixes the message
//! with its category:
//!
//! ```rust
//! use tapescript::Compiler;
//!
//! let err = Compiler::default().compile("x += 1").unwrap_err();
//! assert!(err.tagged().starts_with("[parse]"));
//! ```

#![allow(clippy::needless_range_loop)] // Index needed for error messages

/// Version of the tapescript compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod parser;
pub mod runtime;

// Re-export main types
pub use compiler::{
    strip, CompileOptions, CompileResult, CompileStats, Compiler, LogLevel, MemoryModel,
    MemoryPlanner, Optimizer, StdlibTable,
};
pub use error::{Error, ErrorCategory, ErrorSeverity, Result};
pub use parser::{parse, Expression, Program, Statement};
pub use runtime::{CellWidth, Execution, Interpreter, InterpreterConfig, PointerMode};
