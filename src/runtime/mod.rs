//! Runtime execution of emitted tape code

mod interpreter;

pub use interpreter::{
    CellWidth, Execution, Interpreter, InterpreterConfig, PointerMode, DEFAULT_MAX_OPERATIONS,
    DEFAULT_TAPE_SIZE,
};
