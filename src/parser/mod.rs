//! tapescript Parser Module
//!
//! Parses the line-oriented JavaScript subset into an Abstract Syntax Tree (AST).

mod ast;
mod line_parser;

pub use ast::{
    AssignmentOperator, BinaryOperator, DeclarationKind, Expression, Literal, ParseWarning,
    Program, Statement, UpdateOperator,
};
pub use line_parser::{
    normalize, parse, parse_expression, LineParser, SourceLine, MAX_NESTING_DEPTH,
};
