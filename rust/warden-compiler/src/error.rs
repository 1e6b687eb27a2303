//! Compile-stage failure taxonomy.

use crate::lexer::LexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lexical error: {0}")]
    Lexical(#[from] LexError),
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("floating state at line {line}: statement leaves {depth} unconsumed value(s); assign the result or consume it")]
    FloatingState { line: usize, depth: i64 },
    #[error("stack underflow at line {line}: '{word}' consumes more values than are available")]
    StackUnderflow { line: usize, word: String },
    #[error("capability violation at line {line}: '{word}' requires scope '{scope}' (active scopes: {active:?})")]
    Capability {
        line: usize,
        word: String,
        scope: String,
        active: Vec<String>,
    },
    #[error("arity mismatch at line {line}: '{word}' expects {expected} argument(s), got {got}")]
    Arity {
        line: usize,
        word: String,
        expected: String,
        got: usize,
    },
    #[error("too many locals at line {line}: at most {limit} variables per scope")]
    TooManyLocals { line: usize, limit: usize },
    #[error("unknown function '{name}' at line {line}")]
    UnknownFunction { line: usize, name: String },
    #[error("program too large: {0}")]
    TooLarge(String),
}
