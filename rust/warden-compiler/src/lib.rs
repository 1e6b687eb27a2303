//! Front-end for warden scripts.
//!
//! The pipeline is strictly staged: lexer → parser → analyzer (stack
//! effect + capability scopes) → emitter. A program that survives
//! `compile` cannot fail the VM's scope check and leaves the operand
//! stack balanced after every statement.

pub mod analyzer;
pub mod ast;
pub mod emitter;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod tokens;
pub mod words;

pub use error::CompileError;

use warden_vm::Program;

/// Compile a script to an executable [`Program`].
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let module = parser::Parser::new(tokens).parse_module()?;
    analyzer::analyze(&module)?;
    emitter::Emitter::new().emit(&module)
}
