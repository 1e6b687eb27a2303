//! Failure taxonomy for a VM run.
//!
//! Errors propagate up to `Machine::run`'s caller as a single value; a
//! script cannot catch one. Internal faults (a descriptor pointing outside
//! the arena, an instruction pointer past the code) are translated into
//! these variants at the dispatch loop boundary — the VM never panics on
//! malformed bytecode.

use thiserror::Error;
use warden_core::ArenaError;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("vm: stack overflow")]
    StackOverflow,
    #[error("vm: stack underflow at op {op:#04x} (ip {ip})")]
    StackUnderflow { op: u8, ip: usize },
    #[error("vm: call stack overflow")]
    FrameOverflow,
    #[error("vm: gas exhausted")]
    GasExhausted,
    #[error("vm: security violation: {0}")]
    SecurityViolation(String),
    #[error("vm: arithmetic error: {0}")]
    Arithmetic(String),
    #[error("script error: {0}")]
    User(String),
    #[error("vm: bad bytecode: {0}")]
    BadBytecode(String),
    #[error("host error: {0}")]
    Host(String),
}

impl From<ArenaError> for VmError {
    fn from(e: ArenaError) -> Self {
        VmError::BadBytecode(e.to_string())
    }
}
