//! The warden virtual machine.
//!
//! A fixed-size stack machine with arena-backed strings, gas metering and
//! capability-gated host dispatch. Programs are produced by
//! `warden-compiler`; host functions are installed by `warden-stdlib` and
//! the sandbox provider crates.

pub mod bytecode;
pub mod error;
pub mod gatekeeper;
pub mod machine;
pub mod pool;
pub mod program;

pub use error::VmError;
pub use gatekeeper::{AllowListGatekeeper, Gatekeeper};
pub use machine::{HostEntry, Machine, HOST_CALL_GAS, MAX_FRAMES, MAX_LOCALS, STACK_DEPTH};
pub use pool::MachinePool;
pub use program::{Constant, Program};
