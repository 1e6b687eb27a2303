//! Core value and arena primitives shared by the warden compiler and VM.

pub mod arena;
pub mod value;

pub use arena::{Arena, ArenaError, StrRef};
pub use value::{IterState, Tag, Value};
