//! Compiled program container and its JSON file format.
//!
//! A `Program` is immutable after emission. Constants are scalar or
//! string-descriptor values only — compound values exist solely at run
//! time — which is what makes the serde representation exact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::{StrRef, Value};

/// Serializable constant cell. Mirrors the scalar subset of `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Constant {
    Void,
    Int(i64),
    Bool(bool),
    Float(f64),
    Str { offset: u32, len: u32 },
}

impl Constant {
    pub fn to_value(self) -> Value {
        match self {
            Constant::Void => Value::Void,
            Constant::Int(n) => Value::Int(n),
            Constant::Bool(b) => Value::Bool(b),
            Constant::Float(f) => Value::Float(f),
            Constant::Str { offset, len } => Value::Str(StrRef::new(offset, len)),
        }
    }
}

/// The output of compilation: packed instruction words, constant table,
/// interned arena bytes and the function table (name → entry address).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub version: u32,
    pub instructions: Vec<u32>,
    pub constants: Vec<Constant>,
    pub arena: Vec<u8>,
    pub functions: BTreeMap<String, usize>,
    /// Top-level local slot names in slot order, for `locals()`.
    pub local_names: Vec<String>,
}

/// Bytecode format version. Bump on any ABI-breaking change.
pub const BYTECODE_VERSION: u32 = 1;

impl Program {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{encode, op};

    #[test]
    fn json_roundtrip() {
        let mut functions = BTreeMap::new();
        functions.insert("double".to_string(), 1);
        let p = Program {
            version: BYTECODE_VERSION,
            instructions: vec![encode(op::PUSH_C, 0), encode(op::HALT, 0)],
            constants: vec![
                Constant::Int(42),
                Constant::Str { offset: 0, len: 2 },
                Constant::Float(1.5),
            ],
            arena: b"hi".to_vec(),
            functions,
            local_names: vec!["x".to_string()],
        };
        let json = p.to_json().unwrap();
        let q = Program::from_json(&json).unwrap();
        assert_eq!(q.instructions, p.instructions);
        assert_eq!(q.constants, p.constants);
        assert_eq!(q.arena, p.arena);
        assert_eq!(q.functions["double"], 1);
        assert_eq!(q.local_names, vec!["x"]);
    }

    #[test]
    fn constant_to_value() {
        assert!(matches!(Constant::Void.to_value(), Value::Void));
        assert!(matches!(Constant::Int(3).to_value(), Value::Int(3)));
        match (Constant::Str { offset: 4, len: 2 }).to_value() {
            Value::Str(r) => {
                assert_eq!(r.offset, 4);
                assert_eq!(r.len, 2);
            }
            other => panic!("expected Str, got {:?}", other),
        }
    }
}
