//! Tagged value representation for the warden VM.
//!
//! Values are passed by copy through the VM stack. Collection variants
//! (List, Dict, Set, Iter) carry an `Rc<RefCell<...>>` handle so that a
//! copy of the value shares its backing store: `a = b; b.append(x)` is
//! observable through `a`. Tuples are immutable and share a plain `Rc`.

use crate::arena::{Arena, StrRef};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

pub type ListHandle = Rc<RefCell<Vec<Value>>>;
pub type DictHandle = Rc<RefCell<BTreeMap<String, Value>>>;
pub type SetHandle = Rc<RefCell<BTreeSet<u64>>>;
pub type IterHandle = Rc<RefCell<IterState>>;

/// A cursor over a list backing store. The index is shared-mutable:
/// reading through any copy of the iterator advances all copies.
#[derive(Debug)]
pub struct IterState {
    pub items: ListHandle,
    pub index: usize,
}

/// Runtime values.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Void,
    Int(i64),
    Bool(bool),
    Float(f64),
    Str(StrRef),
    Bytes(Rc<Vec<u8>>),
    List(ListHandle),
    Tuple(Rc<Vec<Value>>),
    Dict(DictHandle),
    Set(SetHandle),
    Iter(IterHandle),
}

/// The closed tag set. Used for constant de-duplication and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Void,
    Int,
    Bool,
    Float,
    Str,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    Iter,
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn new_dict(map: BTreeMap<String, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn new_set(bits: BTreeSet<u64>) -> Self {
        Value::Set(Rc::new(RefCell::new(bits)))
    }

    /// Iterator sharing `items` as its backing store.
    pub fn new_iter(items: ListHandle) -> Self {
        Value::Iter(Rc::new(RefCell::new(IterState { items, index: 0 })))
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::Void => Tag::Void,
            Value::Int(_) => Tag::Int,
            Value::Bool(_) => Tag::Bool,
            Value::Float(_) => Tag::Float,
            Value::Str(_) => Tag::Str,
            Value::Bytes(_) => Tag::Bytes,
            Value::List(_) => Tag::List,
            Value::Tuple(_) => Tag::Tuple,
            Value::Dict(_) => Tag::Dict,
            Value::Set(_) => Tag::Set,
            Value::Iter(_) => Tag::Iter,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.tag() {
            Tag::Void => "void",
            Tag::Int => "int",
            Tag::Bool => "bool",
            Tag::Float => "float",
            Tag::Str => "str",
            Tag::Bytes => "bytes",
            Tag::List => "list",
            Tag::Tuple => "tuple",
            Tag::Dict => "dict",
            Tag::Set => "set",
            Tag::Iter => "iterator",
        }
    }

    /// The 64-bit data register view of this value: integer bits, float
    /// bit pattern, or a packed string descriptor. Compound values report
    /// zero; their identity lives in the handle.
    pub fn data_bits(&self) -> u64 {
        match self {
            Value::Void => 0,
            Value::Int(n) => *n as u64,
            Value::Bool(b) => u64::from(*b),
            Value::Float(f) => f.to_bits(),
            Value::Str(r) => r.pack(),
            Value::Bytes(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::Iter(_) => 0,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Void => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(r) => !r.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Iter(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Identity comparison for compound values: same handle, same value.
    pub fn same_handle(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Iter(a), Value::Iter(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Human-readable rendering. String descriptors are resolved against
    /// `arena`; recursion is capped so cyclic lists terminate.
    pub fn format(&self, arena: &Arena) -> String {
        self.format_depth(arena, 0)
    }

    fn format_depth(&self, arena: &Arena, depth: usize) -> String {
        if depth > 10 {
            return "...".to_string();
        }
        match self {
            Value::Void => "None".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Float(f) => {
                let s = format!("{}", f);
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            Value::Str(r) => arena.resolve(*r).unwrap_or("<bad-str>").to_string(),
            Value::Bytes(b) => format!("<bytes:{}>", b.len()),
            Value::List(l) => {
                let parts: Vec<String> = l
                    .borrow()
                    .iter()
                    .map(|v| v.format_depth(arena, depth + 1))
                    .collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(t) => {
                let parts: Vec<String> =
                    t.iter().map(|v| v.format_depth(arena, depth + 1)).collect();
                format!("({})", parts.join(", "))
            }
            Value::Dict(d) => {
                let parts: Vec<String> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("'{}': {}", k, v.format_depth(arena, depth + 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(s) => {
                let parts: Vec<String> = s.borrow().iter().map(|b| b.to_string()).collect();
                format!("set({{{}}})", parts.join(", "))
            }
            Value::Iter(it) => format!("<iterator at {}>", it.borrow().index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        let arena_free = [
            (Value::Void, false),
            (Value::Bool(false), false),
            (Value::Bool(true), true),
            (Value::Int(0), false),
            (Value::Int(-1), true),
            (Value::Float(0.0), false),
            (Value::Float(0.5), true),
            (Value::new_list(vec![]), false),
            (Value::new_list(vec![Value::Void]), true),
            (Value::new_tuple(vec![]), false),
            (Value::new_dict(BTreeMap::new()), false),
        ];
        for (v, expect) in arena_free {
            assert_eq!(v.is_truthy(), expect, "truthiness of {:?}", v);
        }
    }

    #[test]
    fn iterators_are_always_truthy() {
        let empty = Value::new_iter(Rc::new(RefCell::new(vec![])));
        assert!(empty.is_truthy());
    }

    #[test]
    fn shared_list_mutation_is_visible() {
        let a = Value::new_list(vec![Value::Int(1)]);
        let b = a.clone();
        if let Value::List(l) = &b {
            l.borrow_mut().push(Value::Int(2));
        }
        if let Value::List(l) = &a {
            assert_eq!(l.borrow().len(), 2);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn data_bits_for_scalars() {
        assert_eq!(Value::Int(-1).data_bits(), u64::MAX);
        assert_eq!(Value::Bool(true).data_bits(), 1);
        assert_eq!(Value::Float(1.5).data_bits(), 1.5f64.to_bits());
        assert_eq!(Value::new_list(vec![]).data_bits(), 0);
    }

    #[test]
    fn format_scalars() {
        let arena = Arena::new();
        assert_eq!(Value::Void.format(&arena), "None");
        assert_eq!(Value::Int(42).format(&arena), "42");
        assert_eq!(Value::Bool(true).format(&arena), "True");
        assert_eq!(Value::Float(2.0).format(&arena), "2.0");
        assert_eq!(Value::Float(2.5).format(&arena), "2.5");
    }

    #[test]
    fn format_containers() {
        let mut arena = Arena::new();
        let s = arena.append_str("hi");
        let list = Value::new_list(vec![Value::Int(1), Value::Str(s)]);
        assert_eq!(list.format(&arena), "[1, hi]");
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::Int(7));
        assert_eq!(Value::new_dict(map).format(&arena), "{'k': 7}");
    }

    #[test]
    fn handle_identity() {
        let a = Value::new_list(vec![]);
        let b = a.clone();
        let c = Value::new_list(vec![]);
        assert!(a.same_handle(&b));
        assert!(!a.same_handle(&c));
    }
}
