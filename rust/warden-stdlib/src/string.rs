//! String host functions.

use warden_core::Value;
use warden_vm::{Machine, VmError};

/// `format_string(template, value)` — single `%s` substitution.
pub fn format_string(m: &mut Machine) -> Result<(), VmError> {
    let value = m.pop()?;
    let template = m.pop_str()?;
    let rendered = m.value_text(&value)?;
    let out = template.replacen("%s", &rendered, 1);
    m.push_str(&out)
}

/// `is_empty(value)` — true for None, empty strings and empty containers.
pub fn is_empty(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let empty = match &v {
        Value::Void => true,
        Value::Str(r) => r.is_empty(),
        Value::List(l) => l.borrow().is_empty(),
        Value::Tuple(t) => t.is_empty(),
        Value::Dict(d) => d.borrow().is_empty(),
        Value::Set(s) => s.borrow().is_empty(),
        other => other.data_bits() == 0,
    };
    m.push(Value::Bool(empty))
}
