//! JSON host functions: parsing into VM values and field access.

use serde_json::Value as Json;
use std::collections::BTreeMap;
use warden_core::Value;
use warden_vm::{Machine, VmError};

fn host_err(msg: impl Into<String>) -> VmError {
    VmError::Host(msg.into())
}

/// Convert a parsed JSON tree into a VM value; string payloads land in
/// the arena.
fn json_to_value(m: &mut Machine, j: &Json) -> Value {
    match j {
        Json::Null => Value::Void,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => {
            let r = m.arena_mut().append_str(s);
            Value::Str(r)
        }
        Json::Array(items) => {
            let converted = items.iter().map(|j| json_to_value(m, j)).collect();
            Value::new_list(converted)
        }
        Json::Object(fields) => {
            let mut map = BTreeMap::new();
            for (k, v) in fields {
                map.insert(k.clone(), json_to_value(m, v));
            }
            Value::new_dict(map)
        }
    }
}

/// Render a VM value as JSON. The inverse of `parse_json` for scalar and
/// dict-of-scalar shapes.
pub fn format_json(m: &Machine, v: &Value) -> Result<Json, VmError> {
    Ok(match v {
        Value::Void => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(f) => {
            serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)
        }
        Value::Str(r) => Json::String(m.str_of(*r)?.to_string()),
        Value::List(l) => {
            let items = l.borrow();
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(format_json(m, item)?);
            }
            Json::Array(out)
        }
        Value::Tuple(t) => {
            let mut out = Vec::with_capacity(t.len());
            for item in t.iter() {
                out.push(format_json(m, item)?);
            }
            Json::Array(out)
        }
        Value::Dict(d) => {
            let map = d.borrow();
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, val) in map.iter() {
                out.insert(k.clone(), format_json(m, val)?);
            }
            Json::Object(out)
        }
        other => {
            return Err(host_err(format!(
                "cannot render {} as json",
                other.type_name()
            )))
        }
    })
}

/// `parse_json(text)` — the top level must be an object.
pub fn parse_json(m: &mut Machine) -> Result<(), VmError> {
    let text = m.pop_str()?;
    let parsed: Json = serde_json::from_str(&text)
        .map_err(|e| host_err(format!("parse_json: {}", e)))?;
    if !parsed.is_object() {
        return Err(host_err("parse_json: top-level value must be an object"));
    }
    let v = json_to_value(m, &parsed);
    m.push(v)
}

/// `get_field(obj, key)` — missing keys yield None.
pub fn get_field(m: &mut Machine) -> Result<(), VmError> {
    let key = m.pop_str()?;
    let obj = m.pop()?;
    // Generated callers sometimes quote the key; tolerate it.
    let key = key.trim_matches('"');
    match &obj {
        Value::Dict(d) => {
            let found = d.borrow().get(key).cloned();
            m.push(found.unwrap_or(Value::Void))
        }
        other => Err(host_err(format!(
            "get_field: expected a dict, got {}",
            other.type_name()
        ))),
    }
}

/// `parse_json_key(text, key)` — parse and pluck one field.
pub fn parse_json_key(m: &mut Machine) -> Result<(), VmError> {
    let key = m.pop_str()?;
    let text = m.pop_str()?;
    // Responses forwarded through other strings may arrive re-quoted.
    let text = text.trim_matches('"').replace("\\\"", "\"");
    let parsed: Json = serde_json::from_str(&text)
        .map_err(|e| host_err(format!("parse_json_key: {}", e)))?;
    let field = match parsed.get(key.trim_matches('"')) {
        Some(f) => f.clone(),
        None => {
            return m.push(Value::Void);
        }
    };
    let v = json_to_value(m, &field);
    m.push(v)
}
