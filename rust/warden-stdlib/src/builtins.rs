//! The general built-in host functions.
//!
//! Calling convention: pop arguments right-to-left, push at most one
//! result. Variadic hosts (`print`, `range`, `make_list`, `make_tuple`,
//! `method_call`) find their argument count pushed as an integer on top.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use warden_core::Value;
use warden_vm::{Machine, VmError};

fn host_err(msg: impl Into<String>) -> VmError {
    VmError::Host(msg.into())
}

fn pop_int(m: &mut Machine, word: &str) -> Result<i64, VmError> {
    let v = m.pop()?;
    v.as_int()
        .ok_or_else(|| host_err(format!("{}: expected an integer, got {}", word, v.type_name())))
}

/// Materialize an iterable argument: lists are read in place, tuples are
/// copied, iterators are drained from their current position.
fn pop_items(m: &mut Machine, word: &str) -> Result<Vec<Value>, VmError> {
    let v = m.pop()?;
    match v {
        Value::List(l) => Ok(l.borrow().clone()),
        Value::Tuple(t) => Ok(t.as_ref().clone()),
        Value::Iter(it) => {
            let mut state = it.borrow_mut();
            let items = state.items.borrow();
            let rest = items[state.index.min(items.len())..].to_vec();
            drop(items);
            let len = state.items.borrow().len();
            state.index = len;
            Ok(rest)
        }
        other => Err(host_err(format!(
            "{}: expected an iterable, got {}",
            word,
            other.type_name()
        ))),
    }
}

// -- Output --

pub fn print(m: &mut Machine) -> Result<(), VmError> {
    let n = pop_int(m, "print")? as usize;
    let mut parts = vec![String::new(); n];
    for i in (0..n).rev() {
        let v = m.pop()?;
        parts[i] = m.value_text(&v)?;
    }
    let line = parts.join(" ");
    println!("{}", line);
    m.output.push(line);
    Ok(())
}

// -- Sequences --

pub fn len(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let n = match &v {
        Value::Str(r) => r.len as i64,
        Value::Bytes(b) => b.len() as i64,
        Value::List(l) => l.borrow().len() as i64,
        Value::Tuple(t) => t.len() as i64,
        Value::Dict(d) => d.borrow().len() as i64,
        Value::Set(s) => s.borrow().len() as i64,
        other => {
            return Err(host_err(format!(
                "len: object of type {} has no length",
                other.type_name()
            )))
        }
    };
    m.push(Value::Int(n))
}

pub fn range(m: &mut Machine) -> Result<(), VmError> {
    let argc = pop_int(m, "range")?;
    let (start, stop) = if argc == 1 {
        (0, pop_int(m, "range")?)
    } else {
        let stop = pop_int(m, "range")?;
        (pop_int(m, "range")?, stop)
    };
    let items: Vec<Value> = (start..stop).map(Value::Int).collect();
    m.push(Value::new_list(items))
}

pub fn list(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    match v {
        // A list stays the same shared handle.
        Value::List(_) => m.push(v),
        Value::Tuple(t) => m.push(Value::new_list(t.as_ref().clone())),
        Value::Iter(it) => {
            let mut state = it.borrow_mut();
            let items = state.items.borrow();
            let rest = items[state.index.min(items.len())..].to_vec();
            drop(items);
            let len = state.items.borrow().len();
            state.index = len;
            m.push(Value::new_list(rest))
        }
        other => Err(host_err(format!(
            "list: cannot convert {}",
            other.type_name()
        ))),
    }
}

pub fn sum(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "sum")?;
    let mut total_i = 0i64;
    let mut total_f = 0f64;
    let mut float_mode = false;
    for v in &items {
        match v {
            Value::Int(n) => {
                total_i = total_i.wrapping_add(*n);
                total_f += *n as f64;
            }
            Value::Float(f) => {
                float_mode = true;
                total_f += f;
            }
            Value::Bool(b) => {
                total_i += i64::from(*b);
                total_f += f64::from(u8::from(*b));
            }
            other => {
                return Err(host_err(format!(
                    "sum: unsupported element {}",
                    other.type_name()
                )))
            }
        }
    }
    m.push(if float_mode {
        Value::Float(total_f)
    } else {
        Value::Int(total_i)
    })
}

pub fn max(m: &mut Machine) -> Result<(), VmError> {
    extremum(m, "max", std::cmp::Ordering::Greater)
}

pub fn min(m: &mut Machine) -> Result<(), VmError> {
    extremum(m, "min", std::cmp::Ordering::Less)
}

fn extremum(m: &mut Machine, word: &str, keep: std::cmp::Ordering) -> Result<(), VmError> {
    let items = pop_items(m, word)?;
    let mut best = items
        .first()
        .cloned()
        .ok_or_else(|| host_err(format!("{}: empty sequence", word)))?;
    for v in &items[1..] {
        if m.compare_values(v, &best) == keep {
            best = v.clone();
        }
    }
    m.push(best)
}

pub fn sorted(m: &mut Machine) -> Result<(), VmError> {
    let mut items = pop_items(m, "sorted")?;
    items.sort_by(|a, b| m.compare_values(a, b));
    m.push(Value::new_list(items))
}

pub fn reversed(m: &mut Machine) -> Result<(), VmError> {
    let mut items = pop_items(m, "reversed")?;
    items.reverse();
    m.push(Value::new_list(items))
}

pub fn zip(m: &mut Machine) -> Result<(), VmError> {
    let right = pop_items(m, "zip")?;
    let left = pop_items(m, "zip")?;
    let items: Vec<Value> = left
        .into_iter()
        .zip(right)
        .map(|(a, b)| Value::new_tuple(vec![a, b]))
        .collect();
    m.push(Value::new_list(items))
}

pub fn enumerate(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "enumerate")?;
    let items: Vec<Value> = items
        .into_iter()
        .enumerate()
        .map(|(i, v)| Value::new_tuple(vec![Value::Int(i as i64), v]))
        .collect();
    m.push(Value::new_list(items))
}

// -- Higher-order functions --

pub fn map(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "map")?;
    let name = m.pop_str()?;
    let addr = m
        .function_addr(&name)
        .ok_or_else(|| host_err(format!("map: unknown function '{}'", name)))?;
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(m.call_function(addr, vec![item])?);
    }
    let backing = Rc::new(std::cell::RefCell::new(results));
    m.push(Value::new_iter(backing))
}

pub fn filter(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "filter")?;
    let name = m.pop_str()?;
    let addr = m
        .function_addr(&name)
        .ok_or_else(|| host_err(format!("filter: unknown function '{}'", name)))?;
    let mut kept = Vec::new();
    for item in items {
        let verdict = m.call_function(addr, vec![item.clone()])?;
        if verdict.is_truthy() {
            kept.push(item);
        }
    }
    let backing = Rc::new(std::cell::RefCell::new(kept));
    m.push(Value::new_iter(backing))
}

// -- Numerics and conversions --

pub fn abs(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let out = match v {
        Value::Int(n) => Value::Int(n.wrapping_abs()),
        Value::Float(f) => Value::Float(f.abs()),
        other => return Err(host_err(format!("abs: expected a number, got {}", other.type_name()))),
    };
    m.push(out)
}

pub fn bool_(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    m.push(Value::Bool(v.is_truthy()))
}

pub fn int(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let out = match &v {
        Value::Int(n) => Value::Int(*n),
        Value::Bool(b) => Value::Int(i64::from(*b)),
        Value::Float(f) => Value::Int(*f as i64),
        Value::Str(r) => {
            let s = m.str_of(*r)?.trim();
            let n = s
                .parse::<i64>()
                .map_err(|_| host_err(format!("int: invalid literal '{}'", s)))?;
            Value::Int(n)
        }
        other => return Err(host_err(format!("int: cannot convert {}", other.type_name()))),
    };
    m.push(out)
}

pub fn float(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let out = match &v {
        Value::Int(n) => Value::Float(*n as f64),
        Value::Bool(b) => Value::Float(f64::from(u8::from(*b))),
        Value::Float(f) => Value::Float(*f),
        Value::Str(r) => {
            let s = m.str_of(*r)?.trim();
            let f = s
                .parse::<f64>()
                .map_err(|_| host_err(format!("float: invalid literal '{}'", s)))?;
            Value::Float(f)
        }
        other => {
            return Err(host_err(format!(
                "float: cannot convert {}",
                other.type_name()
            )))
        }
    };
    m.push(out)
}

pub fn str_(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let s = m.value_text(&v)?;
    m.push_str(&s)
}

pub fn pow(m: &mut Machine) -> Result<(), VmError> {
    let e = m.pop()?;
    let b = m.pop()?;
    let out = match (b.as_int(), e.as_int()) {
        (Some(b), Some(e)) if e >= 0 => match u32::try_from(e).ok().and_then(|e| b.checked_pow(e))
        {
            Some(n) => Value::Int(n),
            None => Value::Float((b as f64).powf(e as f64)),
        },
        _ => {
            let (b, e) = (
                b.as_float()
                    .ok_or_else(|| host_err("pow: expected numbers"))?,
                e.as_float()
                    .ok_or_else(|| host_err("pow: expected numbers"))?,
            );
            Value::Float(b.powf(e))
        }
    };
    m.push(out)
}

pub fn divmod(m: &mut Machine) -> Result<(), VmError> {
    let b = pop_int(m, "divmod")?;
    let a = pop_int(m, "divmod")?;
    if b == 0 {
        return Err(VmError::Arithmetic("division by zero".to_string()));
    }
    m.push(Value::new_tuple(vec![Value::Int(a / b), Value::Int(a % b)]))
}

pub fn round(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let f = v
        .as_float()
        .ok_or_else(|| host_err(format!("round: expected a number, got {}", v.type_name())))?;
    m.push(Value::Int(f.round() as i64))
}

pub fn all(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "all")?;
    m.push(Value::Bool(items.iter().all(Value::is_truthy)))
}

pub fn any(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "any")?;
    m.push(Value::Bool(items.iter().any(Value::is_truthy)))
}

fn radix(m: &mut Machine, word: &str, prefix: &str, to: impl Fn(i64) -> String) -> Result<(), VmError> {
    let n = pop_int(m, word)?;
    let s = if n < 0 {
        format!("-{}{}", prefix, to(-n))
    } else {
        format!("{}{}", prefix, to(n))
    };
    m.push_str(&s)
}

pub fn bin(m: &mut Machine) -> Result<(), VmError> {
    radix(m, "bin", "0b", |n| format!("{:b}", n))
}

pub fn oct(m: &mut Machine) -> Result<(), VmError> {
    radix(m, "oct", "0o", |n| format!("{:o}", n))
}

pub fn hex(m: &mut Machine) -> Result<(), VmError> {
    radix(m, "hex", "0x", |n| format!("{:x}", n))
}

pub fn chr(m: &mut Machine) -> Result<(), VmError> {
    let n = pop_int(m, "chr")?;
    let c = u32::try_from(n)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| host_err(format!("chr: {} is not a valid code point", n)))?;
    m.push_str(&c.to_string())
}

pub fn ord(m: &mut Machine) -> Result<(), VmError> {
    let s = m.pop_str()?;
    let c = s
        .chars()
        .next()
        .ok_or_else(|| host_err("ord: empty string"))?;
    m.push(Value::Int(i64::from(u32::from(c))))
}

// -- Containers --

pub fn dict(m: &mut Machine) -> Result<(), VmError> {
    m.push(Value::new_dict(BTreeMap::new()))
}

pub fn tuple(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "tuple")?;
    m.push(Value::new_tuple(items))
}

pub fn set_(m: &mut Machine) -> Result<(), VmError> {
    let items = pop_items(m, "set")?;
    let bits: BTreeSet<u64> = items.iter().map(Value::data_bits).collect();
    m.push(Value::new_set(bits))
}

pub fn make_list(m: &mut Machine) -> Result<(), VmError> {
    let n = pop_int(m, "make_list")? as usize;
    let mut items = vec![Value::Void; n];
    for i in (0..n).rev() {
        items[i] = m.pop()?;
    }
    m.push(Value::new_list(items))
}

pub fn make_tuple(m: &mut Machine) -> Result<(), VmError> {
    let n = pop_int(m, "make_tuple")? as usize;
    let mut items = vec![Value::Void; n];
    for i in (0..n).rev() {
        items[i] = m.pop()?;
    }
    m.push(Value::new_tuple(items))
}

pub fn get_item(m: &mut Machine) -> Result<(), VmError> {
    let index = m.pop()?;
    let obj = m.pop()?;
    match &obj {
        Value::List(l) => {
            let items = l.borrow();
            let idx = normalize_index(&index, items.len(), "subscript")?;
            let v = items
                .get(idx)
                .cloned()
                .ok_or_else(|| host_err(format!("subscript: index {} out of range", idx)))?;
            drop(items);
            m.push(v)
        }
        Value::Tuple(t) => {
            let idx = normalize_index(&index, t.len(), "subscript")?;
            let v = t
                .get(idx)
                .cloned()
                .ok_or_else(|| host_err(format!("subscript: index {} out of range", idx)))?;
            m.push(v)
        }
        Value::Dict(d) => {
            let key = m.value_text(&index)?;
            let v = d.borrow().get(&key).cloned();
            match v {
                Some(v) => m.push(v),
                None => Err(host_err(format!("subscript: key '{}' not found", key))),
            }
        }
        Value::Str(r) => {
            let s = m.str_of(*r)?.to_string();
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(&index, chars.len(), "subscript")?;
            let c = chars
                .get(idx)
                .ok_or_else(|| host_err(format!("subscript: index {} out of range", idx)))?;
            let out = c.to_string();
            m.push_str(&out)
        }
        other => Err(host_err(format!(
            "subscript: {} is not subscriptable",
            other.type_name()
        ))),
    }
}

fn normalize_index(v: &Value, len: usize, word: &str) -> Result<usize, VmError> {
    let mut idx = v
        .as_int()
        .ok_or_else(|| host_err(format!("{}: index must be an integer", word)))?;
    if idx < 0 {
        idx += len as i64;
    }
    usize::try_from(idx).map_err(|_| host_err(format!("{}: index out of range", word)))
}

pub fn set_item(m: &mut Machine) -> Result<(), VmError> {
    let value = m.pop()?;
    let index = m.pop()?;
    let obj = m.pop()?;
    match &obj {
        Value::List(l) => {
            let len = l.borrow().len();
            let idx = normalize_index(&index, len, "item assignment")?;
            if idx >= len {
                return Err(host_err(format!(
                    "item assignment: index {} out of range",
                    idx
                )));
            }
            l.borrow_mut()[idx] = value;
            Ok(())
        }
        Value::Dict(d) => {
            let key = m.value_text(&index)?;
            d.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(host_err(format!(
            "item assignment: {} does not support it",
            other.type_name()
        ))),
    }
}

// -- Introspection --

pub fn repr(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let s = match &v {
        Value::Str(r) => format!("'{}'", m.str_of(*r)?),
        other => m.format_value(other),
    };
    m.push_str(&s)
}

pub fn hash(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    m.push(Value::Int(v.data_bits() as i64))
}

pub fn type_(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    m.push_str(v.type_name())
}

pub fn callable(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let known = match &v {
        Value::Str(r) => {
            let name = m.str_of(*r)?.to_string();
            m.function_addr(&name).is_some()
        }
        _ => false,
    };
    m.push(Value::Bool(known))
}

pub fn is_instance(m: &mut Machine) -> Result<(), VmError> {
    let wanted = m.pop_str()?;
    let v = m.pop()?;
    m.push(Value::Bool(v.type_name() == wanted))
}

pub fn locals(m: &mut Machine) -> Result<(), VmError> {
    let mut map = BTreeMap::new();
    let names: Vec<String> = m.local_names().to_vec();
    for (i, name) in names.iter().enumerate() {
        if name.starts_with("__") {
            continue;
        }
        if let Some(v) = m.top_locals().get(i) {
            map.insert(name.clone(), v.clone());
        }
    }
    m.push(Value::new_dict(map))
}

// -- Iteration --

pub fn iter(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let out = match v {
        // A list iterator shares the list's backing store.
        Value::List(l) => Value::new_iter(l),
        Value::Tuple(t) => {
            Value::new_iter(Rc::new(std::cell::RefCell::new(t.as_ref().clone())))
        }
        Value::Dict(d) => {
            let keys: Vec<String> = d.borrow().keys().cloned().collect();
            let mut items = Vec::with_capacity(keys.len());
            for k in keys {
                let r = m.arena_mut().append_str(&k);
                items.push(Value::Str(r));
            }
            Value::new_iter(Rc::new(std::cell::RefCell::new(items)))
        }
        it @ Value::Iter(_) => it,
        other => {
            return Err(host_err(format!(
                "iter: {} is not iterable",
                other.type_name()
            )))
        }
    };
    m.push(out)
}

pub fn next(m: &mut Machine) -> Result<(), VmError> {
    let v = m.pop()?;
    let it = match v {
        Value::Iter(it) => it,
        other => return Err(host_err(format!("next: expected an iterator, got {}", other.type_name()))),
    };
    let mut state = it.borrow_mut();
    let items = state.items.borrow();
    if state.index >= items.len() {
        return Err(host_err("stop iteration"));
    }
    let item = items[state.index].clone();
    drop(items);
    state.index += 1;
    drop(state);
    m.push(item)
}

/// Peeks: the iterator stays on the stack, only the guard is pushed.
pub fn has_next(m: &mut Machine) -> Result<(), VmError> {
    let more = match m.peek()? {
        Value::Iter(it) => {
            let state = it.borrow();
            let len = state.items.borrow().len();
            state.index < len
        }
        other => {
            return Err(host_err(format!(
                "has_next: expected an iterator, got {}",
                other.type_name()
            )))
        }
    };
    m.push(Value::Bool(more))
}

// -- Slicing and bytes --

pub fn slice(m: &mut Machine) -> Result<(), VmError> {
    let step_v = m.pop()?;
    let stop_v = m.pop()?;
    let start_v = m.pop()?;
    let obj = m.pop()?;
    let step = match step_v {
        Value::Void => 1,
        v => v
            .as_int()
            .ok_or_else(|| host_err("slice: step must be an integer"))?,
    };
    if step == 0 {
        return Err(host_err("slice: step cannot be zero"));
    }
    match &obj {
        Value::Str(r) => {
            let s = m.str_of(*r)?.to_string();
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), &start_v, &stop_v, step)?
                .into_iter()
                .map(|i| chars[i])
                .collect::<String>();
            m.push_str(&picked)
        }
        Value::List(l) => {
            let items = l.borrow().clone();
            let picked: Vec<Value> = slice_indices(items.len(), &start_v, &stop_v, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            m.push(Value::new_list(picked))
        }
        Value::Tuple(t) => {
            let picked: Vec<Value> = slice_indices(t.len(), &start_v, &stop_v, step)?
                .into_iter()
                .map(|i| t[i].clone())
                .collect();
            m.push(Value::new_tuple(picked))
        }
        other => Err(host_err(format!(
            "slice: {} cannot be sliced",
            other.type_name()
        ))),
    }
}

/// Python slice-index arithmetic for an arbitrary step.
fn slice_indices(
    len: usize,
    start: &Value,
    stop: &Value,
    step: i64,
) -> Result<Vec<usize>, VmError> {
    let len = len as i64;
    let norm = |v: &Value, default: i64| -> Result<i64, VmError> {
        match v {
            Value::Void => Ok(default),
            v => {
                let mut i = v
                    .as_int()
                    .ok_or_else(|| host_err("slice: bound must be an integer"))?;
                if i < 0 {
                    i += len;
                }
                Ok(i)
            }
        }
    };
    let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
    let mut start = norm(start, default_start)?;
    let mut stop = if matches!(stop, Value::Void) {
        default_stop
    } else {
        norm(stop, default_stop)?
    };
    if step > 0 {
        start = start.clamp(0, len);
        stop = stop.clamp(0, len);
    } else {
        start = start.clamp(-1, len - 1);
        stop = stop.clamp(-1, len - 1).min(len);
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if (0..len).contains(&i) {
            out.push(i as usize);
        }
        i += step;
    }
    Ok(out)
}

pub fn bytes(m: &mut Machine) -> Result<(), VmError> {
    let s = m.pop_str()?;
    m.push(Value::Bytes(Rc::new(s.into_bytes())))
}

// -- Method dispatch --

pub fn method_call(m: &mut Machine) -> Result<(), VmError> {
    let n = pop_int(m, "method call")? as usize;
    let name = m.pop_str()?;
    let mut args = vec![Value::Void; n];
    for i in (0..n).rev() {
        args[i] = m.pop()?;
    }
    let obj = m.pop()?;
    match &obj {
        Value::Dict(d) => dict_method(m, d, &name, &args),
        Value::List(l) => list_method(m, l, &name, &args),
        Value::Str(r) => {
            let s = m.str_of(*r)?.to_string();
            str_method(m, &s, obj.clone(), &name, &args)
        }
        other => Err(host_err(format!(
            "no method '{}' on {}",
            name,
            other.type_name()
        ))),
    }
}

fn dict_method(
    m: &mut Machine,
    d: &warden_core::value::DictHandle,
    name: &str,
    args: &[Value],
) -> Result<(), VmError> {
    match name {
        "items" => {
            let pairs: Vec<(String, Value)> = d
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut items = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let kr = m.arena_mut().append_str(&k);
                items.push(Value::new_tuple(vec![Value::Str(kr), v]));
            }
            m.push(Value::new_iter(Rc::new(std::cell::RefCell::new(items))))
        }
        "keys" => {
            let keys: Vec<String> = d.borrow().keys().cloned().collect();
            let mut items = Vec::with_capacity(keys.len());
            for k in keys {
                let r = m.arena_mut().append_str(&k);
                items.push(Value::Str(r));
            }
            m.push(Value::new_iter(Rc::new(std::cell::RefCell::new(items))))
        }
        "values" => {
            let values: Vec<Value> = d.borrow().values().cloned().collect();
            m.push(Value::new_iter(Rc::new(std::cell::RefCell::new(values))))
        }
        "get" => {
            if args.is_empty() || args.len() > 2 {
                return Err(host_err("get expects a key and an optional default"));
            }
            let key = m.value_text(&args[0])?;
            let found = d.borrow().get(&key).cloned();
            match found {
                Some(v) => m.push(v),
                None => m.push(args.get(1).cloned().unwrap_or(Value::Void)),
            }
        }
        other => Err(host_err(format!("no method '{}' on dict", other))),
    }
}

fn list_method(
    m: &mut Machine,
    l: &warden_core::value::ListHandle,
    name: &str,
    args: &[Value],
) -> Result<(), VmError> {
    match name {
        "append" => {
            let item = args
                .first()
                .cloned()
                .ok_or_else(|| host_err("append expects one argument"))?;
            l.borrow_mut().push(item);
            m.push(Value::Void)
        }
        "pop" => {
            let v = l
                .borrow_mut()
                .pop()
                .ok_or_else(|| host_err("pop from empty list"))?;
            m.push(v)
        }
        other => Err(host_err(format!("no method '{}' on list", other))),
    }
}

fn str_method(
    m: &mut Machine,
    s: &str,
    obj: Value,
    name: &str,
    args: &[Value],
) -> Result<(), VmError> {
    match name {
        "upper" => m.push_str(&s.to_uppercase()),
        "lower" => m.push_str(&s.to_lowercase()),
        "strip" => m.push_str(s.trim()),
        "split" => {
            let sep = match args.first() {
                Some(v) => m.value_text(v)?,
                None => " ".to_string(),
            };
            let parts: Vec<String> = s.split(sep.as_str()).map(str::to_string).collect();
            let mut items = Vec::with_capacity(parts.len());
            for p in parts {
                let r = m.arena_mut().append_str(&p);
                items.push(Value::Str(r));
            }
            m.push(Value::new_list(items))
        }
        "join" => {
            let parts = match args.first() {
                Some(Value::List(l)) => l.borrow().clone(),
                Some(Value::Tuple(t)) => t.as_ref().clone(),
                _ => return Err(host_err("join expects a list")),
            };
            let mut rendered = Vec::with_capacity(parts.len());
            for p in &parts {
                rendered.push(m.value_text(p)?);
            }
            m.push_str(&rendered.join(s))
        }
        "find" => {
            let needle = match args.first() {
                Some(v) => m.value_text(v)?,
                None => return Err(host_err("find expects one argument")),
            };
            let idx = s.find(&needle).map(|i| i as i64).unwrap_or(-1);
            m.push(Value::Int(idx))
        }
        "replace" => {
            if args.len() != 2 {
                return Err(host_err("replace expects two arguments"));
            }
            let from = m.value_text(&args[0])?;
            let to = m.value_text(&args[1])?;
            m.push_str(&s.replace(&from, &to))
        }
        "startswith" => {
            let prefix = match args.first() {
                Some(v) => m.value_text(v)?,
                None => return Err(host_err("startswith expects one argument")),
            };
            m.push(Value::Bool(s.starts_with(&prefix)))
        }
        "endswith" => {
            let suffix = match args.first() {
                Some(v) => m.value_text(v)?,
                None => return Err(host_err("endswith expects one argument")),
            };
            m.push(Value::Bool(s.ends_with(&suffix)))
        }
        "json" => {
            m.push(obj)?;
            crate::json::parse_json(m)
        }
        other => Err(host_err(format!("no method '{}' on str", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        let mut m = Machine::new();
        crate::install(&mut m);
        m
    }

    #[test]
    fn print_joins_arguments() {
        let mut m = machine();
        m.push(Value::Int(1)).unwrap();
        m.push_str("two").unwrap();
        m.push(Value::Int(2)).unwrap();
        print(&mut m).unwrap();
        assert_eq!(m.output, vec!["1 two"]);
    }

    #[test]
    fn range_one_and_two_args() {
        let mut m = machine();
        m.push(Value::Int(3)).unwrap();
        m.push(Value::Int(1)).unwrap();
        range(&mut m).unwrap();
        match m.pop().unwrap() {
            Value::List(l) => assert_eq!(l.borrow().len(), 3),
            other => panic!("expected list, got {:?}", other),
        }

        m.push(Value::Int(2)).unwrap();
        m.push(Value::Int(5)).unwrap();
        m.push(Value::Int(2)).unwrap();
        range(&mut m).unwrap();
        match m.pop().unwrap() {
            Value::List(l) => {
                let items: Vec<i64> = l.borrow().iter().map(|v| v.as_int().unwrap()).collect();
                assert_eq!(items, vec![2, 3, 4]);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn sum_promotes_to_float() {
        let mut m = machine();
        m.push(Value::new_list(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        sum(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(3));

        m.push(Value::new_list(vec![Value::Int(1), Value::Float(0.5)]))
            .unwrap();
        sum(&mut m).unwrap();
        assert!(matches!(m.pop().unwrap(), Value::Float(f) if f == 1.5));
    }

    #[test]
    fn min_max_and_empty() {
        let mut m = machine();
        m.push(Value::new_list(vec![
            Value::Int(3),
            Value::Int(1),
            Value::Int(2),
        ]))
        .unwrap();
        max(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(3));

        m.push(Value::new_list(vec![])).unwrap();
        assert!(min(&mut m).is_err());
    }

    #[test]
    fn sorted_uses_numeric_order() {
        let mut m = machine();
        m.push(Value::new_list(vec![
            Value::Int(-2),
            Value::Int(5),
            Value::Int(0),
        ]))
        .unwrap();
        sorted(&mut m).unwrap();
        match m.pop().unwrap() {
            Value::List(l) => {
                let items: Vec<i64> = l.borrow().iter().map(|v| v.as_int().unwrap()).collect();
                assert_eq!(items, vec![-2, 0, 5]);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn iterators_share_their_list_backing() {
        let mut m = machine();
        let list = Value::new_list(vec![Value::Int(1)]);
        m.push(list.clone()).unwrap();
        iter(&mut m).unwrap();
        let it = m.pop().unwrap();
        if let Value::List(l) = &list {
            l.borrow_mut().push(Value::Int(2));
        }
        m.push(it.clone()).unwrap();
        has_next(&mut m).unwrap();
        assert!(m.pop().unwrap().is_truthy());
        m.pop().unwrap(); // the iterator has_next peeked at

        // Drain: sees the appended element through the shared handle.
        m.push(it.clone()).unwrap();
        next(&mut m).unwrap();
        m.pop().unwrap();
        m.push(it).unwrap();
        next(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(2));
    }

    #[test]
    fn next_past_the_end_stops() {
        let mut m = machine();
        m.push(Value::new_list(vec![])).unwrap();
        iter(&mut m).unwrap();
        assert!(next(&mut m).is_err());
    }

    #[test]
    fn get_item_negative_index() {
        let mut m = machine();
        m.push(Value::new_list(vec![Value::Int(10), Value::Int(20)]))
            .unwrap();
        m.push(Value::Int(-1)).unwrap();
        get_item(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(20));
    }

    #[test]
    fn set_item_mutates_shared_list() {
        let mut m = machine();
        let list = Value::new_list(vec![Value::Int(0)]);
        m.push(list.clone()).unwrap();
        m.push(Value::Int(0)).unwrap();
        m.push(Value::Int(9)).unwrap();
        set_item(&mut m).unwrap();
        if let Value::List(l) = &list {
            assert_eq!(l.borrow()[0].as_int(), Some(9));
        }
    }

    #[test]
    fn dict_get_with_default() {
        let mut m = machine();
        let d = Value::new_dict(BTreeMap::new());
        m.push(d).unwrap();
        let key = {
            let r = m.arena_mut().append_str("missing");
            Value::Str(r)
        };
        m.push(key).unwrap();
        m.push(Value::Int(42)).unwrap();
        m.push_str("get").unwrap();
        m.push(Value::Int(2)).unwrap();
        method_call(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(42));
    }

    #[test]
    fn str_methods() {
        let mut m = machine();
        m.push_str("  Hi There  ").unwrap();
        m.push_str("strip").unwrap();
        m.push(Value::Int(0)).unwrap();
        method_call(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "Hi There");

        m.push_str("a,b,c").unwrap();
        m.push_str(",").unwrap();
        m.push_str("split").unwrap();
        m.push(Value::Int(1)).unwrap();
        method_call(&mut m).unwrap();
        match m.pop().unwrap() {
            Value::List(l) => assert_eq!(l.borrow().len(), 3),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn slice_with_negative_step_reverses() {
        let mut m = machine();
        m.push_str("hello").unwrap();
        m.push(Value::Void).unwrap();
        m.push(Value::Void).unwrap();
        m.push(Value::Int(-1)).unwrap();
        slice(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "olleh");
    }

    #[test]
    fn slice_list_with_bounds() {
        let mut m = machine();
        m.push(Value::new_list(
            (0..5).map(Value::Int).collect::<Vec<_>>(),
        ))
        .unwrap();
        m.push(Value::Int(1)).unwrap();
        m.push(Value::Int(4)).unwrap();
        m.push(Value::Void).unwrap();
        slice(&mut m).unwrap();
        match m.pop().unwrap() {
            Value::List(l) => {
                let items: Vec<i64> = l.borrow().iter().map(|v| v.as_int().unwrap()).collect();
                assert_eq!(items, vec![1, 2, 3]);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn isinstance_matches_type_names() {
        let mut m = machine();
        m.push(Value::Int(1)).unwrap();
        m.push_str("int").unwrap();
        is_instance(&mut m).unwrap();
        assert!(m.pop().unwrap().is_truthy());

        m.push(Value::Int(1)).unwrap();
        m.push_str("str").unwrap();
        is_instance(&mut m).unwrap();
        assert!(!m.pop().unwrap().is_truthy());
    }

    #[test]
    fn conversions() {
        let mut m = machine();
        m.push_str(" 42 ").unwrap();
        int(&mut m).unwrap();
        assert_eq!(m.pop().unwrap().as_int(), Some(42));

        m.push_str("nope").unwrap();
        assert!(int(&mut m).is_err());

        m.push(Value::Float(2.5)).unwrap();
        str_(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "2.5");
    }

    #[test]
    fn radix_formatting() {
        let mut m = machine();
        m.push(Value::Int(10)).unwrap();
        bin(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "0b1010");

        m.push(Value::Int(-255)).unwrap();
        hex(&mut m).unwrap();
        let v = m.pop().unwrap();
        assert_eq!(m.value_text(&v).unwrap(), "-0xff");
    }
}
