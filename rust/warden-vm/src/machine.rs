//! The machine: fixed-size operand and frame stacks, gas-metered dispatch
//! loop, scope stack and host dispatch.
//!
//! The dispatch loop hoists IP/SP/FP into locals and syncs them back to
//! machine state only at observable boundaries (SYSCALL, any exit). All
//! slot and code indexing is checked; malformed bytecode surfaces as a
//! `VmError`, never a panic, so a host-runtime fault can't escape to the
//! embedder.

use crate::bytecode::{self, op};
use crate::error::VmError;
use crate::gatekeeper::Gatekeeper;
use crate::program::Program;
use std::collections::BTreeMap;
use std::rc::Rc;
use warden_core::{Arena, StrRef, Value};

pub const STACK_DEPTH: usize = 128;
pub const MAX_FRAMES: usize = 32;
pub const MAX_LOCALS: usize = 16;

/// Instruction budget for host-initiated calls (`map`, `filter`). The
/// outer budget is charged one instruction for the whole SYSCALL.
pub const HOST_CALL_GAS: u64 = 1_000_000;

pub type HostFn = Rc<dyn Fn(&mut Machine) -> Result<(), VmError>>;

/// One slot in the host registry. The index a handler occupies is baked
/// into emitted bytecode, so installation order is ABI.
#[derive(Clone)]
pub struct HostEntry {
    pub name: &'static str,
    pub required_scope: Option<&'static str>,
    pub handler: HostFn,
}

#[derive(Debug)]
struct Frame {
    /// `None` marks a host-initiated call: RET hands control back to
    /// `call_function` instead of jumping.
    return_ip: Option<usize>,
    base_sp: usize,
    locals: [Value; MAX_LOCALS],
}

impl Frame {
    fn new() -> Self {
        Self {
            return_ip: Some(0),
            base_sp: 0,
            locals: std::array::from_fn(|_| Value::Void),
        }
    }

    fn clear(&mut self) {
        self.return_ip = Some(0);
        self.base_sp = 0;
        for slot in self.locals.iter_mut() {
            *slot = Value::Void;
        }
    }
}

enum Outcome {
    Halted,
    Stopped,
}

pub struct Machine {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    sp: usize,
    ip: usize,
    fp: usize,
    code: Vec<u32>,
    constants: Vec<Value>,
    arena: Arena,
    base_arena_len: usize,
    functions: BTreeMap<String, usize>,
    local_names: Vec<String>,
    scope_stack: Vec<String>,
    token_map: BTreeMap<String, String>,
    gatekeeper: Option<Box<dyn Gatekeeper>>,
    hosts: Vec<HostEntry>,
    /// Captured `print` output (also echoed to stdout by the host).
    pub output: Vec<String>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            stack: (0..STACK_DEPTH).map(|_| Value::Void).collect(),
            // Slot 0 is the top-level frame; MAX_FRAMES call frames above it.
            frames: (0..=MAX_FRAMES).map(|_| Frame::new()).collect(),
            sp: 0,
            ip: 0,
            fp: 0,
            code: Vec::new(),
            constants: Vec::new(),
            arena: Arena::new(),
            base_arena_len: 0,
            functions: BTreeMap::new(),
            local_names: Vec::new(),
            scope_stack: Vec::new(),
            token_map: BTreeMap::new(),
            gatekeeper: None,
            hosts: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Load a compiled program. Installed hosts and the gatekeeper are
    /// kept; registers, stacks and the arena are reinitialized.
    pub fn load(&mut self, program: &Program) {
        self.code = program.instructions.clone();
        self.constants = program.constants.iter().map(|c| c.to_value()).collect();
        self.arena = Arena::from_bytes(program.arena.clone());
        self.base_arena_len = program.arena.len();
        self.functions = program.functions.clone();
        self.local_names = program.local_names.clone();
        self.reset();
    }

    /// Zero the stacks and registers, drain the scope stack and discard
    /// run-time arena growth. Required between principals: stack slots may
    /// hold shared container handles.
    pub fn reset(&mut self) {
        self.sp = 0;
        self.ip = 0;
        self.fp = 0;
        for slot in self.stack.iter_mut() {
            *slot = Value::Void;
        }
        for frame in self.frames.iter_mut() {
            frame.clear();
        }
        self.scope_stack.clear();
        self.token_map.clear();
        self.arena.truncate(self.base_arena_len);
        self.output.clear();
    }

    pub fn set_gatekeeper(&mut self, gk: Box<dyn Gatekeeper>) {
        self.gatekeeper = Some(gk);
    }

    /// Install a host function at a fixed registry index. Gaps are filled
    /// with placeholders that fail when dispatched.
    pub fn set_host<F>(
        &mut self,
        idx: u32,
        name: &'static str,
        required_scope: Option<&'static str>,
        f: F,
    ) where
        F: Fn(&mut Machine) -> Result<(), VmError> + 'static,
    {
        let idx = idx as usize;
        while self.hosts.len() <= idx {
            let missing = self.hosts.len();
            self.hosts.push(HostEntry {
                name: "unassigned",
                required_scope: None,
                handler: Rc::new(move |_| {
                    Err(VmError::Host(format!("host slot {} not installed", missing)))
                }),
            });
        }
        self.hosts[idx] = HostEntry {
            name,
            required_scope,
            handler: Rc::new(f),
        };
    }

    pub fn host_name(&self, idx: u32) -> Option<&'static str> {
        self.hosts.get(idx as usize).map(|h| h.name)
    }

    // -- Accessors used by host functions --

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn scopes(&self) -> &[String] {
        &self.scope_stack
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope_stack.iter().any(|s| s == scope)
    }

    /// The token that opened `scope`, if any. Hosts may read but never
    /// mutate scope state.
    pub fn scope_token(&self, scope: &str) -> Option<&str> {
        self.token_map.get(scope).map(String::as_str)
    }

    pub fn function_addr(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    pub fn local_names(&self) -> &[String] {
        &self.local_names
    }

    pub fn top_locals(&self) -> &[Value] {
        &self.frames[0].locals
    }

    /// Local `idx` of the current frame.
    pub fn local(&self, idx: usize) -> Option<&Value> {
        self.frames.get(self.fp).and_then(|f| f.locals.get(idx))
    }

    // -- Stack interface (also the host calling convention) --

    pub fn push(&mut self, v: Value) -> Result<(), VmError> {
        if self.sp >= STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = v;
        self.sp += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow {
                op: op::SYSCALL,
                ip: self.ip,
            });
        }
        self.sp -= 1;
        Ok(std::mem::take(&mut self.stack[self.sp]))
    }

    pub fn peek(&self) -> Result<&Value, VmError> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow {
                op: op::SYSCALL,
                ip: self.ip,
            });
        }
        Ok(&self.stack[self.sp - 1])
    }

    /// Pop a value and resolve it as arena text.
    pub fn pop_str(&mut self) -> Result<String, VmError> {
        let v = self.pop()?;
        self.value_text(&v)
    }

    /// Append `s` to the arena and push its descriptor.
    pub fn push_str(&mut self, s: &str) -> Result<(), VmError> {
        let r = self.arena.append_str(s);
        self.push(Value::Str(r))
    }

    pub fn str_of(&self, r: StrRef) -> Result<&str, VmError> {
        Ok(self.arena.resolve(r)?)
    }

    /// Textual form of a value: strings resolve through the arena, other
    /// values render via their display form.
    pub fn value_text(&self, v: &Value) -> Result<String, VmError> {
        match v {
            Value::Str(r) => Ok(self.arena.resolve(*r)?.to_string()),
            other => Ok(other.format(&self.arena)),
        }
    }

    pub fn format_value(&self, v: &Value) -> String {
        v.format(&self.arena)
    }

    // -- Value semantics that need the arena --

    /// Equality: numeric operands compare numerically, strings compare
    /// resolved bytes, same-tag scalars compare data bits, compounds
    /// compare handle identity.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => {
                match (self.arena.resolve(*x), self.arena.resolve(*y)) {
                    (Ok(sa), Ok(sb)) => sa == sb,
                    _ => false,
                }
            }
            _ if a.is_numeric() && b.is_numeric() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            _ if a.tag() == b.tag() => {
                if a.same_handle(b) {
                    true
                } else {
                    match a.tag() {
                        warden_core::Tag::Void => true,
                        t if t == b.tag() && a.data_bits() == b.data_bits() => {
                            // Compounds all report zero data bits; identity
                            // already failed above.
                            !matches!(
                                a,
                                Value::Bytes(_)
                                    | Value::List(_)
                                    | Value::Tuple(_)
                                    | Value::Dict(_)
                                    | Value::Set(_)
                                    | Value::Iter(_)
                            )
                        }
                        _ => false,
                    }
                }
            }
            _ => false,
        }
    }

    fn values_ordering(&self, a: &Value, b: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if a.is_numeric() && b.is_numeric() {
            if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
                return x.cmp(&y);
            }
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            if let (Ok(sa), Ok(sb)) = (self.arena.resolve(*x), self.arena.resolve(*y)) {
                return sa.cmp(sb);
            }
        }
        (a.data_bits() as i64).cmp(&(b.data_bits() as i64))
    }

    /// `sorted` shares the comparison the ordering opcodes use.
    pub fn compare_values(&self, a: &Value, b: &Value) -> std::cmp::Ordering {
        self.values_ordering(a, b)
    }

    fn contains(&self, container: &Value, item: &Value) -> Result<bool, VmError> {
        match container {
            Value::Str(r) => {
                let s = self.arena.resolve(*r)?;
                match item {
                    Value::Str(n) => Ok(s.contains(self.arena.resolve(*n)?)),
                    _ => Ok(false),
                }
            }
            Value::List(l) => Ok(l.borrow().iter().any(|v| self.values_equal(v, item))),
            Value::Tuple(t) => Ok(t.iter().any(|v| self.values_equal(v, item))),
            Value::Dict(d) => {
                let key = self.value_text(item)?;
                Ok(d.borrow().contains_key(&key))
            }
            Value::Set(s) => Ok(s.borrow().contains(&item.data_bits())),
            _ => Ok(false),
        }
    }

    // -- Host-initiated calls (map/filter) --

    /// Invoke a compiled function from inside a host. Runs with its own
    /// instruction budget; the outer gas meter charged one instruction for
    /// the dispatching SYSCALL.
    pub fn call_function(&mut self, addr: usize, args: Vec<Value>) -> Result<Value, VmError> {
        if self.fp + 1 > MAX_FRAMES {
            return Err(VmError::FrameOverflow);
        }
        let saved_ip = self.ip;
        self.fp += 1;
        let frame = &mut self.frames[self.fp];
        frame.return_ip = None;
        frame.base_sp = self.sp;
        for slot in frame.locals.iter_mut() {
            *slot = Value::Void;
        }
        for (i, a) in args.into_iter().enumerate() {
            if i < MAX_LOCALS {
                self.frames[self.fp].locals[i] = a;
            }
        }
        self.ip = addr;
        match self.run_inner(HOST_CALL_GAS)? {
            Outcome::Stopped => {}
            Outcome::Halted => {
                return Err(VmError::BadBytecode(
                    "function reached HALT instead of returning".to_string(),
                ))
            }
        }
        let result = self.pop()?;
        self.ip = saved_ip;
        Ok(result)
    }

    // -- Dispatch --

    /// Execute up to `gas_limit` instructions. Each instruction consumes
    /// one unit; hitting the limit reports `GasExhausted`.
    pub fn run(&mut self, gas_limit: u64) -> Result<(), VmError> {
        self.run_inner(gas_limit).map(|_| ())
    }

    fn sync(&mut self, ip: usize, sp: usize, fp: usize) {
        self.ip = ip;
        self.sp = sp;
        self.fp = fp;
    }

    fn take(&mut self, sp: &mut usize, opcode: u8, ip: usize) -> Result<Value, VmError> {
        if *sp == 0 {
            return Err(VmError::StackUnderflow { op: opcode, ip });
        }
        *sp -= 1;
        Ok(std::mem::take(&mut self.stack[*sp]))
    }

    fn put(&mut self, sp: &mut usize, v: Value) -> Result<(), VmError> {
        if *sp >= STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.stack[*sp] = v;
        *sp += 1;
        Ok(())
    }

    fn run_inner(&mut self, gas_limit: u64) -> Result<Outcome, VmError> {
        let mut ip = self.ip;
        let mut sp = self.sp;
        let mut fp = self.fp;

        let mut spent: u64 = 0;
        while spent < gas_limit {
            spent += 1;

            let word = match self.code.get(ip) {
                Some(w) => *w,
                None => {
                    self.sync(ip, sp, fp);
                    return Err(VmError::BadBytecode(format!(
                        "instruction pointer {} outside code of length {}",
                        ip,
                        self.code.len()
                    )));
                }
            };
            let (opcode, arg) = bytecode::decode(word);

            let step = self.step(opcode, arg, &mut ip, &mut sp, &mut fp);
            match step {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Halt) => {
                    self.sync(ip, sp, fp);
                    return Ok(Outcome::Halted);
                }
                Ok(StepResult::Stop) => {
                    self.sync(ip, sp, fp);
                    return Ok(Outcome::Stopped);
                }
                Err(e) => {
                    self.sync(ip, sp, fp);
                    return Err(e);
                }
            }
        }
        self.sync(ip, sp, fp);
        Err(VmError::GasExhausted)
    }

    fn step(
        &mut self,
        opcode: u8,
        arg: u32,
        ip: &mut usize,
        sp: &mut usize,
        fp: &mut usize,
    ) -> Result<StepResult, VmError> {
        match opcode {
            op::HALT => return Ok(StepResult::Halt),
            op::NOOP => {
                *ip += 1;
            }
            op::PUSH_C => {
                let v = self
                    .constants
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| {
                        VmError::BadBytecode(format!("constant index {} out of range", arg))
                    })?;
                self.put(sp, v)?;
                *ip += 1;
            }
            op::PUSH_L => {
                let slot = arg as usize;
                if slot >= MAX_LOCALS {
                    return Err(VmError::BadBytecode(format!("local slot {} out of range", slot)));
                }
                let v = self.frames[*fp].locals[slot].clone();
                self.put(sp, v)?;
                *ip += 1;
            }
            op::POP_L => {
                let slot = arg as usize;
                if slot >= MAX_LOCALS {
                    return Err(VmError::BadBytecode(format!("local slot {} out of range", slot)));
                }
                let v = self.take(sp, opcode, *ip)?;
                self.frames[*fp].locals[slot] = v;
                *ip += 1;
            }
            op::DROP => {
                self.take(sp, opcode, *ip)?;
                *ip += 1;
            }
            op::DUP => {
                let depth = arg as usize;
                if depth >= *sp {
                    return Err(VmError::StackUnderflow { op: opcode, ip: *ip });
                }
                let v = self.stack[*sp - 1 - depth].clone();
                self.put(sp, v)?;
                *ip += 1;
            }
            op::ADD | op::SUB | op::MUL | op::DIV | op::MOD | op::POW | op::FLOOR_DIV
            | op::BIT_AND | op::BIT_OR | op::BIT_XOR | op::LSHIFT | op::RSHIFT => {
                let b = self.take(sp, opcode, *ip)?;
                let a = self.take(sp, opcode, *ip)?;
                let v = self.binary_arith(opcode, a, b)?;
                self.put(sp, v)?;
                *ip += 1;
            }
            op::EQ | op::NE => {
                let b = self.take(sp, opcode, *ip)?;
                let a = self.take(sp, opcode, *ip)?;
                let eq = self.values_equal(&a, &b);
                self.put(sp, Value::Bool(if opcode == op::EQ { eq } else { !eq }))?;
                *ip += 1;
            }
            op::GT | op::LT | op::GTE | op::LTE => {
                use std::cmp::Ordering::*;
                let b = self.take(sp, opcode, *ip)?;
                let a = self.take(sp, opcode, *ip)?;
                let ord = self.values_ordering(&a, &b);
                let r = match opcode {
                    op::GT => ord == Greater,
                    op::LT => ord == Less,
                    op::GTE => ord != Less,
                    _ => ord != Greater,
                };
                self.put(sp, Value::Bool(r))?;
                *ip += 1;
            }
            op::AND | op::OR => {
                let b = self.take(sp, opcode, *ip)?;
                let a = self.take(sp, opcode, *ip)?;
                let r = if opcode == op::AND {
                    a.is_truthy() && b.is_truthy()
                } else {
                    a.is_truthy() || b.is_truthy()
                };
                self.put(sp, Value::Bool(r))?;
                *ip += 1;
            }
            op::IN | op::NOT_IN => {
                let container = self.take(sp, opcode, *ip)?;
                let item = self.take(sp, opcode, *ip)?;
                let found = self.contains(&container, &item)?;
                self.put(sp, Value::Bool(if opcode == op::IN { found } else { !found }))?;
                *ip += 1;
            }
            op::CONTAINS => {
                let needle = self.take(sp, opcode, *ip)?;
                let hay = self.take(sp, opcode, *ip)?;
                let found = self.contains(&hay, &needle)?;
                self.put(sp, Value::Bool(found))?;
                *ip += 1;
            }
            op::FIND => {
                let needle = self.take(sp, opcode, *ip)?;
                let hay = self.take(sp, opcode, *ip)?;
                let (hay_s, needle_s) = match (&hay, &needle) {
                    (Value::Str(h), Value::Str(n)) => {
                        (self.arena.resolve(*h)?, self.arena.resolve(*n)?)
                    }
                    _ => {
                        return Err(VmError::Arithmetic(
                            "FIND expects two strings".to_string(),
                        ))
                    }
                };
                let idx = hay_s.find(needle_s).map(|i| i as i64).unwrap_or(-1);
                self.put(sp, Value::Int(idx))?;
                *ip += 1;
            }
            op::SLICE => {
                let hi = self.take(sp, opcode, *ip)?;
                let lo = self.take(sp, opcode, *ip)?;
                let v = self.take(sp, opcode, *ip)?;
                let r = match v {
                    Value::Str(r) => r,
                    _ => {
                        return Err(VmError::Arithmetic(
                            "SLICE expects a string".to_string(),
                        ))
                    }
                };
                // A slice is a new descriptor over the same bytes.
                let len = r.len as i64;
                let clamp = |i: i64| i.clamp(0, len) as u32;
                let (lo, hi) = (
                    clamp(lo.as_int().unwrap_or(0)),
                    clamp(hi.as_int().unwrap_or(len)),
                );
                let sliced = if hi > lo {
                    StrRef::new(r.offset + lo, hi - lo)
                } else {
                    StrRef::new(r.offset + lo, 0)
                };
                self.put(sp, Value::Str(sliced))?;
                *ip += 1;
            }
            op::LEN => {
                let v = self.take(sp, opcode, *ip)?;
                let n = match &v {
                    Value::Str(r) => r.len as i64,
                    Value::Bytes(b) => b.len() as i64,
                    Value::List(l) => l.borrow().len() as i64,
                    Value::Tuple(t) => t.len() as i64,
                    Value::Dict(d) => d.borrow().len() as i64,
                    Value::Set(s) => s.borrow().len() as i64,
                    _ => 0,
                };
                self.put(sp, Value::Int(n))?;
                *ip += 1;
            }
            op::TRIM => {
                let v = self.take(sp, opcode, *ip)?;
                let r = match v {
                    Value::Str(r) => r,
                    _ => return Err(VmError::Arithmetic("TRIM expects a string".to_string())),
                };
                let s = self.arena.resolve(r)?;
                // Trimming narrows the descriptor; bytes stay in place.
                let start = s.len() - s.trim_start().len();
                let trimmed_len = s.trim().len();
                let trimmed = StrRef::new(r.offset + start as u32, trimmed_len as u32);
                self.put(sp, Value::Str(trimmed))?;
                *ip += 1;
            }
            op::ERROR => {
                let v = self.take(sp, opcode, *ip)?;
                let msg = self.value_text(&v)?;
                return Err(VmError::User(msg));
            }
            op::JMP => {
                *ip = arg as usize;
            }
            op::JMP_FALSE => {
                let v = self.take(sp, opcode, *ip)?;
                if v.is_truthy() {
                    *ip += 1;
                } else {
                    *ip = arg as usize;
                }
            }
            op::CALL => {
                let (target, argc) = bytecode::decode_call(arg);
                if *fp + 1 > MAX_FRAMES {
                    return Err(VmError::FrameOverflow);
                }
                if argc > *sp {
                    return Err(VmError::StackUnderflow { op: opcode, ip: *ip });
                }
                let base = *sp - argc;
                let return_ip = *ip + 1;
                let frame = &mut self.frames[*fp + 1];
                frame.return_ip = Some(return_ip);
                frame.base_sp = base;
                for slot in frame.locals.iter_mut() {
                    *slot = Value::Void;
                }
                for i in 0..argc {
                    self.frames[*fp + 1].locals[i] = std::mem::take(&mut self.stack[base + i]);
                }
                *sp = base;
                *fp += 1;
                *ip = target;
            }
            op::RET => {
                let result = self.take(sp, opcode, *ip)?;
                if *fp == 0 {
                    return Err(VmError::BadBytecode("RET outside a call frame".to_string()));
                }
                let base = self.frames[*fp].base_sp;
                let return_ip = self.frames[*fp].return_ip;
                for i in base..*sp {
                    self.stack[i] = Value::Void;
                }
                *sp = base;
                *fp -= 1;
                self.put(sp, result)?;
                match return_ip {
                    Some(addr) => *ip = addr,
                    None => return Ok(StepResult::Stop),
                }
            }
            op::ADDRESS => {
                let token = self.take(sp, opcode, *ip)?;
                let scope = self.take(sp, opcode, *ip)?;
                let (scope, token) = match (&scope, &token) {
                    (Value::Str(s), Value::Str(t)) => (
                        self.arena.resolve(*s)?.to_string(),
                        self.arena.resolve(*t)?.to_string(),
                    ),
                    _ => {
                        return Err(VmError::SecurityViolation(
                            "ADDRESS expects scope and token strings".to_string(),
                        ))
                    }
                };
                let accepted = self
                    .gatekeeper
                    .as_ref()
                    .is_some_and(|gk| gk.validate(&scope, &token));
                if !accepted {
                    return Err(VmError::SecurityViolation(format!(
                        "gatekeeper rejected scope '{}'",
                        scope
                    )));
                }
                self.scope_stack.push(scope.clone());
                self.token_map.insert(scope, token);
                *ip += 1;
            }
            op::EXIT_ADDR => {
                // The compiler guarantees balance; an empty stack here is
                // tolerated silently.
                self.scope_stack.pop();
                *ip += 1;
            }
            op::SYSCALL => {
                let entry = self
                    .hosts
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| {
                        VmError::BadBytecode(format!("unknown host index {}", arg))
                    })?;
                if let Some(scope) = entry.required_scope {
                    if !self.has_scope(scope) {
                        return Err(VmError::SecurityViolation(format!(
                            "host '{}' requires scope '{}'",
                            entry.name, scope
                        )));
                    }
                }
                // A host may grow the stack, append to the arena or invoke
                // compiled functions, so registers round-trip through
                // machine state.
                self.sync(*ip, *sp, *fp);
                (entry.handler)(self)?;
                *ip = self.ip + 1;
                *sp = self.sp;
                *fp = self.fp;
            }
            other => {
                return Err(VmError::BadBytecode(format!("unknown opcode {:#04x}", other)));
            }
        }
        Ok(StepResult::Continue)
    }

    fn binary_arith(&mut self, opcode: u8, a: Value, b: Value) -> Result<Value, VmError> {
        // String overloads: concatenation and single %s substitution.
        if let Value::Str(r) = &a {
            let r = *r;
            if opcode == op::ADD {
                let mut s = self.arena.resolve(r)?.to_string();
                s.push_str(&self.value_text(&b)?);
                return Ok(Value::Str(self.arena.append_str(&s)));
            }
            if opcode == op::MOD {
                let fmt = self.arena.resolve(r)?.to_string();
                let sub = self.value_text(&b)?;
                let s = fmt.replacen("%s", &sub, 1);
                return Ok(Value::Str(self.arena.append_str(&s)));
            }
        }

        match opcode {
            op::BIT_AND | op::BIT_OR | op::BIT_XOR | op::LSHIFT | op::RSHIFT => {
                let (x, y) = match (a.as_int(), b.as_int()) {
                    (Some(x), Some(y)) => (x, y),
                    _ => {
                        return Err(VmError::Arithmetic(format!(
                            "bitwise operation on {} and {}",
                            a.type_name(),
                            b.type_name()
                        )))
                    }
                };
                let v = match opcode {
                    op::BIT_AND => x & y,
                    op::BIT_OR => x | y,
                    op::BIT_XOR => x ^ y,
                    op::LSHIFT | op::RSHIFT => {
                        if !(0..64).contains(&y) {
                            return Err(VmError::Arithmetic(format!("shift amount {} out of range", y)));
                        }
                        if opcode == op::LSHIFT {
                            x.wrapping_shl(y as u32)
                        } else {
                            x >> y
                        }
                    }
                    _ => unreachable!(),
                };
                Ok(Value::Int(v))
            }
            _ => self.numeric_arith(opcode, &a, &b),
        }
    }

    /// Promotion rule: any float operand promotes to f64; Int×Int stays
    /// i64 (`DIV` included — truncating integer division).
    fn numeric_arith(&self, opcode: u8, a: &Value, b: &Value) -> Result<Value, VmError> {
        if !a.is_numeric() || !b.is_numeric() {
            return Err(VmError::Arithmetic(format!(
                "arithmetic on {} and {}",
                a.type_name(),
                b.type_name()
            )));
        }
        let float_mode = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
        if float_mode {
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            let v = match opcode {
                op::ADD => x + y,
                op::SUB => x - y,
                op::MUL => x * y,
                op::DIV | op::MOD | op::FLOOR_DIV => {
                    if y == 0.0 {
                        return Err(VmError::Arithmetic("division by zero".to_string()));
                    }
                    match opcode {
                        op::DIV => x / y,
                        op::MOD => x % y,
                        _ => (x / y).floor(),
                    }
                }
                op::POW => x.powf(y),
                _ => unreachable!(),
            };
            return Ok(Value::Float(v));
        }

        let (x, y) = (a.as_int().unwrap_or(0), b.as_int().unwrap_or(0));
        let v = match opcode {
            op::ADD => x.wrapping_add(y),
            op::SUB => x.wrapping_sub(y),
            op::MUL => x.wrapping_mul(y),
            op::DIV | op::MOD | op::FLOOR_DIV => {
                if y == 0 {
                    return Err(VmError::Arithmetic("division by zero".to_string()));
                }
                match opcode {
                    op::DIV => x.wrapping_div(y),
                    op::MOD => x.wrapping_rem(y),
                    _ => {
                        let q = x.wrapping_div(y);
                        if x % y != 0 && (x < 0) != (y < 0) {
                            q - 1
                        } else {
                            q
                        }
                    }
                }
            }
            op::POW => {
                if y < 0 {
                    return Ok(Value::Float((x as f64).powi(y as i32)));
                }
                match u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                    Some(v) => v,
                    None => return Ok(Value::Float((x as f64).powf(y as f64))),
                }
            }
            _ => unreachable!(),
        };
        Ok(Value::Int(v))
    }
}

enum StepResult {
    Continue,
    Halt,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::encode;
    use crate::gatekeeper::AllowListGatekeeper;
    use crate::program::{Constant, Program, BYTECODE_VERSION};

    fn program(instructions: Vec<u32>, constants: Vec<Constant>, arena: &[u8]) -> Program {
        Program {
            version: BYTECODE_VERSION,
            instructions,
            constants,
            arena: arena.to_vec(),
            functions: BTreeMap::new(),
            local_names: Vec::new(),
        }
    }

    fn loaded(instructions: Vec<u32>, constants: Vec<Constant>, arena: &[u8]) -> Machine {
        let mut m = Machine::new();
        m.load(&program(instructions, constants, arena));
        m
    }

    #[test]
    fn reset_zeroes_registers_and_stack() {
        let mut m = Machine::new();
        m.push(Value::Int(100)).unwrap();
        m.scope_stack.push("FS-ENV".to_string());
        m.ip = 5;
        m.fp = 2;
        m.reset();
        assert_eq!(m.sp, 0);
        assert_eq!(m.ip, 0);
        assert_eq!(m.fp, 0);
        assert!(m.scopes().is_empty());
        assert!(matches!(m.stack[0], Value::Void));
    }

    #[test]
    fn push_pop() {
        let mut m = Machine::new();
        m.push(Value::Int(42)).unwrap();
        assert_eq!(m.sp, 1);
        assert_eq!(m.pop().unwrap().as_int(), Some(42));
        assert_eq!(m.sp, 0);
        assert!(matches!(m.pop(), Err(VmError::StackUnderflow { .. })));
    }

    #[test]
    fn stack_overflow_at_the_cap() {
        let mut m = Machine::new();
        for i in 0..STACK_DEPTH {
            m.push(Value::Int(i as i64)).unwrap();
        }
        assert!(matches!(m.push(Value::Int(0)), Err(VmError::StackOverflow)));
    }

    #[test]
    fn add_into_local() {
        // 1 2 ADD -> local 0; HALT
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::ADD, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Int(1), Constant::Int(2)],
            b"",
        );
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(3));
        assert_eq!(m.sp, 0);
    }

    #[test]
    fn string_concat_grows_arena() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::ADD, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 3 },
                Constant::Int(42),
            ],
            b"n: ",
        );
        let before = m.arena().len();
        m.run(100).unwrap();
        assert!(m.arena().len() > before);
        let v = m.local(0).unwrap().clone();
        assert_eq!(m.value_text(&v).unwrap(), "n: 42");
    }

    #[test]
    fn string_mod_substitutes_once() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::MOD, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 11 },
                Constant::Str { offset: 11, len: 5 },
            ],
            b"hi %s / %s!world",
        );
        m.run(100).unwrap();
        let v = m.local(0).unwrap().clone();
        assert_eq!(m.value_text(&v).unwrap(), "hi world / %s!");
    }

    #[test]
    fn division_by_zero() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::DIV, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Int(1), Constant::Int(0)],
            b"",
        );
        assert!(matches!(m.run(100), Err(VmError::Arithmetic(_))));
    }

    #[test]
    fn floor_division_rounds_down() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::FLOOR_DIV, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Int(-7), Constant::Int(2)],
            b"",
        );
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(-4));
    }

    #[test]
    fn gas_exhaustion() {
        // Tight loop: JMP 0
        let mut m = loaded(vec![encode(op::JMP, 0)], vec![], b"");
        assert!(matches!(m.run(1000), Err(VmError::GasExhausted)));
    }

    #[test]
    fn unknown_opcode_is_bad_bytecode() {
        let mut m = loaded(vec![encode(0x7F, 0)], vec![], b"");
        assert!(matches!(m.run(10), Err(VmError::BadBytecode(_))));
    }

    #[test]
    fn error_instruction_carries_message() {
        let mut m = loaded(
            vec![encode(op::PUSH_C, 0), encode(op::ERROR, 0)],
            vec![Constant::Str { offset: 0, len: 4 }],
            b"boom",
        );
        match m.run(10) {
            Err(VmError::User(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected User error, got {:?}", other),
        }
    }

    #[test]
    fn dup_depth_zero_copies_top() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::DUP, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Int(1), Constant::Int(2)],
            b"",
        );
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(2));
    }

    #[test]
    fn dup_depth_one_copies_second() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::DUP, 1),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Int(1), Constant::Int(2)],
            b"",
        );
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(1));
    }

    #[test]
    fn call_and_ret() {
        // 0: JMP 3          (skip body)
        // 1: PUSH_L 0       (function double: x)
        // 2: ... body: x + x; RET
        let code = vec![
            encode(op::JMP, 5),
            encode(op::PUSH_L, 0),
            encode(op::PUSH_L, 0),
            encode(op::ADD, 0),
            encode(op::RET, 0),
            encode(op::PUSH_C, 0),
            encode(op::CALL, bytecode::encode_call(1, 1)),
            encode(op::POP_L, 0),
            encode(op::HALT, 0),
        ];
        let mut m = loaded(code, vec![Constant::Int(21)], b"");
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(42));
        assert_eq!(m.sp, 0);
        assert_eq!(m.fp, 0);
    }

    #[test]
    fn frame_overflow_past_max_depth() {
        // Address 0 calls itself forever.
        let code = vec![encode(op::CALL, bytecode::encode_call(0, 0))];
        let mut m = loaded(code, vec![], b"");
        match m.run(10_000) {
            Err(VmError::FrameOverflow) => {}
            other => panic!("expected FrameOverflow, got {:?}", other),
        }
        // Exactly MAX_FRAMES calls fit above the top-level frame.
        assert_eq!(m.fp, MAX_FRAMES);
    }

    #[test]
    fn address_accepts_valid_pair_and_balances() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::ADDRESS, 0),
                encode(op::EXIT_ADDR, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 8 },
                Constant::Str { offset: 8, len: 17 },
            ],
            b"HTTP-ENVsecret-http-token",
        );
        m.set_gatekeeper(Box::new(
            AllowListGatekeeper::new().allow("HTTP-ENV", "secret-http-token"),
        ));
        m.run(100).unwrap();
        assert!(m.scopes().is_empty());
    }

    #[test]
    fn address_rejects_bad_token() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::ADDRESS, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 8 },
                Constant::Str { offset: 8, len: 5 },
            ],
            b"HTTP-ENVwrong",
        );
        m.set_gatekeeper(Box::new(
            AllowListGatekeeper::new().allow("HTTP-ENV", "secret"),
        ));
        assert!(matches!(m.run(100), Err(VmError::SecurityViolation(_))));
    }

    #[test]
    fn address_without_gatekeeper_rejects() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 0),
                encode(op::ADDRESS, 0),
                encode(op::HALT, 0),
            ],
            vec![Constant::Str { offset: 0, len: 2 }],
            b"XX",
        );
        assert!(matches!(m.run(100), Err(VmError::SecurityViolation(_))));
    }

    #[test]
    fn exit_addr_tolerates_empty_scope_stack() {
        let mut m = loaded(
            vec![encode(op::EXIT_ADDR, 0), encode(op::HALT, 0)],
            vec![],
            b"",
        );
        m.run(10).unwrap();
    }

    #[test]
    fn unscoped_syscall_is_a_security_violation() {
        let mut m = loaded(
            vec![encode(op::SYSCALL, 0), encode(op::HALT, 0)],
            vec![],
            b"",
        );
        m.set_host(0, "guarded", Some("HTTP-ENV"), |_| Ok(()));
        assert!(matches!(m.run(100), Err(VmError::SecurityViolation(_))));
    }

    #[test]
    fn scoped_syscall_dispatches() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::ADDRESS, 0),
                encode(op::SYSCALL, 0),
                encode(op::POP_L, 0),
                encode(op::EXIT_ADDR, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 8 },
                Constant::Str { offset: 8, len: 5 },
            ],
            b"HTTP-ENVtoken",
        );
        m.set_gatekeeper(Box::new(
            AllowListGatekeeper::new().allow("HTTP-ENV", "token"),
        ));
        m.set_host(0, "probe", Some("HTTP-ENV"), |m| m.push(Value::Int(7)));
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(7));
    }

    #[test]
    fn uninstalled_host_slot_fails() {
        let mut m = loaded(
            vec![encode(op::SYSCALL, 1), encode(op::HALT, 0)],
            vec![],
            b"",
        );
        m.set_host(3, "later", None, |_| Ok(()));
        assert!(matches!(m.run(100), Err(VmError::Host(_))));
    }

    #[test]
    fn slice_and_trim_share_bytes() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::PUSH_C, 2),
                encode(op::SLICE, 0),
                encode(op::TRIM, 0),
                encode(op::POP_L, 0),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 10 },
                Constant::Int(2),
                Constant::Int(9),
            ],
            b"  padded  ",
        );
        let before = m.arena().len();
        m.run(100).unwrap();
        assert_eq!(m.arena().len(), before, "slice/trim must not copy bytes");
        let v = m.local(0).unwrap().clone();
        assert_eq!(m.value_text(&v).unwrap(), "padded");
    }

    #[test]
    fn contains_find_and_len_on_strings() {
        let mut m = loaded(
            vec![
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::CONTAINS, 0),
                encode(op::POP_L, 0),
                encode(op::PUSH_C, 0),
                encode(op::PUSH_C, 1),
                encode(op::FIND, 0),
                encode(op::POP_L, 1),
                encode(op::PUSH_C, 0),
                encode(op::LEN, 0),
                encode(op::POP_L, 2),
                encode(op::HALT, 0),
            ],
            vec![
                Constant::Str { offset: 0, len: 11 },
                Constant::Str { offset: 6, len: 5 },
            ],
            b"hello world",
        );
        m.run(100).unwrap();
        assert!(m.local(0).unwrap().is_truthy());
        assert_eq!(m.local(1).unwrap().as_int(), Some(6));
        assert_eq!(m.local(2).unwrap().as_int(), Some(11));
    }

    #[test]
    fn call_function_from_host() {
        // Function at 1: doubles its argument.
        let code = vec![
            encode(op::JMP, 5),
            encode(op::PUSH_L, 0),
            encode(op::PUSH_L, 0),
            encode(op::ADD, 0),
            encode(op::RET, 0),
            encode(op::SYSCALL, 0),
            encode(op::POP_L, 0),
            encode(op::HALT, 0),
        ];
        let mut m = loaded(code, vec![], b"");
        m.set_host(0, "apply", None, |m| {
            let v = m.call_function(1, vec![Value::Int(10)])?;
            m.push(v)
        });
        m.run(100).unwrap();
        assert_eq!(m.local(0).unwrap().as_int(), Some(20));
    }

    #[test]
    fn run_observes_gas_budget_exactly() {
        // NOOP * 5 then HALT: budget 5 exhausts before HALT.
        let mut code = vec![encode(op::NOOP, 0); 5];
        code.push(encode(op::HALT, 0));
        let mut m = loaded(code.clone(), vec![], b"");
        assert!(matches!(m.run(5), Err(VmError::GasExhausted)));
        let mut m2 = loaded(code, vec![], b"");
        m2.run(6).unwrap();
    }
}
