//! AST → bytecode translation.
//!
//! Constants are de-duplicated by `(tag, data bits)`; identical string
//! literals are interned so they share arena bytes. Forward jumps emit a
//! placeholder word whose low 24 bits are rewritten once the target is
//! known. Emission order mirrors the analyzer exactly — the analyzer has
//! already proven every statement balances and every gated word is
//! dominated by its scope.

use crate::ast::*;
use crate::error::CompileError;
use crate::words::{signature, Arity};
use std::collections::HashMap;
use warden_core::StrRef;
use warden_vm::bytecode::{self, host, op, ARG_MASK};
use warden_vm::machine::MAX_LOCALS;
use warden_vm::program::{Constant, Program, BYTECODE_VERSION};

#[derive(Debug, Clone)]
struct FuncInfo {
    addr: usize,
    params: Vec<String>,
}

struct LoopCtx {
    start: usize,
    breaks: Vec<usize>,
}

#[derive(Default)]
pub struct Emitter {
    instructions: Vec<u32>,
    constants: Vec<Constant>,
    const_index: HashMap<(u8, u64), u32>,
    arena: Vec<u8>,
    interned: HashMap<String, u32>,
    locals: HashMap<String, usize>,
    local_order: Vec<String>,
    functions: HashMap<String, FuncInfo>,
    loops: Vec<LoopCtx>,
    lambda_count: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(mut self, module: &Module) -> Result<Program, CompileError> {
        for stmt in &module.body {
            self.stmt(stmt)?;
        }
        self.op(op::HALT, 0);
        Ok(Program {
            version: BYTECODE_VERSION,
            instructions: self.instructions,
            constants: self.constants,
            arena: self.arena,
            functions: self
                .functions
                .into_iter()
                .map(|(name, info)| (name, info.addr))
                .collect(),
            local_names: self.local_order,
        })
    }

    // -- Low-level helpers --

    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn op(&mut self, opcode: u8, arg: u32) {
        self.instructions.push(bytecode::encode(opcode, arg));
    }

    fn patch(&mut self, at: usize, target: usize) -> Result<(), CompileError> {
        if target as u32 > ARG_MASK {
            return Err(CompileError::TooLarge(format!(
                "jump target {} exceeds the 24-bit immediate",
                target
            )));
        }
        let opcode = (self.instructions[at] >> 24) as u8;
        self.instructions[at] = bytecode::encode(opcode, target as u32);
        Ok(())
    }

    fn intern(&mut self, s: &str) -> StrRef {
        if let Some(&offset) = self.interned.get(s) {
            return StrRef::new(offset, s.len() as u32);
        }
        let offset = self.arena.len() as u32;
        self.arena.extend_from_slice(s.as_bytes());
        self.interned.insert(s.to_string(), offset);
        StrRef::new(offset, s.len() as u32)
    }

    fn const_idx(&mut self, c: Constant) -> u32 {
        let key = match c {
            Constant::Void => (0u8, 0u64),
            Constant::Int(n) => (1, n as u64),
            Constant::Bool(b) => (2, u64::from(b)),
            Constant::Float(f) => (3, f.to_bits()),
            Constant::Str { offset, len } => (4, StrRef::new(offset, len).pack()),
        };
        if let Some(&idx) = self.const_index.get(&key) {
            return idx;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(c);
        self.const_index.insert(key, idx);
        idx
    }

    fn str_const(&mut self, s: &str) -> u32 {
        let r = self.intern(s);
        self.const_idx(Constant::Str {
            offset: r.offset,
            len: r.len,
        })
    }

    fn void_const(&mut self) -> u32 {
        self.const_idx(Constant::Void)
    }

    fn local_idx(&mut self, name: &str, line: usize) -> Result<u32, CompileError> {
        if let Some(&idx) = self.locals.get(name) {
            return Ok(idx as u32);
        }
        let idx = self.locals.len();
        if idx >= MAX_LOCALS {
            return Err(CompileError::TooManyLocals {
                line,
                limit: MAX_LOCALS,
            });
        }
        self.locals.insert(name.to_string(), idx);
        self.local_order.push(name.to_string());
        Ok(idx as u32)
    }

    /// Values a finished expression leaves on the stack (0 or 1).
    fn pushes(&self, e: &Expr) -> u8 {
        match e {
            Expr::Call { name, .. } => signature(name).map(|s| s.out).unwrap_or(1),
            _ => 1,
        }
    }

    // -- Statements --

    fn stmt(&mut self, s: &Stmt) -> Result<(), CompileError> {
        match s {
            Stmt::Assign {
                target,
                value,
                line,
            } => self.assign(target, value, *line),
            Stmt::AugAssign {
                name,
                op: binop,
                value,
                line,
            } => {
                let idx = self.local_idx(name, *line)?;
                self.op(op::PUSH_L, idx);
                self.expr(value)?;
                self.op(binop_opcode(*binop), 0);
                self.op(op::POP_L, idx);
                Ok(())
            }
            Stmt::Expr { value, .. } => {
                self.expr(value)?;
                if self.pushes(value) == 1 {
                    self.op(op::DROP, 0);
                }
                Ok(())
            }
            Stmt::If {
                test,
                body,
                orelse,
                ..
            } => {
                self.expr(test)?;
                let jf = self.here();
                self.op(op::JMP_FALSE, 0);
                for s in body {
                    self.stmt(s)?;
                }
                if orelse.is_empty() {
                    self.patch(jf, self.here())?;
                } else {
                    let jend = self.here();
                    self.op(op::JMP, 0);
                    self.patch(jf, self.here())?;
                    for s in orelse {
                        self.stmt(s)?;
                    }
                    self.patch(jend, self.here())?;
                }
                Ok(())
            }
            Stmt::While { test, body, .. } => {
                let start = self.here();
                self.loops.push(LoopCtx {
                    start,
                    breaks: Vec::new(),
                });
                self.expr(test)?;
                let jf = self.here();
                self.op(op::JMP_FALSE, 0);
                for s in body {
                    self.stmt(s)?;
                }
                self.op(op::JMP, start as u32);
                let end = self.here();
                self.patch(jf, end)?;
                let ctx = self.loops.pop().unwrap();
                for at in ctx.breaks {
                    self.patch(at, end)?;
                }
                Ok(())
            }
            Stmt::For {
                target,
                iter,
                body,
                line,
            } => {
                self.expr(iter)?;
                self.op(op::SYSCALL, host::ITER);
                let start = self.here();
                self.loops.push(LoopCtx {
                    start,
                    breaks: Vec::new(),
                });
                self.op(op::SYSCALL, host::HAS_NEXT);
                let jf = self.here();
                self.op(op::JMP_FALSE, 0);
                self.op(op::DUP, 0);
                self.op(op::SYSCALL, host::NEXT);
                self.bind_loop_target(target, *line)?;
                for s in body {
                    self.stmt(s)?;
                }
                self.op(op::JMP, start as u32);
                let end = self.here();
                self.patch(jf, end)?;
                let ctx = self.loops.pop().unwrap();
                for at in ctx.breaks {
                    self.patch(at, end)?;
                }
                self.op(op::DROP, 0);
                Ok(())
            }
            Stmt::With {
                scope,
                token,
                body,
                ..
            } => {
                self.expr(scope)?;
                self.expr(token)?;
                self.op(op::ADDRESS, 0);
                for s in body {
                    self.stmt(s)?;
                }
                self.op(op::EXIT_ADDR, 0);
                Ok(())
            }
            Stmt::FuncDef {
                name,
                params,
                body,
                line,
            } => {
                if params.len() > MAX_LOCALS {
                    return Err(CompileError::TooManyLocals {
                        line: *line,
                        limit: MAX_LOCALS,
                    });
                }
                let jmp_over = self.here();
                self.op(op::JMP, 0);
                self.functions.insert(
                    name.clone(),
                    FuncInfo {
                        addr: self.here(),
                        params: params.clone(),
                    },
                );
                let saved_locals = std::mem::take(&mut self.locals);
                let saved_order = std::mem::take(&mut self.local_order);
                for (i, p) in params.iter().enumerate() {
                    self.locals.insert(p.clone(), i);
                    self.local_order.push(p.clone());
                }
                for s in body {
                    self.stmt(s)?;
                }
                let void = self.void_const();
                self.op(op::PUSH_C, void);
                self.op(op::RET, 0);
                self.locals = saved_locals;
                self.local_order = saved_order;
                self.patch(jmp_over, self.here())?;
                Ok(())
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(v) => self.expr(v)?,
                    None => {
                        let void = self.void_const();
                        self.op(op::PUSH_C, void);
                    }
                }
                self.op(op::RET, 0);
                Ok(())
            }
            Stmt::Break { .. } => {
                let at = self.here();
                self.op(op::JMP, 0);
                self.loops
                    .last_mut()
                    .expect("analyzer rejects break outside loops")
                    .breaks
                    .push(at);
                Ok(())
            }
            Stmt::Continue { .. } => {
                let start = self
                    .loops
                    .last()
                    .expect("analyzer rejects continue outside loops")
                    .start;
                self.op(op::JMP, start as u32);
                Ok(())
            }
            Stmt::Pass { .. } => Ok(()),
        }
    }

    fn assign(&mut self, target: &Target, value: &Expr, line: usize) -> Result<(), CompileError> {
        match target {
            Target::Name(name) => {
                self.expr(value)?;
                let idx = self.local_idx(name, line)?;
                self.op(op::POP_L, idx);
                Ok(())
            }
            Target::Subscript { obj, index } => {
                self.expr(obj)?;
                self.expr(index)?;
                self.expr(value)?;
                self.op(op::SYSCALL, host::SET_ITEM);
                Ok(())
            }
            Target::Tuple(targets) => {
                self.expr(value)?;
                let tmp = self.local_idx("__unpack", line)?;
                self.op(op::POP_L, tmp);
                for (i, t) in targets.iter().enumerate() {
                    let name = match t {
                        Target::Name(n) => n.clone(),
                        _ => unreachable!("analyzer restricts unpack targets to names"),
                    };
                    self.op(op::PUSH_L, tmp);
                    let idx_const = self.const_idx(Constant::Int(i as i64));
                    self.op(op::PUSH_C, idx_const);
                    self.op(op::SYSCALL, host::GET_ITEM);
                    let slot = self.local_idx(&name, line)?;
                    self.op(op::POP_L, slot);
                }
                Ok(())
            }
        }
    }

    fn bind_loop_target(&mut self, target: &Target, line: usize) -> Result<(), CompileError> {
        match target {
            Target::Name(name) => {
                let idx = self.local_idx(name, line)?;
                self.op(op::POP_L, idx);
                Ok(())
            }
            Target::Tuple(names) => {
                let tmp = self.local_idx("__unpack", line)?;
                self.op(op::POP_L, tmp);
                for (i, t) in names.iter().enumerate() {
                    let name = match t {
                        Target::Name(n) => n.clone(),
                        _ => unreachable!("parser builds loop tuples from names"),
                    };
                    self.op(op::PUSH_L, tmp);
                    let idx_const = self.const_idx(Constant::Int(i as i64));
                    self.op(op::PUSH_C, idx_const);
                    self.op(op::SYSCALL, host::GET_ITEM);
                    let slot = self.local_idx(&name, line)?;
                    self.op(op::POP_L, slot);
                }
                Ok(())
            }
            Target::Subscript { .. } => unreachable!("analyzer rejects subscript loop targets"),
        }
    }

    // -- Expressions --

    fn expr(&mut self, e: &Expr) -> Result<(), CompileError> {
        match e {
            Expr::Int(n) => {
                let c = self.const_idx(Constant::Int(*n));
                self.op(op::PUSH_C, c);
                Ok(())
            }
            Expr::Float(f) => {
                let c = self.const_idx(Constant::Float(*f));
                self.op(op::PUSH_C, c);
                Ok(())
            }
            Expr::Str(s) => {
                let c = self.str_const(s);
                self.op(op::PUSH_C, c);
                Ok(())
            }
            Expr::Bool(b) => {
                let c = self.const_idx(Constant::Bool(*b));
                self.op(op::PUSH_C, c);
                Ok(())
            }
            Expr::None_ => {
                let c = self.void_const();
                self.op(op::PUSH_C, c);
                Ok(())
            }
            Expr::Name(name) => {
                if self.functions.contains_key(name) {
                    // Function references travel as their name.
                    let c = self.str_const(name);
                    self.op(op::PUSH_C, c);
                } else {
                    let idx = self.local_idx(name, 0)?;
                    self.op(op::PUSH_L, idx);
                }
                Ok(())
            }
            Expr::BinOp { op: binop, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.op(binop_opcode(*binop), 0);
                Ok(())
            }
            Expr::BoolOp { op: bop, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.op(
                    match bop {
                        BoolOpKind::And => op::AND,
                        BoolOpKind::Or => op::OR,
                    },
                    0,
                );
                Ok(())
            }
            Expr::Compare { op: cmp, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                let opcode = match cmp {
                    CmpOp::Eq | CmpOp::Is => op::EQ,
                    CmpOp::NotEq | CmpOp::IsNot => op::NE,
                    CmpOp::Gt => op::GT,
                    CmpOp::Lt => op::LT,
                    CmpOp::GtEq => op::GTE,
                    CmpOp::LtEq => op::LTE,
                    CmpOp::In => op::IN,
                    CmpOp::NotIn => op::NOT_IN,
                };
                self.op(opcode, 0);
                Ok(())
            }
            Expr::UnaryNeg(operand) => {
                // Literal negation folds into the constant.
                match operand.as_ref() {
                    Expr::Int(n) => {
                        let c = self.const_idx(Constant::Int(-n));
                        self.op(op::PUSH_C, c);
                    }
                    Expr::Float(f) => {
                        let c = self.const_idx(Constant::Float(-f));
                        self.op(op::PUSH_C, c);
                    }
                    _ => {
                        let zero = self.const_idx(Constant::Int(0));
                        self.op(op::PUSH_C, zero);
                        self.expr(operand)?;
                        self.op(op::SUB, 0);
                    }
                }
                Ok(())
            }
            Expr::UnaryNot(operand) => {
                self.expr(operand)?;
                let jf = self.here();
                self.op(op::JMP_FALSE, 0);
                let f = self.const_idx(Constant::Bool(false));
                self.op(op::PUSH_C, f);
                let jend = self.here();
                self.op(op::JMP, 0);
                self.patch(jf, self.here())?;
                let t = self.const_idx(Constant::Bool(true));
                self.op(op::PUSH_C, t);
                self.patch(jend, self.here())?;
                Ok(())
            }
            Expr::Call {
                name,
                args,
                kwargs,
                line,
            } => self.call(name, args, kwargs, *line),
            Expr::MethodCall {
                obj,
                method,
                args,
                ..
            } => {
                self.expr(obj)?;
                for a in args {
                    self.expr(a)?;
                }
                let name_c = self.str_const(method);
                self.op(op::PUSH_C, name_c);
                let count_c = self.const_idx(Constant::Int(args.len() as i64));
                self.op(op::PUSH_C, count_c);
                self.op(op::SYSCALL, host::METHOD_CALL);
                Ok(())
            }
            Expr::Attribute { obj, attr } => {
                self.expr(obj)?;
                let c = self.str_const(attr);
                self.op(op::PUSH_C, c);
                self.op(op::SYSCALL, host::GET_FIELD);
                Ok(())
            }
            Expr::Index { obj, index } => {
                self.expr(obj)?;
                self.expr(index)?;
                self.op(op::SYSCALL, host::GET_ITEM);
                Ok(())
            }
            Expr::Slice {
                obj,
                lower,
                upper,
                step,
            } => {
                self.expr(obj)?;
                for part in [lower, upper, step] {
                    match part {
                        Some(p) => self.expr(p)?,
                        None => {
                            let void = self.void_const();
                            self.op(op::PUSH_C, void);
                        }
                    }
                }
                self.op(op::SYSCALL, host::SLICE);
                Ok(())
            }
            Expr::ListDisplay(elts) => {
                for e in elts {
                    self.expr(e)?;
                }
                let count = self.const_idx(Constant::Int(elts.len() as i64));
                self.op(op::PUSH_C, count);
                self.op(op::SYSCALL, host::MAKE_LIST);
                Ok(())
            }
            Expr::TupleDisplay(elts) => {
                for e in elts {
                    self.expr(e)?;
                }
                let count = self.const_idx(Constant::Int(elts.len() as i64));
                self.op(op::PUSH_C, count);
                self.op(op::SYSCALL, host::MAKE_TUPLE);
                Ok(())
            }
            Expr::DictDisplay(pairs) => {
                self.op(op::SYSCALL, host::DICT);
                for (k, v) in pairs {
                    self.op(op::DUP, 0);
                    self.expr(k)?;
                    self.expr(v)?;
                    self.op(op::SYSCALL, host::SET_ITEM);
                }
                Ok(())
            }
            Expr::ListComp {
                elt,
                var,
                iter,
                ifs,
                line,
            } => {
                let zero = self.const_idx(Constant::Int(0));
                self.op(op::PUSH_C, zero);
                self.op(op::SYSCALL, host::MAKE_LIST);
                self.expr(iter)?;
                self.op(op::SYSCALL, host::ITER);
                let start = self.here();
                self.op(op::SYSCALL, host::HAS_NEXT);
                let jf_end = self.here();
                self.op(op::JMP_FALSE, 0);
                self.op(op::DUP, 0);
                self.op(op::SYSCALL, host::NEXT);
                let slot = self.local_idx(var, *line)?;
                self.op(op::POP_L, slot);
                let mut cond_jumps = Vec::new();
                for cond in ifs {
                    self.expr(cond)?;
                    cond_jumps.push(self.here());
                    self.op(op::JMP_FALSE, 0);
                }
                self.op(op::DUP, 1);
                self.expr(elt)?;
                let append = self.str_const("append");
                self.op(op::PUSH_C, append);
                let one = self.const_idx(Constant::Int(1));
                self.op(op::PUSH_C, one);
                self.op(op::SYSCALL, host::METHOD_CALL);
                self.op(op::DROP, 0);
                for at in cond_jumps {
                    self.patch(at, self.here())?;
                }
                self.op(op::JMP, start as u32);
                self.patch(jf_end, self.here())?;
                self.op(op::DROP, 0);
                Ok(())
            }
            Expr::Lambda { params, body, line } => {
                if params.len() > MAX_LOCALS {
                    return Err(CompileError::TooManyLocals {
                        line: *line,
                        limit: MAX_LOCALS,
                    });
                }
                let name = format!("__lambda_{}", self.lambda_count);
                self.lambda_count += 1;
                let jmp_over = self.here();
                self.op(op::JMP, 0);
                self.functions.insert(
                    name.clone(),
                    FuncInfo {
                        addr: self.here(),
                        params: params.clone(),
                    },
                );
                let saved_locals = std::mem::take(&mut self.locals);
                let saved_order = std::mem::take(&mut self.local_order);
                for (i, p) in params.iter().enumerate() {
                    self.locals.insert(p.clone(), i);
                    self.local_order.push(p.clone());
                }
                self.expr(body)?;
                self.op(op::RET, 0);
                self.locals = saved_locals;
                self.local_order = saved_order;
                self.patch(jmp_over, self.here())?;
                let c = self.str_const(&name);
                self.op(op::PUSH_C, c);
                Ok(())
            }
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        line: usize,
    ) -> Result<(), CompileError> {
        if let Some(sig) = signature(name) {
            for (i, a) in args.iter().enumerate() {
                // `isinstance(x, int)` names the type bare; it travels as
                // a type-name string.
                if name == "isinstance" && i == 1 {
                    if let Expr::Name(t) = a {
                        if is_type_name(t) {
                            let c = self.str_const(t);
                            self.op(op::PUSH_C, c);
                            continue;
                        }
                    }
                }
                self.expr(a)?;
            }
            if matches!(sig.arity, Arity::Variadic { .. }) {
                let count = self.const_idx(Constant::Int(args.len() as i64));
                self.op(op::PUSH_C, count);
            }
            self.op(op::SYSCALL, sig.host);
            return Ok(());
        }

        let info = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownFunction {
                line,
                name: name.to_string(),
            })?;
        if kwargs.is_empty() {
            for a in args {
                self.expr(a)?;
            }
        } else {
            let mut provided: HashMap<&str, &Expr> = HashMap::new();
            for (i, a) in args.iter().enumerate() {
                if i < info.params.len() {
                    provided.insert(info.params[i].as_str(), a);
                }
            }
            for (k, v) in kwargs {
                provided.insert(k.as_str(), v);
            }
            for p in &info.params {
                let arg = provided
                    .get(p.as_str())
                    .copied()
                    .ok_or_else(|| CompileError::Arity {
                        line,
                        word: name.to_string(),
                        expected: format!("argument '{}'", p),
                        got: args.len() + kwargs.len(),
                    })?;
                self.expr(arg)?;
            }
        }
        if info.addr >= 1 << 16 {
            return Err(CompileError::TooLarge(format!(
                "function '{}' at address {} exceeds the CALL encoding",
                name, info.addr
            )));
        }
        self.op(
            op::CALL,
            bytecode::encode_call(info.addr as u32, info.params.len() as u32),
        );
        Ok(())
    }
}

fn binop_opcode(b: BinOp) -> u8 {
    match b {
        BinOp::Add => op::ADD,
        BinOp::Sub => op::SUB,
        BinOp::Mul => op::MUL,
        BinOp::Div => op::DIV,
        BinOp::FloorDiv => op::FLOOR_DIV,
        BinOp::Mod => op::MOD,
        BinOp::Pow => op::POW,
        BinOp::BitAnd => op::BIT_AND,
        BinOp::BitOr => op::BIT_OR,
        BinOp::BitXor => op::BIT_XOR,
        BinOp::Shl => op::LSHIFT,
        BinOp::Shr => op::RSHIFT,
    }
}

fn is_type_name(s: &str) -> bool {
    matches!(
        s,
        "int" | "float" | "str" | "bool" | "list" | "dict" | "tuple" | "set"
    )
}
