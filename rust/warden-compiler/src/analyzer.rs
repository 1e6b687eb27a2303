//! Compile-time safety checks: the stack-effect tracker and the
//! capability-scope validator.
//!
//! The analyzer replays the emitter's instruction order against a virtual
//! stack-depth counter and a stack of open capability scopes. By the time
//! bytecode is emitted, two classes of generated-code defects are
//! impossible: data produced but never consumed (floating state), and a
//! gated word invoked outside a matching `with scope(...)` region.

use crate::ast::*;
use crate::error::CompileError;
use crate::words::{signature, Arity};
use std::collections::HashMap;

pub fn analyze(module: &Module) -> Result<(), CompileError> {
    let mut a = Analyzer::default();
    for stmt in &module.body {
        a.stmt(stmt)?;
        if a.depth != 0 {
            return Err(CompileError::FloatingState {
                line: stmt_line(stmt),
                depth: a.depth,
            });
        }
    }
    Ok(())
}

fn stmt_line(s: &Stmt) -> usize {
    match s {
        Stmt::Assign { line, .. }
        | Stmt::AugAssign { line, .. }
        | Stmt::Expr { line, .. }
        | Stmt::If { line, .. }
        | Stmt::While { line, .. }
        | Stmt::For { line, .. }
        | Stmt::With { line, .. }
        | Stmt::FuncDef { line, .. }
        | Stmt::Return { line, .. }
        | Stmt::Break { line }
        | Stmt::Continue { line }
        | Stmt::Pass { line } => *line,
    }
}

#[derive(Default)]
struct Analyzer {
    depth: i64,
    scopes: Vec<String>,
    /// Declared functions, name → parameter list. Populated in program
    /// order; calling a function before its definition is an error.
    functions: HashMap<String, Vec<String>>,
    in_function: bool,
    loop_depth: usize,
}

impl Analyzer {
    fn pop_n(&mut self, n: i64, word: &str, line: usize) -> Result<(), CompileError> {
        self.depth -= n;
        if self.depth < 0 {
            return Err(CompileError::StackUnderflow {
                line,
                word: word.to_string(),
            });
        }
        Ok(())
    }

    fn has_scope(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s == name)
    }

    fn stmt(&mut self, s: &Stmt) -> Result<(), CompileError> {
        match s {
            Stmt::Assign {
                target,
                value,
                line,
            } => self.assign(target, value, *line),
            Stmt::AugAssign { value, line, .. } => {
                self.depth += 1; // current value of the target
                let before = self.depth;
                self.expr(value, *line)?;
                if self.depth == before {
                    return Err(CompileError::StackUnderflow {
                        line: *line,
                        word: "augmented assignment".to_string(),
                    });
                }
                self.pop_n(2, "augmented assignment", *line)?;
                self.depth += 1; // operator result
                self.pop_n(1, "augmented assignment", *line)?;
                Ok(())
            }
            Stmt::Expr { value, line } => {
                let before = self.depth;
                self.expr(value, *line)?;
                let produced = self.depth - before;
                if produced == 0 {
                    return Ok(());
                }
                // Calls are how scripts express effects (mutation, user
                // functions); their unused result gets an implicit drop.
                // Anything else left on the stack is floating state.
                let droppable = matches!(value, Expr::MethodCall { .. })
                    || matches!(value, Expr::Call { name, .. } if signature(name).is_none());
                if produced == 1 && droppable {
                    self.depth -= 1;
                    return Ok(());
                }
                Err(CompileError::FloatingState {
                    line: *line,
                    depth: produced,
                })
            }
            Stmt::If {
                test,
                body,
                orelse,
                line,
            } => {
                self.expr(test, *line)?;
                self.pop_n(1, "if", *line)?;
                for s in body {
                    self.stmt(s)?;
                }
                for s in orelse {
                    self.stmt(s)?;
                }
                Ok(())
            }
            Stmt::While { test, body, line } => {
                self.expr(test, *line)?;
                self.pop_n(1, "while", *line)?;
                self.loop_depth += 1;
                for s in body {
                    self.stmt(s)?;
                }
                self.loop_depth -= 1;
                Ok(())
            }
            Stmt::For {
                target,
                iter,
                body,
                line,
            } => {
                self.expr(iter, *line)?;
                // iter() transforms in place; has_next pushes the guard.
                self.depth += 1;
                self.pop_n(1, "for", *line)?;
                // dup iterator, next() swaps it for the element.
                self.depth += 1;
                self.bind_loop_target(target, *line)?;
                self.loop_depth += 1;
                for s in body {
                    self.stmt(s)?;
                }
                self.loop_depth -= 1;
                // Loop exit drops the iterator.
                self.pop_n(1, "for", *line)?;
                Ok(())
            }
            Stmt::With {
                scope,
                token,
                body,
                line,
            } => {
                let name = match scope {
                    Expr::Str(s) => s.clone(),
                    _ => {
                        return Err(CompileError::Syntax {
                            line: *line,
                            message: "scope name must be a string literal".to_string(),
                        })
                    }
                };
                self.expr(scope, *line)?;
                self.expr(token, *line)?;
                self.pop_n(2, "scope", *line)?;
                self.scopes.push(name);
                for s in body {
                    self.stmt(s)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::FuncDef {
                name,
                params,
                body,
                line,
            } => {
                // Registered before the body so recursion resolves.
                self.functions.insert(name.clone(), params.clone());
                let saved_depth = self.depth;
                let saved_in_function = self.in_function;
                let saved_loop_depth = self.loop_depth;
                self.depth = 0;
                self.in_function = true;
                self.loop_depth = 0;
                for s in body {
                    self.stmt(s)?;
                }
                if self.depth != 0 {
                    return Err(CompileError::FloatingState {
                        line: *line,
                        depth: self.depth,
                    });
                }
                self.depth = saved_depth;
                self.in_function = saved_in_function;
                self.loop_depth = saved_loop_depth;
                Ok(())
            }
            Stmt::Return { value, line } => {
                if !self.in_function {
                    return Err(CompileError::Syntax {
                        line: *line,
                        message: "'return' outside a function".to_string(),
                    });
                }
                match value {
                    Some(v) => self.expr(v, *line)?,
                    None => self.depth += 1, // implicit None
                }
                self.pop_n(1, "return", *line)
            }
            Stmt::Break { line } | Stmt::Continue { line } => {
                if self.loop_depth == 0 {
                    return Err(CompileError::Syntax {
                        line: *line,
                        message: "loop control statement outside a loop".to_string(),
                    });
                }
                Ok(())
            }
            Stmt::Pass { .. } => Ok(()),
        }
    }

    fn assign(&mut self, target: &Target, value: &Expr, line: usize) -> Result<(), CompileError> {
        match target {
            Target::Name(_) => {
                let before = self.depth;
                self.expr(value, line)?;
                if self.depth == before {
                    // e.g. `x = print(...)`: the source produces nothing.
                    return Err(CompileError::StackUnderflow {
                        line,
                        word: "assignment".to_string(),
                    });
                }
                self.pop_n(1, "assignment", line)
            }
            Target::Subscript { obj, index } => {
                self.expr(obj, line)?;
                self.expr(index, line)?;
                let before = self.depth;
                self.expr(value, line)?;
                if self.depth == before {
                    return Err(CompileError::StackUnderflow {
                        line,
                        word: "assignment".to_string(),
                    });
                }
                self.pop_n(3, "item assignment", line)
            }
            Target::Tuple(targets) => {
                for t in targets {
                    if !matches!(t, Target::Name(_)) {
                        return Err(CompileError::Syntax {
                            line,
                            message: "unpacking targets must be plain names".to_string(),
                        });
                    }
                }
                let before = self.depth;
                self.expr(value, line)?;
                if self.depth == before {
                    return Err(CompileError::StackUnderflow {
                        line,
                        word: "assignment".to_string(),
                    });
                }
                self.pop_n(1, "assignment", line)?;
                // Per element: push tmp, push index, get_item, pop into name.
                for _ in targets {
                    self.depth += 2;
                    self.pop_n(2, "unpacking", line)?;
                    self.depth += 1;
                    self.pop_n(1, "unpacking", line)?;
                }
                Ok(())
            }
        }
    }

    fn bind_loop_target(&mut self, target: &Target, line: usize) -> Result<(), CompileError> {
        match target {
            Target::Name(_) => self.pop_n(1, "for", line),
            Target::Tuple(names) => {
                self.pop_n(1, "for", line)?;
                for _ in names {
                    self.depth += 2;
                    self.pop_n(2, "unpacking", line)?;
                    self.depth += 1;
                    self.pop_n(1, "unpacking", line)?;
                }
                Ok(())
            }
            Target::Subscript { .. } => Err(CompileError::Syntax {
                line,
                message: "loop targets must be plain names".to_string(),
            }),
        }
    }

    fn expr(&mut self, e: &Expr, line: usize) -> Result<(), CompileError> {
        match e {
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None_ => {
                self.depth += 1;
                Ok(())
            }
            Expr::Name(_) => {
                self.depth += 1;
                Ok(())
            }
            Expr::BinOp { op, left, right } => {
                self.expr(left, line)?;
                self.expr(right, line)?;
                self.pop_n(2, binop_word(*op), line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::BoolOp { left, right, .. } => {
                self.expr(left, line)?;
                self.expr(right, line)?;
                self.pop_n(2, "boolean operator", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::Compare { left, right, .. } => {
                self.expr(left, line)?;
                self.expr(right, line)?;
                self.pop_n(2, "comparison", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::UnaryNeg(operand) => {
                self.depth += 1; // zero
                self.expr(operand, line)?;
                self.pop_n(2, "negation", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::UnaryNot(operand) => {
                self.expr(operand, line)?;
                self.pop_n(1, "not", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::Call {
                name,
                args,
                kwargs,
                line: call_line,
            } => self.call(name, args, kwargs, *call_line),
            Expr::MethodCall {
                obj,
                args,
                line: call_line,
                ..
            } => {
                self.expr(obj, *call_line)?;
                for a in args {
                    self.expr(a, *call_line)?;
                }
                self.depth += 2; // method name, argument count
                self.pop_n(args.len() as i64 + 3, "method call", *call_line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::Attribute { obj, .. } => {
                self.expr(obj, line)?;
                self.depth += 1; // field name
                self.pop_n(2, "attribute access", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::Index { obj, index } => {
                self.expr(obj, line)?;
                self.expr(index, line)?;
                self.pop_n(2, "subscript", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::Slice {
                obj,
                lower,
                upper,
                step,
            } => {
                self.expr(obj, line)?;
                for part in [lower, upper, step] {
                    match part {
                        Some(p) => self.expr(p, line)?,
                        None => self.depth += 1, // implicit None
                    }
                }
                self.pop_n(4, "slice", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::ListDisplay(elts) | Expr::TupleDisplay(elts) => {
                for e in elts {
                    self.expr(e, line)?;
                }
                self.depth += 1; // element count
                self.pop_n(elts.len() as i64 + 1, "display", line)?;
                self.depth += 1;
                Ok(())
            }
            Expr::DictDisplay(pairs) => {
                self.depth += 1; // fresh dict
                for (k, v) in pairs {
                    self.depth += 1; // dup
                    self.expr(k, line)?;
                    self.expr(v, line)?;
                    self.pop_n(3, "dict display", line)?;
                }
                Ok(())
            }
            Expr::ListComp {
                elt,
                iter,
                ifs,
                line: comp_line,
                ..
            } => {
                self.depth += 1; // result list
                self.expr(iter, *comp_line)?;
                // iterator guard + element binding, one round
                self.depth += 1;
                self.pop_n(1, "comprehension", *comp_line)?;
                self.depth += 1;
                self.pop_n(1, "comprehension", *comp_line)?;
                for cond in ifs {
                    self.expr(cond, *comp_line)?;
                    self.pop_n(1, "comprehension", *comp_line)?;
                }
                self.depth += 1; // dup of the list
                self.expr(elt, *comp_line)?;
                self.depth += 2; // "append", count
                self.pop_n(4, "comprehension", *comp_line)?;
                self.depth += 1; // append result
                self.pop_n(1, "comprehension", *comp_line)?;
                // loop exit drops the iterator
                self.pop_n(1, "comprehension", *comp_line)?;
                Ok(())
            }
            Expr::Lambda {
                body,
                line: lambda_line,
                ..
            } => {
                let saved_depth = self.depth;
                let saved_in_function = self.in_function;
                self.depth = 0;
                self.in_function = true;
                self.expr(body, *lambda_line)?;
                if self.depth != 1 {
                    return Err(CompileError::FloatingState {
                        line: *lambda_line,
                        depth: self.depth,
                    });
                }
                self.depth = saved_depth;
                self.in_function = saved_in_function;
                self.depth += 1; // lambda reference
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
            if !kwargs.is_empty() {
                return Err(CompileError::Syntax {
                    line,
                    message: format!("'{}' does not take keyword arguments", name),
                });
            }
            match sig.arity {
                Arity::Fixed(n) => {
                    if args.len() != n as usize {
                        return Err(CompileError::Arity {
                            line,
                            word: name.to_string(),
                            expected: n.to_string(),
                            got: args.len(),
                        });
                    }
                }
                Arity::Variadic { min, max } => {
                    if args.len() < min as usize || args.len() > max as usize {
                        return Err(CompileError::Arity {
                            line,
                            word: name.to_string(),
                            expected: format!("{}..{}", min, max),
                            got: args.len(),
                        });
                    }
                }
            }
            for a in args {
                self.expr(a, line)?;
            }
            let mut consumed = args.len() as i64;
            if matches!(sig.arity, Arity::Variadic { .. }) {
                self.depth += 1; // argument count
                consumed += 1;
            }
            self.pop_n(consumed, name, line)?;
            // The compile-time capability check: a gated word must be
            // dominated by an open scope of the required name.
            if let Some(scope) = sig.required_scope {
                if !self.has_scope(scope) {
                    return Err(CompileError::Capability {
                        line,
                        word: name.to_string(),
                        scope: scope.to_string(),
                        active: self.scopes.clone(),
                    });
                }
            }
            self.depth += i64::from(sig.out);
            return Ok(());
        }

        if let Some(params) = self.functions.get(name).cloned() {
            if kwargs.is_empty() {
                if args.len() != params.len() {
                    return Err(CompileError::Arity {
                        line,
                        word: name.to_string(),
                        expected: params.len().to_string(),
                        got: args.len(),
                    });
                }
                for a in args {
                    self.expr(a, line)?;
                }
            } else {
                let mut provided: HashMap<&str, &Expr> = HashMap::new();
                for (i, a) in args.iter().enumerate() {
                    if i < params.len() {
                        provided.insert(params[i].as_str(), a);
                    }
                }
                for (k, v) in kwargs {
                    if !params.iter().any(|p| p == k) {
                        return Err(CompileError::Arity {
                            line,
                            word: name.to_string(),
                            expected: format!("parameters {:?}", params),
                            got: args.len() + kwargs.len(),
                        });
                    }
                    provided.insert(k.as_str(), v);
                }
                for p in &params {
                    let arg = provided.get(p.as_str()).copied().ok_or_else(|| {
                        CompileError::Arity {
                            line,
                            word: name.to_string(),
                            expected: format!("argument '{}'", p),
                            got: args.len() + kwargs.len(),
                        }
                    })?;
                    self.expr(arg, line)?;
                }
            }
            self.pop_n(params.len() as i64, name, line)?;
            self.depth += 1;
            return Ok(());
        }

        Err(CompileError::UnknownFunction {
            line,
            name: name.to_string(),
        })
    }
}

fn binop_word(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}
