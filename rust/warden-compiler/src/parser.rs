//! Recursive-descent parser producing the module AST.

use crate::ast::*;
use crate::error::CompileError;
use crate::tokens::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_module(&mut self) -> Result<Module, CompileError> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            body.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(Module { body })
    }

    // -- Token helpers --

    fn current(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> TokenKind {
        let t = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), CompileError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected {}, found {:?}", what, self.current())))
        }
    }

    fn syntax(&self, message: String) -> CompileError {
        CompileError::Syntax {
            line: self.line(),
            message,
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, CompileError> {
        match self.current().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.syntax(format!("expected {}, found {:?}", what, other))),
        }
    }

    // -- Statements --

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        match self.current() {
            TokenKind::Def => self.parse_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::With => self.parse_with(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Newline) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Newline, "end of line")?;
                Ok(Stmt::Return { value, line })
            }
            TokenKind::Break => {
                self.advance();
                self.expect(&TokenKind::Newline, "end of line")?;
                Ok(Stmt::Break { line })
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(&TokenKind::Newline, "end of line")?;
                Ok(Stmt::Continue { line })
            }
            TokenKind::Pass => {
                self.advance();
                self.expect(&TokenKind::Newline, "end of line")?;
                Ok(Stmt::Pass { line })
            }
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(&TokenKind::Colon, "':'")?;
        self.expect(&TokenKind::Newline, "a newline after ':'")?;
        self.skip_newlines();
        self.expect(&TokenKind::Indent, "an indented block")?;
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
            body.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        self.expect(&TokenKind::Dedent, "the end of the block")?;
        Ok(body)
    }

    fn parse_def(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance(); // def
        let name = self.expect_ident("a function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident("a parameter name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::FuncDef {
            name,
            params,
            body,
            line,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance(); // if / elif
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        let orelse = if self.check(&TokenKind::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            test,
            body,
            orelse,
            line,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { test, body, line })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance();
        let mut names = vec![self.expect_ident("a loop variable")?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident("a loop variable")?);
        }
        let target = if names.len() == 1 {
            Target::Name(names.pop().unwrap())
        } else {
            Target::Tuple(names.into_iter().map(Target::Name).collect())
        };
        self.expect(&TokenKind::In, "'in'")?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            line,
        })
    }

    fn parse_with(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance();
        let gate = self.expect_ident("'scope'")?;
        if gate != "scope" {
            return Err(self.syntax(format!(
                "with expects scope(NAME, token), found '{}'",
                gate
            )));
        }
        self.expect(&TokenKind::LParen, "'('")?;
        let scope = self.parse_expr()?;
        self.expect(&TokenKind::Comma, "','")?;
        let token = self.parse_expr()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::With {
            scope,
            token,
            body,
            line,
        })
    }

    /// `try:` compiles its happy-path body inline; `except` clauses are
    /// parsed for syntax but discarded — the VM has no exception handling.
    fn parse_try(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.advance();
        let body = self.parse_block()?;
        self.skip_newlines();
        while self.check(&TokenKind::Except) {
            self.advance();
            if !self.check(&TokenKind::Colon) {
                self.parse_expr()?;
                if let TokenKind::Ident(kw) = self.current().clone() {
                    if kw == "as" {
                        self.advance();
                        self.expect_ident("an exception name")?;
                    }
                }
            }
            let _ = self.parse_block()?;
            self.skip_newlines();
        }
        // Re-wrap as an If over a constant-true test so downstream passes
        // see one plain block.
        Ok(Stmt::If {
            test: Expr::Bool(true),
            body,
            orelse: Vec::new(),
            line,
        })
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }

        if self.eat(&TokenKind::Assign) {
            let mut values = vec![self.parse_expr()?];
            while self.eat(&TokenKind::Comma) {
                values.push(self.parse_expr()?);
            }
            let value = if values.len() == 1 {
                values.pop().unwrap()
            } else {
                Expr::TupleDisplay(values)
            };
            let target = self.exprs_to_target(exprs, line)?;
            self.expect(&TokenKind::Newline, "end of line")?;
            return Ok(Stmt::Assign {
                target,
                value,
                line,
            });
        }

        let aug = match self.current() {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            if exprs.len() != 1 {
                return Err(self.syntax("augmented assignment needs a single target".to_string()));
            }
            let name = match exprs.pop().unwrap() {
                Expr::Name(n) => n,
                _ => {
                    return Err(
                        self.syntax("augmented assignment target must be a name".to_string())
                    )
                }
            };
            self.advance();
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Newline, "end of line")?;
            return Ok(Stmt::AugAssign {
                name,
                op,
                value,
                line,
            });
        }

        let value = if exprs.len() == 1 {
            exprs.pop().unwrap()
        } else {
            Expr::TupleDisplay(exprs)
        };
        self.expect(&TokenKind::Newline, "end of line")?;
        Ok(Stmt::Expr { value, line })
    }

    fn exprs_to_target(&self, mut exprs: Vec<Expr>, line: usize) -> Result<Target, CompileError> {
        if exprs.len() == 1 {
            self.expr_to_target(exprs.pop().unwrap(), line)
        } else {
            let targets = exprs
                .into_iter()
                .map(|e| self.expr_to_target(e, line))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Target::Tuple(targets))
        }
    }

    fn expr_to_target(&self, e: Expr, line: usize) -> Result<Target, CompileError> {
        match e {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Index { obj, index } => Ok(Target::Subscript {
                obj: *obj,
                index: *index,
            }),
            Expr::TupleDisplay(elts) => {
                let targets = elts
                    .into_iter()
                    .map(|e| self.expr_to_target(e, line))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Target::Tuple(targets))
            }
            _ => Err(CompileError::Syntax {
                line,
                message: "cannot assign to this expression".to_string(),
            }),
        }
    }

    // -- Expressions, lowest to highest precedence --

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOpKind::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOpKind::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, CompileError> {
        // `not in` belongs to comparison, not to unary not.
        if self.check(&TokenKind::Not) && self.peek() != &TokenKind::In {
            self.advance();
            return Ok(Expr::UnaryNot(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.current() {
            TokenKind::Eq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::LtEq => CmpOp::LtEq,
            TokenKind::GtEq => CmpOp::GtEq,
            TokenKind::In => CmpOp::In,
            TokenKind::Not if self.peek() == &TokenKind::In => {
                self.advance();
                self.advance();
                return Some(CmpOp::NotIn);
            }
            TokenKind::Is => {
                self.advance();
                if self.eat(&TokenKind::Not) {
                    return Some(CmpOp::IsNot);
                }
                return Some(CmpOp::Is);
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_bitor()?;
        if let Some(op) = self.comparison_op() {
            let right = self.parse_bitor()?;
            if matches!(
                self.current(),
                TokenKind::Eq
                    | TokenKind::NotEq
                    | TokenKind::Lt
                    | TokenKind::Gt
                    | TokenKind::LtEq
                    | TokenKind::GtEq
                    | TokenKind::In
                    | TokenKind::Is
            ) {
                return Err(self.syntax("chained comparisons are not supported".to_string()));
            }
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_bitxor()?;
        while self.eat(&TokenKind::Pipe) {
            let right = self.parse_bitxor()?;
            left = Expr::BinOp {
                op: BinOp::BitOr,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_bitand()?;
        while self.eat(&TokenKind::Caret) {
            let right = self.parse_bitand()?;
            left = Expr::BinOp {
                op: BinOp::BitXor,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_shift()?;
        while self.eat(&TokenKind::Amp) {
            let right = self.parse_shift()?;
            left = Expr::BinOp {
                op: BinOp::BitAnd,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.current() {
                TokenKind::Shl => BinOp::Shl,
                TokenKind::Shr => BinOp::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_arith()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::UnaryNeg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::DoubleStar) {
            // Right-associative.
            let exp = self.parse_unary()?;
            return Ok(Expr::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exp),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut e = self.parse_atom()?;
        loop {
            if self.check(&TokenKind::LParen) {
                let line = self.line();
                self.advance();
                let (args, kwargs) = self.parse_call_args()?;
                e = match e {
                    Expr::Name(name) => Expr::Call {
                        name,
                        args,
                        kwargs,
                        line,
                    },
                    Expr::Attribute { obj, attr } => {
                        if !kwargs.is_empty() {
                            return Err(CompileError::Syntax {
                                line,
                                message: "method calls do not take keyword arguments".to_string(),
                            });
                        }
                        Expr::MethodCall {
                            obj,
                            method: attr,
                            args,
                            line,
                        }
                    }
                    _ => {
                        return Err(CompileError::Syntax {
                            line,
                            message: "this expression is not callable".to_string(),
                        })
                    }
                };
            } else if self.eat(&TokenKind::Dot) {
                let attr = self.expect_ident("an attribute name")?;
                e = Expr::Attribute {
                    obj: Box::new(e),
                    attr,
                };
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                e = self.parse_subscript(e)?;
            } else {
                break;
            }
        }
        Ok(e)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), CompileError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                if let TokenKind::Ident(name) = self.current().clone() {
                    if self.peek() == &TokenKind::Assign {
                        self.advance();
                        self.advance();
                        kwargs.push((name, self.parse_expr()?));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        continue;
                    }
                }
                if !kwargs.is_empty() {
                    return Err(
                        self.syntax("positional argument after keyword argument".to_string())
                    );
                }
                args.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self, obj: Expr) -> Result<Expr, CompileError> {
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if self.eat(&TokenKind::RBracket) {
            let index = lower
                .ok_or_else(|| self.syntax("empty subscript".to_string()))?;
            return Ok(Expr::Index {
                obj: Box::new(obj),
                index,
            });
        }
        self.expect(&TokenKind::Colon, "':' or ']'")?;
        let upper = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat(&TokenKind::Colon) {
            if self.check(&TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::Slice {
            obj: Box::new(obj),
            lower,
            upper,
            step,
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        match self.current().clone() {
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(Expr::Int(n))
            }
            TokenKind::FloatLit(f) => {
                self.advance();
                Ok(Expr::Float(f))
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::None_ => {
                self.advance();
                Ok(Expr::None_)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            TokenKind::Lambda => {
                self.advance();
                let mut params = Vec::new();
                if !self.check(&TokenKind::Colon) {
                    loop {
                        params.push(self.expect_ident("a parameter name")?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::Colon, "':'")?;
                let body = self.parse_expr()?;
                Ok(Expr::Lambda {
                    params,
                    body: Box::new(body),
                    line,
                })
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::TupleDisplay(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.check(&TokenKind::Comma) {
                    let mut elts = vec![first];
                    while self.eat(&TokenKind::Comma) {
                        if self.check(&TokenKind::RParen) {
                            break;
                        }
                        elts.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RParen, "')'")?;
                    return Ok(Expr::TupleDisplay(elts));
                }
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(first)
            }
            TokenKind::LBracket => {
                self.advance();
                if self.eat(&TokenKind::RBracket) {
                    return Ok(Expr::ListDisplay(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.check(&TokenKind::For) {
                    self.advance();
                    let var = self.expect_ident("a comprehension variable")?;
                    self.expect(&TokenKind::In, "'in'")?;
                    let iter = self.parse_expr()?;
                    let mut ifs = Vec::new();
                    while self.eat(&TokenKind::If) {
                        ifs.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        var,
                        iter: Box::new(iter),
                        ifs,
                        line,
                    });
                }
                let mut elts = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.check(&TokenKind::RBracket) {
                        break;
                    }
                    elts.push(self.parse_expr()?);
                }
                self.expect(&TokenKind::RBracket, "']'")?;
                Ok(Expr::ListDisplay(elts))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect(&TokenKind::Colon, "':'")?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        if self.check(&TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::DictDisplay(pairs))
            }
            other => Err(self.syntax(format!("unexpected token {:?}", other))),
        }
    }
}
