//! AST for the restricted scripting language.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None_,
    Name(String),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        line: usize,
    },
    MethodCall {
        obj: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        line: usize,
    },
    Attribute {
        obj: Box<Expr>,
        attr: String,
    },
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        obj: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    ListDisplay(Vec<Expr>),
    TupleDisplay(Vec<Expr>),
    DictDisplay(Vec<(Expr, Expr)>),
    ListComp {
        elt: Box<Expr>,
        var: String,
        iter: Box<Expr>,
        ifs: Vec<Expr>,
        line: usize,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
        line: usize,
    },
}

/// Assignment targets.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Subscript { obj: Expr, index: Expr },
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        target: Target,
        value: Expr,
        line: usize,
    },
    AugAssign {
        name: String,
        op: BinOp,
        value: Expr,
        line: usize,
    },
    Expr {
        value: Expr,
        line: usize,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        line: usize,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    /// `with scope(NAME, token):` — the capability gate.
    With {
        scope: Expr,
        token: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    FuncDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        line: usize,
    },
    Return {
        value: Option<Expr>,
        line: usize,
    },
    Break {
        line: usize,
    },
    Continue {
        line: usize,
    },
    Pass {
        line: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}
