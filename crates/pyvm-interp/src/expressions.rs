//! The tree the evaluator walks, produced from the ruff AST by [`crate::parse`].
//!
//! Only the supported subset of Python is representable here; everything else is
//! refused while parsing, before any code runs.

use std::rc::Rc;

use num_bigint::BigInt;
use strum::Display;

/// A statement and the (1-based) source line it starts on.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub line: usize,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Expr(Expr),
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: Operator,
        value: Expr,
    },
    Delete(Vec<Target>),
    /// `elif` chains are folded into nested `If`s in `orelse`.
    If {
        test: Expr,
        body: Vec<Node>,
        orelse: Vec<Node>,
    },
    While {
        test: Expr,
        body: Vec<Node>,
        orelse: Vec<Node>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Node>,
        orelse: Vec<Node>,
    },
    Break,
    Continue,
    Pass,
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Node>,
        handlers: Vec<Handler>,
        orelse: Vec<Node>,
        finally: Vec<Node>,
    },
    Import(Vec<ImportAlias>),
    ImportFrom {
        module: String,
        names: Vec<ImportAlias>,
    },
}

/// One `except` clause.
#[derive(Debug, Clone)]
pub(crate) struct Handler {
    pub line: usize,
    pub exc_type: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) struct ImportAlias {
    pub name: String,
    pub asname: Option<String>,
}

impl ImportAlias {
    /// The name bound in the importing scope.
    pub(crate) fn binding(&self) -> &str {
        self.asname.as_deref().unwrap_or(&self.name)
    }
}

/// Something that can be assigned to or deleted.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Name(String),
    Subscript { object: Box<Expr>, index: Box<Expr> },
    Attr { object: Box<Expr>, attr: String },
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// `*expr` inside a call or a list/tuple display.
    Starred(Box<Expr>),
    FString(Vec<FStringPart>),
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// `left op0 c0 op1 c1 ...`, each link evaluated lazily.
    Compare {
        left: Box<Expr>,
        links: Vec<(CmpOperator, Expr)>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attr {
        object: Box<Expr>,
        attr: String,
    },
    Subscript {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Literal {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
}

#[derive(Debug, Clone)]
pub(crate) enum FStringPart {
    Literal(String),
    Interpolation {
        expr: Expr,
        conversion: Conversion,
        /// The `expr=` text of a self-documenting `{expr=}`.
        debug_prefix: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Conversion {
    None,
    Str,
    Repr,
}

/// Binary operators, displayed as their Python symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mult,
    #[strum(serialize = "@")]
    MatMult,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "** or pow()")]
    Pow,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "&")]
    BitAnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum CmpOperator {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum UnaryOperator {
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "unary -")]
    Neg,
    #[strum(serialize = "unary +")]
    Pos,
    #[strum(serialize = "unary ~")]
    Invert,
}
