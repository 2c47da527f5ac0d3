//! AST nodes for the expression language
//!
//! Every node carries a [`SourceSpan`] into the *template* source for
//! precise error reporting. The AST is parsed once and evaluated many times.

use miette::SourceSpan;

/// Create a span from offset and length
pub fn span(offset: usize, len: usize) -> SourceSpan {
    SourceSpan::new(offset.into(), len)
}

/// An expression
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal value
    Literal(Literal),
    /// Variable reference
    Var(Ident),
    /// Field access: expr.field
    Field(FieldExpr),
    /// Index access: `expr[index]`
    Index(IndexExpr),
    /// Filter application: expr | filter
    Filter(FilterExpr),
    /// Binary operation: expr op expr
    Binary(BinaryExpr),
    /// Unary operation: op expr
    Unary(UnaryExpr),
    /// Function or fragment call: func(args)
    Call(CallExpr),
    /// Ternary: expr if cond else expr
    Ternary(TernaryExpr),
}

impl Expr {
    pub fn span(&self) -> SourceSpan {
        match self {
            Expr::Literal(l) => l.span(),
            Expr::Var(i) => i.span,
            Expr::Field(f) => f.span,
            Expr::Index(i) => i.span,
            Expr::Filter(f) => f.span,
            Expr::Binary(b) => b.span,
            Expr::Unary(u) => u.span,
            Expr::Call(c) => c.span,
            Expr::Ternary(t) => t.span,
        }
    }
}

/// A literal value
#[derive(Debug, Clone)]
pub enum Literal {
    String(StringLit),
    Int(IntLit),
    Float(FloatLit),
    Bool(BoolLit),
    None(NoneLit),
    List(ListLit),
    Dict(DictLit),
}

impl Literal {
    pub fn span(&self) -> SourceSpan {
        match self {
            Literal::String(l) => l.span,
            Literal::Int(l) => l.span,
            Literal::Float(l) => l.span,
            Literal::Bool(l) => l.span,
            Literal::None(l) => l.span,
            Literal::List(l) => l.span,
            Literal::Dict(l) => l.span,
        }
    }
}

/// String literal
#[derive(Debug, Clone)]
pub struct StringLit {
    pub value: String,
    pub span: SourceSpan,
}

/// Integer literal
#[derive(Debug, Clone)]
pub struct IntLit {
    pub value: i64,
    pub span: SourceSpan,
}

/// Float literal
#[derive(Debug, Clone)]
pub struct FloatLit {
    pub value: f64,
    pub span: SourceSpan,
}

/// Boolean literal
#[derive(Debug, Clone)]
pub struct BoolLit {
    pub value: bool,
    pub span: SourceSpan,
}

/// None literal
#[derive(Debug, Clone)]
pub struct NoneLit {
    pub span: SourceSpan,
}

/// List literal: [a, b, c]
#[derive(Debug, Clone)]
pub struct ListLit {
    pub elements: Vec<Expr>,
    pub span: SourceSpan,
}

/// Dict literal: {a: b, c: d}
#[derive(Debug, Clone)]
pub struct DictLit {
    pub entries: Vec<(Expr, Expr)>,
    pub span: SourceSpan,
}

/// An identifier
#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub span: SourceSpan,
}

/// Field access: expr.field
#[derive(Debug, Clone)]
pub struct FieldExpr {
    pub base: Box<Expr>,
    pub field: Ident,
    pub span: SourceSpan,
}

/// Index access: `expr[index]`
#[derive(Debug, Clone)]
pub struct IndexExpr {
    pub base: Box<Expr>,
    pub index: Box<Expr>,
    pub span: SourceSpan,
}

/// Filter application: expr | filter or expr | filter(args, key=value)
#[derive(Debug, Clone)]
pub struct FilterExpr {
    pub expr: Box<Expr>,
    pub filter: Ident,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(Ident, Expr)>,
    pub span: SourceSpan,
}

/// Binary expression
#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub op: BinaryOp,
    pub right: Box<Expr>,
    pub span: SourceSpan,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
    Pow,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Membership
    In,
    NotIn,
    // String
    Concat,
}

/// Unary expression
#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub span: SourceSpan,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// Function/fragment call
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(Ident, Expr)>,
    pub span: SourceSpan,
}

/// Ternary expression: value if cond else other
#[derive(Debug, Clone)]
pub struct TernaryExpr {
    pub value: Box<Expr>,
    pub condition: Box<Expr>,
    pub otherwise: Box<Expr>,
    pub span: SourceSpan,
}
