//! Front-end expression model consumed by array lowering.
//!
//! Expressions arrive fully resolved and type checked: every node carries its
//! element type and rank, conversions are explicit, and symbols are shared.

use std::rc::Rc;

use crate::types::Type;
use crate::IdSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    pub fn new(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Self {
        Span {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Check if this is a generated/dummy span (all zeros)
    pub fn is_generated(&self) -> bool {
        self.start_line == 0 && self.start_col == 0 && self.end_line == 0 && self.end_col == 0
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

pub type NodeCounter = IdSource<NodeId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

impl From<u32> for SymbolId {
    fn from(value: u32) -> Self {
        SymbolId(value)
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub id: NodeId,
    pub span: Span,
}

// =============================================================================
// Symbols and procedure interfaces
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    In,
    Out,
    InOut,
    #[default]
    Unspecified,
}

impl Intent {
    /// Whether a callee may write through an argument with this intent.
    pub fn may_modify(self) -> bool {
        !matches!(self, Intent::In)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolAttrs {
    pub optional: bool,
    pub allocatable: bool,
    pub pointer: bool,
    pub contiguous: bool,
    pub assumed_rank: bool,
    pub intent: Intent,
    pub value: bool,
    pub target: bool,
}

/// A resolved entity. `ty` is the element type; `rank` is 0 for scalars.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub ty: Type,
    pub rank: usize,
    pub attrs: SymbolAttrs,
}

impl Symbol {
    /// True when the entity may be absent or unassociated at run time.
    pub fn may_be_absent(&self) -> bool {
        self.attrs.optional
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Passing {
    /// Address of contiguous storage.
    Ref,
    Value,
    /// Descriptor.
    Box,
}

#[derive(Debug, Clone)]
pub struct DummyArg {
    pub name: String,
    pub intent: Intent,
    pub passing: Passing,
    pub optional: bool,
    pub rank: usize,
    pub contiguous: bool,
}

impl DummyArg {
    pub fn new(name: &str, intent: Intent, passing: Passing) -> Self {
        DummyArg {
            name: name.to_string(),
            intent,
            passing,
            optional: false,
            rank: 0,
            contiguous: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcInterface {
    pub name: String,
    pub elemental: bool,
    pub pure: bool,
    pub dummies: Vec<DummyArg>,
    /// Result element type; `None` for subroutines.
    pub result: Option<Type>,
    pub result_rank: usize,
    /// Index of the passed-object dummy of a type-bound elemental procedure.
    pub passed_object: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum ProcDesignator {
    Intrinsic(String),
    User(Rc<ProcInterface>),
}

impl ProcDesignator {
    pub fn name(&self) -> &str {
        match self {
            ProcDesignator::Intrinsic(name) => name,
            ProcDesignator::User(iface) => &iface.name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcRef {
    pub proc: ProcDesignator,
    /// Actual arguments in dummy order; `None` marks an omitted optional.
    pub args: Vec<Option<Expr>>,
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone)]
pub struct Expr {
    pub h: Header,
    pub ty: Type,
    pub rank: usize,
    pub kind: ExprKind,
}

impl Expr {
    pub fn span(&self) -> Span {
        self.h.span
    }

    pub fn id(&self) -> NodeId {
        self.h.id
    }
}

#[derive(Debug, Clone)]
pub enum Literal {
    Int(i64),
    Real(f64),
    Complex(f64, f64),
    Logical(bool),
    Char(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Eqv,
    Neqv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquiryKind {
    LBound,
    UBound,
    Extent,
    Size,
    Len,
}

#[derive(Debug, Clone)]
pub enum Subscript {
    Index(Expr),
    Triplet {
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
        stride: Option<Box<Expr>>,
    },
    Vector(Expr),
}

#[derive(Debug, Clone)]
pub enum PartRef {
    /// Subscripts applied to the preceding array part.
    Subscripts(Vec<Subscript>),
    /// Component selection; `ty` is the component's declared type.
    Component { name: String, index: u32, ty: Type },
}

#[derive(Debug, Clone)]
pub struct Designator {
    pub base: Rc<Symbol>,
    pub parts: Vec<PartRef>,
}

#[derive(Debug, Clone)]
pub enum AcItem {
    Expr(Expr),
    ImpliedDo {
        var: Rc<Symbol>,
        lo: Box<Expr>,
        hi: Box<Expr>,
        step: Option<Box<Expr>>,
        items: Vec<AcItem>,
    },
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Designator(Designator),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Relational {
        op: RelOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Conversion to the node's type.
    Convert(Box<Expr>),
    Parentheses(Box<Expr>),
    ProcRef(ProcRef),
    ArrayCtor(Vec<AcItem>),
    Substring {
        base: Box<Expr>,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
    },
    ComplexPart {
        base: Box<Expr>,
        imag: bool,
    },
    /// Structure constructor; one value per component in declaration order.
    StructCtor {
        name: String,
        fields: Vec<Expr>,
    },
    DescriptorInquiry {
        kind: InquiryKind,
        base: Rc<Symbol>,
        /// One-based dimension.
        dim: Option<usize>,
    },
}

/// One index of a FORALL header: `index = lower:upper:step` with an optional
/// scalar mask that may reference this and all enclosing indices.
#[derive(Debug, Clone)]
pub struct ForallLevel {
    pub index: Rc<Symbol>,
    pub lower: Expr,
    pub upper: Expr,
    pub step: Option<Expr>,
    pub mask: Option<Rc<Expr>>,
}

// =============================================================================
// Queries
// =============================================================================

/// True if evaluating `expr` touches a ranked entity, even when the
/// expression itself is scalar (e.g. `sum(a)` or `a(i)`).
pub fn references_array(expr: &Expr) -> bool {
    if expr.rank > 0 {
        return true;
    }
    match &expr.kind {
        ExprKind::Designator(d) => d.base.rank > 0 || d.parts.iter().any(part_references_array),
        ExprKind::Literal(_) => false,
        ExprKind::Unary { operand, .. } => references_array(operand),
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Relational { lhs, rhs, .. }
        | ExprKind::Logical { lhs, rhs, .. } => references_array(lhs) || references_array(rhs),
        ExprKind::Convert(inner) | ExprKind::Parentheses(inner) => references_array(inner),
        ExprKind::ProcRef(pr) => pr.args.iter().flatten().any(references_array),
        ExprKind::ArrayCtor(_) => true,
        ExprKind::Substring { base, lo, hi } => {
            references_array(base)
                || lo.as_deref().is_some_and(references_array)
                || hi.as_deref().is_some_and(references_array)
        }
        ExprKind::ComplexPart { base, .. } => references_array(base),
        ExprKind::StructCtor { fields, .. } => fields.iter().any(references_array),
        ExprKind::DescriptorInquiry { .. } => true,
    }
}

fn part_references_array(part: &PartRef) -> bool {
    match part {
        PartRef::Subscripts(subs) => subs.iter().any(|s| match s {
            Subscript::Index(e) => references_array(e),
            Subscript::Vector(_) => true,
            Subscript::Triplet { lo, hi, stride } => [lo, hi, stride]
                .into_iter()
                .any(|b| b.as_deref().is_some_and(references_array)),
        }),
        PartRef::Component { .. } => false,
    }
}
