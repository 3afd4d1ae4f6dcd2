//! SSA form targeted by array lowering.
//!
//! - **SSA values** (ValueId) produced exactly once
//! - **Explicit CFG** with block parameters instead of phi nodes
//! - **Effect tokens** ordering memory operations
//!
//! ## Array values
//!
//! Memory arrays are read into logical *array values* with `array_load`.
//! Elements are read with `array_fetch` and replaced with `array_update`
//! (or `array_access`/`array_amend` when a callee writes the element through a
//! reference); each update yields a new array value, so nothing is visible in
//! memory until `array_merge_store` writes the final value back:
//!
//! ```text
//! %a0 = array_load %addr, %shape
//! header(%acc: array<1>, %i: index):
//!     ...
//!     %x   = array_fetch %a0[%j]
//!     %acc2 = array_update %acc[%i] = %x
//!     br header(%acc2, %i1)
//! exit(%res: array<1>):
//!     array_merge_store %a0, %res to %addr
//! ```
//!
//! All indices in array operations are zero-based positions per dimension,
//! dimension 0 varying fastest.

use crate::ast::{NodeId, Span};
use crate::types::Type;

// =============================================================================
// ID Types
// =============================================================================

/// SSA value - defined exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ValueId {
    fn from(id: u32) -> Self {
        ValueId(id)
    }
}

/// Instruction within a function, stored in a flat arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Basic block within a function. BlockId(0) is always the entry block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub const ENTRY: BlockId = BlockId(0);
}

/// Effect token for ordering memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectToken(pub u32);

impl EffectToken {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Basic Blocks
// =============================================================================

/// Structured control flow annotations attached to header blocks.
#[derive(Debug, Clone)]
pub enum ControlHeader {
    Loop {
        /// The block the loop exits to.
        merge: BlockId,
        /// The block that branches back to the header.
        continue_block: BlockId,
        /// Iterations may execute in any order.
        unordered: bool,
    },
    Selection {
        merge: BlockId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub params: Vec<BlockParam>,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
    pub control: Option<ControlHeader>,
}

impl Block {
    pub fn with_params(params: Vec<BlockParam>) -> Self {
        Block {
            params,
            ..Block::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockParam {
    pub value: ValueId,
    pub ty: Type,
    pub name: Option<String>,
}

/// How control leaves a basic block.
#[derive(Debug, Clone)]
pub enum Terminator {
    Branch {
        target: BlockId,
        args: Vec<ValueId>,
    },
    CondBranch {
        cond: ValueId,
        then_target: BlockId,
        then_args: Vec<ValueId>,
        else_target: BlockId,
        else_args: Vec<ValueId>,
    },
    Return(ValueId),
    ReturnUnit,
    Unreachable,
}

// =============================================================================
// Instructions
// =============================================================================

#[derive(Debug, Clone)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub result_ty: Type,
    pub kind: InstKind,
    pub span: Span,
    pub node_id: NodeId,
}

/// Comparison predicates. Real comparisons are either ordered (false when an
/// operand is NaN) or unordered (true when an operand is NaN).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    OEq,
    OLt,
    OLe,
    OGt,
    OGe,
    UNe,
}

impl CmpPredicate {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpPredicate::Eq => "eq",
            CmpPredicate::Ne => "ne",
            CmpPredicate::Slt => "slt",
            CmpPredicate::Sle => "sle",
            CmpPredicate::Sgt => "sgt",
            CmpPredicate::Sge => "sge",
            CmpPredicate::OEq => "oeq",
            CmpPredicate::OLt => "olt",
            CmpPredicate::OLe => "ole",
            CmpPredicate::OGt => "ogt",
            CmpPredicate::OGe => "oge",
            CmpPredicate::UNe => "une",
        }
    }
}

/// One step from an element to a part of it.
#[derive(Debug, Clone, PartialEq)]
pub enum PathComponent {
    Field(u32),
    /// `true` selects the imaginary part.
    ComplexPart(bool),
    /// Linear position inside a fixed-size component array.
    Index(ValueId),
    /// Zero-based start and length.
    Substring { start: ValueId, len: ValueId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SliceDim {
    /// Zero-based start, element count and step.
    Range {
        start: ValueId,
        extent: ValueId,
        step: ValueId,
    },
    /// Dimension fixed at a zero-based position and dropped from the result rank.
    Index(ValueId),
}

#[derive(Debug, Clone)]
pub enum InstKind {
    // =========================================================================
    // Pure Operations
    // =========================================================================
    Int(String),
    Float(String),
    Complex {
        re: String,
        im: String,
    },
    Bool(bool),
    String(String),
    Unit,
    Undef,

    BinOp {
        op: String,
        lhs: ValueId,
        rhs: ValueId,
    },
    UnaryOp {
        op: String,
        operand: ValueId,
    },
    Cmp {
        pred: CmpPredicate,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Conversion to the instruction's result type.
    Convert {
        value: ValueId,
    },
    Select {
        cond: ValueId,
        on_true: ValueId,
        on_false: ValueId,
    },

    /// Record or tuple construction.
    Tuple(Vec<ValueId>),
    Project {
        base: ValueId,
        index: u32,
    },

    /// Call of a user procedure.
    Call {
        func: String,
        args: Vec<ValueId>,
    },
    /// Call of a runtime or mathematical intrinsic.
    Intrinsic {
        name: String,
        args: Vec<ValueId>,
    },

    // =========================================================================
    // Shapes, descriptors and addressing
    // =========================================================================
    Shape {
        extents: Vec<ValueId>,
    },
    Slice {
        dims: Vec<SliceDim>,
    },
    /// Build a descriptor over memory (or re-slice an existing descriptor).
    Embox {
        memref: ValueId,
        shape: Option<ValueId>,
        slice: Option<ValueId>,
        path: Vec<PathComponent>,
    },
    /// Address of a descriptor's first element.
    BoxAddr {
        boxed: ValueId,
    },
    BoxExtent {
        boxed: ValueId,
        dim: u32,
    },
    /// False for a null address or an absent/unassociated descriptor.
    IsPresent {
        value: ValueId,
    },
    /// The absent-argument value.
    Absent,
    /// Address of the element at zero-based `indices` of `memref`. With no
    /// shape, a single index is a linear element offset.
    ArrayCoor {
        memref: ValueId,
        shape: Option<ValueId>,
        indices: Vec<ValueId>,
    },
    CoordinateOf {
        base: ValueId,
        path: Vec<PathComponent>,
    },

    // =========================================================================
    // Array values
    // =========================================================================
    ArrayLoad {
        memref: ValueId,
        shape: Option<ValueId>,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
    ArrayFetch {
        array: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    },
    ArrayUpdate {
        array: ValueId,
        value: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    },
    /// Reference to a private copy of one element, for callees that write it.
    ArrayAccess {
        array: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    },
    /// Fold an `array_access` reference back into a new array value.
    ArrayAmend {
        array: ValueId,
        access: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    },
    ArrayMergeStore {
        original: ValueId,
        result: ValueId,
        memref: ValueId,
        shape: Option<ValueId>,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },

    // =========================================================================
    // Memory
    // =========================================================================
    Alloca {
        elem_ty: Type,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
    Allocmem {
        elem_ty: Type,
        count: ValueId,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
    Freemem {
        memref: ValueId,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
    Load {
        ptr: ValueId,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
        effect_in: EffectToken,
        effect_out: EffectToken,
    },
}

impl InstKind {
    /// Input and output effect tokens of a memory operation.
    pub fn effects(&self) -> Option<(EffectToken, EffectToken)> {
        match self {
            InstKind::ArrayLoad {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::ArrayMergeStore {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::Alloca {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::Allocmem {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::Freemem {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::Load {
                effect_in,
                effect_out,
                ..
            }
            | InstKind::Store {
                effect_in,
                effect_out,
                ..
            } => Some((*effect_in, *effect_out)),
            _ => None,
        }
    }

    /// Every value this instruction reads.
    pub fn operands(&self) -> Vec<ValueId> {
        fn path_uses(path: &[PathComponent], out: &mut Vec<ValueId>) {
            for comp in path {
                match comp {
                    PathComponent::Index(v) => out.push(*v),
                    PathComponent::Substring { start, len } => {
                        out.push(*start);
                        out.push(*len);
                    }
                    PathComponent::Field(_) | PathComponent::ComplexPart(_) => {}
                }
            }
        }

        let mut uses = Vec::new();
        match self {
            InstKind::Int(_)
            | InstKind::Float(_)
            | InstKind::Complex { .. }
            | InstKind::Bool(_)
            | InstKind::String(_)
            | InstKind::Unit
            | InstKind::Undef
            | InstKind::Absent
            | InstKind::Alloca { .. } => {}

            InstKind::BinOp { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => {
                uses.push(*lhs);
                uses.push(*rhs);
            }
            InstKind::UnaryOp { operand, .. } => uses.push(*operand),
            InstKind::Convert { value } => uses.push(*value),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => uses.extend([*cond, *on_true, *on_false]),
            InstKind::Tuple(elems) => uses.extend(elems),
            InstKind::Project { base, .. } => uses.push(*base),
            InstKind::Call { args, .. } | InstKind::Intrinsic { args, .. } => uses.extend(args),
            InstKind::Shape { extents } => uses.extend(extents),
            InstKind::Slice { dims } => {
                for dim in dims {
                    match dim {
                        SliceDim::Range { start, extent, step } => uses.extend([*start, *extent, *step]),
                        SliceDim::Index(v) => uses.push(*v),
                    }
                }
            }
            InstKind::Embox {
                memref,
                shape,
                slice,
                path,
            } => {
                uses.push(*memref);
                uses.extend(shape);
                uses.extend(slice);
                path_uses(path, &mut uses);
            }
            InstKind::BoxAddr { boxed } | InstKind::BoxExtent { boxed, .. } => uses.push(*boxed),
            InstKind::IsPresent { value } => uses.push(*value),
            InstKind::ArrayCoor {
                memref,
                shape,
                indices,
            } => {
                uses.push(*memref);
                uses.extend(shape);
                uses.extend(indices);
            }
            InstKind::CoordinateOf { base, path } => {
                uses.push(*base);
                path_uses(path, &mut uses);
            }
            InstKind::ArrayLoad { memref, shape, .. } => {
                uses.push(*memref);
                uses.extend(shape);
            }
            InstKind::ArrayFetch { array, indices, path } | InstKind::ArrayAccess { array, indices, path } => {
                uses.push(*array);
                uses.extend(indices);
                path_uses(path, &mut uses);
            }
            InstKind::ArrayUpdate {
                array,
                value,
                indices,
                path,
            } => {
                uses.push(*array);
                uses.push(*value);
                uses.extend(indices);
                path_uses(path, &mut uses);
            }
            InstKind::ArrayAmend {
                array,
                access,
                indices,
                path,
            } => {
                uses.push(*array);
                uses.push(*access);
                uses.extend(indices);
                path_uses(path, &mut uses);
            }
            InstKind::ArrayMergeStore {
                original,
                result,
                memref,
                shape,
                ..
            } => {
                uses.extend([*original, *result, *memref]);
                uses.extend(shape);
            }
            InstKind::Allocmem { count, .. } => uses.push(*count),
            InstKind::Freemem { memref, .. } => uses.push(*memref),
            InstKind::Load { ptr, .. } => uses.push(*ptr),
            InstKind::Store { ptr, value, .. } => {
                uses.push(*ptr);
                uses.push(*value);
            }
        }
        uses
    }
}

// =============================================================================
// Function Body
// =============================================================================

/// An SSA function body. BlockId(0) is the entry block.
#[derive(Debug, Clone)]
pub struct FuncBody {
    pub name: String,
    pub params: Vec<(ValueId, Type, String)>,
    pub return_ty: Type,
    pub blocks: Vec<Block>,
    pub insts: Vec<Inst>,
    /// Type of each value. Indexed by ValueId.
    pub value_types: Vec<Type>,
    pub entry_effect: EffectToken,
    next_effect: u32,
    next_value: u32,
}

impl FuncBody {
    pub fn new(name: &str, params: Vec<(Type, String)>, return_ty: Type) -> Self {
        let mut value_types = Vec::new();
        let mut func_params = Vec::new();

        for (i, (ty, name)) in params.into_iter().enumerate() {
            let value_id = ValueId(i as u32);
            value_types.push(ty.clone());
            func_params.push((value_id, ty, name));
        }

        let next_value = value_types.len() as u32;
        FuncBody {
            name: name.to_string(),
            params: func_params,
            return_ty,
            blocks: vec![Block::default()],
            insts: Vec::new(),
            value_types,
            entry_effect: EffectToken(0),
            next_effect: 1,
            next_value,
        }
    }

    pub fn alloc_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        self.value_types.push(ty);
        id
    }

    pub fn alloc_effect(&mut self) -> EffectToken {
        let token = EffectToken(self.next_effect);
        self.next_effect += 1;
        token
    }

    pub fn get_value_type(&self, value: ValueId) -> &Type {
        &self.value_types[value.index()]
    }

    pub fn get_block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn get_inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn num_values(&self) -> usize {
        self.value_types.len()
    }

    /// Instructions of the whole body in block order.
    pub fn iter_insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(move |b| b.insts.iter().map(move |id| self.get_inst(*id)))
    }

    /// Loop headers with their `unordered` flag, in block order.
    pub fn loop_headers(&self) -> Vec<(BlockId, bool)> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| match b.control {
                Some(ControlHeader::Loop { unordered, .. }) => Some((BlockId(i as u32), unordered)),
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// Display Implementations
// =============================================================================

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl std::fmt::Display for EffectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.0)
    }
}
