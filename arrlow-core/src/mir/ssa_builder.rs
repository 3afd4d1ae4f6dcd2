//! SSA function builder.
//!
//! Provides a safe API for constructing SSA functions, ensuring:
//! - Blocks are properly terminated before switching
//! - Values are allocated before use
//! - Memory operations are chained through one effect token sequence
//!
//! The builder carries a current source location that is stamped on every
//! instruction; lowering updates it as it walks expressions.

use crate::ast::{NodeId, Span};
use crate::types::{self, Type};

use super::ssa::{
    BlockId, BlockParam, CmpPredicate, ControlHeader, EffectToken, FuncBody, Inst, InstId, InstKind, PathComponent,
    SliceDim, Terminator, ValueId,
};

/// Error during function building.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderError {
    /// Tried to add instructions without selecting a block.
    NoCurrentBlock,
    /// A block was not terminated before switching away or finishing.
    UnterminatedBlock(BlockId),
    /// Block was terminated but instructions were added after.
    BlockAlreadyTerminated(BlockId),
}

impl std::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderError::NoCurrentBlock => write!(f, "No current block selected"),
            BuilderError::UnterminatedBlock(id) => write!(f, "Block {} has no terminator", id),
            BuilderError::BlockAlreadyTerminated(id) => {
                write!(f, "Block {} already terminated", id)
            }
        }
    }
}

impl std::error::Error for BuilderError {}

type BResult<T> = Result<T, BuilderError>;

/// Builder for constructing SSA functions.
///
/// ```ignore
/// let mut builder = FuncBuilder::new("inc", vec![(types::i32(), "x".to_string())], types::i32());
/// let x = builder.get_param(0);
/// let one = builder.push_int(1, types::i32())?;
/// let result = builder.push_binop("+", x, one, types::i32())?;
/// builder.terminate(Terminator::Return(result))?;
/// let body = builder.finish()?;
/// ```
pub struct FuncBuilder {
    body: FuncBody,
    current_block: Option<BlockId>,
    effect: EffectToken,
    span: Span,
    node_id: NodeId,
}

impl FuncBuilder {
    /// Create a new function builder; the entry block is current.
    pub fn new(name: &str, params: Vec<(Type, String)>, return_ty: Type) -> Self {
        let body = FuncBody::new(name, params, return_ty);
        let effect = body.entry_effect;
        FuncBuilder {
            body,
            current_block: Some(BlockId::ENTRY),
            effect,
            span: Span::default(),
            node_id: NodeId::default(),
        }
    }

    pub fn get_param(&self, index: usize) -> ValueId {
        self.body.params[index].0
    }

    pub fn num_params(&self) -> usize {
        self.body.params.len()
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        self.body.get_value_type(value)
    }

    /// Set the source location stamped on subsequent instructions.
    pub fn set_location(&mut self, span: Span, node_id: NodeId) {
        self.span = span;
        self.node_id = node_id;
    }

    pub fn location(&self) -> (Span, NodeId) {
        (self.span, self.node_id)
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.body.blocks.len() as u32);
        self.body.blocks.push(Default::default());
        id
    }

    /// Create a new basic block with parameters.
    ///
    /// Returns the block ID and the values defined by the parameters.
    pub fn create_block_with_params(&mut self, param_types: Vec<Type>) -> (BlockId, Vec<ValueId>) {
        let id = BlockId(self.body.blocks.len() as u32);

        let mut params = Vec::new();
        let mut values = Vec::new();
        for ty in param_types {
            let value = self.body.alloc_value(ty.clone());
            params.push(BlockParam {
                value,
                ty,
                name: None,
            });
            values.push(value);
        }

        self.body.blocks.push(super::ssa::Block::with_params(params));
        (id, values)
    }

    /// Switch to building in the specified block.
    ///
    /// The previous block must be terminated.
    pub fn switch_to_block(&mut self, block: BlockId) -> BResult<()> {
        if let Some(prev) = self.current_block {
            if self.body.get_block(prev).terminator.is_none() {
                return Err(BuilderError::UnterminatedBlock(prev));
            }
        }
        self.current_block = Some(block);
        Ok(())
    }

    /// Switch to a block without checking if the previous block is terminated.
    pub fn switch_to_block_unchecked(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    pub fn is_current_terminated(&self) -> bool {
        self.current_block.map(|b| self.body.get_block(b).terminator.is_some()).unwrap_or(false)
    }

    fn push_inst_internal(&mut self, kind: InstKind, result_ty: Type, has_result: bool) -> BResult<Option<ValueId>> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        if self.body.get_block(block_id).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated(block_id));
        }

        let result = if has_result { Some(self.body.alloc_value(result_ty.clone())) } else { None };
        let inst = Inst {
            result,
            result_ty,
            kind,
            span: self.span,
            node_id: self.node_id,
        };

        let inst_id = InstId(self.body.insts.len() as u32);
        self.body.insts.push(inst);
        self.body.get_block_mut(block_id).insts.push(inst_id);
        Ok(result)
    }

    /// Push an instruction that produces a value.
    pub fn push_inst(&mut self, kind: InstKind, ty: Type) -> BResult<ValueId> {
        let result = self.push_inst_internal(kind, ty, true)?;
        Ok(result.expect("result allocated for value-producing instruction"))
    }

    /// Push an instruction that produces no value.
    pub fn push_void_inst(&mut self, kind: InstKind) -> BResult<()> {
        self.push_inst_internal(kind, types::unit(), false)?;
        Ok(())
    }

    /// Advance the effect chain: returns `(effect_in, effect_out)`.
    fn next_effects(&mut self) -> (EffectToken, EffectToken) {
        let effect_in = self.effect;
        let effect_out = self.body.alloc_effect();
        self.effect = effect_out;
        (effect_in, effect_out)
    }

    pub fn terminate(&mut self, term: Terminator) -> BResult<()> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        if self.body.get_block(block_id).terminator.is_some() {
            return Err(BuilderError::BlockAlreadyTerminated(block_id));
        }
        self.body.get_block_mut(block_id).terminator = Some(term);
        Ok(())
    }

    /// Terminate the current block with `br target(args)`.
    pub fn branch(&mut self, target: BlockId, args: Vec<ValueId>) -> BResult<()> {
        self.terminate(Terminator::Branch { target, args })
    }

    /// Finish building. All blocks must be terminated.
    pub fn finish(self) -> BResult<FuncBody> {
        for (i, block) in self.body.blocks.iter().enumerate() {
            if block.terminator.is_none() {
                return Err(BuilderError::UnterminatedBlock(BlockId(i as u32)));
            }
        }
        Ok(self.body)
    }

    /// Finish without checking termination (for testing).
    pub fn finish_unchecked(self) -> FuncBody {
        self.body
    }

    // =========================================================================
    // Constants
    // =========================================================================

    pub fn push_int(&mut self, value: i64, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Int(value.to_string()), ty)
    }

    pub fn push_index(&mut self, value: i64) -> BResult<ValueId> {
        self.push_int(value, types::index())
    }

    pub fn push_float(&mut self, value: f64, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Float(format!("{:?}", value)), ty)
    }

    pub fn push_complex(&mut self, re: f64, im: f64, ty: Type) -> BResult<ValueId> {
        self.push_inst(
            InstKind::Complex {
                re: format!("{:?}", re),
                im: format!("{:?}", im),
            },
            ty,
        )
    }

    pub fn push_bool(&mut self, value: bool) -> BResult<ValueId> {
        self.push_inst(InstKind::Bool(value), types::bool_type())
    }

    pub fn push_string(&mut self, value: &str, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::String(value.to_string()), ty)
    }

    pub fn push_unit(&mut self) -> BResult<ValueId> {
        self.push_inst(InstKind::Unit, types::unit())
    }

    pub fn push_undef(&mut self, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Undef, ty)
    }

    // =========================================================================
    // Pure operations
    // =========================================================================

    pub fn push_binop(&mut self, op: &str, lhs: ValueId, rhs: ValueId, ty: Type) -> BResult<ValueId> {
        self.push_inst(
            InstKind::BinOp {
                op: op.to_string(),
                lhs,
                rhs,
            },
            ty,
        )
    }

    pub fn push_unary(&mut self, op: &str, operand: ValueId, ty: Type) -> BResult<ValueId> {
        self.push_inst(
            InstKind::UnaryOp {
                op: op.to_string(),
                operand,
            },
            ty,
        )
    }

    pub fn push_cmp(&mut self, pred: CmpPredicate, lhs: ValueId, rhs: ValueId) -> BResult<ValueId> {
        self.push_inst(InstKind::Cmp { pred, lhs, rhs }, types::bool_type())
    }

    pub fn push_convert(&mut self, value: ValueId, ty: Type) -> BResult<ValueId> {
        if self.value_type(value) == &ty {
            return Ok(value);
        }
        self.push_inst(InstKind::Convert { value }, ty)
    }

    pub fn push_select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> BResult<ValueId> {
        let ty = self.value_type(on_true).clone();
        self.push_inst(
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            ty,
        )
    }

    pub fn push_tuple(&mut self, elems: Vec<ValueId>, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Tuple(elems), ty)
    }

    pub fn push_project(&mut self, base: ValueId, index: u32, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Project { base, index }, ty)
    }

    pub fn push_call(&mut self, func: &str, args: Vec<ValueId>, ty: Type) -> BResult<ValueId> {
        self.push_inst(
            InstKind::Call {
                func: func.to_string(),
                args,
            },
            ty,
        )
    }

    pub fn push_void_call(&mut self, func: &str, args: Vec<ValueId>) -> BResult<()> {
        self.push_void_inst(InstKind::Call {
            func: func.to_string(),
            args,
        })
    }

    pub fn push_intrinsic(&mut self, name: &str, args: Vec<ValueId>, ty: Type) -> BResult<ValueId> {
        self.push_inst(
            InstKind::Intrinsic {
                name: name.to_string(),
                args,
            },
            ty,
        )
    }

    pub fn push_void_intrinsic(&mut self, name: &str, args: Vec<ValueId>) -> BResult<()> {
        self.push_void_inst(InstKind::Intrinsic {
            name: name.to_string(),
            args,
        })
    }

    // =========================================================================
    // Shapes, descriptors and addressing
    // =========================================================================

    pub fn push_shape(&mut self, extents: Vec<ValueId>) -> BResult<ValueId> {
        let rank = extents.len();
        self.push_inst(InstKind::Shape { extents }, types::shape(rank))
    }

    pub fn push_slice(&mut self, dims: Vec<SliceDim>) -> BResult<ValueId> {
        let rank = dims.iter().filter(|d| matches!(d, SliceDim::Range { .. })).count();
        self.push_inst(InstKind::Slice { dims }, types::slice(rank))
    }

    pub fn push_embox(
        &mut self,
        memref: ValueId,
        shape: Option<ValueId>,
        slice: Option<ValueId>,
        path: Vec<PathComponent>,
        ty: Type,
    ) -> BResult<ValueId> {
        self.push_inst(
            InstKind::Embox {
                memref,
                shape,
                slice,
                path,
            },
            ty,
        )
    }

    pub fn push_box_addr(&mut self, boxed: ValueId, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::BoxAddr { boxed }, ty)
    }

    pub fn push_box_extent(&mut self, boxed: ValueId, dim: u32) -> BResult<ValueId> {
        self.push_inst(InstKind::BoxExtent { boxed, dim }, types::index())
    }

    pub fn push_is_present(&mut self, value: ValueId) -> BResult<ValueId> {
        self.push_inst(InstKind::IsPresent { value }, types::bool_type())
    }

    pub fn push_absent(&mut self, ty: Type) -> BResult<ValueId> {
        self.push_inst(InstKind::Absent, ty)
    }

    pub fn push_array_coor(
        &mut self,
        memref: ValueId,
        shape: Option<ValueId>,
        indices: Vec<ValueId>,
        ty: Type,
    ) -> BResult<ValueId> {
        self.push_inst(
            InstKind::ArrayCoor {
                memref,
                shape,
                indices,
            },
            ty,
        )
    }

    pub fn push_coordinate_of(&mut self, base: ValueId, path: Vec<PathComponent>, ty: Type) -> BResult<ValueId> {
        if path.is_empty() {
            return Ok(base);
        }
        self.push_inst(InstKind::CoordinateOf { base, path }, ty)
    }

    // =========================================================================
    // Array values
    // =========================================================================

    pub fn push_array_load(&mut self, memref: ValueId, shape: Option<ValueId>, ty: Type) -> BResult<ValueId> {
        let (effect_in, effect_out) = self.next_effects();
        self.push_inst(
            InstKind::ArrayLoad {
                memref,
                shape,
                effect_in,
                effect_out,
            },
            ty,
        )
    }

    pub fn push_array_fetch(
        &mut self,
        array: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
        ty: Type,
    ) -> BResult<ValueId> {
        self.push_inst(InstKind::ArrayFetch { array, indices, path }, ty)
    }

    pub fn push_array_update(
        &mut self,
        array: ValueId,
        value: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    ) -> BResult<ValueId> {
        let ty = self.value_type(array).clone();
        self.push_inst(
            InstKind::ArrayUpdate {
                array,
                value,
                indices,
                path,
            },
            ty,
        )
    }

    pub fn push_array_access(
        &mut self,
        array: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
        ty: Type,
    ) -> BResult<ValueId> {
        self.push_inst(InstKind::ArrayAccess { array, indices, path }, ty)
    }

    pub fn push_array_amend(
        &mut self,
        array: ValueId,
        access: ValueId,
        indices: Vec<ValueId>,
        path: Vec<PathComponent>,
    ) -> BResult<ValueId> {
        let ty = self.value_type(array).clone();
        self.push_inst(
            InstKind::ArrayAmend {
                array,
                access,
                indices,
                path,
            },
            ty,
        )
    }

    pub fn push_array_merge_store(
        &mut self,
        original: ValueId,
        result: ValueId,
        memref: ValueId,
        shape: Option<ValueId>,
    ) -> BResult<()> {
        let (effect_in, effect_out) = self.next_effects();
        self.push_void_inst(InstKind::ArrayMergeStore {
            original,
            result,
            memref,
            shape,
            effect_in,
            effect_out,
        })
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn push_alloca(&mut self, elem_ty: Type) -> BResult<ValueId> {
        let (effect_in, effect_out) = self.next_effects();
        let ty = types::reference(elem_ty.clone());
        self.push_inst(
            InstKind::Alloca {
                elem_ty,
                effect_in,
                effect_out,
            },
            ty,
        )
    }

    pub fn push_allocmem(&mut self, elem_ty: Type, count: ValueId) -> BResult<ValueId> {
        let (effect_in, effect_out) = self.next_effects();
        let ty = types::heap(elem_ty.clone());
        self.push_inst(
            InstKind::Allocmem {
                elem_ty,
                count,
                effect_in,
                effect_out,
            },
            ty,
        )
    }

    pub fn push_freemem(&mut self, memref: ValueId) -> BResult<()> {
        let (effect_in, effect_out) = self.next_effects();
        self.push_void_inst(InstKind::Freemem {
            memref,
            effect_in,
            effect_out,
        })
    }

    pub fn push_load(&mut self, ptr: ValueId, ty: Type) -> BResult<ValueId> {
        let (effect_in, effect_out) = self.next_effects();
        self.push_inst(
            InstKind::Load {
                ptr,
                effect_in,
                effect_out,
            },
            ty,
        )
    }

    pub fn push_store(&mut self, ptr: ValueId, value: ValueId) -> BResult<()> {
        let (effect_in, effect_out) = self.next_effects();
        self.push_void_inst(InstKind::Store {
            ptr,
            value,
            effect_in,
            effect_out,
        })
    }

    // =========================================================================
    // Control Flow Pattern Helpers
    // =========================================================================
    //
    // ## If-Then-Else Pattern
    //
    // ```text
    // entry:
    //     %cond = ...
    //     br_if %cond, then_block(), else_block()
    //
    // then_block:
    //     br merge(%then_results...)
    //
    // else_block:
    //     br merge(%else_results...)
    //
    // merge(%results...):
    // ```
    //
    // ## For-Range Loop Pattern
    //
    // ```text
    // entry:
    //     br header(%init, 0)
    //
    // header(%acc: T, %i: index):
    //     %cond = slt %i, %bound
    //     br_if %cond, body(), exit(%acc)
    //
    // body:
    //     ...                      // may span many blocks
    //     %next_i = add %i, 1
    //     br header(%new_acc, %next_i)
    //
    // exit(%final: T):
    // ```

    /// Create then/else/merge blocks; the merge block has one parameter per
    /// entry of `result_tys`.
    pub fn create_if_then_else(&mut self, result_tys: Vec<Type>) -> IfThenElseBlocks {
        let then_block = self.create_block();
        let else_block = self.create_block();
        let (merge_block, results) = self.create_block_with_params(result_tys);

        IfThenElseBlocks {
            then_block,
            else_block,
            merge_block,
            results,
        }
    }

    /// Create header/body/exit blocks of a counted loop carrying one accumulator.
    pub fn create_for_range_loop(&mut self, acc_ty: Type, unordered: bool) -> ForRangeLoopBlocks {
        let (header, header_params) = self.create_block_with_params(vec![acc_ty.clone(), types::index()]);
        let acc = header_params[0];
        let index = header_params[1];

        let body = self.create_block();

        let (exit, exit_params) = self.create_block_with_params(vec![acc_ty]);
        let result = exit_params[0];

        self.body.blocks[header.index()].control = Some(ControlHeader::Loop {
            merge: exit,
            continue_block: body,
            unordered,
        });

        ForRangeLoopBlocks {
            header,
            acc,
            index,
            body,
            exit,
            result,
        }
    }

    /// Mark the current block as a selection header.
    pub fn mark_selection_header(&mut self, merge: BlockId) -> BResult<()> {
        let block_id = self.current_block.ok_or(BuilderError::NoCurrentBlock)?;
        self.body.blocks[block_id.index()].control = Some(ControlHeader::Selection { merge });
        Ok(())
    }

    /// Open an if-then-else on `cond` and continue in the then block.
    pub fn begin_if(&mut self, cond: ValueId, result_tys: Vec<Type>) -> BResult<OpenIf> {
        let blocks = self.create_if_then_else(result_tys);
        self.mark_selection_header(blocks.merge_block)?;
        self.terminate(Terminator::CondBranch {
            cond,
            then_target: blocks.then_block,
            then_args: vec![],
            else_target: blocks.else_block,
            else_args: vec![],
        })?;
        self.switch_to_block(blocks.then_block)?;
        Ok(OpenIf { blocks })
    }

    /// Close the then arm with `then_results` and continue in the else block.
    pub fn begin_else(&mut self, open: &OpenIf, then_results: Vec<ValueId>) -> BResult<()> {
        self.branch(open.blocks.merge_block, then_results)?;
        self.switch_to_block(open.blocks.else_block)
    }

    /// Close the else arm and continue in the merge block.
    pub fn end_if(&mut self, open: OpenIf, else_results: Vec<ValueId>) -> BResult<Vec<ValueId>> {
        self.branch(open.blocks.merge_block, else_results)?;
        self.switch_to_block(open.blocks.merge_block)?;
        Ok(open.blocks.results)
    }

    /// Emit a complete if-then-else. Each arm fills its block and returns the
    /// values passed to the merge block; building continues in the merge block.
    pub fn build_if_then_else<E>(
        &mut self,
        cond: ValueId,
        result_tys: Vec<Type>,
        then_arm: impl FnOnce(&mut Self) -> Result<Vec<ValueId>, E>,
        else_arm: impl FnOnce(&mut Self) -> Result<Vec<ValueId>, E>,
    ) -> Result<Vec<ValueId>, E>
    where
        E: From<BuilderError>,
    {
        let open = self.begin_if(cond, result_tys)?;
        let then_results = then_arm(self)?;
        self.begin_else(&open, then_results)?;
        let else_results = else_arm(self)?;
        Ok(self.end_if(open, else_results)?)
    }

    /// Open a counted loop `for i in 0..count` carrying `init`, and continue
    /// in the loop body. Close it with [`FuncBuilder::end_counted_loop`].
    pub fn begin_counted_loop(&mut self, count: ValueId, init: ValueId, unordered: bool) -> BResult<OpenLoop> {
        let acc_ty = self.value_type(init).clone();
        let blocks = self.create_for_range_loop(acc_ty, unordered);

        let zero = self.push_index(0)?;
        self.branch(blocks.header, vec![init, zero])?;

        self.switch_to_block(blocks.header)?;
        let cond = self.push_cmp(CmpPredicate::Slt, blocks.index, count)?;
        self.terminate(Terminator::CondBranch {
            cond,
            then_target: blocks.body,
            then_args: vec![],
            else_target: blocks.exit,
            else_args: vec![blocks.acc],
        })?;

        self.switch_to_block(blocks.body)?;
        Ok(OpenLoop { blocks })
    }

    /// Branch back to the header with the next accumulator; building
    /// continues in the exit block and the final accumulator is returned.
    pub fn end_counted_loop(&mut self, open: OpenLoop, next_acc: ValueId) -> BResult<ValueId> {
        let blocks = open.blocks;
        let one = self.push_index(1)?;
        let next_index = self.push_binop("+", blocks.index, one, types::index())?;
        self.branch(blocks.header, vec![next_acc, next_index])?;

        self.switch_to_block(blocks.exit)?;
        Ok(blocks.result)
    }

    /// Change the ordering annotation of an emitted loop header.
    pub fn set_loop_unordered(&mut self, header: BlockId, unordered: bool) {
        if let Some(ControlHeader::Loop { unordered: flag, .. }) = &mut self.body.blocks[header.index()].control {
            *flag = unordered;
        }
    }

    /// Emit a counted loop `for i in 0..count`. The body receives the
    /// accumulator and the index and returns the next accumulator; building
    /// continues in the exit block and the final accumulator is returned.
    pub fn build_counted_loop<E>(
        &mut self,
        count: ValueId,
        init: ValueId,
        unordered: bool,
        body: impl FnOnce(&mut Self, ValueId, ValueId) -> Result<ValueId, E>,
    ) -> Result<ValueId, E>
    where
        E: From<BuilderError>,
    {
        let open = self.begin_counted_loop(count, init, unordered)?;
        let next_acc = body(self, open.acc(), open.index())?;
        Ok(self.end_counted_loop(open, next_acc)?)
    }
}

/// An if-then-else whose arms are still being emitted.
#[derive(Debug)]
pub struct OpenIf {
    pub blocks: IfThenElseBlocks,
}

/// A counted loop whose body is still being emitted.
#[derive(Debug)]
pub struct OpenLoop {
    pub blocks: ForRangeLoopBlocks,
}

impl OpenLoop {
    pub fn acc(&self) -> ValueId {
        self.blocks.acc
    }

    pub fn index(&self) -> ValueId {
        self.blocks.index
    }

    pub fn header(&self) -> BlockId {
        self.blocks.header
    }
}

/// Block structure for an if-then-else.
#[derive(Debug, Clone)]
pub struct IfThenElseBlocks {
    pub then_block: BlockId,
    pub else_block: BlockId,
    /// Has one parameter per result.
    pub merge_block: BlockId,
    pub results: Vec<ValueId>,
}

/// Block structure for a for-range loop.
#[derive(Debug, Clone)]
pub struct ForRangeLoopBlocks {
    /// Loop header block (has accumulator and index parameters).
    pub header: BlockId,
    pub acc: ValueId,
    pub index: ValueId,
    pub body: BlockId,
    /// Loop exit block (has result parameter).
    pub exit: BlockId,
    pub result: ValueId,
}
