//! Array-expression lowering.
//!
//! [`ArrayLowering`] turns rank>0 expressions and array statements into loop
//! nests. An expression is first compiled into a continuation ([`Cont`]), a
//! closure from an iteration point to an element value. Compiling emits the
//! loop-invariant code (operand loads, hoisted scalars, temporaries) at the
//! current insertion point; invoking the continuation inside a loop body
//! emits the per-element code.
//!
//! Every assignment follows the same protocol: the destination is loaded
//! once as an array value, each iteration produces a new array value through
//! the loop-carried accumulator, and a single merge after the nest makes the
//! result visible. A right-hand side that reads the destination therefore
//! always sees the values from before the statement.

mod array_ctor;
mod calls;
mod compile;
mod copy_inout;
mod designator;
mod destination;
pub mod exv;
mod mask;
pub mod ops;
pub mod scalar;
pub mod semantics;
pub mod shape;
pub mod space;

#[cfg(test)]
mod assign_tests;
#[cfg(test)]
mod call_tests;
#[cfg(test)]
mod mask_tests;
#[cfg(test)]
mod test_support;

use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{Designator, Expr, ExprKind, NodeId, ProcInterface, Span};
use crate::error::{CompilerError, Result};
use crate::mir::ssa::{BlockId, FuncBody, Terminator, ValueId};
use crate::mir::ssa_builder::FuncBuilder;
use crate::mir::ssa_verify::verify_func;
use crate::options::LoweringOptions;
use crate::types;
use crate::{bail_shape_at, bail_unsupported_at};

pub use compile::Cont;
pub use exv::{ArrayValue, BoxValue, ExtendedValue, SymbolMap};
pub use scalar::{DefaultScalarLowering, ScalarLowering};
pub use semantics::AccessMode;
pub use space::{ExplicitSpace, ImplicitSpace, IterSpace};

use designator::DesignatorPlan;
use destination::Destination;
use mask::MaskCache;
use shape::ArrayOperand;
use space::{build_nest, ExplicitPoint};

/// Storage owned by the statement being lowered.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Temp {
    /// Heap address from `allocmem` or `realloc`.
    Mem(ValueId),
    /// Descriptor of a result allocated by a runtime entry point.
    Box(ValueId),
}

pub struct ArrayLowering<'a> {
    pub(crate) b: &'a mut FuncBuilder,
    pub(crate) symbols: &'a mut SymbolMap,
    scalars: &'a mut dyn ScalarLowering,
    options: &'a LoweringOptions,
    semant: AccessMode,
    /// Cleared by any use that forces elements to be visited in order.
    unordered: bool,
    operands: Vec<ArrayOperand>,
    temps: Vec<Temp>,
    masks: MaskCache,
    /// Open explicit loops while a FORALL body is lowered.
    explicit: Option<ExplicitPoint>,
}

impl<'a> ArrayLowering<'a> {
    pub fn new(
        b: &'a mut FuncBuilder,
        symbols: &'a mut SymbolMap,
        scalars: &'a mut dyn ScalarLowering,
        options: &'a LoweringOptions,
    ) -> Self {
        ArrayLowering {
            b,
            symbols,
            scalars,
            options,
            semant: AccessMode::ByValue,
            unordered: true,
            operands: Vec::new(),
            temps: Vec::new(),
            masks: MaskCache::default(),
            explicit: None,
        }
    }

    /// Ordering flag of the statement lowered last.
    pub fn unordered(&self) -> bool {
        self.unordered
    }

    pub fn builder(&mut self) -> &mut FuncBuilder {
        self.b
    }

    fn begin_statement(&mut self, expr: &Expr) {
        self.begin_statement_at(expr.span(), expr.id());
    }

    fn begin_statement_at(&mut self, span: Span, node: NodeId) {
        self.b.set_location(span, node);
        self.unordered = true;
        self.semant = AccessMode::ByValue;
        self.operands.clear();
    }

    // =========================================================================
    // Assignment statements
    // =========================================================================

    /// `lhs = rhs` for a rank>0 `lhs`.
    pub fn lower_array_assignment(&mut self, lhs: &Expr, rhs: &Expr) -> Result<()> {
        self.lower_masked_assignment(lhs, rhs, None, &ImplicitSpace::new())
    }

    /// `lhs = rhs` under the WHERE clauses of `implicit` and, when given, the
    /// FORALL levels of `explicit`.
    pub fn lower_masked_assignment(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        explicit: Option<&ExplicitSpace>,
        implicit: &ImplicitSpace,
    ) -> Result<()> {
        debug!(
            "array assignment at {}: rank {}, {} explicit levels, {} mask conditions",
            lhs.span(),
            lhs.rank,
            explicit.map_or(0, ExplicitSpace::depth),
            implicit.conditions().len()
        );
        self.begin_statement(lhs);
        match explicit {
            None => self.assign_in_place(lhs, rhs, implicit, None)?,
            Some(space) => self.assign_under_forall(lhs, rhs, space, implicit, None)?,
        }
        self.end_statement()
    }

    /// `lhs = rhs` resolved to an elemental subroutine `proc(lhs_elem, rhs_elem)`.
    pub fn lower_elemental_user_assignment(
        &mut self,
        proc: &Rc<ProcInterface>,
        lhs: &Expr,
        rhs: &Expr,
        explicit: Option<&ExplicitSpace>,
        implicit: &ImplicitSpace,
    ) -> Result<()> {
        debug!("defined assignment `{}` at {}: rank {}", proc.name, lhs.span(), lhs.rank);
        self.begin_statement(lhs);
        match explicit {
            None => self.assign_in_place(lhs, rhs, implicit, Some(proc))?,
            Some(space) => self.assign_under_forall(lhs, rhs, space, implicit, Some(proc))?,
        }
        self.end_statement()
    }

    fn assign_in_place(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        implicit: &ImplicitSpace,
        custom: Option<&Rc<ProcInterface>>,
    ) -> Result<()> {
        let d = destination_designator(lhs)?;
        let plan = Rc::new(self.plan_designator(lhs, d, lhs.ty.clone(), vec![], None)?);
        let mut dest = Destination::new(plan.base.clone());
        let loaded = dest.load(self.b)?;
        let result = self.assignment_body(&plan, rhs, implicit, custom, loaded)?;
        dest.merge(self.b, result)
    }

    fn assign_under_forall(
        &mut self,
        lhs: &Expr,
        rhs: &Expr,
        space: &ExplicitSpace,
        implicit: &ImplicitSpace,
        custom: Option<&Rc<ProcInterface>>,
    ) -> Result<()> {
        let d = destination_designator(lhs)?;
        if d.base.rank == 0 {
            bail_unsupported_at!(lhs.span(), "FORALL assignment to a component array of scalar `{}`", d.base.name);
        }
        let base = Rc::new(self.resolve_symbol_base(&d.base, lhs.span())?);
        self.prepare_masks(space, implicit)?;
        let mut dest = Destination::new(base.clone());
        let loaded = dest.load(self.b)?;
        let (result, headers) = self.explicit_nest(space, loaded, &mut |this, acc| {
            let mark = this.temps.len();
            let plan = Rc::new(this.plan_designator(lhs, d, lhs.ty.clone(), vec![], Some(base.clone()))?);
            let next = this.assignment_body(&plan, rhs, implicit, custom, acc)?;
            this.free_temps_from(mark)?;
            Ok(next)
        })?;
        for header in headers {
            self.b.set_loop_unordered(header, self.unordered);
        }
        dest.merge(self.b, result)
    }

    /// Emit the implicit nest of one assignment inside whatever explicit
    /// loops are open. Returns the accumulator after the nest.
    fn assignment_body(
        &mut self,
        plan: &Rc<DesignatorPlan>,
        rhs: &Expr,
        implicit: &ImplicitSpace,
        custom: Option<&Rc<ProcInterface>>,
        acc: ValueId,
    ) -> Result<ValueId> {
        let extents = plan.section_extents();
        let (element, operands) = self.with_operands(|this| match custom {
            None => this.with_semantics(AccessMode::ByValue, |this| this.compile(rhs)),
            Some(proc) => this.defined_assignment_rhs(proc, rhs),
        })?;
        trace!("{} right-hand side operands, shape from the destination", operands.len());

        let mode = match (custom, plan.whole) {
            (Some(_), _) => AccessMode::CustomCopyInCopyOut,
            (None, true) => AccessMode::CopyInCopyOut,
            (None, false) => AccessMode::ProjectedCopyInCopyOut,
        };
        let update = self.with_semantics(mode, |this| this.destination_update(plan, custom))?;
        let guards = self.mask_guards(implicit)?;

        let acc_ty = self.b.value_type(acc).clone();
        let (result, _) = build_nest(self.b, &extents, acc, self.unordered, &mut |b, acc, idx| {
            let point = IterSpace::new(idx.to_vec(), acc);
            mask::guarded(b, &point, &guards, &acc_ty, &mut |b| {
                let value = element(b, &point)?;
                Ok(update(b, &point.with_element(value))?.base())
            })
        })?;
        Ok(result)
    }

    /// Emit the loops of `space` around `body`, binding each index variable
    /// while its loop is open. Returns the final accumulator and the loop
    /// headers.
    fn explicit_nest(
        &mut self,
        space: &ExplicitSpace,
        init: ValueId,
        body: &mut dyn FnMut(&mut Self, ValueId) -> Result<ValueId>,
    ) -> Result<(ValueId, Vec<BlockId>)> {
        let mut headers = Vec::with_capacity(space.depth());
        let outer = self.explicit.replace(ExplicitPoint::default());
        let result = self.explicit_level(space, 0, init, &mut headers, body);
        self.explicit = outer;
        Ok((result?, headers))
    }

    fn explicit_level(
        &mut self,
        space: &ExplicitSpace,
        level: usize,
        acc: ValueId,
        headers: &mut Vec<BlockId>,
        body: &mut dyn FnMut(&mut Self, ValueId) -> Result<ValueId>,
    ) -> Result<ValueId> {
        let Some(forall) = space.levels.get(level) else {
            return body(self, acc);
        };
        let ty = forall.index.ty.clone();
        let lo = self.evaluate_scalar_expr(&forall.lower)?;
        let lo = self.b.push_convert(lo, ty.clone())?;
        let hi = self.evaluate_scalar_expr(&forall.upper)?;
        let hi = self.b.push_convert(hi, ty.clone())?;
        let step = match &forall.step {
            Some(step) => {
                let v = self.evaluate_scalar_expr(step)?;
                self.b.push_convert(v, ty.clone())?
            }
            None => self.b.push_int(1, ty.clone())?,
        };
        let trips = ops::trip_count(self.b, lo, hi, step, &ty)?;

        let open = self.b.begin_counted_loop(trips, acc, true)?;
        headers.push(open.header());
        let value = ops::nth_value(self.b, lo, open.index(), step, &ty)?;
        self.symbols.bind(&forall.index, ExtendedValue::Scalar(value));
        if let Some(point) = self.explicit.as_mut() {
            point.trips.push(trips);
            point.iters.push(open.index());
        }

        let inner = match &forall.mask {
            Some(mask) => self.masked_level(mask, space, level, open.acc(), headers, body),
            None => self.explicit_level(space, level + 1, open.acc(), headers, body),
        };

        if let Some(point) = self.explicit.as_mut() {
            point.trips.pop();
            point.iters.pop();
        }
        self.symbols.unbind(&forall.index);
        let next = inner?;
        Ok(self.b.end_counted_loop(open, next)?)
    }

    /// The rest of the nest under the mask of the current level; iterations
    /// where the mask is false pass the accumulator through.
    fn masked_level(
        &mut self,
        mask: &Rc<Expr>,
        space: &ExplicitSpace,
        level: usize,
        acc: ValueId,
        headers: &mut Vec<BlockId>,
        body: &mut dyn FnMut(&mut Self, ValueId) -> Result<ValueId>,
    ) -> Result<ValueId> {
        let cond = self.forall_mask_value(mask)?;
        let acc_ty = self.b.value_type(acc).clone();
        let arm = self.b.begin_if(cond, vec![acc_ty])?;
        let next = self.explicit_level(space, level + 1, acc, headers, body)?;
        self.b.begin_else(&arm, vec![next])?;
        Ok(self.b.end_if(arm, vec![acc])?[0])
    }

    // =========================================================================
    // Array values
    // =========================================================================

    /// Evaluate a rank>0 expression into fresh contiguous storage. The
    /// caller owns the storage.
    pub fn lower_array_value(&mut self, expr: &Expr) -> Result<ExtendedValue> {
        debug!("array value at {}: rank {}", expr.span(), expr.rank);
        Ok(ExtendedValue::Array(self.materialize_value(expr)?))
    }

    pub(crate) fn materialize_value(&mut self, expr: &Expr) -> Result<ArrayValue> {
        let (element, operands) =
            self.with_operands(|this| this.with_semantics(AccessMode::ByValue, |this| this.compile(expr)))?;
        let extents = self.governing_shape(None, &operands, expr.span())?;
        if extents.len() != expr.rank {
            bail_shape_at!(expr.span(), "rank {} expression with a rank {} shape", expr.rank, extents.len());
        }

        let elem_ty = expr.ty.clone();
        let count = ops::product(self.b, &extents)?;
        let storage = self.b.push_allocmem(elem_ty.clone(), count)?;
        let shape = self.b.push_shape(extents.clone())?;
        let loaded = self.b.push_array_load(storage, Some(shape), types::array_value(expr.rank, elem_ty.clone()))?;
        let (result, _) = build_nest(self.b, &extents, loaded, self.unordered, &mut |b, acc, idx| {
            let point = IterSpace::new(idx.to_vec(), acc);
            let arg_value = element(b, &point)?;
            let value = compile::value_of(b, arg_value, &elem_ty)?;
            let value = b.push_convert(value, elem_ty.clone())?;
            Ok(b.push_array_update(acc, value, idx.to_vec(), vec![])?)
        })?;
        self.b.push_array_merge_store(loaded, result, storage, Some(shape))?;
        Ok(ArrayValue::new(storage, extents))
    }

    // =========================================================================
    // Statement-scoped storage
    // =========================================================================

    /// Release the temporaries of the statement and reset per-statement
    /// state. Masks live until [`ArrayLowering::release_masks`].
    pub fn end_statement(&mut self) -> Result<()> {
        self.free_temps_from(0)?;
        self.operands.clear();
        self.semant = AccessMode::ByValue;
        Ok(())
    }

    pub(crate) fn free_temps_from(&mut self, mark: usize) -> Result<()> {
        let temps = self.temps.split_off(mark);
        for temp in temps.into_iter().rev() {
            trace!("release {:?}", temp);
            match temp {
                Temp::Mem(addr) => self.b.push_freemem(addr)?,
                Temp::Box(desc) => {
                    let elem_ty = types::element_of(self.b.value_type(desc)).cloned().unwrap_or_else(types::unit);
                    let addr = self.b.push_box_addr(desc, types::heap(elem_ty))?;
                    self.b.push_freemem(addr)?;
                }
            }
        }
        Ok(())
    }
}

fn destination_designator(lhs: &Expr) -> Result<&Designator> {
    match &lhs.kind {
        ExprKind::Designator(d) => Ok(d),
        _ => bail_unsupported_at!(lhs.span(), "assignment to a non-designator"),
    }
}

/// Terminate the function and return its body, verified when
/// `options.verify_output` is set.
pub fn finish_function(mut b: FuncBuilder, options: &LoweringOptions) -> Result<FuncBody> {
    if !b.is_current_terminated() {
        b.terminate(Terminator::ReturnUnit)?;
    }
    let body = b.finish()?;
    trace!("lowered {}", body);
    if options.verify_output {
        verify_func(&body).map_err(|errors| {
            CompilerError::Verify(errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))
        })?;
    }
    Ok(body)
}
