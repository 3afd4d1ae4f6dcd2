//! Array constructors.
//!
//! A constructor whose items are all scalars has a known size and is stored
//! into a buffer of exactly that size. Any other constructor appends into a
//! growable buffer: before each append the capacity is checked and, when
//! short, the buffer is reallocated to the larger of the needed size and
//! twice the old capacity. Deferred-length character elements are measured
//! as they are appended, so the byte size passed to the allocator follows
//! the run-time length.

use log::{debug, trace};

use crate::ast::{AcItem, Expr, ExprKind};
use crate::error::{CompilerError, Result};
use crate::mir::ssa::{CmpPredicate, ValueId};
use crate::mir::ssa_builder::FuncBuilder;
use crate::types::{self, Type};
use crate::{bail_unsupported_at, err_unsupported};

use super::exv::{ArrayValue, ExtendedValue};
use super::ops;
use super::semantics::AccessMode;
use super::space::{build_nest, IterSpace};
use super::{compile, ArrayLowering, Temp};

/// Byte size of one constructor element.
enum ElemSize {
    Static(ValueId),
    /// Cell holding the character length of the last element measured.
    Measured(ValueId),
}

/// Cells of a growable constructor buffer.
struct Growable {
    /// Next free position.
    pos: ValueId,
    capacity: ValueId,
    buffer: ValueId,
    elem_ty: Type,
    esize: ElemSize,
}

impl Growable {
    fn heap_ty(&self) -> Type {
        types::heap(self.elem_ty.clone())
    }

    fn measured(&self) -> bool {
        matches!(self.esize, ElemSize::Measured(_))
    }

    /// Record the length of `value` before it is reserved for.
    fn measure(&self, b: &mut FuncBuilder, value: ValueId) -> Result<()> {
        if let ElemSize::Measured(cell) = self.esize {
            let len = b.push_intrinsic("len", vec![value], types::index())?;
            b.push_store(cell, len)?;
        }
        Ok(())
    }

    fn bytes(&self, b: &mut FuncBuilder) -> Result<ValueId> {
        match self.esize {
            ElemSize::Static(size) => Ok(size),
            ElemSize::Measured(cell) => {
                let len = b.push_load(cell, types::index())?;
                ops::element_bytes(b, &self.elem_ty, Some(len))?
                    .ok_or_else(|| err_unsupported!("constructor element of type {:?}", self.elem_ty))
            }
        }
    }

    /// Character length of the elements, when measured at run time.
    fn char_len(&self, b: &mut FuncBuilder) -> Result<Option<ValueId>> {
        match self.esize {
            ElemSize::Static(_) => Ok(None),
            ElemSize::Measured(cell) => Ok(Some(b.push_load(cell, types::index())?)),
        }
    }

    /// Make room for `extra` more elements.
    fn reserve(&self, b: &mut FuncBuilder, extra: ValueId) -> Result<()> {
        let pos = b.push_load(self.pos, types::index())?;
        let capacity = b.push_load(self.capacity, types::index())?;
        let needed = b.push_binop("+", pos, extra, types::index())?;
        let short = b.push_cmp(CmpPredicate::Sgt, needed, capacity)?;
        b.build_if_then_else::<CompilerError>(
            short,
            vec![],
            |b| {
                let two = b.push_index(2)?;
                let doubled = b.push_binop("*", capacity, two, types::index())?;
                let grown = b.push_binop("max", needed, doubled, types::index())?;
                let esize = self.bytes(b)?;
                let bytes = b.push_binop("*", grown, esize, types::index())?;
                let old = b.push_load(self.buffer, self.heap_ty())?;
                let new = b.push_intrinsic("realloc", vec![old, bytes, esize], self.heap_ty())?;
                b.push_store(self.buffer, new)?;
                b.push_store(self.capacity, grown)?;
                Ok(vec![])
            },
            |_| Ok(vec![]),
        )?;
        Ok(())
    }

    /// Store `value` at the next free position, without a capacity check.
    fn append_reserved(&self, b: &mut FuncBuilder, value: ValueId) -> Result<()> {
        let pos = b.push_load(self.pos, types::index())?;
        let buffer = b.push_load(self.buffer, self.heap_ty())?;
        let slot = b.push_array_coor(buffer, None, vec![pos], types::reference(self.elem_ty.clone()))?;
        let value = fit_element(b, value, &self.elem_ty)?;
        b.push_store(slot, value)?;
        let one = b.push_index(1)?;
        let next = b.push_binop("+", pos, one, types::index())?;
        b.push_store(self.pos, next)?;
        Ok(())
    }
}

/// Deferred-length characters keep their own length.
fn fit_element(b: &mut FuncBuilder, value: ValueId, elem_ty: &Type) -> Result<ValueId> {
    if types::is_character(elem_ty) {
        if types::char_len(elem_ty).is_none() {
            return Ok(value);
        }
        Ok(ops::fit_character(b, value, elem_ty, None)?)
    } else {
        Ok(b.push_convert(value, elem_ty.clone())?)
    }
}

impl ArrayLowering<'_> {
    /// Evaluate the constructor `expr` into a rank-1 temporary released at
    /// the end of the statement.
    pub(crate) fn lower_array_ctor(&mut self, expr: &Expr) -> Result<ArrayValue> {
        let ExprKind::ArrayCtor(items) = &expr.kind else {
            panic!("array constructor lowering of a non-constructor at {}", expr.span());
        };
        let elem_ty = expr.ty.clone();
        let scalars_only = items.iter().all(|item| matches!(item, AcItem::Expr(e) if e.rank == 0));
        debug!(
            "array constructor at {}: {} items, {}",
            expr.span(),
            items.len(),
            if scalars_only { "fixed size" } else { "growable" }
        );

        if scalars_only {
            let count = self.b.push_index(items.len() as i64)?;
            let buffer = self.b.push_allocmem(elem_ty.clone(), count)?;
            for (k, item) in items.iter().enumerate() {
                let AcItem::Expr(e) = item else { unreachable!() };
                let value = self.evaluate_scalar_expr(e)?;
                let value = fit_element(self.b, value, &elem_ty)?;
                let k = self.b.push_index(k as i64)?;
                let slot = self.b.push_array_coor(buffer, None, vec![k], types::reference(elem_ty.clone()))?;
                self.b.push_store(slot, value)?;
            }
            self.temps.push(Temp::Mem(buffer));
            return Ok(ArrayValue::new(buffer, vec![count]));
        }

        let capacity0 = self.b.push_index(self.options.array_ctor_initial_capacity.max(1) as i64)?;
        let zero = self.b.push_index(0)?;
        let initial = self.b.push_allocmem(elem_ty.clone(), capacity0)?;
        let esize = match ops::element_bytes(self.b, &elem_ty, None)? {
            Some(size) => ElemSize::Static(size),
            None if types::is_character(&elem_ty) => {
                let cell = self.b.push_alloca(types::index())?;
                self.b.push_store(cell, zero)?;
                ElemSize::Measured(cell)
            }
            None => bail_unsupported_at!(expr.span(), "array constructor of {:?} elements", elem_ty),
        };
        let cells = Growable {
            pos: self.b.push_alloca(types::index())?,
            capacity: self.b.push_alloca(types::index())?,
            buffer: self.b.push_alloca(types::heap(elem_ty.clone()))?,
            esize,
            elem_ty,
        };
        self.b.push_store(cells.pos, zero)?;
        self.b.push_store(cells.capacity, capacity0)?;
        self.b.push_store(cells.buffer, initial)?;

        self.ctor_items(items, &cells)?;

        let buffer = self.b.push_load(cells.buffer, cells.heap_ty())?;
        let count = self.b.push_load(cells.pos, types::index())?;
        self.temps.push(Temp::Mem(buffer));
        Ok(ArrayValue {
            len: cells.char_len(self.b)?,
            ..ArrayValue::new(buffer, vec![count])
        })
    }

    fn ctor_items(&mut self, items: &[AcItem], cells: &Growable) -> Result<()> {
        for item in items {
            match item {
                AcItem::Expr(e) if e.rank == 0 => {
                    let value = self.evaluate_scalar_expr(e)?;
                    cells.measure(self.b, value)?;
                    let one = self.b.push_index(1)?;
                    cells.reserve(self.b, one)?;
                    cells.append_reserved(self.b, value)?;
                }
                AcItem::Expr(e) => self.ctor_array_item(e, cells)?,
                AcItem::ImpliedDo {
                    var,
                    lo,
                    hi,
                    step,
                    items,
                } => {
                    let ty = var.ty.clone();
                    let lo = self.evaluate_scalar_expr(lo)?;
                    let lo = self.b.push_convert(lo, ty.clone())?;
                    let hi = self.evaluate_scalar_expr(hi)?;
                    let hi = self.b.push_convert(hi, ty.clone())?;
                    let step = match step {
                        Some(step) => {
                            let v = self.evaluate_scalar_expr(step)?;
                            self.b.push_convert(v, ty.clone())?
                        }
                        None => self.b.push_int(1, ty.clone())?,
                    };
                    let trips = ops::trip_count(self.b, lo, hi, step, &ty)?;
                    trace!("implied-do over `{}`", var.name);
                    let unit = self.b.push_unit()?;
                    let open = self.b.begin_counted_loop(trips, unit, false)?;
                    let value = ops::nth_value(self.b, lo, open.index(), step, &ty)?;
                    self.symbols.bind(var, ExtendedValue::Scalar(value));
                    let mark = self.temps.len();
                    let inner = self.ctor_items(items, cells);
                    self.symbols.unbind(var);
                    inner?;
                    self.free_temps_from(mark)?;
                    let acc = open.acc();
                    self.b.end_counted_loop(open, acc)?;
                }
            }
        }
        Ok(())
    }

    /// Append every element of a rank>0 item, in array element order.
    /// Measured elements reserve one at a time.
    fn ctor_array_item(&mut self, item: &Expr, cells: &Growable) -> Result<()> {
        let (element, operands) =
            self.with_operands(|this| this.with_semantics(AccessMode::ByValue, |this| this.compile(item)))?;
        let extents = self.governing_shape(None, &operands, item.span())?;
        let measured = cells.measured();
        if !measured {
            let count = ops::product(self.b, &extents)?;
            cells.reserve(self.b, count)?;
        }
        let item_ty = item.ty.clone();
        let unit = self.b.push_unit()?;
        build_nest(self.b, &extents, unit, false, &mut |b, acc, idx| {
            let point = IterSpace::new(idx.to_vec(), acc);
            let arg_value = element(b, &point)?;
            let value = compile::value_of(b, arg_value, &item_ty)?;
            if measured {
                cells.measure(b, value)?;
                let one = b.push_index(1)?;
                cells.reserve(b, one)?;
            }
            cells.append_reserved(b, value)?;
            Ok(acc)
        })?;
        Ok(())
    }
}
