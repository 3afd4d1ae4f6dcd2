//! Compiling expressions into element continuations.

use std::rc::Rc;

use log::trace;

use crate::ast::{references_array, Expr, ExprKind, InquiryKind, ProcDesignator, Symbol};
use crate::error::Result;
use crate::mir::ssa::{PathComponent, ValueId};
use crate::mir::ssa_builder::FuncBuilder;
use crate::types::{self, Type};
use crate::{bail_unsupported, bail_unsupported_at};

use super::exv::{ArrayValue, ExtendedValue};
use super::ops;
use super::scalar;
use super::semantics::AccessMode;
use super::space::IterSpace;
use super::{ArrayLowering, Temp};

/// Element producer: emits the per-element code of an expression at an
/// iteration point and returns the element.
pub type Cont = Rc<dyn Fn(&mut FuncBuilder, &IterSpace) -> Result<ExtendedValue>>;

pub(crate) fn cont(f: impl Fn(&mut FuncBuilder, &IterSpace) -> Result<ExtendedValue> + 'static) -> Cont {
    Rc::new(f)
}

/// A loop-invariant element.
pub(crate) fn constant(exv: ExtendedValue) -> Cont {
    cont(move |_, _| Ok(exv.clone()))
}

/// The value of an element of type `ty`, loading through addresses.
pub(crate) fn value_of(b: &mut FuncBuilder, exv: ExtendedValue, ty: &Type) -> Result<ValueId> {
    match exv {
        ExtendedValue::Scalar(v) => Ok(v),
        ExtendedValue::Addressed { addr, .. } => Ok(b.push_load(addr, ty.clone())?),
        ExtendedValue::Boxed(bv) if bv.rank == 0 => {
            let addr = b.push_box_addr(bv.desc, types::reference(ty.clone()))?;
            Ok(b.push_load(addr, ty.clone())?)
        }
        other => bail_unsupported!("rank {} value used as an element", other.rank()),
    }
}

impl ArrayLowering<'_> {
    /// Compile `expr` in the ambient access mode. Rank-0 expressions are
    /// evaluated once, here, and become invariants of the nest.
    pub(crate) fn compile(&mut self, expr: &Expr) -> Result<Cont> {
        if expr.rank == 0 {
            let exv = self.evaluate_scalar_exv(expr)?;
            return Ok(constant(exv));
        }
        self.compile_node(expr)
    }

    /// Compile an operand whose elements are only read.
    fn compile_value(&mut self, expr: &Expr) -> Result<Cont> {
        self.with_semantics(AccessMode::ByValue, |this| this.compile(expr))
    }

    pub(crate) fn evaluate_scalar_exv(&mut self, expr: &Expr) -> Result<ExtendedValue> {
        if !references_array(expr) || matches!(expr.kind, ExprKind::Designator(_)) {
            return self.scalars.evaluate_scalar(self.b, self.symbols, expr);
        }
        // Scalar expressions over arrays, like `sum(a) + 1`.
        let element = self.with_semantics(AccessMode::ByValue, |this| this.compile_node(expr))?;
        element(self.b, &IterSpace::empty())
    }

    pub(crate) fn evaluate_scalar_expr(&mut self, expr: &Expr) -> Result<ValueId> {
        let exv = self.evaluate_scalar_exv(expr)?;
        value_of(self.b, exv, &expr.ty)
    }

    fn compile_node(&mut self, expr: &Expr) -> Result<Cont> {
        let ty = expr.ty.clone();
        match &expr.kind {
            ExprKind::Designator(d) => {
                let plan = self.plan_designator(expr, d, ty, vec![], None)?;
                self.read_plan(Rc::new(plan))
            }
            ExprKind::Literal(_) => {
                let exv = self.scalars.evaluate_scalar(self.b, self.symbols, expr)?;
                Ok(constant(exv))
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let inner = self.compile_value(operand)?;
                let operand_ty = operand.ty.clone();
                Ok(cont(move |b, pt| {
                    let arg_value = inner(b, pt)?;
                    let v = value_of(b, arg_value, &operand_ty)?;
                    Ok(ExtendedValue::Scalar(ops::unary(b, op, v, &ty)?))
                }))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let (l, r, lty, rty) = self.compile_pair(lhs, rhs)?;
                Ok(cont(move |b, pt| {
                    let arg_value = l(b, pt)?;
                    let l = value_of(b, arg_value, &lty)?;
                    let arg_value = r(b, pt)?;
                    let r = value_of(b, arg_value, &rty)?;
                    Ok(ExtendedValue::Scalar(ops::binary(b, op, l, r, &ty)?))
                }))
            }
            ExprKind::Relational { op, lhs, rhs } => {
                let op = *op;
                let (l, r, lty, rty) = self.compile_pair(lhs, rhs)?;
                Ok(cont(move |b, pt| {
                    let arg_value = l(b, pt)?;
                    let l = value_of(b, arg_value, &lty)?;
                    let arg_value = r(b, pt)?;
                    let r = value_of(b, arg_value, &rty)?;
                    Ok(ExtendedValue::Scalar(ops::relational(b, op, l, r, &lty, &ty)?))
                }))
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let op = *op;
                let (l, r, lty, rty) = self.compile_pair(lhs, rhs)?;
                Ok(cont(move |b, pt| {
                    let arg_value = l(b, pt)?;
                    let l = value_of(b, arg_value, &lty)?;
                    let arg_value = r(b, pt)?;
                    let r = value_of(b, arg_value, &rty)?;
                    Ok(ExtendedValue::Scalar(ops::logical(b, op, l, r, &ty)?))
                }))
            }
            ExprKind::Convert(inner) => {
                let f = self.compile_value(inner)?;
                let inner_ty = inner.ty.clone();
                Ok(cont(move |b, pt| {
                    let arg_value = f(b, pt)?;
                    let v = value_of(b, arg_value, &inner_ty)?;
                    Ok(ExtendedValue::Scalar(b.push_convert(v, ty.clone())?))
                }))
            }
            ExprKind::Parentheses(inner) => {
                if !self.semantics().wants_address() {
                    return self.compile_value(inner);
                }
                // A parenthesized actual is a new entity: always pass a copy,
                // even of a named contiguous array.
                let av = self.materialize_value(inner)?;
                self.temps.push(Temp::Mem(av.addr));
                self.compile_materialized(ExtendedValue::Array(av), &ty)
            }
            ExprKind::ProcRef(pr) => match &pr.proc {
                ProcDesignator::Intrinsic(name) if ops::is_elemental_intrinsic(name) => {
                    let mut args = Vec::with_capacity(pr.args.len());
                    for arg in pr.args.iter().flatten() {
                        args.push((self.compile_value(arg)?, arg.ty.clone()));
                    }
                    let name = name.clone();
                    Ok(cont(move |b, pt| {
                        let mut values = Vec::with_capacity(args.len());
                        for (arg, arg_ty) in &args {
                            let arg_value = arg(b, pt)?;
                            values.push(value_of(b, arg_value, arg_ty)?);
                        }
                        Ok(ExtendedValue::Scalar(ops::elemental_intrinsic(b, &name, &values, &ty)?))
                    }))
                }
                ProcDesignator::User(iface) if iface.elemental => self.lower_elemental_call(expr),
                _ => {
                    let exv = self.lower_transformational_call(expr)?;
                    self.compile_materialized(exv, &ty)
                }
            },
            ExprKind::ArrayCtor(_) => {
                let av = self.lower_array_ctor(expr)?;
                self.compile_materialized(ExtendedValue::Array(av), &ty)
            }
            ExprKind::Substring { base, lo, hi } => self.compile_substring(expr, base, lo.as_deref(), hi.as_deref()),
            ExprKind::ComplexPart { base, imag } => {
                if let ExprKind::Designator(d) = &base.kind {
                    let plan = self.plan_designator(base, d, ty, vec![PathComponent::ComplexPart(*imag)], None)?;
                    return self.read_plan(Rc::new(plan));
                }
                let f = self.compile_value(base)?;
                let base_ty = base.ty.clone();
                let index = u32::from(*imag);
                Ok(cont(move |b, pt| {
                    let arg_value = f(b, pt)?;
                    let v = value_of(b, arg_value, &base_ty)?;
                    Ok(ExtendedValue::Scalar(b.push_project(v, index, ty.clone())?))
                }))
            }
            ExprKind::StructCtor { fields, .. } => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    parts.push((self.compile_value(field)?, field.ty.clone()));
                }
                Ok(cont(move |b, pt| {
                    let mut values = Vec::with_capacity(parts.len());
                    for (part, part_ty) in &parts {
                        let arg_value = part(b, pt)?;
                        values.push(value_of(b, arg_value, part_ty)?);
                    }
                    Ok(ExtendedValue::Scalar(b.push_tuple(values, ty.clone())?))
                }))
            }
            ExprKind::DescriptorInquiry { kind, base, dim } => {
                let exv = self.descriptor_inquiry(expr, *kind, base, *dim)?;
                if expr.rank == 0 {
                    return Ok(constant(exv));
                }
                self.compile_materialized(exv, &ty)
            }
        }
    }

    fn compile_pair(&mut self, lhs: &Expr, rhs: &Expr) -> Result<(Cont, Cont, Type, Type)> {
        let l = self.compile_value(lhs)?;
        let r = self.compile_value(rhs)?;
        Ok((l, r, lhs.ty.clone(), rhs.ty.clone()))
    }

    /// `base(lo:hi)` element-wise. With a designator base and a length known
    /// before the loop, the substring is a path into the base's elements;
    /// otherwise each element value is cut at run time.
    fn compile_substring(&mut self, expr: &Expr, base: &Expr, lo: Option<&Expr>, hi: Option<&Expr>) -> Result<Cont> {
        let lo = lo.map(|e| self.evaluate_scalar_expr(e)).transpose()?;
        let hi = hi.map(|e| self.evaluate_scalar_expr(e)).transpose()?;
        let span = expr.span();
        if let ExprKind::Designator(d) = &base.kind {
            if hi.is_some() || types::char_len(&base.ty).is_some() {
                let (start, len) = scalar::substring_bounds(self.b, &base.ty, None, lo, hi, span)?;
                let path = vec![PathComponent::Substring { start, len }];
                let plan = self.plan_designator(base, d, expr.ty.clone(), path, None)?;
                return self.read_plan(Rc::new(plan));
            }
        }
        let f = self.compile_value(base)?;
        let base_ty = base.ty.clone();
        let ty = expr.ty.clone();
        Ok(cont(move |b, pt| {
            let arg_value = f(b, pt)?;
            let s = value_of(b, arg_value, &base_ty)?;
            let (start, len) = scalar::substring_bounds(b, &base_ty, Some(s), lo, hi, span)?;
            Ok(ExtendedValue::Scalar(b.push_intrinsic("substr", vec![s, start, len], ty.clone())?))
        }))
    }

    /// `lbound`, `ubound`, `size`, `shape`-like queries of a named array.
    /// Without `dim`, bound queries produce a rank-1 temporary.
    fn descriptor_inquiry(
        &mut self,
        expr: &Expr,
        kind: InquiryKind,
        base: &Symbol,
        dim: Option<usize>,
    ) -> Result<ExtendedValue> {
        let span = expr.span();
        let ty = expr.ty.clone();
        if base.attrs.assumed_rank {
            bail_unsupported_at!(span, "inquiry on assumed-rank `{}`", base.name);
        }
        if kind == InquiryKind::Len {
            if let Some(len) = types::char_len(&base.ty) {
                return Ok(ExtendedValue::Scalar(self.b.push_int(len as i64, ty)?));
            }
            let Some(len) = self.symbols.lookup(base).and_then(ExtendedValue::char_len) else {
                bail_unsupported_at!(span, "length of deferred-length `{}`", base.name);
            };
            return Ok(ExtendedValue::Scalar(self.b.push_convert(len, ty)?));
        }
        let array = self.resolve_symbol_base(base, span)?;
        trace!("{:?} of `{}` (dim {:?})", kind, base.name, dim);
        match dim {
            Some(k) => {
                if k == 0 || k > array.rank() {
                    bail_unsupported_at!(span, "dimension {} of rank {} `{}`", k, array.rank(), base.name);
                }
                let v = self.bound(kind, array.lbounds[k - 1], array.extents[k - 1])?;
                Ok(ExtendedValue::Scalar(self.b.push_convert(v, ty)?))
            }
            None if kind == InquiryKind::Size => {
                let n = ops::product(self.b, &array.extents)?;
                Ok(ExtendedValue::Scalar(self.b.push_convert(n, ty)?))
            }
            None => {
                let rank = self.b.push_index(array.rank() as i64)?;
                let storage = self.b.push_allocmem(ty.clone(), rank)?;
                for d in 0..array.rank() {
                    let v = self.bound(kind, array.lbounds[d], array.extents[d])?;
                    let v = self.b.push_convert(v, ty.clone())?;
                    let pos = self.b.push_index(d as i64)?;
                    let slot = self.b.push_array_coor(storage, None, vec![pos], types::reference(ty.clone()))?;
                    self.b.push_store(slot, v)?;
                }
                self.temps.push(Temp::Mem(storage));
                Ok(ExtendedValue::Array(ArrayValue::new(storage, vec![rank])))
            }
        }
    }

    fn bound(&mut self, kind: InquiryKind, lb: ValueId, extent: ValueId) -> Result<ValueId> {
        Ok(match kind {
            InquiryKind::LBound => lb,
            InquiryKind::UBound => {
                let past = self.b.push_binop("+", lb, extent, types::index())?;
                let one = self.b.push_index(1)?;
                self.b.push_binop("-", past, one, types::index())?
            }
            InquiryKind::Extent | InquiryKind::Size | InquiryKind::Len => extent,
        })
    }
}
