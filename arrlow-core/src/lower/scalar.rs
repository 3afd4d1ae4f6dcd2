//! Scalar (rank-0) expression lowering.
//!
//! Array lowering delegates every subscript, bound and loop-invariant operand
//! to a [`ScalarLowering`]. The default implementation covers the expression
//! forms that do not touch ranked entities.

use crate::ast::{Designator, Expr, ExprKind, Literal, Passing, PartRef, ProcDesignator, ProcRef, Span, Subscript};
use crate::error::Result;
use crate::mir::ssa::{PathComponent, ValueId};
use crate::mir::ssa_builder::{BuilderError, FuncBuilder};
use crate::types::{self, Type};
use crate::{bail_unsupported_at, err_unsupported_at};

use super::exv::{ExtendedValue, SymbolMap};
use super::ops;

pub trait ScalarLowering {
    /// Evaluate a rank-0 expression to a value.
    fn evaluate_scalar(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ExtendedValue>;

    /// Evaluate a rank-0 designator to the address of its storage. Must not
    /// allocate array storage.
    fn evaluate_address(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ExtendedValue>;
}

#[derive(Debug, Default)]
pub struct DefaultScalarLowering;

impl DefaultScalarLowering {
    pub fn new() -> Self {
        DefaultScalarLowering
    }

    fn value(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ValueId> {
        Ok(self.evaluate_scalar(b, symbols, expr)?.base())
    }

    fn literal(&mut self, b: &mut FuncBuilder, lit: &Literal, ty: &Type) -> Result<ValueId> {
        Ok(match lit {
            Literal::Int(v) => b.push_int(*v, ty.clone())?,
            Literal::Real(v) => b.push_float(*v, ty.clone())?,
            Literal::Complex(re, im) => b.push_complex(*re, *im, ty.clone())?,
            Literal::Logical(v) => {
                let flag = b.push_bool(*v)?;
                b.push_convert(flag, ty.clone())?
            }
            Literal::Char(s) => b.push_string(s, ty.clone())?,
        })
    }

    fn designator_address(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, d: &Designator, span: Span) -> Result<ValueId> {
        let entity = symbols
            .lookup(&d.base)
            .ok_or_else(|| err_unsupported_at!(span, "symbol `{}` has no storage", d.base.name))?
            .clone();
        let mut parts = d.parts.iter();
        let base = match &entity {
            ExtendedValue::Scalar(v) => {
                let slot = b.push_alloca(d.base.ty.clone())?;
                b.push_store(slot, *v)?;
                slot
            }
            ExtendedValue::Addressed { addr, .. } => *addr,
            _ => {
                let Some(PartRef::Subscripts(subs)) = parts.next() else {
                    bail_unsupported_at!(span, "whole array `{}` in a scalar context", d.base.name);
                };
                let mut subscripts = Vec::with_capacity(subs.len());
                for sub in subs {
                    let Subscript::Index(e) = sub else {
                        bail_unsupported_at!(span, "section of `{}` in a scalar context", d.base.name);
                    };
                    subscripts.push(self.value(b, symbols, e)?);
                }
                element_address(b, &entity, &d.base.ty, &subscripts)?
            }
        };

        let mut elem_ty = d.base.ty.clone();
        let mut path = Vec::new();
        for part in parts {
            match part {
                PartRef::Component { index, ty, .. } => {
                    path.push(PathComponent::Field(*index));
                    elem_ty = ty.clone();
                }
                PartRef::Subscripts(subs) => {
                    let Some(extents) = types::seq_extents(&elem_ty).map(<[usize]>::to_vec) else {
                        bail_unsupported_at!(span, "subscripts on a non-array component");
                    };
                    let mut subscripts = Vec::with_capacity(subs.len());
                    for sub in subs {
                        let Subscript::Index(e) = sub else {
                            bail_unsupported_at!(span, "component section in a scalar context");
                        };
                        subscripts.push(self.value(b, symbols, e)?);
                    }
                    path.push(PathComponent::Index(seq_linear_index(b, &extents, &subscripts)?));
                    elem_ty = types::element_of(&elem_ty).cloned().unwrap_or(elem_ty);
                }
            }
        }
        Ok(b.push_coordinate_of(base, path, types::reference(elem_ty))?)
    }

    fn call(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, pr: &ProcRef, ty: &Type, span: Span) -> Result<ValueId> {
        match &pr.proc {
            ProcDesignator::Intrinsic(name) if ops::is_elemental_intrinsic(name) => {
                let mut args = Vec::with_capacity(pr.args.len());
                for arg in pr.args.iter().flatten() {
                    args.push(self.value(b, symbols, arg)?);
                }
                Ok(ops::elemental_intrinsic(b, name, &args, ty)?)
            }
            ProcDesignator::Intrinsic(name) => {
                bail_unsupported_at!(span, "intrinsic `{}` with scalar arguments", name)
            }
            ProcDesignator::User(iface) => {
                let mut args = Vec::with_capacity(pr.args.len());
                for (actual, dummy) in pr.args.iter().zip(&iface.dummies) {
                    let arg = match actual {
                        None => b.push_absent(types::reference(types::unit()))?,
                        Some(e) => match dummy.passing {
                            Passing::Value => self.value(b, symbols, e)?,
                            Passing::Ref => self.address_or_temp(b, symbols, e)?,
                            Passing::Box => {
                                let addr = self.address_or_temp(b, symbols, e)?;
                                b.push_embox(addr, None, None, vec![], types::boxed(0, e.ty.clone()))?
                            }
                        },
                    };
                    args.push(arg);
                }
                match &iface.result {
                    Some(_) => Ok(b.push_call(&iface.name, args, ty.clone())?),
                    None => bail_unsupported_at!(span, "subroutine `{}` referenced as a function", iface.name),
                }
            }
        }
    }

    /// Address of a designator, or of a fresh temporary holding the value of
    /// any other expression.
    fn address_or_temp(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ValueId> {
        if let ExprKind::Designator(_) = expr.kind {
            return Ok(self.evaluate_address(b, symbols, expr)?.base());
        }
        let v = self.value(b, symbols, expr)?;
        let slot = b.push_alloca(expr.ty.clone())?;
        b.push_store(slot, v)?;
        Ok(slot)
    }
}

impl ScalarLowering for DefaultScalarLowering {
    fn evaluate_scalar(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ExtendedValue> {
        let ty = &expr.ty;
        let v = match &expr.kind {
            ExprKind::Literal(lit) => self.literal(b, lit, ty)?,
            ExprKind::Designator(d) => match symbols.lookup(&d.base) {
                Some(ExtendedValue::Scalar(v)) if d.parts.is_empty() => *v,
                _ => {
                    let addr = self.designator_address(b, symbols, d, expr.span())?;
                    b.push_load(addr, ty.clone())?
                }
            },
            ExprKind::Unary { op, operand } => {
                let v = self.value(b, symbols, operand)?;
                ops::unary(b, *op, v, ty)?
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.value(b, symbols, lhs)?;
                let r = self.value(b, symbols, rhs)?;
                ops::binary(b, *op, l, r, ty)?
            }
            ExprKind::Relational { op, lhs, rhs } => {
                let l = self.value(b, symbols, lhs)?;
                let r = self.value(b, symbols, rhs)?;
                ops::relational(b, *op, l, r, &lhs.ty, ty)?
            }
            ExprKind::Logical { op, lhs, rhs } => {
                let l = self.value(b, symbols, lhs)?;
                let r = self.value(b, symbols, rhs)?;
                ops::logical(b, *op, l, r, ty)?
            }
            ExprKind::Convert(inner) => {
                let v = self.value(b, symbols, inner)?;
                b.push_convert(v, ty.clone())?
            }
            ExprKind::Parentheses(inner) => self.value(b, symbols, inner)?,
            ExprKind::ProcRef(pr) => self.call(b, symbols, pr, ty, expr.span())?,
            ExprKind::Substring { base, lo, hi } => {
                let s = self.value(b, symbols, base)?;
                let lo = lo.as_deref().map(|e| self.value(b, symbols, e)).transpose()?;
                let hi = hi.as_deref().map(|e| self.value(b, symbols, e)).transpose()?;
                let (start, len) = substring_bounds(b, &base.ty, Some(s), lo, hi, expr.span())?;
                b.push_intrinsic("substr", vec![s, start, len], ty.clone())?
            }
            ExprKind::ComplexPart { base, imag } => {
                let v = self.value(b, symbols, base)?;
                b.push_project(v, u32::from(*imag), ty.clone())?
            }
            ExprKind::StructCtor { fields, .. } => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.value(b, symbols, field)?);
                }
                b.push_tuple(values, ty.clone())?
            }
            ExprKind::ArrayCtor(_) | ExprKind::DescriptorInquiry { .. } => {
                bail_unsupported_at!(expr.span(), "array-valued expression in a scalar context")
            }
        };
        Ok(ExtendedValue::Scalar(v))
    }

    fn evaluate_address(&mut self, b: &mut FuncBuilder, symbols: &SymbolMap, expr: &Expr) -> Result<ExtendedValue> {
        match &expr.kind {
            ExprKind::Designator(d) => {
                let addr = self.designator_address(b, symbols, d, expr.span())?;
                Ok(ExtendedValue::Addressed { addr, len: None })
            }
            _ => bail_unsupported_at!(expr.span(), "address of a non-designator expression"),
        }
    }
}

// =============================================================================
// Helpers shared with array lowering
// =============================================================================

/// Address of one element of an array entity, from one-based-or-declared
/// subscripts.
pub(crate) fn element_address(
    b: &mut FuncBuilder,
    entity: &ExtendedValue,
    elem_ty: &Type,
    subscripts: &[ValueId],
) -> std::result::Result<ValueId, BuilderError> {
    let (memref, shape) = entity.memref(b, elem_ty)?;
    let mut indices = Vec::with_capacity(subscripts.len());
    for (dim, sub) in subscripts.iter().enumerate() {
        let lb = entity.lbound(b, dim)?;
        indices.push(ops::zero_based(b, *sub, lb)?);
    }
    b.push_array_coor(memref, shape, indices, types::reference(elem_ty.clone()))
}

/// Linear position inside a fixed-size component array from one-based
/// subscripts, first subscript varying fastest.
pub(crate) fn seq_linear_index(
    b: &mut FuncBuilder,
    extents: &[usize],
    subscripts: &[ValueId],
) -> std::result::Result<ValueId, BuilderError> {
    let mut linear = b.push_index(0)?;
    let mut stride = 1i64;
    for (sub, extent) in subscripts.iter().zip(extents) {
        let one = b.push_index(1)?;
        let pos = ops::zero_based(b, *sub, one)?;
        let mult = b.push_index(stride)?;
        let scaled = b.push_binop("*", pos, mult, types::index())?;
        linear = b.push_binop("+", linear, scaled, types::index())?;
        stride *= *extent as i64;
    }
    Ok(linear)
}

/// Zero-based start and length of `base(lo:hi)` from already evaluated
/// bounds. Missing bounds default to 1 and the length of the base.
pub(crate) fn substring_bounds(
    b: &mut FuncBuilder,
    base_ty: &Type,
    base_value: Option<ValueId>,
    lo: Option<ValueId>,
    hi: Option<ValueId>,
    span: Span,
) -> Result<(ValueId, ValueId)> {
    let lo = match lo {
        Some(v) => b.push_convert(v, types::index())?,
        None => b.push_index(1)?,
    };
    let hi = match hi {
        Some(v) => b.push_convert(v, types::index())?,
        None => match (types::char_len(base_ty), base_value) {
            (Some(n), _) => b.push_index(n as i64)?,
            (None, Some(value)) => b.push_intrinsic("len", vec![value], types::index())?,
            (None, None) => bail_unsupported_at!(span, "open-ended substring of a deferred-length array"),
        },
    };
    let one = b.push_index(1)?;
    let start = b.push_binop("-", lo, one, types::index())?;
    let len = b.push_binop("-", hi, lo, types::index())?;
    let len = b.push_binop("+", len, one, types::index())?;
    let zero = b.push_index(0)?;
    let len = b.push_binop("max", len, zero, types::index())?;
    Ok((start, len))
}
