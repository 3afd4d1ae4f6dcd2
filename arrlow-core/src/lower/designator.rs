//! Array designators: resolving the base entity, folding subscripts into
//! per-dimension accesses, and reading elements through the result.

use std::rc::Rc;

use log::trace;

use crate::ast::{Designator, Expr, ExprKind, PartRef, Span, Subscript, Symbol};
use crate::error::Result;
use crate::mir::ssa::{PathComponent, SliceDim, ValueId};
use crate::mir::ssa_builder::{BuilderError, FuncBuilder};
use crate::types::{self, Type};
use crate::{bail_unsupported_at, err_unsupported_at};

use super::compile::{self, Cont};
use super::exv::{ArrayValue, BoxValue, ExtendedValue};
use super::ops;
use super::scalar;
use super::semantics::AccessMode;
use super::shape::ArrayOperand;
use super::space::IterSpace;
use super::{ArrayLowering, Temp};

/// Element value and its type at an iteration point.
type Fetch = Rc<dyn Fn(&mut FuncBuilder, &IterSpace) -> Result<(ValueId, Type)>>;

fn fetch(f: impl Fn(&mut FuncBuilder, &IterSpace) -> Result<(ValueId, Type)> + 'static) -> Fetch {
    Rc::new(f)
}

/// The ranked entity a designator addresses.
#[derive(Debug, Clone)]
pub(crate) struct ArrayBase {
    /// Address (with `shape`) or descriptor.
    pub memref: ValueId,
    pub shape: Option<ValueId>,
    pub extents: Vec<ValueId>,
    pub lbounds: Vec<ValueId>,
    /// Element type of the entity, before any component path.
    pub elem_ty: Type,
    pub may_be_absent: bool,
    pub contiguous: bool,
    /// Run-time character length of a deferred-length element.
    pub len: Option<ValueId>,
}

impl ArrayBase {
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn array_ty(&self) -> Type {
        types::array_value(self.rank(), self.elem_ty.clone())
    }
}

/// How one dimension of the base is walked.
#[derive(Debug, Clone)]
pub(crate) enum DimAccess {
    /// Scalar subscript, zero-based.
    Fixed(ValueId),
    /// `lo:hi:step`; `lo` is zero-based.
    Triplet { lo: ValueId, step: ValueId, extent: ValueId },
    /// Vector subscript read from a contiguous rank-1 source.
    Vector {
        source: ValueId,
        source_ty: Type,
        lb: ValueId,
        extent: ValueId,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct DesignatorPlan {
    pub base: Rc<ArrayBase>,
    pub dims: Vec<DimAccess>,
    /// Path from a base element to the designated part.
    pub path: Vec<PathComponent>,
    pub elem_ty: Type,
    /// Every element of the base, with no component path.
    pub whole: bool,
}

impl DesignatorPlan {
    pub fn whole(base: Rc<ArrayBase>, b: &mut FuncBuilder) -> std::result::Result<Self, BuilderError> {
        let zero = b.push_index(0)?;
        let one = b.push_index(1)?;
        let dims = base
            .extents
            .iter()
            .map(|ext| DimAccess::Triplet {
                lo: zero,
                step: one,
                extent: *ext,
            })
            .collect();
        let elem_ty = base.elem_ty.clone();
        Ok(DesignatorPlan {
            base,
            dims,
            path: vec![],
            elem_ty,
            whole: true,
        })
    }

    pub fn section_extents(&self) -> Vec<ValueId> {
        self.dims
            .iter()
            .filter_map(|d| match d {
                DimAccess::Fixed(_) => None,
                DimAccess::Triplet { extent, .. } | DimAccess::Vector { extent, .. } => Some(*extent),
            })
            .collect()
    }

    /// Run-time length of a designated character element, when the base
    /// carries one and no component path intervenes.
    pub fn char_len(&self) -> Option<ValueId> {
        if self.path.is_empty() {
            self.base.len
        } else {
            None
        }
    }

    pub fn has_vector_subscripts(&self) -> bool {
        self.dims.iter().any(|d| matches!(d, DimAccess::Vector { .. }))
    }

    /// Zero-based positions in the base for the section position `section`.
    pub fn base_indices(&self, b: &mut FuncBuilder, section: &[ValueId]) -> std::result::Result<Vec<ValueId>, BuilderError> {
        let mut section = section.iter();
        let mut indices = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            let idx = match dim {
                DimAccess::Fixed(v) => *v,
                DimAccess::Triplet { lo, step, .. } => {
                    let k = *section.next().expect("section index for a triplet dimension");
                    let offset = b.push_binop("*", k, *step, types::index())?;
                    b.push_binop("+", *lo, offset, types::index())?
                }
                DimAccess::Vector {
                    source,
                    source_ty,
                    lb,
                    ..
                } => {
                    let k = *section.next().expect("section index for a vector dimension");
                    let cell = b.push_array_coor(*source, None, vec![k], types::reference(source_ty.clone()))?;
                    let subscript = b.push_load(cell, source_ty.clone())?;
                    ops::zero_based(b, subscript, *lb)?
                }
            };
            indices.push(idx);
        }
        Ok(indices)
    }

    pub fn element_address(&self, b: &mut FuncBuilder, section: &[ValueId]) -> std::result::Result<ValueId, BuilderError> {
        let indices = self.base_indices(b, section)?;
        let coor = b.push_array_coor(
            self.base.memref,
            self.base.shape,
            indices,
            types::reference(self.base.elem_ty.clone()),
        )?;
        b.push_coordinate_of(coor, self.path.clone(), types::reference(self.elem_ty.clone()))
    }

    /// Descriptor over the designated section of the original storage.
    pub fn embox(&self, b: &mut FuncBuilder) -> std::result::Result<ValueId, BuilderError> {
        assert!(!self.has_vector_subscripts(), "descriptor over a vector-subscripted section");
        let slice = if self.whole {
            None
        } else {
            let dims = self
                .dims
                .iter()
                .map(|d| match d {
                    DimAccess::Fixed(v) => SliceDim::Index(*v),
                    DimAccess::Triplet { lo, step, extent } => SliceDim::Range {
                        start: *lo,
                        extent: *extent,
                        step: *step,
                    },
                    DimAccess::Vector { .. } => unreachable!(),
                })
                .collect();
            Some(b.push_slice(dims)?)
        };
        let rank = self.section_extents().len();
        b.push_embox(
            self.base.memref,
            self.base.shape,
            slice,
            self.path.clone(),
            types::boxed(rank, self.elem_ty.clone()),
        )
    }
}

impl ArrayLowering<'_> {
    /// The ranked entity bound to `sym`.
    pub(crate) fn resolve_symbol_base(&mut self, sym: &Symbol, span: Span) -> Result<ArrayBase> {
        if sym.attrs.assumed_rank {
            bail_unsupported_at!(span, "assumed-rank entity `{}`", sym.name);
        }
        let entity = self
            .symbols
            .lookup(sym)
            .cloned()
            .ok_or_else(|| err_unsupported_at!(span, "symbol `{}` has no storage", sym.name))?;
        if let ExtendedValue::Scalar(_) | ExtendedValue::Addressed { .. } = entity {
            bail_unsupported_at!(span, "`{}` is bound to a scalar", sym.name);
        }
        let (memref, shape) = entity.memref(self.b, &sym.ty)?;
        let extents = entity.extents(self.b, memref)?;
        let lbounds = (0..entity.rank())
            .map(|d| entity.lbound(self.b, d))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ArrayBase {
            memref,
            shape,
            extents,
            lbounds,
            elem_ty: sym.ty.clone(),
            may_be_absent: entity.may_be_absent() || sym.may_be_absent(),
            contiguous: matches!(entity, ExtendedValue::Array(_)) || sym.attrs.contiguous,
            len: entity.char_len(),
        })
    }

    /// Fold the parts of `d` into a plan. `elem_ty` is the type of one
    /// designated element after `extra_path`; `preset` replaces the symbol's
    /// base when the caller resolved it already.
    pub(crate) fn plan_designator(
        &mut self,
        expr: &Expr,
        d: &Designator,
        elem_ty: Type,
        extra_path: Vec<PathComponent>,
        preset: Option<Rc<ArrayBase>>,
    ) -> Result<DesignatorPlan> {
        let span = expr.span();
        let mut parts: &[PartRef] = &d.parts;

        let (base, subs) = if d.base.rank > 0 {
            let element_parent = expr.rank > 0
                && matches!(parts.first(), Some(PartRef::Subscripts(subs))
                    if subs.iter().all(|s| matches!(s, Subscript::Index(_))));
            if element_parent {
                if preset.is_some() {
                    bail_unsupported_at!(span, "component array of an element of `{}` in FORALL", d.base.name);
                }
                let Some(PartRef::Subscripts(subs)) = parts.first() else {
                    unreachable!()
                };
                let mut subscripts = Vec::with_capacity(subs.len());
                for sub in subs {
                    if let Subscript::Index(e) = sub {
                        subscripts.push(self.evaluate_scalar_expr(e)?);
                    }
                }
                let entity = self
                    .symbols
                    .lookup(&d.base)
                    .cloned()
                    .ok_or_else(|| err_unsupported_at!(span, "symbol `{}` has no storage", d.base.name))?;
                let addr = scalar::element_address(self.b, &entity, &d.base.ty, &subscripts)?;
                parts = &parts[1..];
                self.component_base(addr, d.base.ty.clone(), &mut parts, span)?
            } else {
                let base = match preset {
                    Some(base) => base,
                    None => Rc::new(self.resolve_symbol_base(&d.base, span)?),
                };
                let subs = match parts.first() {
                    Some(PartRef::Subscripts(subs)) => {
                        parts = &parts[1..];
                        Some(subs.as_slice())
                    }
                    _ => None,
                };
                (base, subs)
            }
        } else {
            if preset.is_some() {
                bail_unsupported_at!(span, "component array of scalar `{}` in FORALL", d.base.name);
            }
            let addr = match self.symbols.lookup(&d.base).cloned() {
                Some(ExtendedValue::Addressed { addr, .. }) => addr,
                Some(ExtendedValue::Scalar(v)) => {
                    let slot = self.b.push_alloca(d.base.ty.clone())?;
                    self.b.push_store(slot, v)?;
                    slot
                }
                _ => bail_unsupported_at!(span, "scalar `{}` has no addressable storage", d.base.name),
            };
            self.component_base(addr, d.base.ty.clone(), &mut parts, span)?
        };

        let mut dims = Vec::with_capacity(base.rank());
        for dim in 0..base.rank() {
            let access = match subs.and_then(|s| s.get(dim)) {
                None => {
                    let zero = self.b.push_index(0)?;
                    let one = self.b.push_index(1)?;
                    DimAccess::Triplet {
                        lo: zero,
                        step: one,
                        extent: base.extents[dim],
                    }
                }
                Some(Subscript::Index(e)) => {
                    let v = self.evaluate_scalar_expr(e)?;
                    DimAccess::Fixed(ops::zero_based(self.b, v, base.lbounds[dim])?)
                }
                Some(Subscript::Triplet { lo, hi, stride }) => self.triplet(&base, dim, lo, hi, stride)?,
                Some(Subscript::Vector(e)) => {
                    let source = self.materialize(e)?;
                    trace!("vector subscript in dimension {} of `{}`", dim, d.base.name);
                    DimAccess::Vector {
                        source: source.addr,
                        source_ty: e.ty.clone(),
                        lb: base.lbounds[dim],
                        extent: source.extents[0],
                    }
                }
            };
            dims.push(access);
        }

        let mut path = Vec::new();
        let mut part_ty = base.elem_ty.clone();
        for part in parts {
            match part {
                PartRef::Component { index, ty, .. } => {
                    path.push(PathComponent::Field(*index));
                    part_ty = ty.clone();
                }
                PartRef::Subscripts(subs) => {
                    let Some(extents) = types::seq_extents(&part_ty).map(<[usize]>::to_vec) else {
                        bail_unsupported_at!(span, "subscripts on a non-array component");
                    };
                    let mut subscripts = Vec::with_capacity(subs.len());
                    for sub in subs {
                        let Subscript::Index(e) = sub else {
                            bail_unsupported_at!(span, "designator with two ranked parts");
                        };
                        subscripts.push(self.evaluate_scalar_expr(e)?);
                    }
                    path.push(PathComponent::Index(scalar::seq_linear_index(self.b, &extents, &subscripts)?));
                    part_ty = types::element_of(&part_ty).cloned().unwrap_or(part_ty);
                }
            }
        }
        path.extend(extra_path);

        let whole = subs.is_none() && path.is_empty();
        Ok(DesignatorPlan {
            base,
            dims,
            path,
            elem_ty,
            whole,
        })
    }

    fn triplet(
        &mut self,
        base: &ArrayBase,
        dim: usize,
        lo: &Option<Box<Expr>>,
        hi: &Option<Box<Expr>>,
        stride: &Option<Box<Expr>>,
    ) -> Result<DimAccess> {
        let index = types::index();
        let lb = base.lbounds[dim];
        let lo = match lo {
            Some(e) => {
                let v = self.evaluate_scalar_expr(e)?;
                self.b.push_convert(v, index.clone())?
            }
            None => lb,
        };
        let hi = match hi {
            Some(e) => {
                let v = self.evaluate_scalar_expr(e)?;
                self.b.push_convert(v, index.clone())?
            }
            None => {
                let last = self.b.push_binop("+", lb, base.extents[dim], index.clone())?;
                let one = self.b.push_index(1)?;
                self.b.push_binop("-", last, one, index.clone())?
            }
        };
        let step = match stride {
            Some(e) => {
                let v = self.evaluate_scalar_expr(e)?;
                self.b.push_convert(v, index.clone())?
            }
            None => self.b.push_index(1)?,
        };
        let extent = ops::trip_count(self.b, lo, hi, step, &index)?;
        let lo = ops::zero_based(self.b, lo, lb)?;
        Ok(DimAccess::Triplet { lo, step, extent })
    }

    /// Base of the first fixed-size component array reached from the scalar
    /// at `addr`; consumes the parts up to and including its subscripts.
    fn component_base<'p>(
        &mut self,
        addr: ValueId,
        ty: Type,
        parts: &mut &'p [PartRef],
        span: Span,
    ) -> Result<(Rc<ArrayBase>, Option<&'p [Subscript]>)> {
        let mut path = Vec::new();
        let mut part_ty = ty;
        while let Some((part, rest)) = parts.split_first() {
            *parts = rest;
            let PartRef::Component { index, ty, .. } = part else {
                bail_unsupported_at!(span, "subscripts before the ranked component");
            };
            path.push(PathComponent::Field(*index));
            part_ty = ty.clone();
            let Some(extents) = types::seq_extents(&part_ty).map(<[usize]>::to_vec) else {
                continue;
            };
            let memref = self.b.push_coordinate_of(addr, path, types::reference(part_ty.clone()))?;
            let extents = extents
                .iter()
                .map(|e| self.b.push_index(*e as i64))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let shape = self.b.push_shape(extents.clone())?;
            let one = self.b.push_index(1)?;
            let base = ArrayBase {
                memref,
                shape: Some(shape),
                lbounds: vec![one; extents.len()],
                extents,
                elem_ty: types::element_of(&part_ty).cloned().unwrap_or(part_ty),
                may_be_absent: false,
                contiguous: true,
                len: None,
            };
            let subs = match parts.split_first() {
                Some((PartRef::Subscripts(subs), rest)) => {
                    *parts = rest;
                    Some(subs.as_slice())
                }
                _ => None,
            };
            return Ok((Rc::new(base), subs));
        }
        bail_unsupported_at!(span, "designator without a ranked part")
    }

    // =========================================================================
    // Reading designated elements
    // =========================================================================

    /// Continuation reading the elements of `plan` in the ambient mode.
    pub(crate) fn read_plan(&mut self, plan: Rc<DesignatorPlan>) -> Result<Cont> {
        let extents = plan.section_extents();
        if !extents.is_empty() {
            self.push_operand(ArrayOperand {
                extents,
                may_be_absent: plan.base.may_be_absent,
                passed_object: false,
            });
        }
        let mode = self.semantics();
        trace!("designator read as {:?}", mode);
        match mode {
            AccessMode::AddressOpaque => Ok(compile::cont(move |b, pt| {
                let addr = plan.element_address(b, &pt.indices)?;
                Ok(ExtendedValue::Addressed {
                    addr,
                    len: plan.char_len(),
                })
            })),
            AccessMode::BoxedReference => Ok(compile::cont(move |b, pt| {
                let addr = plan.element_address(b, &pt.indices)?;
                let desc = b.push_embox(addr, None, None, vec![], types::boxed(0, plan.elem_ty.clone()))?;
                Ok(ExtendedValue::Boxed(BoxValue {
                    len: plan.char_len(),
                    ..BoxValue::new(desc, 0)
                }))
            })),
            _ => {
                let len = plan.char_len();
                let fetch = self.element_fetch(plan)?;
                if mode == AccessMode::ValueCopyArgument {
                    Ok(compile::cont(move |b, pt| {
                        let (value, ty) = fetch(b, pt)?;
                        let slot = b.push_alloca(ty)?;
                        b.push_store(slot, value)?;
                        Ok(ExtendedValue::Addressed { addr: slot, len })
                    }))
                } else {
                    Ok(compile::cont(move |b, pt| Ok(ExtendedValue::Scalar(fetch(b, pt)?.0))))
                }
            }
        }
    }

    /// Element values of `plan`. A base that may be absent is read through
    /// addresses so nothing touches it outside the guarded iterations;
    /// otherwise one `array_load` is hoisted before the loop.
    fn element_fetch(&mut self, plan: Rc<DesignatorPlan>) -> Result<Fetch> {
        if plan.base.may_be_absent {
            return Ok(fetch(move |b, pt| {
                let addr = plan.element_address(b, &pt.indices)?;
                Ok((b.push_load(addr, plan.elem_ty.clone())?, plan.elem_ty.clone()))
            }));
        }
        let loaded = self
            .b
            .push_array_load(plan.base.memref, plan.base.shape, plan.base.array_ty())?;
        Ok(fetch(move |b, pt| {
            let indices = plan.base_indices(b, &pt.indices)?;
            let value = b.push_array_fetch(loaded, indices, plan.path.clone(), plan.elem_ty.clone())?;
            Ok((value, plan.elem_ty.clone()))
        }))
    }

    /// Continuation over an already evaluated array, read in the ambient mode.
    pub(crate) fn compile_materialized(&mut self, exv: ExtendedValue, elem_ty: &Type) -> Result<Cont> {
        let len = exv.char_len();
        let (memref, shape, extents) = match &exv {
            ExtendedValue::Array(av) => {
                let shape = self.b.push_shape(av.extents.clone())?;
                (av.addr, Some(shape), av.extents.clone())
            }
            ExtendedValue::Boxed(bv) => {
                let extents = (0..bv.rank)
                    .map(|d| self.b.push_box_extent(bv.desc, d as u32))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                (bv.desc, None, extents)
            }
            _ => return Ok(compile::constant(exv)),
        };
        self.push_operand(ArrayOperand {
            extents: extents.clone(),
            may_be_absent: false,
            passed_object: false,
        });
        let elem_ty = elem_ty.clone();
        let ref_ty = types::reference(elem_ty.clone());
        if self.semantics().wants_address() {
            let boxed = self.semantics() == AccessMode::BoxedReference;
            return Ok(compile::cont(move |b, pt| {
                let addr = b.push_array_coor(memref, shape, pt.indices.clone(), ref_ty.clone())?;
                if boxed {
                    let desc = b.push_embox(addr, None, None, vec![], types::boxed(0, elem_ty.clone()))?;
                    return Ok(ExtendedValue::Boxed(BoxValue { len, ..BoxValue::new(desc, 0) }));
                }
                Ok(ExtendedValue::Addressed { addr, len })
            }));
        }
        let loaded = self
            .b
            .push_array_load(memref, shape, types::array_value(extents.len(), elem_ty.clone()))?;
        Ok(compile::cont(move |b, pt| {
            let value = b.push_array_fetch(loaded, pt.indices.clone(), vec![], elem_ty.clone())?;
            Ok(ExtendedValue::Scalar(value))
        }))
    }

    /// Contiguous storage holding the value of a rank>0 expression. Named
    /// contiguous arrays are returned as they are; anything else is
    /// evaluated into a temporary released at the end of the statement.
    pub(crate) fn materialize(&mut self, expr: &Expr) -> Result<ArrayValue> {
        match &expr.kind {
            ExprKind::ArrayCtor(_) => return self.lower_array_ctor(expr),
            ExprKind::Designator(d) if d.parts.is_empty() && !d.base.may_be_absent() => {
                if let Some(ExtendedValue::Array(av)) = self.symbols.lookup(&d.base) {
                    return Ok(av.clone());
                }
            }
            _ => {}
        }
        let av = self.materialize_value(expr)?;
        self.temps.push(Temp::Mem(av.addr));
        Ok(av)
    }

    /// Descriptor for a rank>0 actual. Sections without vector subscripts
    /// describe the original storage; anything else is materialized first.
    pub fn lower_boxed_array(&mut self, expr: &Expr) -> Result<BoxValue> {
        if let ExprKind::Designator(d) = &expr.kind {
            let plan = self.plan_designator(expr, d, expr.ty.clone(), vec![], None)?;
            if !plan.has_vector_subscripts() {
                let desc = plan.embox(self.b)?;
                return Ok(BoxValue {
                    len: plan.char_len(),
                    ..BoxValue::new(desc, expr.rank)
                });
            }
        }
        let av = self.materialize(expr)?;
        let shape = self.b.push_shape(av.extents.clone())?;
        let desc = self
            .b
            .push_embox(av.addr, Some(shape), None, vec![], types::boxed(expr.rank, expr.ty.clone()))?;
        Ok(BoxValue {
            len: av.len,
            ..BoxValue::new(desc, expr.rank)
        })
    }
}
