//! Contiguous actual arguments for explicit-shape and assumed-size dummies.
//!
//! A section that happens to be contiguous is passed by address. Otherwise
//! the elements are copied into a heap temporary before the call and, when
//! the dummy may be modified, copied back after it. Whether a copy was made
//! is a run-time flag, so the copy-out is guarded by it.

use log::trace;

use crate::ast::{Expr, ExprKind};
use crate::error::{CompilerError, Result};
use crate::mir::ssa::ValueId;
use crate::mir::ssa_builder::FuncBuilder;
use crate::types::{self, Type, TypeCategory};

use super::exv::ExtendedValue;
use super::ops;
use super::space::build_nest;
use super::ArrayLowering;

/// What to undo after the call for one copied-in actual.
#[derive(Debug, Clone)]
pub(crate) struct CopyOutPair {
    /// Descriptor of the actual's original storage.
    original: ValueId,
    /// Address passed to the callee.
    temp: ValueId,
    /// True at run time when `temp` is a fresh copy.
    is_temp: ValueId,
    may_modify: bool,
    elem_ty: Type,
    rank: usize,
}

impl ArrayLowering<'_> {
    /// Address of contiguous storage holding `actual`, and the copy-out to
    /// run after the call when a copy may have been made.
    pub(crate) fn copy_in(&mut self, actual: &Expr, may_modify: bool) -> Result<(ValueId, Option<CopyOutPair>)> {
        let ExprKind::Designator(d) = &actual.kind else {
            let av = self.materialize(actual)?;
            return Ok((av.addr, None));
        };
        let entity = self.symbols.lookup(&d.base).cloned();
        if d.parts.is_empty() && !d.base.may_be_absent() {
            if let Some(ExtendedValue::Array(av)) = &entity {
                trace!("`{}` passed in place", d.base.name);
                return Ok((av.addr, None));
            }
        }
        let may_be_absent = d.base.may_be_absent() || entity.as_ref().is_some_and(ExtendedValue::may_be_absent);

        let elem_ty = actual.ty.clone();
        let rank = actual.rank;
        let desc = self.lower_boxed_array(actual)?.desc;
        let assume = self.options.assume_contiguous_boxes;
        let (addr, is_temp) = if may_be_absent {
            let present = self.b.push_is_present(desc)?;
            let ref_ty = types::reference(elem_ty.clone());
            let results = self.b.build_if_then_else::<CompilerError>(
                present,
                vec![ref_ty.clone(), types::bool_type()],
                |b| {
                    let (addr, is_temp) = contiguous_or_copy(b, desc, &elem_ty, rank, assume)?;
                    Ok(vec![addr, is_temp])
                },
                |b| Ok(vec![b.push_absent(ref_ty.clone())?, b.push_bool(false)?]),
            )?;
            (results[0], results[1])
        } else {
            contiguous_or_copy(self.b, desc, &elem_ty, rank, assume)?
        };
        trace!("copy-in of `{}`, rank {}, may modify: {}", d.base.name, rank, may_modify);
        Ok((
            addr,
            Some(CopyOutPair {
                original: desc,
                temp: addr,
                is_temp,
                may_modify,
                elem_ty,
                rank,
            }),
        ))
    }

    /// Write a copied actual back and release the copy.
    pub(crate) fn copy_out(&mut self, pair: CopyOutPair) -> Result<()> {
        let CopyOutPair {
            original,
            temp,
            is_temp,
            may_modify,
            elem_ty,
            rank,
        } = pair;
        self.b.build_if_then_else::<CompilerError>(
            is_temp,
            vec![],
            |b| {
                if may_modify {
                    let extents = box_extents(b, original, rank)?;
                    let shape = b.push_shape(extents.clone())?;
                    copy_elements(b, (temp, Some(shape)), (original, None), &extents, &elem_ty)?;
                }
                b.push_freemem(temp)?;
                Ok(vec![])
            },
            |_| Ok(vec![]),
        )?;
        Ok(())
    }
}

fn box_extents(b: &mut FuncBuilder, desc: ValueId, rank: usize) -> Result<Vec<ValueId>> {
    let extents = (0..rank)
        .map(|d| b.push_box_extent(desc, d as u32))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(extents)
}

/// Base address of `desc` when its elements are contiguous, otherwise of a
/// fresh copy. The second value is true when a copy was made.
fn contiguous_or_copy(
    b: &mut FuncBuilder,
    desc: ValueId,
    elem_ty: &Type,
    rank: usize,
    assume_contiguous: bool,
) -> Result<(ValueId, ValueId)> {
    let ref_ty = types::reference(elem_ty.clone());
    if assume_contiguous {
        let addr = b.push_box_addr(desc, ref_ty)?;
        return Ok((addr, b.push_bool(false)?));
    }
    let contiguous = b.push_intrinsic("is_contiguous", vec![desc], types::bool_type())?;
    let results = b.build_if_then_else::<CompilerError>(
        contiguous,
        vec![ref_ty.clone(), types::bool_type()],
        |b| Ok(vec![b.push_box_addr(desc, ref_ty.clone())?, b.push_bool(false)?]),
        |b| {
            let extents = box_extents(b, desc, rank)?;
            let count = ops::product(b, &extents)?;
            let temp = b.push_allocmem(elem_ty.clone(), count)?;
            let shape = b.push_shape(extents.clone())?;
            copy_elements(b, (desc, None), (temp, Some(shape)), &extents, elem_ty)?;
            Ok(vec![b.push_convert(temp, ref_ty.clone())?, b.push_bool(true)?])
        },
    )?;
    Ok((results[0], results[1]))
}

/// Copy every element of `src` into `dst`. Each side is a memref with its
/// shape, or a descriptor with no shape. Derived and character elements go
/// through the runtime `assign` entry point.
fn copy_elements(
    b: &mut FuncBuilder,
    src: (ValueId, Option<ValueId>),
    dst: (ValueId, Option<ValueId>),
    extents: &[ValueId],
    elem_ty: &Type,
) -> Result<()> {
    let rank = extents.len();
    if matches!(types::category(elem_ty), TypeCategory::Derived | TypeCategory::Character) {
        let box_ty = types::boxed(rank, elem_ty.clone());
        let mut as_box = |(memref, shape): (ValueId, Option<ValueId>)| match shape {
            Some(shape) => b.push_embox(memref, Some(shape), None, vec![], box_ty.clone()),
            None => Ok(memref),
        };
        let src_box = as_box(src)?;
        let dst_box = as_box(dst)?;
        b.push_void_intrinsic("assign", vec![dst_box, src_box])?;
        return Ok(());
    }

    let array_ty = types::array_value(rank, elem_ty.clone());
    let source = b.push_array_load(src.0, src.1, array_ty.clone())?;
    let target = b.push_array_load(dst.0, dst.1, array_ty)?;
    let (result, _) = build_nest(b, extents, target, true, &mut |b, acc, idx| {
        let value = b.push_array_fetch(source, idx.to_vec(), vec![], elem_ty.clone())?;
        Ok(b.push_array_update(acc, value, idx.to_vec(), vec![])?)
    })?;
    b.push_array_merge_store(target, result, dst.0, dst.1)?;
    Ok(())
}
