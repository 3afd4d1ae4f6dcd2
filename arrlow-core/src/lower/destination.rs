//! The assignment target: one load before the nest, one merge after it.

use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{Expr, ProcInterface};
use crate::bail_shape_at;
use crate::error::{CompilerError, Result};
use crate::mir::ssa::{CmpPredicate, ValueId};
use crate::mir::ssa_builder::FuncBuilder;
use crate::types;

use super::compile::{self, Cont};
use super::designator::{ArrayBase, DesignatorPlan};
use super::exv::ExtendedValue;
use super::ops;
use super::semantics::AccessMode;
use super::space::{build_nest, IterSpace};
use super::{destination_designator, ArrayLowering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unloaded,
    Loaded(ValueId),
    Merged,
}

/// Load/merge bookkeeping of one assignment target. Loading twice or
/// merging out of order is a lowering bug and panics.
#[derive(Debug)]
pub(crate) struct Destination {
    base: Rc<ArrayBase>,
    state: State,
}

impl Destination {
    pub fn new(base: Rc<ArrayBase>) -> Self {
        Destination {
            base,
            state: State::Unloaded,
        }
    }

    /// Snapshot the whole target as an array value.
    pub fn load(&mut self, b: &mut FuncBuilder) -> Result<ValueId> {
        if self.state != State::Unloaded {
            panic!("destination loaded twice");
        }
        let loaded = b.push_array_load(self.base.memref, self.base.shape, self.base.array_ty())?;
        self.state = State::Loaded(loaded);
        Ok(loaded)
    }

    /// The single visible write of `result` into the target.
    pub fn merge(&mut self, b: &mut FuncBuilder, result: ValueId) -> Result<()> {
        let original = match std::mem::replace(&mut self.state, State::Merged) {
            State::Loaded(v) => v,
            State::Unloaded => panic!("merge of an unloaded destination"),
            State::Merged => panic!("destination merged twice"),
        };
        b.push_array_merge_store(original, result, self.base.memref, self.base.shape)?;
        Ok(())
    }
}

impl ArrayLowering<'_> {
    /// Continuation storing the point's element into the accumulator at the
    /// position `plan` designates; returns the new accumulator. Under
    /// `CustomCopyInCopyOut` the element is written by calling `custom` on a
    /// reference into the accumulator.
    pub(crate) fn destination_update(
        &mut self,
        plan: &Rc<DesignatorPlan>,
        custom: Option<&Rc<ProcInterface>>,
    ) -> Result<Cont> {
        let plan = plan.clone();
        trace!("destination update as {:?}", self.semantics());
        match (self.semantics(), custom) {
            (AccessMode::CustomCopyInCopyOut, Some(proc)) => {
                let name = proc.name.clone();
                Ok(compile::cont(move |b, pt| {
                    let acc = pt.inner_arg.expect("destination update outside a loop nest");
                    let element = pt.element.clone().expect("destination update without an element");
                    let indices = plan.base_indices(b, &pt.indices)?;
                    let access = b.push_array_access(
                        acc,
                        indices.clone(),
                        plan.path.clone(),
                        types::reference(plan.elem_ty.clone()),
                    )?;
                    b.push_void_call(&name, vec![access, element.base()])?;
                    Ok(ExtendedValue::Scalar(b.push_array_amend(acc, access, indices, plan.path.clone())?))
                }))
            }
            (AccessMode::CustomCopyInCopyOut, None) => panic!("custom destination update without a procedure"),
            _ => Ok(compile::cont(move |b, pt| {
                let acc = pt.inner_arg.expect("destination update outside a loop nest");
                let element = pt.element.clone().expect("destination update without an element");
                let value = compile::value_of(b, element, &plan.elem_ty)?;
                let value = if types::is_character(&plan.elem_ty) {
                    ops::fit_character(b, value, &plan.elem_ty, plan.char_len())?
                } else {
                    b.push_convert(value, plan.elem_ty.clone())?
                };
                let indices = plan.base_indices(b, &pt.indices)?;
                Ok(ExtendedValue::Scalar(b.push_array_update(acc, value, indices, plan.path.clone())?))
            })),
        }
    }

    /// `lhs = rhs` for an allocatable `lhs`: the target is (re)allocated with
    /// the shape of `rhs` when it is unallocated or its shape differs. The
    /// old storage is released after the merge.
    pub fn lower_allocatable_assignment(&mut self, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let d = destination_designator(lhs)?;
        let mutable = match self.symbols.lookup(&d.base) {
            Some(ExtendedValue::MutableBox { cell, rank }) if d.parts.is_empty() && rhs.rank > 0 => Some((*cell, *rank)),
            _ => None,
        };
        let Some((cell, rank)) = mutable else {
            return self.lower_array_assignment(lhs, rhs);
        };
        debug!("allocatable assignment at {}: rank {}", lhs.span(), rank);
        self.begin_statement(lhs);

        let elem_ty = d.base.ty.clone();
        let box_ty = types::boxed(rank, elem_ty.clone());
        let (element, operands) =
            self.with_operands(|this| this.with_semantics(AccessMode::ByValue, |this| this.compile(rhs)))?;
        let extents = self.governing_shape(None, &operands, rhs.span())?;
        if extents.len() != rank {
            bail_shape_at!(rhs.span(), "rank {} value assigned to rank {} `{}`", extents.len(), rank, d.base.name);
        }

        let old = self.b.push_load(cell, box_ty.clone())?;
        let present = self.b.push_is_present(old)?;
        let need = self.b.build_if_then_else::<CompilerError>(
            present,
            vec![types::bool_type()],
            |b| {
                let mut differs = b.push_bool(false)?;
                for (dim, extent) in extents.iter().enumerate() {
                    let current = b.push_box_extent(old, dim as u32)?;
                    let ne = b.push_cmp(CmpPredicate::Ne, current, *extent)?;
                    differs = b.push_binop("or", differs, ne, types::bool_type())?;
                }
                Ok(vec![differs])
            },
            |b| Ok(vec![b.push_bool(true)?]),
        )?[0];
        let target = self.b.build_if_then_else::<CompilerError>(
            need,
            vec![box_ty.clone()],
            |b| {
                let count = ops::product(b, &extents)?;
                let storage = b.push_allocmem(elem_ty.clone(), count)?;
                let shape = b.push_shape(extents.clone())?;
                Ok(vec![b.push_embox(storage, Some(shape), None, vec![], box_ty.clone())?])
            },
            |_| Ok(vec![old]),
        )?[0];

        let one = self.b.push_index(1)?;
        let base = Rc::new(ArrayBase {
            memref: target,
            shape: None,
            extents: extents.clone(),
            lbounds: vec![one; rank],
            elem_ty: elem_ty.clone(),
            may_be_absent: false,
            contiguous: true,
            len: None,
        });
        let plan = Rc::new(DesignatorPlan::whole(base.clone(), self.b)?);
        let update = self.with_semantics(AccessMode::CopyInCopyOut, |this| this.destination_update(&plan, None))?;
        let mut dest = Destination::new(base);
        let loaded = dest.load(self.b)?;
        let (result, _) = build_nest(self.b, &extents, loaded, self.unordered, &mut |b, acc, idx| {
            let point = IterSpace::new(idx.to_vec(), acc);
            let value = element(b, &point)?;
            Ok(update(b, &point.with_element(value))?.base())
        })?;
        dest.merge(self.b, result)?;

        self.b.build_if_then_else::<CompilerError>(
            need,
            vec![],
            |b| {
                b.build_if_then_else::<CompilerError>(
                    present,
                    vec![],
                    |b| {
                        let addr = b.push_box_addr(old, types::heap(elem_ty.clone()))?;
                        b.push_freemem(addr)?;
                        Ok(vec![])
                    },
                    |_| Ok(vec![]),
                )?;
                b.push_store(cell, target)?;
                Ok(vec![])
            },
            |_| Ok(vec![]),
        )?;
        self.end_statement()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::ssa::Terminator;

    fn base(b: &mut FuncBuilder) -> Rc<ArrayBase> {
        let n = b.push_index(3).unwrap();
        let storage = b.push_allocmem(types::i32(), n).unwrap();
        let shape = b.push_shape(vec![n]).unwrap();
        let one = b.push_index(1).unwrap();
        Rc::new(ArrayBase {
            memref: storage,
            shape: Some(shape),
            extents: vec![n],
            lbounds: vec![one],
            elem_ty: types::i32(),
            may_be_absent: false,
            contiguous: true,
            len: None,
        })
    }

    #[test]
    fn test_load_then_merge() {
        let mut b = FuncBuilder::new("dest", vec![], types::unit());
        let mut dest = Destination::new(base(&mut b));
        let loaded = dest.load(&mut b).unwrap();
        dest.merge(&mut b, loaded).unwrap();
        b.terminate(Terminator::ReturnUnit).unwrap();
        assert!(b.finish().is_ok());
    }

    #[test]
    #[should_panic(expected = "destination loaded twice")]
    fn test_double_load_panics() {
        let mut b = FuncBuilder::new("dest", vec![], types::unit());
        let mut dest = Destination::new(base(&mut b));
        dest.load(&mut b).unwrap();
        let _ = dest.load(&mut b);
    }

    #[test]
    #[should_panic(expected = "merge of an unloaded destination")]
    fn test_merge_without_load_panics() {
        let mut b = FuncBuilder::new("dest", vec![], types::unit());
        let mut dest = Destination::new(base(&mut b));
        let v = b.push_index(0).unwrap();
        let _ = dest.merge(&mut b, v);
    }

    #[test]
    #[should_panic(expected = "destination merged twice")]
    fn test_double_merge_panics() {
        let mut b = FuncBuilder::new("dest", vec![], types::unit());
        let mut dest = Destination::new(base(&mut b));
        let loaded = dest.load(&mut b).unwrap();
        dest.merge(&mut b, loaded).unwrap();
        let _ = dest.merge(&mut b, loaded);
    }
}
