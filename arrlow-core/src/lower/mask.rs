//! WHERE and FORALL masks.
//!
//! A mask is evaluated once per governing region and read by every
//! statement of the region. Outside FORALL a mask goes into a contiguous
//! temporary. Inside FORALL the extent of a mask may change from one index
//! tuple to the next, so it is cached in a ragged buffer: a tree of headers,
//! one level per explicit loop, whose leaves hold the mask values of one
//! index tuple. Leaves are allocated on first entry and kept until
//! [`ArrayLowering::release_masks`].

use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;

use crate::ast::{Expr, NodeId};
use crate::error::Result;
use crate::mir::ssa::{PathComponent, ValueId};
use crate::mir::ssa_builder::FuncBuilder;
use crate::types::{self, Type};
use crate::err_unsupported;

use super::compile;
use super::ops;
use super::semantics::AccessMode;
use super::space::{build_nest, ExplicitPoint, ExplicitSpace, ImplicitSpace, IterSpace};
use super::ArrayLowering;

/// Field of a ragged header holding the data buffer.
const HEADER_DATA: u32 = 1;
/// Field of a ragged header holding the extents buffer.
const HEADER_SHAPE: u32 = 2;

#[derive(Debug, Clone)]
enum MaskStorage {
    Temp { addr: ValueId, extents: Vec<ValueId> },
    Ragged { root: ValueId },
}

#[derive(Debug, Clone)]
struct MaskBinding {
    storage: MaskStorage,
    /// Code evaluating the mask has been emitted.
    evaluated: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MaskCache {
    bindings: IndexMap<NodeId, MaskBinding>,
}

/// Mask element (a logical) at the given zero-based indices.
pub(crate) type MaskRead = Rc<dyn Fn(&mut FuncBuilder, &[ValueId]) -> Result<ValueId>>;

fn mask_read(f: impl Fn(&mut FuncBuilder, &[ValueId]) -> Result<ValueId> + 'static) -> MaskRead {
    Rc::new(f)
}

/// One governing condition of a statement.
pub(crate) struct Guard {
    read: MaskRead,
    run_when: bool,
}

/// Emit `body` under `guards`, outermost first. Iterations a guard rejects
/// pass the accumulator through unchanged.
pub(crate) fn guarded(
    b: &mut FuncBuilder,
    point: &IterSpace,
    guards: &[Guard],
    acc_ty: &Type,
    body: &mut dyn FnMut(&mut FuncBuilder) -> Result<ValueId>,
) -> Result<ValueId> {
    let Some((guard, rest)) = guards.split_first() else {
        return body(b);
    };
    let acc = point.inner_arg.expect("mask guard outside a loop nest");
    let value = (guard.read)(b, &point.indices)?;
    let cond = b.push_convert(value, types::bool_type())?;
    let arm = b.begin_if(cond, vec![acc_ty.clone()])?;
    if guard.run_when {
        let next = guarded(b, point, rest, acc_ty, body)?;
        b.begin_else(&arm, vec![next])?;
        Ok(b.end_if(arm, vec![acc])?[0])
    } else {
        b.begin_else(&arm, vec![acc])?;
        let next = guarded(b, point, rest, acc_ty, body)?;
        Ok(b.end_if(arm, vec![next])?[0])
    }
}

/// Element size in bytes passed to the ragged allocator. Ragged buffers hold
/// logical masks and headers only.
fn element_bytes(b: &mut FuncBuilder, ty: &Type) -> Result<ValueId> {
    ops::element_bytes(b, ty, None)?.ok_or_else(|| err_unsupported!("ragged buffer of {:?} elements", ty))
}

/// Header of the current index tuple: walks `depth` levels from `root`,
/// allocating each level's children on first entry.
fn ragged_header_at(b: &mut FuncBuilder, root: ValueId, point: &ExplicitPoint, depth: usize) -> Result<ValueId> {
    let header_ty = types::ragged_header();
    let mut header = root;
    for level in 0..depth {
        let is_header = b.push_bool(true)?;
        let rank = b.push_index(1)?;
        let esize = element_bytes(b, &header_ty)?;
        b.push_void_intrinsic("ragged_allocate", vec![header, is_header, rank, esize, point.trips[level]])?;
        let children = header_data(b, header, &header_ty)?;
        header = b.push_array_coor(children, None, vec![point.iters[level]], types::reference(header_ty.clone()))?;
    }
    Ok(header)
}

fn header_data(b: &mut FuncBuilder, header: ValueId, elem_ty: &Type) -> Result<ValueId> {
    let heap_ty = types::heap(elem_ty.clone());
    let field = b.push_coordinate_of(header, vec![PathComponent::Field(HEADER_DATA)], types::reference(heap_ty.clone()))?;
    Ok(b.push_load(field, heap_ty)?)
}

impl ArrayLowering<'_> {
    /// Guards for the active WHERE clauses of `implicit`.
    pub(crate) fn mask_guards(&mut self, implicit: &ImplicitSpace) -> Result<Vec<Guard>> {
        let mut guards = Vec::new();
        for cond in implicit.conditions() {
            let read = self.mask_reader(&cond.mask)?;
            guards.push(Guard {
                read,
                run_when: cond.run_when,
            });
        }
        Ok(guards)
    }

    fn mask_reader(&mut self, mask: &Rc<Expr>) -> Result<MaskRead> {
        if self.explicit.is_some() {
            return self.ragged_mask_reader(mask);
        }
        let id = mask.id();
        let (addr, extents) = match self.masks.bindings.get(&id) {
            Some(MaskBinding {
                storage: MaskStorage::Temp { addr, extents },
                ..
            }) => {
                trace!("mask {:?}: cached", id);
                (*addr, extents.clone())
            }
            Some(_) => panic!("mask {:?} has ragged storage outside FORALL", id),
            None => {
                trace!("mask {:?}: evaluated into a temporary", id);
                let av = self.materialize_value(mask)?;
                self.masks.bindings.insert(
                    id,
                    MaskBinding {
                        storage: MaskStorage::Temp {
                            addr: av.addr,
                            extents: av.extents.clone(),
                        },
                        evaluated: true,
                    },
                );
                (av.addr, av.extents)
            }
        };
        let shape = self.b.push_shape(extents)?;
        let ty = mask.ty.clone();
        Ok(mask_read(move |b, idx| {
            let cell = b.push_array_coor(addr, Some(shape), idx.to_vec(), types::reference(ty.clone()))?;
            Ok(b.push_load(cell, ty.clone())?)
        }))
    }

    /// Reserve ragged storage for every FORALL and WHERE mask of a FORALL
    /// statement that has none yet.
    pub(crate) fn prepare_masks(&mut self, space: &ExplicitSpace, implicit: &ImplicitSpace) -> Result<()> {
        let ids = space
            .mask_ids()
            .into_iter()
            .chain(implicit.masks().iter().map(|m| m.id()))
            .collect::<Vec<_>>();
        for id in ids {
            if self.masks.bindings.contains_key(&id) {
                continue;
            }
            let root = self.b.push_alloca(types::ragged_header())?;
            trace!("mask {:?}: ragged root {}", id, root);
            self.masks.bindings.insert(
                id,
                MaskBinding {
                    storage: MaskStorage::Ragged { root },
                    evaluated: false,
                },
            );
        }
        Ok(())
    }

    fn ragged_leaf(&mut self, mask: &Expr) -> Result<(ValueId, bool)> {
        let id = mask.id();
        let binding = self
            .masks
            .bindings
            .get(&id)
            .cloned()
            .unwrap_or_else(|| panic!("mask {:?} has no storage", id));
        let MaskStorage::Ragged { root } = binding.storage else {
            panic!("mask {:?} has temporary storage inside FORALL", id);
        };
        let point = self.explicit.clone().expect("ragged mask outside FORALL");
        let leaf = ragged_header_at(self.b, root, &point, point.depth())?;
        Ok((leaf, binding.evaluated))
    }

    fn mark_evaluated(&mut self, id: NodeId) {
        if let Some(binding) = self.masks.bindings.get_mut(&id) {
            binding.evaluated = true;
        }
    }

    /// Value of a FORALL level mask at the current index tuple, as an `i1`.
    pub(crate) fn forall_mask_value(&mut self, mask: &Rc<Expr>) -> Result<ValueId> {
        let (leaf, evaluated) = self.ragged_leaf(mask)?;
        let ty = mask.ty.clone();
        let value = if evaluated {
            trace!("FORALL mask {:?}: cached", mask.id());
            let data = header_data(self.b, leaf, &ty)?;
            let cell = self.b.push_array_coor(data, None, vec![], types::reference(ty.clone()))?;
            self.b.push_load(cell, ty)?
        } else {
            trace!("FORALL mask {:?}: evaluated", mask.id());
            let is_header = self.b.push_bool(false)?;
            let rank = self.b.push_index(0)?;
            let esize = element_bytes(self.b, &ty)?;
            self.b.push_void_intrinsic("ragged_allocate", vec![leaf, is_header, rank, esize])?;
            let value = self.evaluate_scalar_expr(mask)?;
            let data = header_data(self.b, leaf, &ty)?;
            let cell = self.b.push_array_coor(data, None, vec![], types::reference(ty))?;
            self.b.push_store(cell, value)?;
            self.mark_evaluated(mask.id());
            value
        };
        Ok(self.b.push_convert(value, types::bool_type())?)
    }

    /// Reader of a WHERE mask inside FORALL. The first statement fills the
    /// leaf for each index tuple; every statement then reads the extents
    /// back from the leaf's shape buffer.
    fn ragged_mask_reader(&mut self, mask: &Rc<Expr>) -> Result<MaskRead> {
        let (leaf, evaluated) = self.ragged_leaf(mask)?;
        let ty = mask.ty.clone();
        let ref_ty = types::reference(ty.clone());
        if !evaluated {
            trace!("mask {:?}: evaluated into a ragged leaf", mask.id());
            let (element, operands) =
                self.with_operands(|this| this.with_semantics(AccessMode::ByValue, |this| this.compile(mask)))?;
            let extents = self.governing_shape(None, &operands, mask.span())?;
            let is_header = self.b.push_bool(false)?;
            let rank = self.b.push_index(extents.len() as i64)?;
            let esize = element_bytes(self.b, &ty)?;
            let mut args = vec![leaf, is_header, rank, esize];
            args.extend(extents.iter().copied());
            self.b.push_void_intrinsic("ragged_allocate", args)?;
            let data = header_data(self.b, leaf, &ty)?;
            let shape = self.b.push_shape(extents.clone())?;
            let unit = self.b.push_unit()?;
            build_nest(self.b, &extents, unit, true, &mut |b, acc, idx| {
                let point = IterSpace::new(idx.to_vec(), acc);
                let arg_value = element(b, &point)?;
                let value = compile::value_of(b, arg_value, &ty)?;
                let cell = b.push_array_coor(data, Some(shape), idx.to_vec(), ref_ty.clone())?;
                b.push_store(cell, value)?;
                Ok(acc)
            })?;
            self.mark_evaluated(mask.id());
        }

        let data = header_data(self.b, leaf, &ty)?;
        let index_heap = types::heap(types::index());
        let field = self.b.push_coordinate_of(
            leaf,
            vec![PathComponent::Field(HEADER_SHAPE)],
            types::reference(index_heap.clone()),
        )?;
        let shape_buf = self.b.push_load(field, index_heap)?;
        let mut extents = Vec::with_capacity(mask.rank);
        for dim in 0..mask.rank {
            let pos = self.b.push_index(dim as i64)?;
            let cell = self.b.push_array_coor(shape_buf, None, vec![pos], types::reference(types::index()))?;
            extents.push(self.b.push_load(cell, types::index())?);
        }
        let shape = self.b.push_shape(extents)?;
        Ok(mask_read(move |b, idx| {
            let cell = b.push_array_coor(data, Some(shape), idx.to_vec(), ref_ty.clone())?;
            Ok(b.push_load(cell, ty.clone())?)
        }))
    }

    /// Release every mask buffer of the region. Call once after the last
    /// statement of the outermost WHERE or FORALL construct.
    pub fn release_masks(&mut self) -> Result<()> {
        let bindings: Vec<_> = self.masks.bindings.drain(..).collect();
        for (id, binding) in bindings.into_iter().rev() {
            trace!("mask {:?}: released", id);
            match binding.storage {
                MaskStorage::Temp { addr, .. } => self.b.push_freemem(addr)?,
                MaskStorage::Ragged { root } => self.b.push_void_intrinsic("ragged_free", vec![root])?,
            }
        }
        Ok(())
    }
}
