//! Extended values: SSA values together with the shape, bounds and length
//! information needed to address them as arrays.

use indexmap::IndexMap;

use crate::ast::{Symbol, SymbolId};
use crate::mir::ssa::ValueId;
use crate::mir::ssa_builder::{BuilderError, FuncBuilder};
use crate::types::{self, Type};

type BResult<T> = Result<T, BuilderError>;

/// Address of contiguous array storage with its extents.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub addr: ValueId,
    /// One `index` value per dimension.
    pub extents: Vec<ValueId>,
    /// Declared lower bounds; `None` means all ones.
    pub lbounds: Option<Vec<ValueId>>,
    /// Character length of each element, if dynamic.
    pub len: Option<ValueId>,
}

impl ArrayValue {
    pub fn new(addr: ValueId, extents: Vec<ValueId>) -> Self {
        ArrayValue {
            addr,
            extents,
            lbounds: None,
            len: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }
}

/// An array descriptor value.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxValue {
    pub desc: ValueId,
    pub rank: usize,
    pub lbounds: Option<Vec<ValueId>>,
    pub len: Option<ValueId>,
}

impl BoxValue {
    pub fn new(desc: ValueId, rank: usize) -> Self {
        BoxValue {
            desc,
            rank,
            lbounds: None,
            len: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedValue {
    /// A bare scalar value.
    Scalar(ValueId),
    /// Address of a scalar, with its character length if dynamic.
    Addressed { addr: ValueId, len: Option<ValueId> },
    Array(ArrayValue),
    Boxed(BoxValue),
    /// Descriptor of an optional dummy; null when absent.
    OptionalBox(BoxValue),
    /// Address of the descriptor of an allocatable or pointer; the cell holds
    /// null while unallocated.
    MutableBox { cell: ValueId, rank: usize },
}

impl ExtendedValue {
    pub fn rank(&self) -> usize {
        match self {
            ExtendedValue::Scalar(_) | ExtendedValue::Addressed { .. } => 0,
            ExtendedValue::Array(av) => av.rank(),
            ExtendedValue::Boxed(bv) | ExtendedValue::OptionalBox(bv) => bv.rank,
            ExtendedValue::MutableBox { rank, .. } => *rank,
        }
    }

    /// The primary SSA value: the scalar, address, or descriptor.
    pub fn base(&self) -> ValueId {
        match self {
            ExtendedValue::Scalar(v) => *v,
            ExtendedValue::Addressed { addr, .. } => *addr,
            ExtendedValue::Array(av) => av.addr,
            ExtendedValue::Boxed(bv) | ExtendedValue::OptionalBox(bv) => bv.desc,
            ExtendedValue::MutableBox { cell, .. } => *cell,
        }
    }

    /// True for values that may be absent or unallocated at run time.
    pub fn may_be_absent(&self) -> bool {
        matches!(self, ExtendedValue::OptionalBox(_) | ExtendedValue::MutableBox { .. })
    }

    /// Run-time character length carried with the value.
    pub fn char_len(&self) -> Option<ValueId> {
        match self {
            ExtendedValue::Array(av) => av.len,
            ExtendedValue::Boxed(bv) | ExtendedValue::OptionalBox(bv) => bv.len,
            ExtendedValue::Addressed { len, .. } => *len,
            _ => None,
        }
    }

    /// Declared lower bound of dimension `dim` as an `index`.
    pub(crate) fn lbound(&self, b: &mut FuncBuilder, dim: usize) -> BResult<ValueId> {
        let lbounds = match self {
            ExtendedValue::Array(av) => av.lbounds.as_ref(),
            ExtendedValue::Boxed(bv) | ExtendedValue::OptionalBox(bv) => bv.lbounds.as_ref(),
            _ => None,
        };
        match lbounds.and_then(|l| l.get(dim)) {
            Some(lb) => Ok(*lb),
            None => b.push_index(1),
        }
    }

    /// Memory reference used to address elements, with its shape when it is
    /// a plain address. The descriptor of a mutable box is loaded.
    pub(crate) fn memref(&self, b: &mut FuncBuilder, elem_ty: &Type) -> BResult<(ValueId, Option<ValueId>)> {
        match self {
            ExtendedValue::Array(av) => {
                let shape = b.push_shape(av.extents.clone())?;
                Ok((av.addr, Some(shape)))
            }
            ExtendedValue::Boxed(bv) | ExtendedValue::OptionalBox(bv) => Ok((bv.desc, None)),
            ExtendedValue::MutableBox { cell, rank } => {
                let desc = b.push_load(*cell, types::boxed(*rank, elem_ty.clone()))?;
                Ok((desc, None))
            }
            ExtendedValue::Addressed { addr, .. } => Ok((*addr, None)),
            ExtendedValue::Scalar(v) => panic!("scalar value {} used as a memory reference", v),
        }
    }

    /// Extents of the entity. Descriptors that may be absent report zero
    /// extents when absent; `memref` must come from [`ExtendedValue::memref`].
    pub(crate) fn extents(&self, b: &mut FuncBuilder, memref: ValueId) -> BResult<Vec<ValueId>> {
        match self {
            ExtendedValue::Array(av) => Ok(av.extents.clone()),
            ExtendedValue::Boxed(bv) => (0..bv.rank).map(|d| b.push_box_extent(memref, d as u32)).collect(),
            ExtendedValue::OptionalBox(_) | ExtendedValue::MutableBox { .. } => {
                let rank = self.rank();
                let present = b.push_is_present(memref)?;
                b.build_if_then_else(
                    present,
                    vec![types::index(); rank],
                    |b| (0..rank).map(|d| b.push_box_extent(memref, d as u32)).collect(),
                    |b| {
                        let zero = b.push_index(0)?;
                        Ok(vec![zero; rank])
                    },
                )
            }
            ExtendedValue::Scalar(_) | ExtendedValue::Addressed { .. } => Ok(vec![]),
        }
    }
}

/// Bindings from front-end symbols to their current extended values.
///
/// Binding a symbol that is already bound shadows the old value until the
/// matching `unbind`; implied-do and FORALL index variables use this.
#[derive(Debug, Default)]
pub struct SymbolMap {
    map: IndexMap<SymbolId, Vec<ExtendedValue>>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, sym: &Symbol, value: ExtendedValue) {
        self.map.entry(sym.id).or_default().push(value);
    }

    pub fn unbind(&mut self, sym: &Symbol) {
        if let Some(stack) = self.map.get_mut(&sym.id) {
            stack.pop();
            if stack.is_empty() {
                self.map.shift_remove(&sym.id);
            }
        }
    }

    pub fn lookup(&self, sym: &Symbol) -> Option<&ExtendedValue> {
        self.map.get(&sym.id).and_then(|stack| stack.last())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SymbolAttrs;
    use crate::types;

    fn sym(id: u32) -> Symbol {
        Symbol {
            id: SymbolId(id),
            name: format!("s{}", id),
            ty: types::i32(),
            rank: 0,
            attrs: SymbolAttrs::default(),
        }
    }

    #[test]
    fn test_bind_shadows_until_unbind() {
        let mut map = SymbolMap::new();
        let i = sym(1);
        map.bind(&i, ExtendedValue::Scalar(ValueId(3)));
        map.bind(&i, ExtendedValue::Scalar(ValueId(4)));
        assert_eq!(map.lookup(&i), Some(&ExtendedValue::Scalar(ValueId(4))));
        map.unbind(&i);
        assert_eq!(map.lookup(&i), Some(&ExtendedValue::Scalar(ValueId(3))));
        map.unbind(&i);
        assert!(map.lookup(&i).is_none());
        assert!(map.is_empty());
    }
}
