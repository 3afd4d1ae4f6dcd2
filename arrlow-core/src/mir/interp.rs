//! Reference interpreter for the lowered SSA form.
//!
//! Executes a `FuncBody` block by block, threading values through block
//! parameters at branches. Memory is a set of cell buffers; one cell holds one
//! element value, so addresses are `(buffer, cell offset, path into the cell)`.
//! `array_load` snapshots memory into an immutable array value and
//! `array_merge_store` writes one back, which makes the observable effect of a
//! lowered statement independent of the order elements are produced in.
//!
//! User procedures are registered as host closures; runtime entry points
//! (`realloc`, `is_contiguous`, ragged buffers, transformational intrinsics)
//! are built in. Allocation, free and call activity is recorded in
//! `InterpStats`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use log::trace;
use thiserror::Error;

use super::ssa::{BlockId, CmpPredicate, FuncBody, Inst, InstKind, PathComponent, SliceDim, Terminator, ValueId};
use crate::types::{self, Type, TypeName};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterpError {
    #[error("undefined value %{0}")]
    UndefinedValue(u32),

    #[error("null dereference in {0}")]
    NullDereference(&'static str),

    #[error("access to freed buffer {0}")]
    UseAfterFree(usize),

    #[error("invalid free of buffer {0}")]
    InvalidFree(usize),

    #[error("index {idx} out of bounds (len {len})")]
    IndexOutOfBounds { idx: i64, len: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("type error: {0}")]
    TypeError(String),

    #[error("unknown procedure `{0}`")]
    UnknownProcedure(String),

    #[error("exceeded step limit")]
    StepLimit,
}

pub type IResult<T> = Result<T, InterpError>;

// =============================================================================
// Runtime values
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    Field(usize),
    Re,
    Im,
    Index(usize),
    Substring { start: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub buf: usize,
    pub offset: usize,
    pub path: Vec<PathStep>,
}

impl Address {
    pub fn new(buf: usize, offset: usize) -> Self {
        Address {
            buf,
            offset,
            path: Vec::new(),
        }
    }

    /// Address of the element `delta` positions further on. Addresses into a
    /// fixed-size component array advance inside the cell.
    pub fn advance(&self, delta: isize) -> IResult<Address> {
        let mut next = self.clone();
        match next.path.last_mut() {
            None => next.offset = offset_by(self.offset, delta)?,
            Some(PathStep::Index(k)) => *k = offset_by(*k, delta)?,
            Some(_) => next.path.push(PathStep::Index(offset_by(0, delta)?)),
        }
        Ok(next)
    }

    fn with_path(&self, steps: &[PathStep]) -> Address {
        let mut next = self.clone();
        next.path.extend_from_slice(steps);
        next
    }
}

fn offset_by(base: usize, delta: isize) -> IResult<usize> {
    let target = base as i64 + delta as i64;
    if target < 0 {
        return Err(InterpError::IndexOutOfBounds { idx: target, len: 0 });
    }
    Ok(target as usize)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxDim {
    pub extent: usize,
    /// Distance between consecutive elements, in elements.
    pub stride: isize,
}

/// Array descriptor: first element, per-dimension extent and stride, and a
/// path applied inside each element (component sections).
#[derive(Debug, Clone, PartialEq)]
pub struct BoxVal {
    pub base: Address,
    pub dims: Vec<BoxDim>,
    pub elem_path: Vec<PathStep>,
}

impl BoxVal {
    pub fn extents(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.extent).collect()
    }

    pub fn element(&self, indices: &[usize]) -> IResult<Address> {
        if indices.len() != self.dims.len() {
            return Err(InterpError::TypeError(format!(
                "rank {} descriptor indexed with {} subscripts",
                self.dims.len(),
                indices.len()
            )));
        }
        let mut delta = 0isize;
        for (idx, dim) in indices.iter().zip(&self.dims) {
            if *idx >= dim.extent {
                return Err(InterpError::IndexOutOfBounds {
                    idx: *idx as i64,
                    len: dim.extent,
                });
            }
            delta += *idx as isize * dim.stride;
        }
        Ok(self.base.advance(delta)?.with_path(&self.elem_path))
    }

    pub fn is_contiguous(&self) -> bool {
        if !self.elem_path.is_empty() {
            return false;
        }
        let mut expected = 1isize;
        for dim in &self.dims {
            if dim.extent > 1 && dim.stride != expected {
                return false;
            }
            expected *= dim.extent as isize;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayVal {
    pub extents: Vec<usize>,
    pub elems: Vec<RtValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SliceVal {
    Range { start: usize, extent: usize, step: i64 },
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Int(i64),
    Real(f64),
    Complex(f64, f64),
    Bool(bool),
    Str(String),
    Record(Vec<RtValue>),
    Seq(Vec<RtValue>),
    Addr(Address),
    Box(BoxVal),
    /// Null address, absent argument, or unallocated descriptor.
    Null,
    Array(Rc<ArrayVal>),
    Shape(Vec<usize>),
    Slice(Vec<SliceVal>),
    Unit,
    Undef,
}

impl RtValue {
    pub fn as_int(&self) -> IResult<i64> {
        match self {
            RtValue::Int(v) => Ok(*v),
            other => Err(InterpError::TypeError(format!("expected integer, got {}", other))),
        }
    }

    pub fn as_real(&self) -> IResult<f64> {
        match self {
            RtValue::Real(v) => Ok(*v),
            RtValue::Int(v) => Ok(*v as f64),
            other => Err(InterpError::TypeError(format!("expected real, got {}", other))),
        }
    }

    pub fn as_bool(&self) -> IResult<bool> {
        match self {
            RtValue::Bool(v) => Ok(*v),
            other => Err(InterpError::TypeError(format!("expected logical, got {}", other))),
        }
    }

    pub fn as_addr(&self, context: &'static str) -> IResult<&Address> {
        match self {
            RtValue::Addr(a) => Ok(a),
            RtValue::Null => Err(InterpError::NullDereference(context)),
            other => Err(InterpError::TypeError(format!("{}: expected address, got {}", context, other))),
        }
    }

    pub fn as_box(&self, context: &'static str) -> IResult<&BoxVal> {
        match self {
            RtValue::Box(b) => Ok(b),
            RtValue::Null => Err(InterpError::NullDereference(context)),
            other => Err(InterpError::TypeError(format!("{}: expected descriptor, got {}", context, other))),
        }
    }

    fn as_usize(&self) -> IResult<usize> {
        let v = self.as_int()?;
        usize::try_from(v).map_err(|_| InterpError::IndexOutOfBounds { idx: v, len: 0 })
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Int(v) => write!(f, "{}", v),
            RtValue::Real(v) => write!(f, "{}", v),
            RtValue::Complex(re, im) => write!(f, "({}, {})", re, im),
            RtValue::Bool(b) => write!(f, "{}", b),
            RtValue::Str(s) => write!(f, "\"{}\"", s),
            RtValue::Record(fields) | RtValue::Seq(fields) => {
                let parts: Vec<String> = fields.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            RtValue::Addr(a) => write!(f, "&{}[{}]{:?}", a.buf, a.offset, a.path),
            RtValue::Box(b) => write!(f, "box(&{}[{}], {:?})", b.base.buf, b.base.offset, b.extents()),
            RtValue::Null => write!(f, "null"),
            RtValue::Array(a) => write!(f, "array{:?}", a.extents),
            RtValue::Shape(e) => write!(f, "shape{:?}", e),
            RtValue::Slice(s) => write!(f, "slice{:?}", s),
            RtValue::Unit => write!(f, "()"),
            RtValue::Undef => write!(f, "undef"),
        }
    }
}

/// Zero value of an element type; used to initialise fresh storage.
pub fn default_value(ty: &Type) -> RtValue {
    match ty {
        Type::Constructed(name, args) => match name {
            TypeName::Int(_) | TypeName::Index => RtValue::Int(0),
            TypeName::Real(_) => RtValue::Real(0.0),
            TypeName::Complex(_) => RtValue::Complex(0.0, 0.0),
            TypeName::Logical(_) | TypeName::Bool => RtValue::Bool(false),
            TypeName::Char { len, .. } => RtValue::Str(" ".repeat(len.unwrap_or(0))),
            TypeName::Record(_) => RtValue::Record(args.iter().map(default_value).collect()),
            TypeName::Seq(extents) => {
                let count = extents.iter().product();
                let elem = args.first().map(default_value).unwrap_or(RtValue::Undef);
                RtValue::Seq(vec![elem; count])
            }
            TypeName::Header => empty_header(),
            TypeName::Ref | TypeName::Heap | TypeName::Box(_) => RtValue::Null,
            _ => RtValue::Undef,
        },
        Type::Variable(_) => RtValue::Undef,
    }
}

fn empty_header() -> RtValue {
    RtValue::Record(vec![RtValue::Int(0), RtValue::Null, RtValue::Null])
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Debug, Clone)]
struct Buffer {
    cells: Vec<RtValue>,
    live: bool,
    heap: bool,
}

#[derive(Debug, Default)]
pub struct Memory {
    buffers: Vec<Buffer>,
}

impl Memory {
    /// Allocate caller-owned storage (not counted in statistics).
    pub fn alloc(&mut self, cells: Vec<RtValue>) -> Address {
        self.push(cells, false)
    }

    /// Heap storage the program may free, as if allocated before the run
    /// (not counted in statistics).
    pub fn alloc_owned(&mut self, cells: Vec<RtValue>) -> Address {
        self.push(cells, true)
    }

    fn push(&mut self, cells: Vec<RtValue>, heap: bool) -> Address {
        self.buffers.push(Buffer {
            cells,
            live: true,
            heap,
        });
        Address::new(self.buffers.len() - 1, 0)
    }

    fn buffer(&self, buf: usize) -> IResult<&Buffer> {
        let buffer = self.buffers.get(buf).ok_or(InterpError::UseAfterFree(buf))?;
        if !buffer.live {
            return Err(InterpError::UseAfterFree(buf));
        }
        Ok(buffer)
    }

    fn buffer_mut(&mut self, buf: usize) -> IResult<&mut Buffer> {
        let buffer = self.buffers.get_mut(buf).ok_or(InterpError::UseAfterFree(buf))?;
        if !buffer.live {
            return Err(InterpError::UseAfterFree(buf));
        }
        Ok(buffer)
    }

    /// Cells of a live buffer.
    pub fn cells(&self, buf: usize) -> IResult<&[RtValue]> {
        Ok(&self.buffer(buf)?.cells)
    }

    pub fn is_live(&self, buf: usize) -> bool {
        self.buffers.get(buf).is_some_and(|b| b.live)
    }

    pub fn read(&self, addr: &Address) -> IResult<RtValue> {
        let buffer = self.buffer(addr.buf)?;
        let cell = buffer.cells.get(addr.offset).ok_or(InterpError::IndexOutOfBounds {
            idx: addr.offset as i64,
            len: buffer.cells.len(),
        })?;
        read_path(cell, &addr.path)
    }

    pub fn write(&mut self, addr: &Address, value: RtValue) -> IResult<()> {
        let buffer = self.buffer_mut(addr.buf)?;
        let len = buffer.cells.len();
        let cell = buffer.cells.get_mut(addr.offset).ok_or(InterpError::IndexOutOfBounds {
            idx: addr.offset as i64,
            len,
        })?;
        write_path(cell, &addr.path, value)
    }

    fn free(&mut self, buf: usize) -> IResult<()> {
        let buffer = self.buffers.get_mut(buf).ok_or(InterpError::InvalidFree(buf))?;
        if !buffer.live || !buffer.heap {
            return Err(InterpError::InvalidFree(buf));
        }
        buffer.live = false;
        Ok(())
    }

    /// Read `count` consecutive elements starting at `addr`.
    pub fn read_elements(&self, addr: &Address, count: usize) -> IResult<Vec<RtValue>> {
        (0..count).map(|i| self.read(&addr.advance(i as isize)?)).collect()
    }
}

fn read_path(cell: &RtValue, path: &[PathStep]) -> IResult<RtValue> {
    let Some((step, rest)) = path.split_first() else {
        return Ok(cell.clone());
    };
    match (step, cell) {
        (PathStep::Field(i), RtValue::Record(fields)) => {
            let field = fields.get(*i).ok_or(InterpError::IndexOutOfBounds {
                idx: *i as i64,
                len: fields.len(),
            })?;
            read_path(field, rest)
        }
        (PathStep::Index(k), RtValue::Seq(elems)) => {
            let elem = elems.get(*k).ok_or(InterpError::IndexOutOfBounds {
                idx: *k as i64,
                len: elems.len(),
            })?;
            read_path(elem, rest)
        }
        (PathStep::Re, RtValue::Complex(re, _)) => Ok(RtValue::Real(*re)),
        (PathStep::Im, RtValue::Complex(_, im)) => Ok(RtValue::Real(*im)),
        (PathStep::Substring { start, len }, RtValue::Str(s)) => {
            Ok(RtValue::Str(s.chars().skip(*start).take(*len).collect()))
        }
        (step, value) => Err(InterpError::TypeError(format!("cannot apply {:?} to {}", step, value))),
    }
}

fn write_path(cell: &mut RtValue, path: &[PathStep], value: RtValue) -> IResult<()> {
    let Some((step, rest)) = path.split_first() else {
        *cell = value;
        return Ok(());
    };
    match (step, cell) {
        (PathStep::Field(i), RtValue::Record(fields)) => {
            let len = fields.len();
            let field = fields.get_mut(*i).ok_or(InterpError::IndexOutOfBounds { idx: *i as i64, len })?;
            write_path(field, rest, value)
        }
        (PathStep::Index(k), RtValue::Seq(elems)) => {
            let len = elems.len();
            let elem = elems.get_mut(*k).ok_or(InterpError::IndexOutOfBounds { idx: *k as i64, len })?;
            write_path(elem, rest, value)
        }
        (PathStep::Re, RtValue::Complex(re, _)) => {
            *re = value.as_real()?;
            Ok(())
        }
        (PathStep::Im, RtValue::Complex(_, im)) => {
            *im = value.as_real()?;
            Ok(())
        }
        (PathStep::Substring { start, len }, RtValue::Str(s)) => {
            let RtValue::Str(part) = value else {
                return Err(InterpError::TypeError("substring assignment of non-character".to_string()));
            };
            let part = fit_chars(&part, *len);
            let mut chars: Vec<char> = s.chars().collect();
            for (i, c) in part.chars().enumerate() {
                if let Some(slot) = chars.get_mut(start + i) {
                    *slot = c;
                }
            }
            *s = chars.into_iter().collect();
            Ok(())
        }
        (step, value) => Err(InterpError::TypeError(format!("cannot assign {:?} into {}", step, value))),
    }
}

fn fit_chars(s: &str, len: usize) -> String {
    let mut out: String = s.chars().take(len).collect();
    let have = out.chars().count();
    out.extend(std::iter::repeat(' ').take(len - have));
    out
}

/// Column-major position of `indices` within `extents`.
fn linearize(indices: &[usize], extents: &[usize]) -> IResult<usize> {
    let mut lin = 0usize;
    let mut scale = 1usize;
    for (idx, ext) in indices.iter().zip(extents) {
        if idx >= ext {
            return Err(InterpError::IndexOutOfBounds {
                idx: *idx as i64,
                len: *ext,
            });
        }
        lin += idx * scale;
        scale *= ext;
    }
    Ok(lin)
}

fn unravel(mut lin: usize, extents: &[usize]) -> Vec<usize> {
    let mut indices = Vec::with_capacity(extents.len());
    for ext in extents {
        let ext = (*ext).max(1);
        indices.push(lin % ext);
        lin /= ext;
    }
    indices
}

fn contiguous_dims(extents: &[usize]) -> Vec<BoxDim> {
    let mut stride = 1isize;
    extents
        .iter()
        .map(|e| {
            let dim = BoxDim { extent: *e, stride };
            stride *= *e as isize;
            dim
        })
        .collect()
}

// =============================================================================
// Interpreter state
// =============================================================================

/// A user procedure implemented by the host.
pub type ExternalProc = Box<dyn FnMut(&mut Memory, &[RtValue]) -> IResult<RtValue>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub name: String,
    pub args: Vec<RtValue>,
}

#[derive(Debug, Clone, Default)]
pub struct InterpStats {
    /// Heap buffers created by `allocmem`, `realloc`, ragged buffers and
    /// transformational results.
    pub allocations: usize,
    pub frees: usize,
    pub reallocs: usize,
    /// `(bytes, element bytes)` of each `realloc`.
    pub realloc_requests: Vec<(usize, usize)>,
    pub calls: Vec<CallRecord>,
}

impl InterpStats {
    pub fn calls_to(&self, name: &str) -> Vec<&CallRecord> {
        self.calls.iter().filter(|c| c.name == name).collect()
    }
}

pub struct Interpreter<'f> {
    body: &'f FuncBody,
    pub memory: Memory,
    pub stats: InterpStats,
    values: HashMap<ValueId, RtValue>,
    procs: HashMap<String, ExternalProc>,
    /// Buffers created by `array_access`, freed by the matching `array_amend`.
    access_cells: HashSet<usize>,
    step_limit: usize,
}

impl<'f> Interpreter<'f> {
    pub fn new(body: &'f FuncBody) -> Self {
        Interpreter {
            body,
            memory: Memory::default(),
            stats: InterpStats::default(),
            values: HashMap::new(),
            procs: HashMap::new(),
            access_cells: HashSet::new(),
            step_limit: 1_000_000,
        }
    }

    pub fn register_procedure(
        &mut self,
        name: &str,
        proc: impl FnMut(&mut Memory, &[RtValue]) -> IResult<RtValue> + 'static,
    ) {
        self.procs.insert(name.to_string(), Box::new(proc));
    }

    /// Heap buffers allocated and not yet freed.
    pub fn live_heap_buffers(&self) -> usize {
        self.memory.buffers.iter().filter(|b| b.heap && b.live).count()
    }

    pub fn run(&mut self, args: &[RtValue]) -> IResult<RtValue> {
        let body = self.body;
        for ((param, _, _), arg) in body.params.iter().zip(args) {
            self.values.insert(*param, arg.clone());
        }

        let mut current = BlockId::ENTRY;
        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > self.step_limit {
                return Err(InterpError::StepLimit);
            }

            let block = body.get_block(current);
            for inst_id in &block.insts {
                let inst = body.get_inst(*inst_id);
                let value = self.exec(inst)?;
                if let Some(result) = inst.result {
                    self.values.insert(result, value);
                }
            }

            let term = block
                .terminator
                .as_ref()
                .ok_or_else(|| InterpError::TypeError(format!("{} has no terminator", current)))?;
            match term {
                Terminator::Branch { target, args } => {
                    self.bind_block_args(*target, args)?;
                    current = *target;
                }
                Terminator::CondBranch {
                    cond,
                    then_target,
                    then_args,
                    else_target,
                    else_args,
                } => {
                    if self.get(*cond)?.as_bool()? {
                        self.bind_block_args(*then_target, then_args)?;
                        current = *then_target;
                    } else {
                        self.bind_block_args(*else_target, else_args)?;
                        current = *else_target;
                    }
                }
                Terminator::Return(value) => return self.get(*value),
                Terminator::ReturnUnit => return Ok(RtValue::Unit),
                Terminator::Unreachable => {
                    return Err(InterpError::TypeError("reached unreachable".to_string()));
                }
            }
        }
    }

    fn bind_block_args(&mut self, target: BlockId, args: &[ValueId]) -> IResult<()> {
        let values: Vec<RtValue> = args.iter().map(|a| self.get(*a)).collect::<IResult<_>>()?;
        let body = self.body;
        let params = &body.get_block(target).params;
        for (param, value) in params.iter().zip(values) {
            self.values.insert(param.value, value);
        }
        Ok(())
    }

    fn get(&self, id: ValueId) -> IResult<RtValue> {
        self.values.get(&id).cloned().ok_or(InterpError::UndefinedValue(id.0))
    }

    fn get_usize(&self, id: ValueId) -> IResult<usize> {
        self.get(id)?.as_usize()
    }

    fn indices(&self, ids: &[ValueId]) -> IResult<Vec<usize>> {
        ids.iter().map(|id| self.get_usize(*id)).collect()
    }

    fn path(&self, path: &[PathComponent]) -> IResult<Vec<PathStep>> {
        path.iter()
            .map(|comp| {
                Ok(match comp {
                    PathComponent::Field(i) => PathStep::Field(*i as usize),
                    PathComponent::ComplexPart(false) => PathStep::Re,
                    PathComponent::ComplexPart(true) => PathStep::Im,
                    PathComponent::Index(v) => PathStep::Index(self.get_usize(*v)?),
                    PathComponent::Substring { start, len } => PathStep::Substring {
                        start: self.get_usize(*start)?,
                        len: self.get_usize(*len)?,
                    },
                })
            })
            .collect()
    }

    fn shape_of(&self, shape: Option<ValueId>) -> IResult<Option<Vec<usize>>> {
        match shape {
            None => Ok(None),
            Some(id) => match self.get(id)? {
                RtValue::Shape(extents) => Ok(Some(extents)),
                other => Err(InterpError::TypeError(format!("expected shape, got {}", other))),
            },
        }
    }

    /// Address of an element of `memref` (an address or a descriptor).
    fn element_address(&self, memref: &RtValue, shape: Option<&[usize]>, indices: &[usize]) -> IResult<Address> {
        match memref {
            RtValue::Box(b) => b.element(indices),
            RtValue::Addr(addr) => {
                let lin = match shape {
                    Some(extents) => linearize(indices, extents)?,
                    None => match indices {
                        [] => 0,
                        [lin] => *lin,
                        _ => {
                            return Err(InterpError::TypeError(
                                "multi-dimensional coordinate without a shape".to_string(),
                            ))
                        }
                    },
                };
                addr.advance(lin as isize)
            }
            RtValue::Null => Err(InterpError::NullDereference("array_coor")),
            other => Err(InterpError::TypeError(format!("array_coor on {}", other))),
        }
    }

    fn memref_extents(&self, memref: &RtValue, shape: Option<&[usize]>) -> IResult<Vec<usize>> {
        match (memref, shape) {
            (RtValue::Box(b), _) => Ok(b.extents()),
            (_, Some(extents)) => Ok(extents.to_vec()),
            (RtValue::Null, None) => Err(InterpError::NullDereference("array_load")),
            (other, None) => Err(InterpError::TypeError(format!("array of {} has no shape", other))),
        }
    }

    fn exec(&mut self, inst: &Inst) -> IResult<RtValue> {
        let ty = &inst.result_ty;
        match &inst.kind {
            InstKind::Int(text) => {
                let v: i64 = text.parse().map_err(|_| InterpError::TypeError(format!("bad integer {}", text)))?;
                Ok(RtValue::Int(wrap_int(v, types::int_bits(ty).unwrap_or(64))))
            }
            InstKind::Float(text) => Ok(RtValue::Real(round_real(parse_float(text)?, ty))),
            InstKind::Complex { re, im } => Ok(RtValue::Complex(parse_float(re)?, parse_float(im)?)),
            InstKind::Bool(b) => Ok(RtValue::Bool(*b)),
            InstKind::String(s) => Ok(RtValue::Str(s.clone())),
            InstKind::Unit => Ok(RtValue::Unit),
            InstKind::Undef => Ok(RtValue::Undef),

            InstKind::BinOp { op, lhs, rhs } => eval_binop(op, &self.get(*lhs)?, &self.get(*rhs)?, ty),
            InstKind::UnaryOp { op, operand } => eval_unary(op, &self.get(*operand)?, ty),
            InstKind::Cmp { pred, lhs, rhs } => eval_cmp(*pred, &self.get(*lhs)?, &self.get(*rhs)?).map(RtValue::Bool),
            InstKind::Convert { value } => convert(self.get(*value)?, ty),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                if self.get(*cond)?.as_bool()? {
                    self.get(*on_true)
                } else {
                    self.get(*on_false)
                }
            }
            InstKind::Tuple(elems) => Ok(RtValue::Record(elems.iter().map(|e| self.get(*e)).collect::<IResult<_>>()?)),
            InstKind::Project { base, index } => match self.get(*base)? {
                RtValue::Record(fields) => fields
                    .get(*index as usize)
                    .cloned()
                    .ok_or(InterpError::IndexOutOfBounds {
                        idx: *index as i64,
                        len: fields.len(),
                    }),
                RtValue::Complex(re, im) => Ok(RtValue::Real(if *index == 0 { re } else { im })),
                other => Err(InterpError::TypeError(format!("project from {}", other))),
            },

            InstKind::Call { func, args } => {
                let args: Vec<RtValue> = args.iter().map(|a| self.get(*a)).collect::<IResult<_>>()?;
                trace!("call {}({})", func, args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
                self.stats.calls.push(CallRecord {
                    name: func.clone(),
                    args: args.clone(),
                });
                let proc = self.procs.get_mut(func).ok_or_else(|| InterpError::UnknownProcedure(func.clone()))?;
                proc(&mut self.memory, &args)
            }
            InstKind::Intrinsic { name, args } => {
                let args: Vec<RtValue> = args.iter().map(|a| self.get(*a)).collect::<IResult<_>>()?;
                self.intrinsic(name, &args, ty)
            }

            InstKind::Shape { extents } => Ok(RtValue::Shape(self.indices(extents)?)),
            InstKind::Slice { dims } => {
                let dims = dims
                    .iter()
                    .map(|d| {
                        Ok(match d {
                            SliceDim::Range { start, extent, step } => SliceVal::Range {
                                start: self.get_usize(*start)?,
                                extent: self.get_usize(*extent)?,
                                step: self.get(*step)?.as_int()?,
                            },
                            SliceDim::Index(i) => SliceVal::Index(self.get_usize(*i)?),
                        })
                    })
                    .collect::<IResult<_>>()?;
                Ok(RtValue::Slice(dims))
            }
            InstKind::Embox {
                memref,
                shape,
                slice,
                path,
            } => self.embox(*memref, *shape, *slice, path),
            InstKind::BoxAddr { boxed } => match self.get(*boxed)? {
                RtValue::Box(b) => {
                    let zeros = vec![0; b.dims.len()];
                    if b.dims.iter().any(|d| d.extent == 0) {
                        Ok(RtValue::Addr(b.base.with_path(&b.elem_path)))
                    } else {
                        Ok(RtValue::Addr(b.element(&zeros)?))
                    }
                }
                RtValue::Null => Ok(RtValue::Null),
                other => Err(InterpError::TypeError(format!("box_addr of {}", other))),
            },
            InstKind::BoxExtent { boxed, dim } => {
                let value = self.get(*boxed)?;
                let b = value.as_box("box_extent")?;
                let d = b.dims.get(*dim as usize).ok_or(InterpError::IndexOutOfBounds {
                    idx: *dim as i64,
                    len: b.dims.len(),
                })?;
                Ok(RtValue::Int(d.extent as i64))
            }
            InstKind::IsPresent { value } => Ok(RtValue::Bool(!matches!(self.get(*value)?, RtValue::Null))),
            InstKind::Absent => Ok(RtValue::Null),
            InstKind::ArrayCoor {
                memref,
                shape,
                indices,
            } => {
                let shape = self.shape_of(*shape)?;
                let indices = self.indices(indices)?;
                let memref = self.get(*memref)?;
                Ok(RtValue::Addr(self.element_address(&memref, shape.as_deref(), &indices)?))
            }
            InstKind::CoordinateOf { base, path } => {
                let base = self.get(*base)?;
                let path = self.path(path)?;
                Ok(RtValue::Addr(base.as_addr("coordinate_of")?.with_path(&path)))
            }

            InstKind::ArrayLoad { memref, shape, .. } => {
                let shape = self.shape_of(*shape)?;
                let memref = self.get(*memref)?;
                let extents = self.memref_extents(&memref, shape.as_deref())?;
                let count: usize = extents.iter().product();
                let mut elems = Vec::with_capacity(count);
                for lin in 0..count {
                    let addr = self.element_address(&memref, Some(&extents), &unravel(lin, &extents))?;
                    elems.push(self.memory.read(&addr)?);
                }
                Ok(RtValue::Array(Rc::new(ArrayVal { extents, elems })))
            }
            InstKind::ArrayFetch { array, indices, path } => {
                let array = self.array_value(*array)?;
                let lin = linearize(&self.indices(indices)?, &array.extents)?;
                read_path(&array.elems[lin], &self.path(path)?)
            }
            InstKind::ArrayUpdate {
                array,
                value,
                indices,
                path,
            } => {
                let mut array = self.array_value(*array)?;
                let lin = linearize(&self.indices(indices)?, &array.extents)?;
                let path = self.path(path)?;
                let value = self.get(*value)?;
                write_path(&mut Rc::make_mut(&mut array).elems[lin], &path, value)?;
                Ok(RtValue::Array(array))
            }
            InstKind::ArrayAccess { array, indices, path } => {
                let array = self.array_value(*array)?;
                let lin = linearize(&self.indices(indices)?, &array.extents)?;
                let current = read_path(&array.elems[lin], &self.path(path)?)?;
                let addr = self.memory.push(vec![current], true);
                self.access_cells.insert(addr.buf);
                Ok(RtValue::Addr(addr))
            }
            InstKind::ArrayAmend {
                array,
                access,
                indices,
                path,
            } => {
                let mut array = self.array_value(*array)?;
                let lin = linearize(&self.indices(indices)?, &array.extents)?;
                let path = self.path(path)?;
                let access = self.get(*access)?;
                let cell = access.as_addr("array_amend")?.clone();
                let value = self.memory.read(&cell)?;
                write_path(&mut Rc::make_mut(&mut array).elems[lin], &path, value)?;
                if self.access_cells.remove(&cell.buf) {
                    self.memory.free(cell.buf)?;
                }
                Ok(RtValue::Array(array))
            }
            InstKind::ArrayMergeStore {
                result, memref, shape, ..
            } => {
                let result = self.array_value(*result)?;
                let shape = self.shape_of(*shape)?;
                let memref = self.get(*memref)?;
                for (lin, elem) in result.elems.iter().enumerate() {
                    let addr = self.element_address(&memref, shape.as_deref().or(Some(result.extents.as_slice())), &unravel(lin, &result.extents))?;
                    self.memory.write(&addr, elem.clone())?;
                }
                Ok(RtValue::Unit)
            }

            InstKind::Alloca { elem_ty, .. } => Ok(RtValue::Addr(self.memory.push(vec![default_value(elem_ty)], false))),
            InstKind::Allocmem { elem_ty, count, .. } => {
                let count = self.get_usize(*count)?;
                self.stats.allocations += 1;
                Ok(RtValue::Addr(self.memory.push(vec![default_value(elem_ty); count], true)))
            }
            InstKind::Freemem { memref, .. } => {
                let memref = self.get(*memref)?;
                let addr = memref.as_addr("freemem")?;
                self.memory.free(addr.buf)?;
                self.stats.frees += 1;
                Ok(RtValue::Unit)
            }
            InstKind::Load { ptr, .. } => {
                let ptr = self.get(*ptr)?;
                self.memory.read(ptr.as_addr("load")?)
            }
            InstKind::Store { ptr, value, .. } => {
                let ptr = self.get(*ptr)?;
                let value = self.get(*value)?;
                self.memory.write(ptr.as_addr("store")?, value)?;
                Ok(RtValue::Unit)
            }
        }
    }

    fn array_value(&self, id: ValueId) -> IResult<Rc<ArrayVal>> {
        match self.get(id)? {
            RtValue::Array(a) => Ok(a),
            other => Err(InterpError::TypeError(format!("expected array value, got {}", other))),
        }
    }

    fn embox(
        &self,
        memref: ValueId,
        shape: Option<ValueId>,
        slice: Option<ValueId>,
        path: &[PathComponent],
    ) -> IResult<RtValue> {
        let memref = self.get(memref)?;
        let mut boxed = match &memref {
            RtValue::Null => return Ok(RtValue::Null),
            RtValue::Box(b) => b.clone(),
            RtValue::Addr(addr) => {
                let extents = self.shape_of(shape)?.unwrap_or_default();
                BoxVal {
                    base: addr.clone(),
                    dims: contiguous_dims(&extents),
                    elem_path: Vec::new(),
                }
            }
            other => return Err(InterpError::TypeError(format!("embox of {}", other))),
        };

        if let Some(slice) = slice {
            let RtValue::Slice(slice_dims) = self.get(slice)? else {
                return Err(InterpError::TypeError("embox slice is not a slice".to_string()));
            };
            let mut delta = 0isize;
            let mut dims = Vec::new();
            for (sd, dim) in slice_dims.iter().zip(&boxed.dims) {
                match sd {
                    SliceVal::Range { start, extent, step } => {
                        delta += *start as isize * dim.stride;
                        dims.push(BoxDim {
                            extent: *extent,
                            stride: dim.stride * *step as isize,
                        });
                    }
                    SliceVal::Index(i) => delta += *i as isize * dim.stride,
                }
            }
            if delta != 0 {
                boxed.base = boxed.base.advance(delta)?;
            }
            boxed.dims = dims;
        }
        boxed.elem_path.extend(self.path(path)?);
        Ok(RtValue::Box(boxed))
    }

    // =========================================================================
    // Runtime entry points
    // =========================================================================

    fn alloc_heap(&mut self, cells: Vec<RtValue>) -> Address {
        self.stats.allocations += 1;
        self.memory.push(cells, true)
    }

    fn box_elements(&self, b: &BoxVal) -> IResult<Vec<RtValue>> {
        let extents = b.extents();
        let count: usize = extents.iter().product();
        (0..count).map(|lin| self.memory.read(&b.element(&unravel(lin, &extents))?)).collect()
    }

    fn result_box(&mut self, elems: Vec<RtValue>, extents: &[usize]) -> RtValue {
        let base = self.alloc_heap(elems);
        RtValue::Box(BoxVal {
            base,
            dims: contiguous_dims(extents),
            elem_path: Vec::new(),
        })
    }

    fn intrinsic(&mut self, name: &str, args: &[RtValue], ty: &Type) -> IResult<RtValue> {
        let arg = |i: usize| -> IResult<&RtValue> {
            args.get(i)
                .ok_or_else(|| InterpError::TypeError(format!("{}: missing argument {}", name, i)))
        };
        match name {
            "is_contiguous" => match arg(0)? {
                RtValue::Box(b) => Ok(RtValue::Bool(b.is_contiguous())),
                RtValue::Null => Err(InterpError::NullDereference("is_contiguous")),
                other => Err(InterpError::TypeError(format!("is_contiguous of {}", other))),
            },
            "realloc" => {
                let old = arg(0)?.as_addr("realloc")?.clone();
                let bytes = arg(1)?.as_usize()?;
                let elem_bytes = arg(2)?.as_usize()?;
                self.stats.realloc_requests.push((bytes, elem_bytes));
                let capacity = bytes / elem_bytes.max(1);
                let mut cells = self.memory.cells(old.buf)?.to_vec();
                let fill = cells.first().cloned().unwrap_or(RtValue::Undef);
                cells.resize(capacity.max(cells.len()), fill);
                self.memory.free(old.buf)?;
                self.stats.reallocs += 1;
                self.stats.frees += 1;
                Ok(RtValue::Addr(self.alloc_heap(cells)))
            }
            "ragged_allocate" => {
                let header = arg(0)?.as_addr("ragged_allocate")?.clone();
                let is_header = arg(1)?.as_bool()?;
                let rank = arg(2)?.as_usize()?;
                let extents: Vec<usize> = args
                    .get(4..4 + rank)
                    .ok_or_else(|| InterpError::TypeError("ragged_allocate: missing extents".to_string()))?
                    .iter()
                    .map(RtValue::as_usize)
                    .collect::<IResult<_>>()?;
                if let RtValue::Record(fields) = self.memory.read(&header)? {
                    if fields.first() != Some(&RtValue::Int(0)) {
                        return Ok(RtValue::Unit);
                    }
                }
                let count = extents.iter().product();
                let fill = if is_header { empty_header() } else { RtValue::Bool(false) };
                let data = self.alloc_heap(vec![fill; count]);
                let shape = self.alloc_heap(extents.iter().map(|e| RtValue::Int(*e as i64)).collect());
                let flags = if is_header { 2 } else { 1 };
                self.memory.write(
                    &header,
                    RtValue::Record(vec![RtValue::Int(flags), RtValue::Addr(data), RtValue::Addr(shape)]),
                )?;
                Ok(RtValue::Unit)
            }
            "ragged_free" => {
                let header = arg(0)?.as_addr("ragged_free")?.clone();
                self.ragged_free(&header)?;
                Ok(RtValue::Unit)
            }
            "assign" => {
                let dst = arg(0)?.as_box("assign")?.clone();
                let src = arg(1)?.as_box("assign")?.clone();
                let elems = self.box_elements(&src)?;
                let extents = dst.extents();
                for (lin, elem) in elems.into_iter().enumerate() {
                    let addr = dst.element(&unravel(lin, &extents))?;
                    self.memory.write(&addr, elem)?;
                }
                Ok(RtValue::Unit)
            }
            "char_resize" => match arg(0)? {
                RtValue::Str(s) => Ok(RtValue::Str(fit_chars(s, arg(1)?.as_usize()?))),
                other => Err(InterpError::TypeError(format!("char_resize of {}", other))),
            },
            "len" => match arg(0)? {
                RtValue::Str(s) => Ok(RtValue::Int(s.chars().count() as i64)),
                other => Err(InterpError::TypeError(format!("len of {}", other))),
            },
            "substr" => match arg(0)? {
                RtValue::Str(s) => {
                    let start = arg(1)?.as_usize()?;
                    let len = arg(2)?.as_usize()?;
                    Ok(RtValue::Str(s.chars().skip(start).take(len).collect()))
                }
                other => Err(InterpError::TypeError(format!("substr of {}", other))),
            },
            "sum" | "product" | "maxval" | "minval" | "count" | "any" | "all" => {
                let elems = self.box_elements(arg(0)?.as_box("reduction")?)?;
                reduce(name, &elems, ty)
            }
            "dot_product" => {
                let a = self.box_elements(arg(0)?.as_box("dot_product")?)?;
                let b = self.box_elements(arg(1)?.as_box("dot_product")?)?;
                let products: Vec<RtValue> =
                    a.iter().zip(&b).map(|(x, y)| eval_binop("*", x, y, ty)).collect::<IResult<_>>()?;
                reduce("sum", &products, ty)
            }
            "transpose" => {
                let src = arg(0)?.as_box("transpose")?.clone();
                let ext = src.extents();
                if ext.len() != 2 {
                    return Err(InterpError::TypeError("transpose of non-matrix".to_string()));
                }
                let out_ext = [ext[1], ext[0]];
                let mut elems = Vec::with_capacity(ext[0] * ext[1]);
                for j in 0..out_ext[1] {
                    for i in 0..out_ext[0] {
                        elems.push(self.memory.read(&src.element(&[j, i])?)?);
                    }
                }
                Ok(self.result_box(elems, &out_ext))
            }
            "cshift" => {
                let src = arg(0)?.as_box("cshift")?.clone();
                let shift = arg(1)?.as_int()?;
                let ext = src.extents();
                let elems = self.box_elements(&src)?;
                let n = ext.first().copied().unwrap_or(0);
                let mut out = elems.clone();
                if n > 0 {
                    for (lin, slot) in out.iter_mut().enumerate() {
                        let mut idx = unravel(lin, &ext);
                        idx[0] = (idx[0] as i64 + shift).rem_euclid(n as i64) as usize;
                        *slot = elems[linearize(&idx, &ext)?].clone();
                    }
                }
                Ok(self.result_box(out, &ext))
            }
            "reshape" => {
                let src = arg(0)?.as_box("reshape")?.clone();
                let shape_box = arg(1)?.as_box("reshape")?.clone();
                let extents: Vec<usize> =
                    self.box_elements(&shape_box)?.iter().map(RtValue::as_usize).collect::<IResult<_>>()?;
                let elems = self.box_elements(&src)?;
                let count: usize = extents.iter().product();
                if count > elems.len() {
                    return Err(InterpError::IndexOutOfBounds {
                        idx: count as i64,
                        len: elems.len(),
                    });
                }
                Ok(self.result_box(elems[..count].to_vec(), &extents))
            }
            _ => eval_elemental(name, args, ty),
        }
    }

    fn ragged_free(&mut self, header: &Address) -> IResult<()> {
        let RtValue::Record(fields) = self.memory.read(header)? else {
            return Err(InterpError::TypeError("ragged_free of non-header".to_string()));
        };
        let flags = fields[0].as_int()?;
        if flags == 0 {
            return Ok(());
        }
        let data = fields[1].as_addr("ragged_free")?.clone();
        let shape = fields[2].as_addr("ragged_free")?.clone();
        if flags == 2 {
            let count = self.memory.cells(data.buf)?.len();
            for i in 0..count {
                self.ragged_free(&Address::new(data.buf, i))?;
            }
        }
        self.memory.free(data.buf)?;
        self.memory.free(shape.buf)?;
        self.stats.frees += 2;
        self.memory.write(header, empty_header())
    }
}

// =============================================================================
// Scalar semantics
// =============================================================================

fn parse_float(text: &str) -> IResult<f64> {
    text.parse().map_err(|_| InterpError::TypeError(format!("bad float {}", text)))
}

pub fn wrap_int(v: i64, bits: usize) -> i64 {
    if bits >= 64 {
        v
    } else {
        let shift = 64 - bits;
        (v << shift) >> shift
    }
}

fn round_real(v: f64, ty: &Type) -> f64 {
    match ty {
        Type::Constructed(TypeName::Real(32), _) => v as f32 as f64,
        _ => v,
    }
}

fn int_pow(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 => {
                if exp % 2 == 0 {
                    1
                } else {
                    -1
                }
            }
            _ => 0,
        };
    }
    let mut acc = 1i64;
    for _ in 0..exp {
        acc = acc.wrapping_mul(base);
    }
    acc
}

fn complex_div(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    let denom = b.0 * b.0 + b.1 * b.1;
    ((a.0 * b.0 + a.1 * b.1) / denom, (a.1 * b.0 - a.0 * b.1) / denom)
}

fn complex_pow(a: (f64, f64), b: (f64, f64)) -> (f64, f64) {
    if a == (0.0, 0.0) {
        return (0.0, 0.0);
    }
    let r = (a.0 * a.0 + a.1 * a.1).sqrt();
    let theta = a.1.atan2(a.0);
    let ln_r = r.ln();
    let mag = (b.0 * ln_r - b.1 * theta).exp();
    let angle = b.1 * ln_r + b.0 * theta;
    (mag * angle.cos(), mag * angle.sin())
}

pub fn eval_binop(op: &str, lhs: &RtValue, rhs: &RtValue, ty: &Type) -> IResult<RtValue> {
    match (lhs, rhs) {
        (RtValue::Int(a), RtValue::Int(b)) => {
            let (a, b) = (*a, *b);
            let v = match op {
                "+" => a.wrapping_add(b),
                "-" => a.wrapping_sub(b),
                "*" => a.wrapping_mul(b),
                "/" => {
                    if b == 0 {
                        return Err(InterpError::DivisionByZero);
                    }
                    a.wrapping_div(b)
                }
                "mod" => {
                    if b == 0 {
                        return Err(InterpError::DivisionByZero);
                    }
                    a.wrapping_rem(b)
                }
                "**" => int_pow(a, b),
                "max" => a.max(b),
                "min" => a.min(b),
                _ => return Err(InterpError::TypeError(format!("integer operator {}", op))),
            };
            Ok(RtValue::Int(wrap_int(v, types::int_bits(ty).unwrap_or(64))))
        }
        (RtValue::Real(_) | RtValue::Int(_), RtValue::Real(_) | RtValue::Int(_)) => {
            let (a, b) = (lhs.as_real()?, rhs.as_real()?);
            let v = match op {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                "/" => a / b,
                "**" => a.powf(b),
                "max" => a.max(b),
                "min" => a.min(b),
                "mod" => a % b,
                _ => return Err(InterpError::TypeError(format!("real operator {}", op))),
            };
            Ok(RtValue::Real(round_real(v, ty)))
        }
        (RtValue::Complex(..), _) | (_, RtValue::Complex(..)) => {
            let a = as_complex(lhs)?;
            let b = as_complex(rhs)?;
            let v = match op {
                "+" => (a.0 + b.0, a.1 + b.1),
                "-" => (a.0 - b.0, a.1 - b.1),
                "*" => (a.0 * b.0 - a.1 * b.1, a.0 * b.1 + a.1 * b.0),
                "/" => complex_div(a, b),
                "**" => complex_pow(a, b),
                _ => return Err(InterpError::TypeError(format!("complex operator {}", op))),
            };
            Ok(RtValue::Complex(v.0, v.1))
        }
        (RtValue::Bool(a), RtValue::Bool(b)) => {
            let v = match op {
                "and" => *a && *b,
                "or" => *a || *b,
                "eqv" => a == b,
                "neqv" => a != b,
                _ => return Err(InterpError::TypeError(format!("logical operator {}", op))),
            };
            Ok(RtValue::Bool(v))
        }
        (RtValue::Str(a), RtValue::Str(b)) if op == "//" => Ok(RtValue::Str(format!("{}{}", a, b))),
        _ => Err(InterpError::TypeError(format!("{} {} {}", lhs, op, rhs))),
    }
}

fn as_complex(v: &RtValue) -> IResult<(f64, f64)> {
    match v {
        RtValue::Complex(re, im) => Ok((*re, *im)),
        other => Ok((other.as_real()?, 0.0)),
    }
}

fn eval_unary(op: &str, operand: &RtValue, ty: &Type) -> IResult<RtValue> {
    match (op, operand) {
        ("neg", RtValue::Int(v)) => Ok(RtValue::Int(wrap_int(v.wrapping_neg(), types::int_bits(ty).unwrap_or(64)))),
        ("neg", RtValue::Real(v)) => Ok(RtValue::Real(-v)),
        ("neg", RtValue::Complex(re, im)) => Ok(RtValue::Complex(-re, -im)),
        ("not", RtValue::Bool(b)) => Ok(RtValue::Bool(!b)),
        _ => Err(InterpError::TypeError(format!("{} {}", op, operand))),
    }
}

fn padded_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let len = a.chars().count().max(b.chars().count());
    fit_chars(a, len).cmp(&fit_chars(b, len))
}

pub fn eval_cmp(pred: CmpPredicate, lhs: &RtValue, rhs: &RtValue) -> IResult<bool> {
    use std::cmp::Ordering;
    use CmpPredicate::*;

    match (lhs, rhs) {
        (RtValue::Int(a), RtValue::Int(b)) => Ok(match pred {
            Eq | OEq => a == b,
            Ne | UNe => a != b,
            Slt | OLt => a < b,
            Sle | OLe => a <= b,
            Sgt | OGt => a > b,
            Sge | OGe => a >= b,
        }),
        (RtValue::Real(_), RtValue::Real(_)) => {
            let (a, b) = (lhs.as_real()?, rhs.as_real()?);
            Ok(match pred {
                OEq | Eq => a == b,
                UNe | Ne => a != b,
                OLt | Slt => a < b,
                OLe | Sle => a <= b,
                OGt | Sgt => a > b,
                OGe | Sge => a >= b,
            })
        }
        (RtValue::Complex(ar, ai), RtValue::Complex(br, bi)) => match pred {
            OEq | Eq => Ok(ar == br && ai == bi),
            UNe | Ne => Ok(ar != br || ai != bi),
            _ => Err(InterpError::TypeError("ordering comparison of complex values".to_string())),
        },
        (RtValue::Str(a), RtValue::Str(b)) => {
            let ord = padded_cmp(a, b);
            Ok(match pred {
                Eq | OEq => ord == Ordering::Equal,
                Ne | UNe => ord != Ordering::Equal,
                Slt | OLt => ord == Ordering::Less,
                Sle | OLe => ord != Ordering::Greater,
                Sgt | OGt => ord == Ordering::Greater,
                Sge | OGe => ord != Ordering::Less,
            })
        }
        (RtValue::Bool(a), RtValue::Bool(b)) => match pred {
            Eq | OEq => Ok(a == b),
            Ne | UNe => Ok(a != b),
            _ => Err(InterpError::TypeError("ordering comparison of logical values".to_string())),
        },
        _ => Err(InterpError::TypeError(format!("compare {} with {}", lhs, rhs))),
    }
}

fn convert(value: RtValue, ty: &Type) -> IResult<RtValue> {
    let Type::Constructed(name, _) = ty else {
        return Ok(value);
    };
    match (name, value) {
        (TypeName::Int(_) | TypeName::Index, RtValue::Int(v)) => Ok(RtValue::Int(wrap_int(v, types::int_bits(ty).unwrap_or(64)))),
        (TypeName::Int(_) | TypeName::Index, RtValue::Real(v)) => {
            Ok(RtValue::Int(wrap_int(v.trunc() as i64, types::int_bits(ty).unwrap_or(64))))
        }
        (TypeName::Real(_), RtValue::Int(v)) => Ok(RtValue::Real(round_real(v as f64, ty))),
        (TypeName::Real(_), RtValue::Real(v)) => Ok(RtValue::Real(round_real(v, ty))),
        (TypeName::Real(_), RtValue::Complex(re, _)) => Ok(RtValue::Real(round_real(re, ty))),
        (TypeName::Complex(_), RtValue::Int(v)) => Ok(RtValue::Complex(v as f64, 0.0)),
        (TypeName::Complex(_), RtValue::Real(v)) => Ok(RtValue::Complex(v, 0.0)),
        (TypeName::Char { len: Some(n), .. }, RtValue::Str(s)) => Ok(RtValue::Str(fit_chars(&s, *n))),
        (_, value) => Ok(value),
    }
}

fn reduce(name: &str, elems: &[RtValue], ty: &Type) -> IResult<RtValue> {
    match name {
        "count" => {
            let n = elems.iter().map(RtValue::as_bool).collect::<IResult<Vec<_>>>()?.into_iter().filter(|b| *b).count();
            Ok(RtValue::Int(n as i64))
        }
        "any" => Ok(RtValue::Bool(elems.iter().map(RtValue::as_bool).collect::<IResult<Vec<_>>>()?.into_iter().any(|b| b))),
        "all" => Ok(RtValue::Bool(elems.iter().map(RtValue::as_bool).collect::<IResult<Vec<_>>>()?.into_iter().all(|b| b))),
        _ => {
            let (op, identity) = match (name, types::category(ty)) {
                ("sum", types::TypeCategory::Integer) => ("+", RtValue::Int(0)),
                ("sum", types::TypeCategory::Complex) => ("+", RtValue::Complex(0.0, 0.0)),
                ("sum", _) => ("+", RtValue::Real(0.0)),
                ("product", types::TypeCategory::Integer) => ("*", RtValue::Int(1)),
                ("product", types::TypeCategory::Complex) => ("*", RtValue::Complex(1.0, 0.0)),
                ("product", _) => ("*", RtValue::Real(1.0)),
                ("maxval", types::TypeCategory::Integer) => ("max", RtValue::Int(i64::MIN)),
                ("maxval", _) => ("max", RtValue::Real(f64::MIN)),
                ("minval", types::TypeCategory::Integer) => ("min", RtValue::Int(i64::MAX)),
                ("minval", _) => ("min", RtValue::Real(f64::MAX)),
                _ => return Err(InterpError::UnknownProcedure(name.to_string())),
            };
            elems.iter().try_fold(identity, |acc, e| eval_binop(op, &acc, e, ty))
        }
    }
}

fn eval_elemental(name: &str, args: &[RtValue], ty: &Type) -> IResult<RtValue> {
    let unary_real = |f: fn(f64) -> f64| -> IResult<RtValue> { Ok(RtValue::Real(round_real(f(args[0].as_real()?), ty))) };
    match (name, args) {
        ("abs", [RtValue::Int(v)]) => Ok(RtValue::Int(wrap_int(v.wrapping_abs(), types::int_bits(ty).unwrap_or(64)))),
        ("abs", [RtValue::Complex(re, im)]) => Ok(RtValue::Real(re.hypot(*im))),
        ("abs", [_]) => unary_real(f64::abs),
        ("sqrt", [_]) => unary_real(f64::sqrt),
        ("sin", [_]) => unary_real(f64::sin),
        ("cos", [_]) => unary_real(f64::cos),
        ("exp", [_]) => unary_real(f64::exp),
        ("log", [_]) => unary_real(f64::ln),
        ("max", [a, b]) => eval_binop("max", a, b, ty),
        ("min", [a, b]) => eval_binop("min", a, b, ty),
        ("mod", [a, b]) => eval_binop("mod", a, b, ty),
        ("sign", [RtValue::Int(a), RtValue::Int(b)]) => Ok(RtValue::Int(if *b >= 0 { a.abs() } else { -a.abs() })),
        ("sign", [a, b]) => {
            let (a, b) = (a.as_real()?, b.as_real()?);
            Ok(RtValue::Real(if b.is_sign_negative() { -a.abs() } else { a.abs() }))
        }
        ("merge", [t, f, mask]) => Ok(if mask.as_bool()? { t.clone() } else { f.clone() }),
        ("aimag", [RtValue::Complex(_, im)]) => Ok(RtValue::Real(*im)),
        ("conjg", [RtValue::Complex(re, im)]) => Ok(RtValue::Complex(*re, -im)),
        _ => Err(InterpError::UnknownProcedure(name.to_string())),
    }
}
