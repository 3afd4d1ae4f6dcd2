//! Governing-shape inference for a loop nest.

use log::trace;

use crate::ast::Span;
use crate::error::Result;
use crate::mir::ssa::ValueId;
use crate::bail_shape_at;

use super::ArrayLowering;

/// An array operand met while compiling an expression.
#[derive(Debug, Clone)]
pub struct ArrayOperand {
    /// Extents of the operand after sections are applied.
    pub extents: Vec<ValueId>,
    pub may_be_absent: bool,
    /// The passed-object argument of an elemental type-bound call.
    pub passed_object: bool,
}

/// Where the governing shape came from; logged per statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeSource {
    Destination,
    Operand(usize),
    PassedObject(usize),
    /// Every operand may be absent; the first one is used.
    FirstAbsent,
}

/// Pick the governing shape: the destination's when known, else the first
/// operand that cannot be absent, else the passed object, else the first
/// operand in source order.
pub fn infer_shape(
    destination: Option<&[ValueId]>,
    operands: &[ArrayOperand],
) -> Option<(Vec<ValueId>, ShapeSource)> {
    if let Some(extents) = destination {
        return Some((extents.to_vec(), ShapeSource::Destination));
    }
    if let Some((i, op)) = operands.iter().enumerate().find(|(_, op)| !op.may_be_absent) {
        return Some((op.extents.clone(), ShapeSource::Operand(i)));
    }
    if let Some((i, op)) = operands.iter().enumerate().find(|(_, op)| op.passed_object) {
        return Some((op.extents.clone(), ShapeSource::PassedObject(i)));
    }
    operands.first().map(|op| (op.extents.clone(), ShapeSource::FirstAbsent))
}

impl ArrayLowering<'_> {
    pub(crate) fn push_operand(&mut self, operand: ArrayOperand) -> usize {
        self.operands.push(operand);
        self.operands.len() - 1
    }

    /// Run `f` with an empty operand list and return the operands it
    /// collected; the enclosing list is restored afterwards.
    pub(crate) fn with_operands<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<(T, Vec<ArrayOperand>)> {
        let saved = std::mem::take(&mut self.operands);
        let result = f(self);
        let collected = std::mem::replace(&mut self.operands, saved);
        Ok((result?, collected))
    }

    /// Governing shape of a nest whose operands are `operands`.
    pub(crate) fn governing_shape(
        &self,
        destination: Option<&[ValueId]>,
        operands: &[ArrayOperand],
        span: Span,
    ) -> Result<Vec<ValueId>> {
        match infer_shape(destination, operands) {
            Some((extents, source)) => {
                trace!("shape of rank {} from {:?}", extents.len(), source);
                Ok(extents)
            }
            None => bail_shape_at!(span, "no array operand determines the iteration shape"),
        }
    }
}
