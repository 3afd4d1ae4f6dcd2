//! Iteration spaces: the implicit loop nest of an array statement, the
//! explicit FORALL nest around it, and the WHERE clause chain.

use std::rc::Rc;

use crate::ast::{Expr, ForallLevel, NodeId};
use crate::error::Result;
use crate::mir::ssa::{BlockId, ValueId};
use crate::mir::ssa_builder::FuncBuilder;

use super::exv::ExtendedValue;

/// The current iteration point handed to continuations.
#[derive(Debug, Clone, Default)]
pub struct IterSpace {
    /// Zero-based loop indices, dimension 0 first.
    pub indices: Vec<ValueId>,
    /// The loop-carried accumulator: the destination array value as of the
    /// current partial iteration.
    pub inner_arg: Option<ValueId>,
    /// The element value being stored, for destination continuations.
    pub element: Option<ExtendedValue>,
}

impl IterSpace {
    /// The point of a rank-0 evaluation outside any loop.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(indices: Vec<ValueId>, inner_arg: ValueId) -> Self {
        IterSpace {
            indices,
            inner_arg: Some(inner_arg),
            element: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    pub fn with_element(&self, element: ExtendedValue) -> Self {
        IterSpace {
            element: Some(element),
            ..self.clone()
        }
    }
}

/// Emit a loop nest over `extents` carrying one accumulator. Dimension 0 is
/// the innermost loop, so a nest walks memory in column-major order. `body`
/// receives the accumulator and the indices (dimension 0 first) and returns
/// the next accumulator. Returns the final accumulator and the loop headers,
/// outermost first.
pub(crate) fn build_nest(
    b: &mut FuncBuilder,
    extents: &[ValueId],
    init: ValueId,
    unordered: bool,
    body: &mut dyn FnMut(&mut FuncBuilder, ValueId, &[ValueId]) -> Result<ValueId>,
) -> Result<(ValueId, Vec<BlockId>)> {
    let mut headers = Vec::with_capacity(extents.len());
    let mut outer = Vec::with_capacity(extents.len());
    let result = nest_level(b, extents, init, unordered, &mut outer, &mut headers, body)?;
    Ok((result, headers))
}

fn nest_level(
    b: &mut FuncBuilder,
    extents: &[ValueId],
    acc: ValueId,
    unordered: bool,
    outer: &mut Vec<ValueId>,
    headers: &mut Vec<BlockId>,
    body: &mut dyn FnMut(&mut FuncBuilder, ValueId, &[ValueId]) -> Result<ValueId>,
) -> Result<ValueId> {
    let Some((last, rest)) = extents.split_last() else {
        let indices: Vec<ValueId> = outer.iter().rev().copied().collect();
        return body(b, acc, &indices);
    };
    let open = b.begin_counted_loop(*last, acc, unordered)?;
    headers.push(open.header());
    outer.push(open.index());
    let next = nest_level(b, rest, open.acc(), unordered, outer, headers, body)?;
    outer.pop();
    Ok(b.end_counted_loop(open, next)?)
}

// =============================================================================
// WHERE clause chain
// =============================================================================

/// One WHERE construct: its clauses in order (`None` is a final ELSEWHERE
/// without mask) and the clause whose body is being lowered.
#[derive(Debug, Clone)]
pub struct WhereLevel {
    pub clauses: Vec<Option<Rc<Expr>>>,
    pub active: usize,
}

/// A mask test of one governing condition.
#[derive(Debug, Clone)]
pub struct MaskCondition {
    pub mask: Rc<Expr>,
    /// The body runs where the mask equals this value.
    pub run_when: bool,
}

/// The stack of WHERE constructs enclosing a statement.
#[derive(Debug, Clone, Default)]
pub struct ImplicitSpace {
    levels: Vec<WhereLevel>,
}

impl ImplicitSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Enter `where (mask)`.
    pub fn push_where(&mut self, mask: Rc<Expr>) {
        self.levels.push(WhereLevel {
            clauses: vec![Some(mask)],
            active: 0,
        });
    }

    /// Move to the next `elsewhere` clause of the innermost WHERE.
    pub fn add_elsewhere(&mut self, mask: Option<Rc<Expr>>) {
        let level = self.levels.last_mut().expect("elsewhere outside of a where construct");
        level.clauses.push(mask);
        level.active = level.clauses.len() - 1;
    }

    pub fn pop_where(&mut self) {
        self.levels.pop().expect("unbalanced end of where construct");
    }

    /// Conditions governing the active clauses, outermost first. Within one
    /// WHERE, the active clause runs only where every earlier clause is false
    /// and its own mask, if any, is true.
    pub fn conditions(&self) -> Vec<MaskCondition> {
        let mut conds = Vec::new();
        for level in &self.levels {
            for earlier in level.clauses[..level.active].iter().flatten() {
                conds.push(MaskCondition {
                    mask: earlier.clone(),
                    run_when: false,
                });
            }
            if let Some(Some(mask)) = level.clauses.get(level.active) {
                conds.push(MaskCondition {
                    mask: mask.clone(),
                    run_when: true,
                });
            }
        }
        conds
    }

    /// Every mask referenced by the active clauses.
    pub fn masks(&self) -> Vec<Rc<Expr>> {
        self.conditions().into_iter().map(|c| c.mask).collect()
    }
}

// =============================================================================
// FORALL nest
// =============================================================================

/// The index levels of an enclosing FORALL, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ExplicitSpace {
    pub levels: Vec<ForallLevel>,
}

impl ExplicitSpace {
    pub fn new(levels: Vec<ForallLevel>) -> Self {
        ExplicitSpace { levels }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Ids of the level masks, for cache keys.
    pub fn mask_ids(&self) -> Vec<NodeId> {
        self.levels.iter().filter_map(|l| l.mask.as_ref().map(|m| m.id())).collect()
    }
}

/// Trip count and zero-based iteration number of each explicit level that
/// is currently open.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExplicitPoint {
    pub trips: Vec<ValueId>,
    pub iters: Vec<ValueId>,
}

impl ExplicitPoint {
    pub fn depth(&self) -> usize {
        self.iters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, ExprKind, Header, Literal, Span};
    use crate::mir::interp::{Interpreter, RtValue};
    use crate::mir::ssa::Terminator;
    use crate::mir::ssa_verify::verify_func;
    use crate::types;

    fn mask(id: u32) -> Rc<Expr> {
        Rc::new(Expr {
            h: Header {
                id: NodeId(id),
                span: Span::default(),
            },
            ty: types::logical(),
            rank: 1,
            kind: ExprKind::Literal(Literal::Logical(true)),
        })
    }

    #[test]
    fn test_where_chain_conditions() {
        let mut space = ImplicitSpace::new();
        space.push_where(mask(1));
        let conds = space.conditions();
        assert_eq!(conds.len(), 1);
        assert!(conds[0].run_when);

        space.add_elsewhere(Some(mask(2)));
        let conds = space.conditions();
        assert_eq!(conds.iter().map(|c| (c.mask.id(), c.run_when)).collect::<Vec<_>>(), vec![
            (NodeId(1), false),
            (NodeId(2), true)
        ]);

        space.add_elsewhere(None);
        let conds = space.conditions();
        assert_eq!(conds.iter().map(|c| (c.mask.id(), c.run_when)).collect::<Vec<_>>(), vec![
            (NodeId(1), false),
            (NodeId(2), false)
        ]);

        space.pop_where();
        assert!(space.is_empty());
    }

    #[test]
    fn test_nest_is_column_major() {
        // Record the linear position visited at each step: 2x3 nest.
        let mut b = FuncBuilder::new("nest", vec![], types::index());
        let two = b.push_index(2).unwrap();
        let three = b.push_index(3).unwrap();
        let init = b.push_index(0).unwrap();
        let (result, headers) = build_nest(&mut b, &[two, three], init, true, &mut |b, acc, idx| {
            assert_eq!(idx.len(), 2);
            // acc * 10 + (i + 2 * j): visiting order shows as digits.
            let ten = b.push_index(10)?;
            let two = b.push_index(2)?;
            let scaled = b.push_binop("*", acc, ten, types::index())?;
            let col = b.push_binop("*", idx[1], two, types::index())?;
            let lin = b.push_binop("+", idx[0], col, types::index())?;
            Ok(b.push_binop("+", scaled, lin, types::index())?)
        })
        .unwrap();
        b.terminate(Terminator::Return(result)).unwrap();
        let body = b.finish().unwrap();

        assert_eq!(headers.len(), 2);
        assert!(verify_func(&body).is_ok());
        assert_eq!(Interpreter::new(&body).run(&[]).unwrap(), RtValue::Int(12345));
    }
}
