#![cfg(test)]

use std::rc::Rc;

use crate::ast::*;
use crate::mir::interp::{Interpreter, RtValue};
use crate::types;

use super::space::{ExplicitSpace, ImplicitSpace};
use super::test_support::*;

#[test]
fn test_where_mask_is_evaluated_once_for_all_clauses() {
    // where (observe(a) > 0)
    //   b = a
    // elsewhere
    //   b = a * 10
    // end where
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let observe = interface(
        "observe",
        true,
        false,
        vec![DummyArg::new("x", Intent::In, Passing::Value)],
        Some(types::i32()),
    );
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3])), (&b, Storage::Fixed(vec![3]))]);

    let arg = ast.var(&a);
    let observed = ast.call(&observe, vec![Some(arg)], 1);
    let zero = ast.int(0);
    let mask = Rc::new(ast.relational(RelOp::Gt, observed, zero));
    let lhs1 = ast.var(&b);
    let rhs1 = ast.var(&a);
    let lhs2 = ast.var(&b);
    let (l, r) = (ast.var(&a), ast.int(10));
    let rhs2 = ast.binary(BinaryOp::Mul, l, r);

    let mut implicit = ImplicitSpace::new();
    implicit.push_where(mask);
    {
        let mut lowering = h.lowering();
        lowering.lower_masked_assignment(&lhs1, &rhs1, None, &implicit).unwrap();
        implicit.add_elsewhere(None);
        lowering.lower_masked_assignment(&lhs2, &rhs2, None, &implicit).unwrap();
        implicit.pop_where();
        lowering.release_masks().unwrap();
    }
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("observe", |_, args| Ok(args[0].clone()));
    let a_mem = interp.memory.alloc(ints(&[1, -2, 3]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[1, -20, 3])[..]);
    assert_eq!(interp.stats.calls_to("observe").len(), 3);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_forall_with_mask() {
    // forall (i = 1:4, a(i) > 2) b(i) = a(i) * 10
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let i = ast.symbol("i", types::i32(), 0);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![4])), (&b, Storage::Fixed(vec![4]))]);

    let at_i = Subscript::Index(ast.var(&i));
    let a_i = ast.section(&a, vec![at_i]);
    let two = ast.int(2);
    let mask = Rc::new(ast.relational(RelOp::Gt, a_i, two));
    let at_i = Subscript::Index(ast.var(&i));
    let lhs = ast.section(&b, vec![at_i]);
    let at_i = Subscript::Index(ast.var(&i));
    let a_i = ast.section(&a, vec![at_i]);
    let ten = ast.int(10);
    let rhs = ast.binary(BinaryOp::Mul, a_i, ten);
    let space = ExplicitSpace::new(vec![ForallLevel {
        index: i.clone(),
        lower: ast.int(1),
        upper: ast.int(4),
        step: None,
        mask: Some(mask),
    }]);

    {
        let mut lowering = h.lowering();
        lowering
            .lower_masked_assignment(&lhs, &rhs, Some(&space), &ImplicitSpace::new())
            .unwrap();
        lowering.release_masks().unwrap();
    }
    let body = h.finish();
    assert!(body.loop_headers().iter().all(|(_, unordered)| *unordered));

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[0, 0, 30, 40])[..]);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_forall_reads_values_from_before_the_statement() {
    // forall (i = 2:4) a(i) = a(i - 1)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let i = ast.symbol("i", types::i32(), 0);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![4]))]);

    let at_i = Subscript::Index(ast.var(&i));
    let lhs = ast.section(&a, vec![at_i]);
    let (l, r) = (ast.var(&i), ast.int(1));
    let previous = ast.binary(BinaryOp::Sub, l, r);
    let rhs = ast.section(&a, vec![Subscript::Index(previous)]);
    let space = ExplicitSpace::new(vec![ForallLevel {
        index: i.clone(),
        lower: ast.int(2),
        upper: ast.int(4),
        step: None,
        mask: None,
    }]);

    h.lowering()
        .lower_masked_assignment(&lhs, &rhs, Some(&space), &ImplicitSpace::new())
        .unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[1, 1, 2, 3])[..]);
    assert_eq!(interp.stats.allocations, 0);
}

fn impure_observe() -> Rc<ProcInterface> {
    interface(
        "observe",
        true,
        false,
        vec![DummyArg::new("x", Intent::In, Passing::Value)],
        Some(types::i32()),
    )
}

#[test]
fn test_where_inside_forall_evaluates_mask_once_per_element() {
    // forall (i = 1:2)
    //   where (observe(a(i, :)) > 0)
    //     b(i, :) = a(i, :)
    //   elsewhere
    //     b(i, :) = a(i, :) * 10
    //   end where
    // end forall
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 2);
    let b = ast.symbol("b", types::i32(), 2);
    let i = ast.symbol("i", types::i32(), 0);
    let observe = impure_observe();
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![2, 3])), (&b, Storage::Fixed(vec![2, 3]))]);

    let row = |ast: &mut Ast, sym: &Rc<Symbol>| {
        let at_i = Subscript::Index(ast.var(&i));
        let all = ast.triplet(None, None, None);
        ast.section(sym, vec![at_i, all])
    };
    let a_row = row(&mut ast, &a);
    let observed = ast.call(&observe, vec![Some(a_row)], 1);
    let zero = ast.int(0);
    let mask = Rc::new(ast.relational(RelOp::Gt, observed, zero));
    let lhs1 = row(&mut ast, &b);
    let rhs1 = row(&mut ast, &a);
    let lhs2 = row(&mut ast, &b);
    let a_row = row(&mut ast, &a);
    let ten = ast.int(10);
    let rhs2 = ast.binary(BinaryOp::Mul, a_row, ten);
    let space = ExplicitSpace::new(vec![ForallLevel {
        index: i.clone(),
        lower: ast.int(1),
        upper: ast.int(2),
        step: None,
        mask: None,
    }]);

    let mut implicit = ImplicitSpace::new();
    implicit.push_where(mask);
    {
        let mut lowering = h.lowering();
        lowering.lower_masked_assignment(&lhs1, &rhs1, Some(&space), &implicit).unwrap();
        implicit.add_elsewhere(None);
        lowering.lower_masked_assignment(&lhs2, &rhs2, Some(&space), &implicit).unwrap();
        implicit.pop_where();
        lowering.release_masks().unwrap();
    }
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("observe", |_, args| Ok(args[0].clone()));
    // Column-major: a = reshape([1, -4, -2, 5, 3, -6], [2, 3]).
    let a_mem = interp.memory.alloc(ints(&[1, -4, -2, 5, 3, -6]));
    let b_mem = interp.memory.alloc(ints(&[0; 6]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(
        interp.memory.cells(b_mem.buf).unwrap(),
        &ints(&[1, -40, -20, 5, 3, -60])[..]
    );
    assert_eq!(interp.stats.calls_to("observe").len(), 6);
    assert!(interp.stats.allocations > 0);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_forall_mask_is_shared_by_the_body_statements() {
    // forall (i = 1:4, observe(a(i)) > 2)
    //   b(i) = a(i)
    //   c(i) = a(i) * 10
    // end forall
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let c = ast.symbol("c", types::i32(), 1);
    let i = ast.symbol("i", types::i32(), 0);
    let observe = impure_observe();
    let mut h = Harness::new(&[
        (&a, Storage::Fixed(vec![4])),
        (&b, Storage::Fixed(vec![4])),
        (&c, Storage::Fixed(vec![4])),
    ]);

    let at = |ast: &mut Ast, sym: &Rc<Symbol>| {
        let at_i = Subscript::Index(ast.var(&i));
        ast.section(sym, vec![at_i])
    };
    let a_i = at(&mut ast, &a);
    let observed = ast.call(&observe, vec![Some(a_i)], 0);
    let two = ast.int(2);
    let mask = Rc::new(ast.relational(RelOp::Gt, observed, two));
    let lhs1 = at(&mut ast, &b);
    let rhs1 = at(&mut ast, &a);
    let lhs2 = at(&mut ast, &c);
    let a_i = at(&mut ast, &a);
    let ten = ast.int(10);
    let rhs2 = ast.binary(BinaryOp::Mul, a_i, ten);
    let space = ExplicitSpace::new(vec![ForallLevel {
        index: i.clone(),
        lower: ast.int(1),
        upper: ast.int(4),
        step: None,
        mask: Some(mask),
    }]);

    {
        let mut lowering = h.lowering();
        let implicit = ImplicitSpace::new();
        lowering.lower_masked_assignment(&lhs1, &rhs1, Some(&space), &implicit).unwrap();
        lowering.lower_masked_assignment(&lhs2, &rhs2, Some(&space), &implicit).unwrap();
        lowering.release_masks().unwrap();
    }
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("observe", |_, args| Ok(args[0].clone()));
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    let b_mem = interp.memory.alloc(ints(&[0; 4]));
    let c_mem = interp.memory.alloc(ints(&[0; 4]));
    interp
        .run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone()), RtValue::Addr(c_mem.clone())])
        .unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[0, 0, 3, 4])[..]);
    assert_eq!(interp.memory.cells(c_mem.buf).unwrap(), &ints(&[0, 0, 30, 40])[..]);
    let observed: Vec<RtValue> = interp.stats.calls_to("observe").iter().map(|c| c.args[0].clone()).collect();
    assert_eq!(observed, ints(&[1, 2, 3, 4]));
    assert_eq!(interp.live_heap_buffers(), 0);
}
