#![cfg(test)]

use crate::ast::*;
use crate::error::CompilerError;
use crate::mir::interp::{Interpreter, RtValue};
use crate::mir::ssa::InstKind;
use crate::options::LoweringOptions;
use crate::types;

use super::test_support::*;

#[test]
fn test_sum_of_two_arrays() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let c = ast.symbol("c", types::i32(), 1);
    let mut h = Harness::new(&[
        (&a, Storage::Fixed(vec![4])),
        (&b, Storage::Fixed(vec![4])),
        (&c, Storage::Fixed(vec![4])),
    ]);
    let lhs = ast.var(&c);
    let (l, r) = (ast.var(&a), ast.var(&b));
    let rhs = ast.binary(BinaryOp::Add, l, r);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let merges = body
        .iter_insts()
        .filter(|inst| matches!(inst.kind, InstKind::ArrayMergeStore { .. }))
        .count();
    assert_eq!(merges, 1);

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    let b_mem = interp.memory.alloc(ints(&[10, 20, 30, 40]));
    let c_mem = interp.memory.alloc(ints(&[0, 0, 0, 0]));
    interp
        .run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem), RtValue::Addr(c_mem.clone())])
        .unwrap();
    assert_eq!(interp.memory.cells(c_mem.buf).unwrap(), &ints(&[11, 22, 33, 44])[..]);
}

#[test]
fn test_overlapping_reversal_reads_old_values() {
    // a(1:4) = a(4:1:-1)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![4]))]);
    let forward = ast.triplet(Some(1), Some(4), None);
    let lhs = ast.section(&a, vec![forward]);
    let backward = ast.triplet(Some(4), Some(1), Some(-1));
    let rhs = ast.section(&a, vec![backward]);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[4, 3, 2, 1])[..]);
    assert_eq!(interp.stats.allocations, 0);
}

#[test]
fn test_vector_subscript_gathers() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let v = ast.symbol("v", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let mut h = Harness::new(&[
        (&a, Storage::Fixed(vec![3])),
        (&v, Storage::Fixed(vec![3])),
        (&b, Storage::Fixed(vec![3])),
    ]);
    let lhs = ast.var(&b);
    let subscript = Subscript::Vector(ast.var(&v));
    let rhs = ast.section(&a, vec![subscript]);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[10, 20, 30]));
    let v_mem = interp.memory.alloc(ints(&[3, 1, 2]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp
        .run(&[RtValue::Addr(a_mem), RtValue::Addr(v_mem), RtValue::Addr(b_mem.clone())])
        .unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[30, 10, 20])[..]);
}

#[test]
fn test_row_into_column() {
    // b(:, 2) = a(2, :) with a(2, 3) and b(3, 2)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 2);
    let b = ast.symbol("b", types::i32(), 2);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![2, 3])), (&b, Storage::Fixed(vec![3, 2]))]);
    let all = ast.triplet(None, None, None);
    let two = Subscript::Index(ast.int(2));
    let lhs = ast.section(&b, vec![all, two]);
    let two = Subscript::Index(ast.int(2));
    let all = ast.triplet(None, None, None);
    let rhs = ast.section(&a, vec![two, all]);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4, 5, 6]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0, 0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[0, 0, 0, 2, 4, 6])[..]);
}

#[test]
fn test_reduction_is_evaluated_before_the_loop() {
    // b = a - sum(a)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3])), (&b, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&b);
    let whole = ast.var(&a);
    let total = ast.intrinsic("sum", vec![whole], types::i32(), 0);
    let elem = ast.var(&a);
    let rhs = ast.binary(BinaryOp::Sub, elem, total);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[-5, -4, -3])[..]);
    assert_eq!(interp.stats.allocations, 0);
}

#[test]
fn test_not_equal_is_true_for_nan() {
    let mut ast = Ast::new();
    let x = ast.symbol("x", types::f64(), 1);
    let y = ast.symbol("y", types::f64(), 1);
    let m = ast.symbol("m", types::logical(), 1);
    let mut h = Harness::new(&[
        (&x, Storage::Fixed(vec![2])),
        (&y, Storage::Fixed(vec![2])),
        (&m, Storage::Fixed(vec![2])),
    ]);
    let lhs = ast.var(&m);
    let (l, r) = (ast.var(&x), ast.var(&y));
    let rhs = ast.relational(RelOp::Ne, l, r);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let x_mem = interp.memory.alloc(reals(&[f64::NAN, 1.0]));
    let y_mem = interp.memory.alloc(reals(&[1.0, 1.0]));
    let m_mem = interp.memory.alloc(vec![RtValue::Bool(false), RtValue::Bool(true)]);
    interp
        .run(&[RtValue::Addr(x_mem), RtValue::Addr(y_mem), RtValue::Addr(m_mem.clone())])
        .unwrap();
    assert_eq!(
        interp.memory.cells(m_mem.buf).unwrap(),
        &[RtValue::Bool(true), RtValue::Bool(false)][..]
    );
}

#[test]
fn test_implied_do_constructor_grows_by_doubling() {
    // a = [(i*i, i = 1, 10)] starting from a capacity of 4
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let i = ast.symbol("i", types::i32(), 0);
    let options = LoweringOptions {
        array_ctor_initial_capacity: 4,
        ..LoweringOptions::default()
    };
    let mut h = Harness::with_options(&[(&a, Storage::Fixed(vec![10]))], options);
    let lhs = ast.var(&a);
    let (l, r) = (ast.var(&i), ast.var(&i));
    let square = ast.binary(BinaryOp::Mul, l, r);
    let items = vec![AcItem::ImpliedDo {
        var: i.clone(),
        lo: Box::new(ast.int(1)),
        hi: Box::new(ast.int(10)),
        step: None,
        items: vec![AcItem::Expr(square)],
    }];
    let rhs = ast.ctor(types::i32(), items);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[0; 10]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(
        interp.memory.cells(a_mem.buf).unwrap(),
        &ints(&[1, 4, 9, 16, 25, 36, 49, 64, 81, 100])[..]
    );
    assert_eq!(interp.stats.reallocs, 2);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_scalar_constructor_has_fixed_size() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&a);
    let items = vec![AcItem::Expr(ast.int(7)), AcItem::Expr(ast.int(8)), AcItem::Expr(ast.int(9))];
    let rhs = ast.ctor(types::i32(), items);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[7, 8, 9])[..]);
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.stats.reallocs, 0);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_unallocated_target_is_allocated() {
    let mut ast = Ast::new();
    let x = ast.symbol_with(
        "x",
        types::i32(),
        1,
        SymbolAttrs {
            allocatable: true,
            ..SymbolAttrs::default()
        },
    );
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&x, Storage::Allocatable), (&a, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&x);
    let rhs = ast.var(&a);
    h.lowering().lower_allocatable_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let cell = interp.memory.alloc(vec![RtValue::Null]);
    let a_mem = interp.memory.alloc(ints(&[5, 6, 7]));
    interp.run(&[RtValue::Addr(cell.clone()), RtValue::Addr(a_mem)]).unwrap();

    let RtValue::Box(desc) = interp.memory.read(&cell).unwrap() else {
        panic!("allocatable left unallocated");
    };
    assert_eq!(desc.extents(), vec![3]);
    let values: Vec<RtValue> = (0..3)
        .map(|k| interp.memory.read(&desc.element(&[k]).unwrap()).unwrap())
        .collect();
    assert_eq!(values, ints(&[5, 6, 7]));
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.live_heap_buffers(), 1);
}

#[test]
fn test_allocated_target_of_same_shape_is_reused() {
    let mut ast = Ast::new();
    let x = ast.symbol_with(
        "x",
        types::i32(),
        1,
        SymbolAttrs {
            allocatable: true,
            ..SymbolAttrs::default()
        },
    );
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&x, Storage::Allocatable), (&a, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&x);
    let rhs = ast.var(&a);
    h.lowering().lower_allocatable_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let data = interp.memory.alloc(ints(&[0, 0, 0]));
    let cell = interp.memory.alloc(vec![contiguous_box(data.clone(), &[3])]);
    let a_mem = interp.memory.alloc(ints(&[5, 6, 7]));
    interp.run(&[RtValue::Addr(cell), RtValue::Addr(a_mem)]).unwrap();
    assert_eq!(interp.memory.cells(data.buf).unwrap(), &ints(&[5, 6, 7])[..]);
    assert_eq!(interp.stats.allocations, 0);
    assert_eq!(interp.stats.frees, 0);
}

#[test]
fn test_assignment_to_expression_is_rejected() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![2]))]);
    let (l, r) = (ast.var(&a), ast.var(&a));
    let lhs = ast.binary(BinaryOp::Add, l, r);
    let rhs = ast.var(&a);
    let err = h.lowering().lower_array_assignment(&lhs, &rhs).unwrap_err();
    assert!(matches!(err, CompilerError::Unsupported(_, Some(_))));
}

#[test]
fn test_allocated_target_of_other_shape_is_reallocated() {
    let mut ast = Ast::new();
    let x = ast.symbol_with(
        "x",
        types::i32(),
        1,
        SymbolAttrs {
            allocatable: true,
            ..SymbolAttrs::default()
        },
    );
    let a = ast.symbol("a", types::i32(), 1);
    let mut h = Harness::new(&[(&x, Storage::Allocatable), (&a, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&x);
    let rhs = ast.var(&a);
    h.lowering().lower_allocatable_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let old = interp.memory.alloc_owned(ints(&[1, 2]));
    let cell = interp.memory.alloc(vec![contiguous_box(old.clone(), &[2])]);
    let a_mem = interp.memory.alloc(ints(&[5, 6, 7]));
    interp.run(&[RtValue::Addr(cell.clone()), RtValue::Addr(a_mem)]).unwrap();

    let RtValue::Box(desc) = interp.memory.read(&cell).unwrap() else {
        panic!("allocatable left unallocated");
    };
    assert_eq!(desc.extents(), vec![3]);
    assert_ne!(desc.base.buf, old.buf);
    let values: Vec<RtValue> = (0..3)
        .map(|k| interp.memory.read(&desc.element(&[k]).unwrap()).unwrap())
        .collect();
    assert_eq!(values, ints(&[5, 6, 7]));
    assert!(!interp.memory.is_live(old.buf));
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.stats.frees, 1);
    assert_eq!(interp.live_heap_buffers(), 1);
}

#[test]
fn test_deferred_length_implied_do_sizes_elements_at_run_time() {
    // c = [(s(1:i), i = 1, 3)] with c character(len=*), 3 at run time
    let mut ast = Ast::new();
    let s = ast.symbol("s", types::character(None), 0);
    let c = ast.symbol("c", types::character(None), 1);
    let i = ast.symbol("i", types::i32(), 0);
    let options = LoweringOptions {
        array_ctor_initial_capacity: 1,
        ..LoweringOptions::default()
    };
    let mut h = Harness::with_options(&[(&s, Storage::Value), (&c, Storage::AssumedLen(vec![3], 3))], options);
    let lhs = ast.var(&c);
    let whole = ast.var(&s);
    let one = ast.int(1);
    let upto_i = ast.var(&i);
    let prefix = ast.expr(
        types::character(None),
        0,
        ExprKind::Substring {
            base: Box::new(whole),
            lo: Some(Box::new(one)),
            hi: Some(Box::new(upto_i)),
        },
    );
    let items = vec![AcItem::ImpliedDo {
        var: i.clone(),
        lo: Box::new(ast.int(1)),
        hi: Box::new(ast.int(3)),
        step: None,
        items: vec![AcItem::Expr(prefix)],
    }];
    let rhs = ast.ctor(types::character(None), items);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let c_mem = interp.memory.alloc(strs(&["", "", ""]));
    interp
        .run(&[RtValue::Str("abc".to_string()), RtValue::Addr(c_mem.clone())])
        .unwrap();
    assert_eq!(interp.memory.cells(c_mem.buf).unwrap(), &strs(&["a  ", "ab ", "abc"])[..]);
    // Byte sizes follow the length of the element being appended.
    assert_eq!(interp.stats.realloc_requests, vec![(4, 2), (12, 3)]);
    assert_eq!(interp.live_heap_buffers(), 0);
}
