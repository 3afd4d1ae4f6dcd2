#![cfg(test)]

use std::rc::Rc;

use crate::ast::*;
use crate::mir::interp::{Interpreter, RtValue};
use crate::mir::ssa::InstKind;
use crate::types;

use super::space::ImplicitSpace;
use super::test_support::*;

fn ranked(name: &str, intent: Intent, passing: Passing) -> DummyArg {
    DummyArg {
        rank: 1,
        ..DummyArg::new(name, intent, passing)
    }
}

fn user_call(iface: &Rc<ProcInterface>, args: Vec<Expr>) -> ProcRef {
    ProcRef {
        proc: ProcDesignator::User(iface.clone()),
        args: args.into_iter().map(Some).collect(),
    }
}

fn stmt_span() -> Span {
    Span::new(100, 1, 100, 20)
}

fn stmt_node() -> NodeId {
    NodeId(1000)
}

/// Host procedure adding 100 to the first three elements at its argument.
fn add_hundred(interp: &mut Interpreter<'_>, name: &str) {
    interp.register_procedure(name, |mem, args| {
        let base = args[0].as_addr("add_hundred")?.clone();
        for k in 0..3 {
            let addr = base.advance(k)?;
            let v = mem.read(&addr)?.as_int()?;
            mem.write(&addr, RtValue::Int(v + 100))?;
        }
        Ok(RtValue::Unit)
    });
}

#[test]
fn test_contiguous_section_is_passed_in_place() {
    // call s(a(2:4))
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let s = interface("s", false, false, vec![ranked("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![5]))]);
    let t = ast.triplet(Some(2), Some(4), None);
    let section = ast.section(&a, vec![t]);
    h.lowering().lower_call_statement(&user_call(&s, vec![section]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    add_hundred(&mut interp, "s");
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4, 5]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[1, 102, 103, 104, 5])[..]);
    assert_eq!(interp.stats.allocations, 0);
}

#[test]
fn test_strided_section_is_copied_in_and_out() {
    // call s(a(1:5:2))
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let s = interface("s", false, false, vec![ranked("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![5]))]);
    let t = ast.triplet(Some(1), Some(5), Some(2));
    let section = ast.section(&a, vec![t]);
    h.lowering().lower_call_statement(&user_call(&s, vec![section]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    add_hundred(&mut interp, "s");
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4, 5]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[101, 2, 103, 4, 105])[..]);
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.stats.frees, 1);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_intent_in_copy_is_not_written_back() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let s = interface("s", false, false, vec![ranked("x", Intent::In, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![5]))]);
    let t = ast.triplet(Some(1), Some(5), Some(2));
    let section = ast.section(&a, vec![t]);
    h.lowering().lower_call_statement(&user_call(&s, vec![section]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    add_hundred(&mut interp, "s");
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4, 5]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[1, 2, 3, 4, 5])[..]);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_pure_elemental_function_keeps_loops_unordered() {
    // b = f(a)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let f = interface(
        "f",
        true,
        true,
        vec![DummyArg::new("x", Intent::In, Passing::Value)],
        Some(types::i32()),
    );
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3])), (&b, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&b);
    let arg = ast.var(&a);
    let rhs = ast.call(&f, vec![Some(arg)], 1);
    {
        let mut lowering = h.lowering();
        lowering.lower_array_assignment(&lhs, &rhs).unwrap();
        assert!(lowering.unordered());
    }
    let body = h.finish();
    let headers = body.loop_headers();
    assert!(!headers.is_empty());
    assert!(headers.iter().all(|(_, unordered)| *unordered));

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("f", |_, args| Ok(RtValue::Int(args[0].as_int()? * 2)));
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[2, 4, 6])[..]);
    assert_eq!(interp.stats.calls_to("f").len(), 3);
}

#[test]
fn test_impure_elemental_subroutine_runs_in_order() {
    // call g(a)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let g = interface("g", true, false, vec![DummyArg::new("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3]))]);
    let arg = ast.var(&a);
    {
        let mut lowering = h.lowering();
        lowering.lower_call_statement(&user_call(&g, vec![arg]), stmt_span(), stmt_node()).unwrap();
        assert!(!lowering.unordered());
    }
    let body = h.finish();
    let headers = body.loop_headers();
    assert!(!headers.is_empty());
    assert!(headers.iter().all(|(_, unordered)| !*unordered));

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("g", |mem, args| {
        let addr = args[0].as_addr("g")?;
        let v = mem.read(addr)?.as_int()?;
        mem.write(addr, RtValue::Int(v + 1))?;
        Ok(RtValue::Unit)
    });
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[2, 3, 4])[..]);
    let offsets: Vec<usize> = interp
        .stats
        .calls_to("g")
        .iter()
        .map(|c| c.args[0].as_addr("offset").unwrap().offset)
        .collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

#[test]
fn test_absent_optional_actual_is_passed_as_absent() {
    // call h(a, opt) with opt not present
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let opt = ast.symbol_with(
        "opt",
        types::i32(),
        1,
        SymbolAttrs {
            optional: true,
            ..SymbolAttrs::default()
        },
    );
    let proc = interface(
        "h",
        true,
        true,
        vec![
            DummyArg::new("x", Intent::In, Passing::Ref),
            DummyArg {
                optional: true,
                ..DummyArg::new("y", Intent::In, Passing::Ref)
            },
        ],
        None,
    );
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3])), (&opt, Storage::Optional)]);
    let args = vec![ast.var(&a), ast.var(&opt)];
    h.lowering().lower_call_statement(&user_call(&proc, args), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("h", |_, _| Ok(RtValue::Unit));
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Null]).unwrap();
    let calls = interp.stats.calls_to("h");
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.args[1] == RtValue::Null));
    assert!(calls.iter().all(|c| matches!(c.args[0], RtValue::Addr(_))));
}

#[test]
fn test_transformational_result_is_released() {
    // b = cshift(a, 1)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![4])), (&b, Storage::Fixed(vec![4]))]);
    let lhs = ast.var(&b);
    let args = vec![ast.var(&a), ast.int(1)];
    let rhs = ast.intrinsic("cshift", args, types::i32(), 1);
    h.lowering().lower_array_assignment(&lhs, &rhs).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3, 4]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[2, 3, 4, 1])[..]);
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_defined_assignment_calls_procedure_per_element() {
    // b = a through elemental asg(out, in)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let b = ast.symbol("b", types::i32(), 1);
    let asg = interface(
        "asg",
        true,
        true,
        vec![
            DummyArg::new("lhs", Intent::Out, Passing::Ref),
            DummyArg::new("rhs", Intent::In, Passing::Ref),
        ],
        None,
    );
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3])), (&b, Storage::Fixed(vec![3]))]);
    let lhs = ast.var(&b);
    let rhs = ast.var(&a);
    {
        let mut lowering = h.lowering();
        lowering
            .lower_elemental_user_assignment(&asg, &lhs, &rhs, None, &ImplicitSpace::new())
            .unwrap();
        assert!(lowering.unordered());
    }
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("asg", |mem, args| {
        let src = mem.read(args[1].as_addr("asg")?)?.as_int()?;
        mem.write(args[0].as_addr("asg")?, RtValue::Int(src * 2))?;
        Ok(RtValue::Unit)
    });
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    let b_mem = interp.memory.alloc(ints(&[0, 0, 0]));
    interp.run(&[RtValue::Addr(a_mem), RtValue::Addr(b_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(b_mem.buf).unwrap(), &ints(&[2, 4, 6])[..]);
    assert_eq!(interp.stats.calls_to("asg").len(), 3);
    assert_eq!(interp.live_heap_buffers(), 0);
}

/// Host subroutine adding 1 to the integer at its argument.
fn increment(interp: &mut Interpreter<'_>, name: &str) {
    interp.register_procedure(name, |mem, args| {
        let addr = args[0].as_addr("increment")?;
        let v = mem.read(addr)?.as_int()?;
        mem.write(addr, RtValue::Int(v + 1))?;
        Ok(RtValue::Unit)
    });
}

#[test]
fn test_parenthesized_actual_is_a_copy() {
    // call g((a)) with g elemental and x intent(inout)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let g = interface("g", true, false, vec![DummyArg::new("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3]))]);
    let arg = ast.var(&a);
    let arg = ast.paren(arg);
    h.lowering().lower_call_statement(&user_call(&g, vec![arg]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    increment(&mut interp, "g");
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[1, 2, 3])[..]);
    let calls = interp.stats.calls_to("g");
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.args[0].as_addr("g").unwrap().buf != a_mem.buf));
    assert_eq!(interp.stats.allocations, 1);
    assert_eq!(interp.live_heap_buffers(), 0);
}

#[test]
fn test_parenthesized_actual_to_explicit_shape_dummy_is_a_copy() {
    // call s((a)) with s non-elemental and x(3) intent(inout)
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let s = interface("s", false, false, vec![ranked("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3]))]);
    let arg = ast.var(&a);
    let arg = ast.paren(arg);
    h.lowering().lower_call_statement(&user_call(&s, vec![arg]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    add_hundred(&mut interp, "s");
    let a_mem = interp.memory.alloc(ints(&[1, 2, 3]));
    interp.run(&[RtValue::Addr(a_mem.clone())]).unwrap();
    assert_eq!(interp.memory.cells(a_mem.buf).unwrap(), &ints(&[1, 2, 3])[..]);
    assert_eq!(interp.live_heap_buffers(), 0);
}

fn optional_ranked(name: &str) -> DummyArg {
    DummyArg {
        optional: true,
        ..ranked(name, Intent::InOut, Passing::Ref)
    }
}

#[test]
fn test_absent_actual_skips_copy_in() {
    // call s(opt) with opt not present and x(*) optional
    let mut ast = Ast::new();
    let opt = ast.symbol_with(
        "opt",
        types::i32(),
        1,
        SymbolAttrs {
            optional: true,
            ..SymbolAttrs::default()
        },
    );
    let s = interface("s", false, false, vec![optional_ranked("x")], None);
    let mut h = Harness::new(&[(&opt, Storage::Optional)]);
    let arg = ast.var(&opt);
    h.lowering().lower_call_statement(&user_call(&s, vec![arg]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("s", |_, _| Ok(RtValue::Unit));
    interp.run(&[RtValue::Null]).unwrap();
    let calls = interp.stats.calls_to("s");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0], RtValue::Null);
    assert_eq!(interp.stats.allocations, 0);
    assert_eq!(interp.stats.frees, 0);
}

#[test]
fn test_unallocated_actual_skips_copy_in() {
    // call s(x) with x unallocated and x(*) optional in s
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
    let s = interface("s", false, false, vec![optional_ranked("y")], None);
    let mut h = Harness::new(&[(&x, Storage::Allocatable)]);
    let arg = ast.var(&x);
    h.lowering().lower_call_statement(&user_call(&s, vec![arg]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let mut interp = Interpreter::new(&body);
    interp.register_procedure("s", |_, _| Ok(RtValue::Unit));
    let cell = interp.memory.alloc(vec![RtValue::Null]);
    interp.run(&[RtValue::Addr(cell.clone())]).unwrap();
    let calls = interp.stats.calls_to("s");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args[0], RtValue::Null);
    assert_eq!(interp.stats.allocations, 0);
    assert_eq!(interp.stats.frees, 0);
    assert_eq!(interp.memory.read(&cell).unwrap(), RtValue::Null);
}

#[test]
fn test_call_statement_is_located_at_the_statement() {
    let mut ast = Ast::new();
    let a = ast.symbol("a", types::i32(), 1);
    let s = interface("s", false, false, vec![ranked("x", Intent::InOut, Passing::Ref)], None);
    let mut h = Harness::new(&[(&a, Storage::Fixed(vec![3]))]);
    let arg = ast.var(&a);
    h.lowering().lower_call_statement(&user_call(&s, vec![arg]), stmt_span(), stmt_node()).unwrap();
    let body = h.finish();

    let call = body
        .iter_insts()
        .find(|inst| matches!(&inst.kind, InstKind::Call { func, .. } if func == "s"))
        .expect("call of s");
    assert_eq!(call.span, stmt_span());
    assert_eq!(call.node_id, stmt_node());
}
