//! Element-level operations shared by scalar and array lowering.

use crate::ast::{BinaryOp, LogicalOp, RelOp, UnaryOp};
use crate::mir::ssa::{CmpPredicate, ValueId};
use crate::mir::ssa_builder::{BuilderError, FuncBuilder};
use crate::types::{self, Type, TypeCategory};

type BResult<T> = Result<T, BuilderError>;

/// Intrinsics applied element by element.
pub const ELEMENTAL_INTRINSICS: &[&str] = &[
    "abs", "sqrt", "sin", "cos", "exp", "log", "max", "min", "mod", "sign", "merge", "aimag", "conjg",
];

/// Intrinsics evaluated once over whole arrays through runtime entry points.
pub const TRANSFORMATIONAL_INTRINSICS: &[&str] = &[
    "sum",
    "product",
    "maxval",
    "minval",
    "count",
    "any",
    "all",
    "dot_product",
    "transpose",
    "cshift",
    "reshape",
];

pub fn is_elemental_intrinsic(name: &str) -> bool {
    ELEMENTAL_INTRINSICS.contains(&name)
}

pub fn is_transformational_intrinsic(name: &str) -> bool {
    TRANSFORMATIONAL_INTRINSICS.contains(&name)
}

pub fn binary(b: &mut FuncBuilder, op: BinaryOp, lhs: ValueId, rhs: ValueId, ty: &Type) -> BResult<ValueId> {
    let mnemonic = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Pow => "**",
        BinaryOp::Concat => "//",
    };
    b.push_binop(mnemonic, lhs, rhs, ty.clone())
}

pub fn unary(b: &mut FuncBuilder, op: UnaryOp, operand: ValueId, ty: &Type) -> BResult<ValueId> {
    let mnemonic = match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
    };
    b.push_unary(mnemonic, operand, ty.clone())
}

/// Comparison predicate for a relational operator over operands of
/// `operand_ty`. Reals and complexes use ordered predicates except `/=`,
/// which is unordered so that NaN compares unequal to everything.
pub fn predicate(op: RelOp, operand_ty: &Type) -> CmpPredicate {
    let floating = matches!(types::category(operand_ty), TypeCategory::Real | TypeCategory::Complex);
    match (op, floating) {
        (RelOp::Lt, false) => CmpPredicate::Slt,
        (RelOp::Le, false) => CmpPredicate::Sle,
        (RelOp::Eq, false) => CmpPredicate::Eq,
        (RelOp::Ne, false) => CmpPredicate::Ne,
        (RelOp::Gt, false) => CmpPredicate::Sgt,
        (RelOp::Ge, false) => CmpPredicate::Sge,
        (RelOp::Lt, true) => CmpPredicate::OLt,
        (RelOp::Le, true) => CmpPredicate::OLe,
        (RelOp::Eq, true) => CmpPredicate::OEq,
        (RelOp::Ne, true) => CmpPredicate::UNe,
        (RelOp::Gt, true) => CmpPredicate::OGt,
        (RelOp::Ge, true) => CmpPredicate::OGe,
    }
}

/// Compare and convert the `i1` result to the expression's logical type.
pub fn relational(
    b: &mut FuncBuilder,
    op: RelOp,
    lhs: ValueId,
    rhs: ValueId,
    operand_ty: &Type,
    result_ty: &Type,
) -> BResult<ValueId> {
    let cmp = b.push_cmp(predicate(op, operand_ty), lhs, rhs)?;
    b.push_convert(cmp, result_ty.clone())
}

pub fn logical(b: &mut FuncBuilder, op: LogicalOp, lhs: ValueId, rhs: ValueId, ty: &Type) -> BResult<ValueId> {
    let mnemonic = match op {
        LogicalOp::And => "and",
        LogicalOp::Or => "or",
        LogicalOp::Eqv => "eqv",
        LogicalOp::Neqv => "neqv",
    };
    b.push_binop(mnemonic, lhs, rhs, ty.clone())
}

/// Apply an elemental intrinsic to scalar arguments. `max` and `min` take
/// any number of arguments and fold pairwise.
pub fn elemental_intrinsic(b: &mut FuncBuilder, name: &str, args: &[ValueId], ty: &Type) -> BResult<ValueId> {
    match (name, args) {
        ("max" | "min", [first, rest @ ..]) if !rest.is_empty() => {
            let mut acc = b.push_convert(*first, ty.clone())?;
            for arg in rest {
                let arg = b.push_convert(*arg, ty.clone())?;
                acc = b.push_binop(name, acc, arg, ty.clone())?;
            }
            Ok(acc)
        }
        _ => b.push_intrinsic(name, args.to_vec(), ty.clone()),
    }
}

/// Fit a character value to a destination length: blank padding or
/// truncation. A static destination length converts; a dynamic one resizes
/// at run time.
pub fn fit_character(b: &mut FuncBuilder, value: ValueId, dest_ty: &Type, dyn_len: Option<ValueId>) -> BResult<ValueId> {
    match dyn_len {
        Some(len) => b.push_intrinsic("char_resize", vec![value, len], dest_ty.clone()),
        None => b.push_convert(value, dest_ty.clone()),
    }
}

/// Size in bytes of one element of type `ty`, as an `index`. A
/// deferred-length character takes its size from the run-time length `len`
/// and is never smaller than one byte. `None` when the size depends on a
/// length that was not given.
pub fn element_bytes(b: &mut FuncBuilder, ty: &Type, len: Option<ValueId>) -> BResult<Option<ValueId>> {
    if let Some(size) = types::static_byte_size(ty) {
        return Ok(Some(b.push_index(size as i64)?));
    }
    let (Some(kind), Some(len)) = (types::char_kind(ty), len) else {
        return Ok(None);
    };
    let kind = b.push_index(kind as i64)?;
    let bytes = b.push_binop("*", len, kind, types::index())?;
    let one = b.push_index(1)?;
    Ok(Some(b.push_binop("max", bytes, one, types::index())?))
}

/// Number of iterations of `lo:hi:step`, as an `index`:
/// `max(0, (hi - lo + step) / step)` evaluated in the bounds' type.
pub fn trip_count(b: &mut FuncBuilder, lo: ValueId, hi: ValueId, step: ValueId, ty: &Type) -> BResult<ValueId> {
    let span = b.push_binop("-", hi, lo, ty.clone())?;
    let span = b.push_binop("+", span, step, ty.clone())?;
    let count = b.push_binop("/", span, step, ty.clone())?;
    let zero = b.push_int(0, ty.clone())?;
    let count = b.push_binop("max", count, zero, ty.clone())?;
    b.push_convert(count, types::index())
}

/// `lo + k * step` for a zero-based iteration number `k` of type `index`.
pub fn nth_value(b: &mut FuncBuilder, lo: ValueId, k: ValueId, step: ValueId, ty: &Type) -> BResult<ValueId> {
    let k = b.push_convert(k, ty.clone())?;
    let offset = b.push_binop("*", k, step, ty.clone())?;
    b.push_binop("+", lo, offset, ty.clone())
}

/// Product of `index` values; 1 for an empty list.
pub fn product(b: &mut FuncBuilder, values: &[ValueId]) -> BResult<ValueId> {
    let mut acc = b.push_index(1)?;
    for v in values {
        acc = b.push_binop("*", acc, *v, types::index())?;
    }
    Ok(acc)
}

/// Convert a subscript to a zero-based position against lower bound `lb`.
pub fn zero_based(b: &mut FuncBuilder, subscript: ValueId, lb: ValueId) -> BResult<ValueId> {
    let subscript = b.push_convert(subscript, types::index())?;
    b.push_binop("-", subscript, lb, types::index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::interp::{Interpreter, RtValue};
    use crate::mir::ssa::Terminator;

    #[test]
    fn test_predicate_table() {
        assert_eq!(predicate(RelOp::Ne, &types::f64()), CmpPredicate::UNe);
        assert_eq!(predicate(RelOp::Lt, &types::f64()), CmpPredicate::OLt);
        assert_eq!(predicate(RelOp::Ne, &types::i32()), CmpPredicate::Ne);
        assert_eq!(predicate(RelOp::Ge, &types::character(Some(3))), CmpPredicate::Sge);
    }

    #[test]
    fn test_trip_count_of_reversed_and_empty_ranges() {
        let mut b = FuncBuilder::new("trips", vec![], types::unit());
        let ty = types::i32();
        let ten = b.push_int(10, ty.clone()).unwrap();
        let one = b.push_int(1, ty.clone()).unwrap();
        let minus_one = b.push_int(-1, ty.clone()).unwrap();
        let down = trip_count(&mut b, ten, one, minus_one, &ty).unwrap();
        let empty = trip_count(&mut b, ten, one, one, &ty).unwrap();
        let tuple = b.push_tuple(vec![down, empty], types::unit()).unwrap();
        b.terminate(Terminator::Return(tuple)).unwrap();
        let body = b.finish().unwrap();

        let mut interp = Interpreter::new(&body);
        assert_eq!(
            interp.run(&[]).unwrap(),
            RtValue::Record(vec![RtValue::Int(10), RtValue::Int(0)])
        );
    }

    #[test]
    fn test_max_folds_pairwise() {
        let mut b = FuncBuilder::new("max3", vec![], types::i32());
        let ty = types::i32();
        let args: Vec<ValueId> = [4, 9, 2].iter().map(|v| b.push_int(*v, ty.clone()).unwrap()).collect();
        let r = elemental_intrinsic(&mut b, "max", &args, &ty).unwrap();
        b.terminate(Terminator::Return(r)).unwrap();
        let body = b.finish().unwrap();
        assert_eq!(Interpreter::new(&body).run(&[]).unwrap(), RtValue::Int(9));
    }
}
