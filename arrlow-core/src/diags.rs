//! Diagnostic formatting for expressions and lowered SSA bodies.
//!
//! Output is meant for logs and test failure messages, not for parsing.

use std::fmt;
use std::fmt::Write;

use polytype::Name;

use crate::ast::*;
use crate::mir::ssa::{FuncBody, InstKind, PathComponent, SliceDim, Terminator, ValueId};
use crate::types::{Type, TypeName};

/// Pretty-print a type: `i32`, `array<1>[f64]`, `type<pt>{f64, i32}`.
pub fn format_type(ty: &Type) -> String {
    match ty {
        Type::Variable(id) => format!("?{}", id),
        Type::Constructed(name, args) => {
            if args.is_empty() {
                return name.show();
            }
            let args_str: Vec<String> = args.iter().map(format_type).collect();
            match name {
                TypeName::Record(_) => format!("{}{{{}}}", name.show(), args_str.join(", ")),
                _ => format!("{}[{}]", name.show(), args_str.join(", ")),
            }
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Render an expression in source-like syntax.
pub fn format_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Designator(d) => write_designator(out, d),
        ExprKind::Literal(lit) => {
            let _ = match lit {
                Literal::Int(v) => write!(out, "{}", v),
                Literal::Real(v) => write!(out, "{:?}", v),
                Literal::Complex(re, im) => write!(out, "({:?}, {:?})", re, im),
                Literal::Logical(b) => write!(out, ".{}.", b),
                Literal::Char(s) => write!(out, "'{}'", s),
            };
        }
        ExprKind::Unary { op, operand } => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => ".not.",
            });
            write_expr(out, operand);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let op = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Pow => "**",
                BinaryOp::Concat => "//",
            };
            write_infix(out, lhs, op, rhs);
        }
        ExprKind::Relational { op, lhs, rhs } => {
            let op = match op {
                RelOp::Lt => "<",
                RelOp::Le => "<=",
                RelOp::Eq => "==",
                RelOp::Ne => "/=",
                RelOp::Gt => ">",
                RelOp::Ge => ">=",
            };
            write_infix(out, lhs, op, rhs);
        }
        ExprKind::Logical { op, lhs, rhs } => {
            let op = match op {
                LogicalOp::And => ".and.",
                LogicalOp::Or => ".or.",
                LogicalOp::Eqv => ".eqv.",
                LogicalOp::Neqv => ".neqv.",
            };
            write_infix(out, lhs, op, rhs);
        }
        ExprKind::Convert(inner) => {
            let _ = write!(out, "{}(", format_type(&expr.ty));
            write_expr(out, inner);
            out.push(')');
        }
        ExprKind::Parentheses(inner) => {
            out.push('(');
            write_expr(out, inner);
            out.push(')');
        }
        ExprKind::ProcRef(pr) => {
            out.push_str(pr.proc.name());
            out.push('(');
            for (i, arg) in pr.args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match arg {
                    Some(arg) => write_expr(out, arg),
                    None => out.push('_'),
                }
            }
            out.push(')');
        }
        ExprKind::ArrayCtor(items) => {
            out.push('[');
            write_ac_items(out, items);
            out.push(']');
        }
        ExprKind::Substring { base, lo, hi } => {
            write_expr(out, base);
            out.push('(');
            if let Some(lo) = lo {
                write_expr(out, lo);
            }
            out.push(':');
            if let Some(hi) = hi {
                write_expr(out, hi);
            }
            out.push(')');
        }
        ExprKind::ComplexPart { base, imag } => {
            write_expr(out, base);
            out.push_str(if *imag { "%im" } else { "%re" });
        }
        ExprKind::StructCtor { name, fields } => {
            let _ = write!(out, "{}(", name);
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, field);
            }
            out.push(')');
        }
        ExprKind::DescriptorInquiry { kind, base, dim } => {
            let _ = write!(out, "{:?}({}", kind, base.name);
            if let Some(dim) = dim {
                let _ = write!(out, ", {}", dim);
            }
            out.push(')');
        }
    }
}

fn write_infix(out: &mut String, lhs: &Expr, op: &str, rhs: &Expr) {
    write_expr(out, lhs);
    let _ = write!(out, " {} ", op);
    write_expr(out, rhs);
}

fn write_ac_items(out: &mut String, items: &[AcItem]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match item {
            AcItem::Expr(e) => write_expr(out, e),
            AcItem::ImpliedDo {
                var,
                lo,
                hi,
                step,
                items,
            } => {
                out.push('(');
                write_ac_items(out, items);
                let _ = write!(out, ", {}=", var.name);
                write_expr(out, lo);
                out.push(',');
                write_expr(out, hi);
                if let Some(step) = step {
                    out.push(',');
                    write_expr(out, step);
                }
                out.push(')');
            }
        }
    }
}

fn write_designator(out: &mut String, d: &Designator) {
    out.push_str(&d.base.name);
    for part in &d.parts {
        match part {
            PartRef::Component { name, .. } => {
                let _ = write!(out, "%{}", name);
            }
            PartRef::Subscripts(subs) => {
                out.push('(');
                for (i, sub) in subs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match sub {
                        Subscript::Index(e) | Subscript::Vector(e) => write_expr(out, e),
                        Subscript::Triplet { lo, hi, stride } => {
                            if let Some(lo) = lo {
                                write_expr(out, lo);
                            }
                            out.push(':');
                            if let Some(hi) = hi {
                                write_expr(out, hi);
                            }
                            if let Some(stride) = stride {
                                out.push(':');
                                write_expr(out, stride);
                            }
                        }
                    }
                }
                out.push(')');
            }
        }
    }
}

// =============================================================================
// SSA bodies
// =============================================================================

fn join(values: &[ValueId]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

fn format_path(path: &[PathComponent]) -> String {
    path.iter()
        .map(|c| match c {
            PathComponent::Field(i) => format!(".{}", i),
            PathComponent::ComplexPart(false) => ".re".to_string(),
            PathComponent::ComplexPart(true) => ".im".to_string(),
            PathComponent::Index(v) => format!("[{}]", v),
            PathComponent::Substring { start, len } => format!("({}:+{})", start, len),
        })
        .collect()
}

fn opt(v: &Option<ValueId>) -> String {
    v.map(|v| format!(", {}", v)).unwrap_or_default()
}

fn format_inst_kind(kind: &InstKind) -> String {
    match kind {
        InstKind::Int(v) | InstKind::Float(v) => format!("const {}", v),
        InstKind::Complex { re, im } => format!("const ({}, {})", re, im),
        InstKind::Bool(b) => format!("const {}", b),
        InstKind::String(s) => format!("const {:?}", s),
        InstKind::Unit => "unit".to_string(),
        InstKind::Undef => "undef".to_string(),
        InstKind::BinOp { op, lhs, rhs } => format!("{} {} {}", lhs, op, rhs),
        InstKind::UnaryOp { op, operand } => format!("{} {}", op, operand),
        InstKind::Cmp { pred, lhs, rhs } => format!("cmp {} {}, {}", pred.mnemonic(), lhs, rhs),
        InstKind::Convert { value } => format!("convert {}", value),
        InstKind::Select {
            cond,
            on_true,
            on_false,
        } => format!("select {}, {}, {}", cond, on_true, on_false),
        InstKind::Tuple(elems) => format!("tuple ({})", join(elems)),
        InstKind::Project { base, index } => format!("project {}.{}", base, index),
        InstKind::Call { func, args } => format!("call {}({})", func, join(args)),
        InstKind::Intrinsic { name, args } => format!("intrinsic {}({})", name, join(args)),
        InstKind::Shape { extents } => format!("shape ({})", join(extents)),
        InstKind::Slice { dims } => {
            let dims: Vec<String> = dims
                .iter()
                .map(|d| match d {
                    SliceDim::Range { start, extent, step } => format!("{}:#{}:{}", start, extent, step),
                    SliceDim::Index(i) => i.to_string(),
                })
                .collect();
            format!("slice ({})", dims.join(", "))
        }
        InstKind::Embox {
            memref,
            shape,
            slice,
            path,
        } => format!("embox {}{}{}{}", memref, opt(shape), opt(slice), format_path(path)),
        InstKind::BoxAddr { boxed } => format!("box_addr {}", boxed),
        InstKind::BoxExtent { boxed, dim } => format!("box_extent {}, {}", boxed, dim),
        InstKind::IsPresent { value } => format!("is_present {}", value),
        InstKind::Absent => "absent".to_string(),
        InstKind::ArrayCoor {
            memref,
            shape,
            indices,
        } => format!("array_coor {}{}[{}]", memref, opt(shape), join(indices)),
        InstKind::CoordinateOf { base, path } => format!("coordinate_of {}{}", base, format_path(path)),
        InstKind::ArrayLoad {
            memref,
            shape,
            effect_in,
            effect_out,
        } => format!("array_load {}{} {} -> {}", memref, opt(shape), effect_in, effect_out),
        InstKind::ArrayFetch { array, indices, path } => {
            format!("array_fetch {}[{}]{}", array, join(indices), format_path(path))
        }
        InstKind::ArrayUpdate {
            array,
            value,
            indices,
            path,
        } => format!("array_update {}[{}]{} = {}", array, join(indices), format_path(path), value),
        InstKind::ArrayAccess { array, indices, path } => {
            format!("array_access {}[{}]{}", array, join(indices), format_path(path))
        }
        InstKind::ArrayAmend {
            array,
            access,
            indices,
            path,
        } => format!("array_amend {}[{}]{} <- {}", array, join(indices), format_path(path), access),
        InstKind::ArrayMergeStore {
            original,
            result,
            memref,
            shape,
            effect_in,
            effect_out,
        } => format!(
            "array_merge_store {}, {} to {}{} {} -> {}",
            original,
            result,
            memref,
            opt(shape),
            effect_in,
            effect_out
        ),
        InstKind::Alloca { elem_ty, .. } => format!("alloca {}", format_type(elem_ty)),
        InstKind::Allocmem { elem_ty, count, .. } => format!("allocmem {} x {}", format_type(elem_ty), count),
        InstKind::Freemem { memref, .. } => format!("freemem {}", memref),
        InstKind::Load { ptr, .. } => format!("load {}", ptr),
        InstKind::Store { ptr, value, .. } => format!("store {} to {}", value, ptr),
    }
}

impl fmt::Display for FuncBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {}(", self.name)?;
        for (i, (value, ty, name)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}: {}", value, name, format_type(ty))?;
        }
        writeln!(f, ") -> {} {{", format_type(&self.return_ty))?;

        for (idx, block) in self.blocks.iter().enumerate() {
            write!(f, "bb{}", idx)?;
            if !block.params.is_empty() {
                let params: Vec<String> =
                    block.params.iter().map(|p| format!("{}: {}", p.value, format_type(&p.ty))).collect();
                write!(f, "({})", params.join(", "))?;
            }
            writeln!(f, ":")?;
            for inst_id in &block.insts {
                let inst = self.get_inst(*inst_id);
                match inst.result {
                    Some(result) => writeln!(
                        f,
                        "    {} = {} : {}",
                        result,
                        format_inst_kind(&inst.kind),
                        format_type(&inst.result_ty)
                    )?,
                    None => writeln!(f, "    {}", format_inst_kind(&inst.kind))?,
                }
            }
            match &block.terminator {
                Some(Terminator::Branch { target, args }) => writeln!(f, "    br {}({})", target, join(args))?,
                Some(Terminator::CondBranch {
                    cond,
                    then_target,
                    then_args,
                    else_target,
                    else_args,
                }) => writeln!(
                    f,
                    "    br_if {}, {}({}), {}({})",
                    cond,
                    then_target,
                    join(then_args),
                    else_target,
                    join(else_args)
                )?,
                Some(Terminator::Return(v)) => writeln!(f, "    return {}", v)?,
                Some(Terminator::ReturnUnit) => writeln!(f, "    return")?,
                Some(Terminator::Unreachable) => writeln!(f, "    unreachable")?,
                None => writeln!(f, "    <unterminated>")?,
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::ssa_builder::FuncBuilder;
    use crate::types;

    #[test]
    fn test_format_type() {
        assert_eq!(format_type(&types::i32()), "i32");
        assert_eq!(format_type(&types::array_value(1, types::f64())), "array<1>[f64]");
        assert_eq!(
            format_type(&types::record("pt", vec![types::f64(), types::i32()])),
            "type<pt>{f64, i32}"
        );
    }

    #[test]
    fn test_body_display() {
        let mut b = FuncBuilder::new("inc", vec![(types::i32(), "x".to_string())], types::i32());
        let x = b.get_param(0);
        let one = b.push_int(1, types::i32()).unwrap();
        let r = b.push_binop("+", x, one, types::i32()).unwrap();
        b.terminate(Terminator::Return(r)).unwrap();
        let text = b.finish().unwrap().to_string();
        assert!(text.starts_with("func inc(%0 x: i32) -> i32 {"));
        assert!(text.contains("%2 = %0 + %1 : i32"));
        assert!(text.contains("return %2"));
    }
}
