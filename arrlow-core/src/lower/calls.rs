//! Procedure references with rank>0 arguments.
//!
//! An elemental reference becomes a per-element call inside the enclosing
//! nest; each array actual is compiled in the access mode its dummy asks
//! for. Transformational references are evaluated once, before the nest,
//! and read back like any other array.

use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{DummyArg, Expr, ExprKind, NodeId, Passing, ProcDesignator, ProcInterface, ProcRef, Span};
use crate::error::Result;
use crate::mir::ssa::ValueId;
use crate::mir::ssa_builder::FuncBuilder;
use crate::types::{self, Type};
use crate::{bail_unsupported, bail_unsupported_at, err_unsupported_at};

use super::compile::{self, value_of, Cont};
use super::copy_inout::CopyOutPair;
use super::exv::{BoxValue, ExtendedValue};
use super::ops;
use super::semantics::AccessMode;
use super::space::{build_nest, IterSpace};
use super::{ArrayLowering, Temp};

/// One actual argument of an elemental reference, ready to be placed at
/// every iteration.
enum ElementalArg {
    /// Omitted optional argument.
    Absent(ValueId),
    /// Rank-0 actual, placed once before the nest.
    Invariant(ValueId),
    Element {
        cont: Cont,
        passing: Passing,
        ty: Type,
        /// Run-time presence of an actual that may be absent.
        present: Option<ValueId>,
    },
}

/// SSA type of an argument passed as `passing`.
fn passing_type(passing: Passing, ty: &Type) -> Type {
    match passing {
        Passing::Value => ty.clone(),
        Passing::Ref => types::reference(ty.clone()),
        Passing::Box => types::boxed(0, ty.clone()),
    }
}

/// Turn an element value into the form its dummy is passed in.
fn place_argument(b: &mut FuncBuilder, exv: ExtendedValue, passing: Passing, ty: &Type) -> Result<ValueId> {
    match (passing, exv) {
        (Passing::Value, exv) => value_of(b, exv, ty),
        (Passing::Ref, ExtendedValue::Addressed { addr, .. }) => Ok(addr),
        (Passing::Ref, ExtendedValue::Boxed(bv)) if bv.rank == 0 => {
            Ok(b.push_box_addr(bv.desc, types::reference(ty.clone()))?)
        }
        (Passing::Ref, ExtendedValue::Scalar(v)) => {
            let slot = b.push_alloca(ty.clone())?;
            b.push_store(slot, v)?;
            Ok(slot)
        }
        (Passing::Box, ExtendedValue::Boxed(bv)) if bv.rank == 0 => Ok(bv.desc),
        (Passing::Box, exv @ (ExtendedValue::Scalar(_) | ExtendedValue::Addressed { .. })) => {
            let addr = place_argument(b, exv, Passing::Ref, ty)?;
            Ok(b.push_embox(addr, None, None, vec![], types::boxed(0, ty.clone()))?)
        }
        (passing, exv) => bail_unsupported!("rank {} value passed as a {:?} element argument", exv.rank(), passing),
    }
}

fn element_arguments(b: &mut FuncBuilder, args: &[ElementalArg], pt: &IterSpace) -> Result<Vec<ValueId>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        let value = match arg {
            ElementalArg::Absent(v) | ElementalArg::Invariant(v) => *v,
            ElementalArg::Element {
                cont,
                passing,
                ty,
                present: None,
            } => {
                let arg_value = cont(b, pt)?;
                place_argument(b, arg_value, *passing, ty)?
            }
            ElementalArg::Element {
                cont,
                passing,
                ty,
                present: Some(present),
            } => {
                let arg_ty = passing_type(*passing, ty);
                let arm = b.begin_if(*present, vec![arg_ty.clone()])?;
                let arg_value = cont(b, pt)?;
                let placed = place_argument(b, arg_value, *passing, ty)?;
                b.begin_else(&arm, vec![placed])?;
                let absent = b.push_absent(arg_ty)?;
                b.end_if(arm, vec![absent])?[0]
            }
        };
        values.push(value);
    }
    Ok(values)
}

impl ArrayLowering<'_> {
    /// Access mode for an array actual associated with `dummy`. Clears the
    /// ordering flag when the callee may see writes of other iterations.
    fn classify_argument(&mut self, iface: &ProcInterface, dummy: &DummyArg) -> AccessMode {
        let mode = match dummy.passing {
            Passing::Value => AccessMode::ByValue,
            Passing::Box => AccessMode::BoxedReference,
            Passing::Ref if iface.pure && !dummy.intent.may_modify() => AccessMode::ValueCopyArgument,
            Passing::Ref => AccessMode::AddressOpaque,
        };
        if !iface.pure || (mode == AccessMode::AddressOpaque && dummy.intent.may_modify()) {
            self.unordered = false;
        }
        trace!("`{}` dummy `{}`: {:?}", iface.name, dummy.name, mode);
        mode
    }

    /// Rank-0 actual in the form its dummy is passed in.
    fn scalar_argument(&mut self, actual: &Expr, passing: Passing) -> Result<ValueId> {
        let exv = match (passing, &actual.kind) {
            (Passing::Value, _) => self.evaluate_scalar_exv(actual)?,
            (_, ExprKind::Designator(_)) => self.scalars.evaluate_address(self.b, self.symbols, actual)?,
            _ => self.evaluate_scalar_exv(actual)?,
        };
        place_argument(self.b, exv, passing, &actual.ty)
    }

    /// Presence test for an array actual whose storage may be absent or
    /// unallocated.
    fn actual_presence(&mut self, actual: &Expr) -> Result<Option<ValueId>> {
        let ExprKind::Designator(d) = &actual.kind else {
            return Ok(None);
        };
        let Some(entity) = self.symbols.lookup(&d.base).cloned() else {
            return Ok(None);
        };
        if matches!(entity, ExtendedValue::Scalar(_)) || !(entity.may_be_absent() || d.base.may_be_absent()) {
            return Ok(None);
        }
        let (memref, _) = entity.memref(self.b, &d.base.ty)?;
        Ok(Some(self.b.push_is_present(memref)?))
    }

    fn elemental_arguments(&mut self, iface: &ProcInterface, args: &[Option<Expr>]) -> Result<Vec<ElementalArg>> {
        let mut out = Vec::with_capacity(args.len());
        for (position, (actual, dummy)) in args.iter().zip(&iface.dummies).enumerate() {
            let Some(actual) = actual else {
                let absent = self.b.push_absent(passing_type(dummy.passing, &types::unit()))?;
                out.push(ElementalArg::Absent(absent));
                continue;
            };
            if actual.rank == 0 {
                out.push(ElementalArg::Invariant(self.scalar_argument(actual, dummy.passing)?));
                continue;
            }
            let mode = self.classify_argument(iface, dummy);
            let first = self.operands.len();
            let cont = self.with_semantics(mode, |this| this.compile(actual))?;
            if iface.passed_object == Some(position) {
                for operand in &mut self.operands[first..] {
                    operand.passed_object = true;
                }
            }
            let present = if dummy.optional { self.actual_presence(actual)? } else { None };
            out.push(ElementalArg::Element {
                cont,
                passing: dummy.passing,
                ty: actual.ty.clone(),
                present,
            });
        }
        Ok(out)
    }

    /// Continuation calling the elemental function `call` on the elements
    /// of its actuals at each point.
    pub fn lower_elemental_call(&mut self, call: &Expr) -> Result<Cont> {
        let ExprKind::ProcRef(pr) = &call.kind else {
            panic!("elemental call lowering of a non-call at {}", call.span());
        };
        let ProcDesignator::User(iface) = &pr.proc else {
            bail_unsupported_at!(call.span(), "elemental reference to `{}`", pr.proc.name());
        };
        if iface.result.is_none() {
            bail_unsupported_at!(call.span(), "subroutine `{}` referenced as a function", iface.name);
        }
        debug!("elemental call `{}` at {}: pure {}", iface.name, call.span(), iface.pure);
        let args = self.elemental_arguments(iface, &pr.args)?;
        let name = iface.name.clone();
        let ty = call.ty.clone();
        Ok(compile::cont(move |b, pt| {
            let values = element_arguments(b, &args, pt)?;
            Ok(ExtendedValue::Scalar(b.push_call(&name, values, ty.clone())?))
        }))
    }

    /// Evaluate a non-elemental reference with array arguments or an array
    /// result. Intrinsic results are released at the end of the statement;
    /// results of user functions belong to the callee.
    pub fn lower_transformational_call(&mut self, call: &Expr) -> Result<ExtendedValue> {
        let ExprKind::ProcRef(pr) = &call.kind else {
            panic!("transformational call lowering of a non-call at {}", call.span());
        };
        match &pr.proc {
            ProcDesignator::Intrinsic(name) => {
                if !ops::is_transformational_intrinsic(name) {
                    bail_unsupported_at!(call.span(), "intrinsic `{}`", name);
                }
                debug!("transformational `{}` at {}: rank {} result", name, call.span(), call.rank);
                let mut args = Vec::with_capacity(pr.args.len());
                for arg in pr.args.iter().flatten() {
                    if arg.rank > 0 {
                        args.push(self.lower_boxed_array(arg)?.desc);
                    } else {
                        args.push(self.evaluate_scalar_expr(arg)?);
                    }
                }
                if call.rank == 0 {
                    return Ok(ExtendedValue::Scalar(self.b.push_intrinsic(name, args, call.ty.clone())?));
                }
                let desc = self
                    .b
                    .push_intrinsic(name, args, types::boxed(call.rank, call.ty.clone()))?;
                self.temps.push(Temp::Box(desc));
                Ok(ExtendedValue::Boxed(BoxValue::new(desc, call.rank)))
            }
            ProcDesignator::User(iface) => {
                debug!("call `{}` at {}: rank {} result", iface.name, call.span(), iface.result_rank);
                let (values, pairs) = self.call_arguments(iface, &pr.args)?;
                let result_ty = if iface.result_rank > 0 {
                    types::boxed(iface.result_rank, call.ty.clone())
                } else {
                    call.ty.clone()
                };
                let result = self.b.push_call(&iface.name, values, result_ty)?;
                self.copy_out_all(pairs)?;
                if iface.result_rank == 0 {
                    Ok(ExtendedValue::Scalar(result))
                } else {
                    Ok(ExtendedValue::Boxed(BoxValue::new(result, iface.result_rank)))
                }
            }
        }
    }

    /// Actual arguments of a non-elemental reference, with the copy-outs to
    /// run after the call.
    fn call_arguments(
        &mut self,
        iface: &ProcInterface,
        args: &[Option<Expr>],
    ) -> Result<(Vec<ValueId>, Vec<CopyOutPair>)> {
        let mut values = Vec::with_capacity(args.len());
        let mut pairs = Vec::new();
        for (actual, dummy) in args.iter().zip(&iface.dummies) {
            let Some(actual) = actual else {
                values.push(self.b.push_absent(passing_type(dummy.passing, &types::unit()))?);
                continue;
            };
            if actual.rank == 0 {
                values.push(self.scalar_argument(actual, dummy.passing)?);
                continue;
            }
            match dummy.passing {
                Passing::Ref => {
                    let (addr, pair) = self.copy_in(actual, dummy.intent.may_modify())?;
                    values.push(addr);
                    pairs.extend(pair);
                }
                Passing::Box => values.push(self.lower_boxed_array(actual)?.desc),
                Passing::Value => {
                    bail_unsupported_at!(actual.span(), "array actual passed by value to `{}`", iface.name)
                }
            }
        }
        Ok((values, pairs))
    }

    fn copy_out_all(&mut self, pairs: Vec<CopyOutPair>) -> Result<()> {
        for pair in pairs.into_iter().rev() {
            self.copy_out(pair)?;
        }
        Ok(())
    }

    /// Continuation producing the second argument of a defined assignment
    /// through `iface` at each point.
    pub(crate) fn defined_assignment_rhs(&mut self, iface: &Rc<ProcInterface>, rhs: &Expr) -> Result<Cont> {
        let dummy = iface
            .dummies
            .get(1)
            .ok_or_else(|| err_unsupported_at!(rhs.span(), "defined assignment `{}` without a source dummy", iface.name))?;
        let passing = dummy.passing;
        let ty = rhs.ty.clone();
        let element = if rhs.rank == 0 {
            if !iface.pure {
                self.unordered = false;
            }
            compile::constant(match passing {
                Passing::Value => self.evaluate_scalar_exv(rhs)?,
                _ => ExtendedValue::Addressed {
                    addr: self.scalar_argument(rhs, Passing::Ref)?,
                    len: None,
                },
            })
        } else {
            let mode = self.classify_argument(iface, dummy);
            self.with_semantics(mode, |this| this.compile(rhs))?
        };
        Ok(compile::cont(move |b, pt| {
            let arg_value = element(b, pt)?;
            let value = place_argument(b, arg_value, passing, &ty)?;
            Ok(match passing {
                Passing::Value => ExtendedValue::Scalar(value),
                Passing::Ref => ExtendedValue::Addressed { addr: value, len: None },
                Passing::Box => ExtendedValue::Boxed(BoxValue::new(value, 0)),
            })
        }))
    }

    /// `call proc(args)` with at least one rank>0 actual; `span` and `node`
    /// locate the call statement.
    pub fn lower_call_statement(&mut self, call: &ProcRef, span: Span, node: NodeId) -> Result<()> {
        let ProcDesignator::User(iface) = &call.proc else {
            bail_unsupported_at!(span, "intrinsic subroutine `{}`", call.proc.name());
        };
        self.begin_statement_at(span, node);
        let elemental = iface.elemental && call.args.iter().flatten().any(|a| a.rank > 0);
        debug!("call statement `{}` at {}: elemental {}", iface.name, span, elemental);
        if elemental {
            let (args, operands) = self.with_operands(|this| this.elemental_arguments(iface, &call.args))?;
            let extents = self.governing_shape(None, &operands, span)?;
            let unit = self.b.push_unit()?;
            let name = iface.name.clone();
            build_nest(self.b, &extents, unit, self.unordered, &mut |b, acc, idx| {
                let point = IterSpace::new(idx.to_vec(), acc);
                let values = element_arguments(b, &args, &point)?;
                b.push_void_call(&name, values)?;
                Ok(acc)
            })?;
        } else {
            let (values, pairs) = self.call_arguments(iface, &call.args)?;
            self.b.push_void_call(&iface.name, values)?;
            self.copy_out_all(pairs)?;
        }
        self.end_statement()
    }
}
