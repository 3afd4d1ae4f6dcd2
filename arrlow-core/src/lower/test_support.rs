#![cfg(test)]
//! Builders for lowering tests: a small expression factory and a harness
//! that binds symbols to function parameters.

use std::rc::Rc;

use crate::ast::*;
use crate::mir::interp::{Address, BoxDim, BoxVal, RtValue};
use crate::mir::ssa::FuncBody;
use crate::mir::ssa_builder::FuncBuilder;
use crate::options::LoweringOptions;
use crate::types::{self, Type};
use crate::IdSource;

use super::exv::{ArrayValue, BoxValue, ExtendedValue, SymbolMap};
use super::scalar::DefaultScalarLowering;
use super::{finish_function, ArrayLowering};

pub(crate) fn ints(values: &[i64]) -> Vec<RtValue> {
    values.iter().map(|v| RtValue::Int(*v)).collect()
}

pub(crate) fn reals(values: &[f64]) -> Vec<RtValue> {
    values.iter().map(|v| RtValue::Real(*v)).collect()
}

pub(crate) fn strs(values: &[&str]) -> Vec<RtValue> {
    values.iter().map(|v| RtValue::Str(v.to_string())).collect()
}

/// Contiguous column-major descriptor over `addr`.
pub(crate) fn contiguous_box(addr: Address, extents: &[usize]) -> RtValue {
    let mut stride = 1isize;
    let dims = extents
        .iter()
        .map(|e| {
            let dim = BoxDim { extent: *e, stride };
            stride *= *e as isize;
            dim
        })
        .collect();
    RtValue::Box(BoxVal {
        base: addr,
        dims,
        elem_path: vec![],
    })
}

// =============================================================================
// Expression factory
// =============================================================================

#[derive(Default)]
pub(crate) struct Ast {
    nodes: NodeCounter,
    symbols: IdSource<SymbolId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(&mut self, name: &str, ty: Type, rank: usize) -> Rc<Symbol> {
        self.symbol_with(name, ty, rank, SymbolAttrs::default())
    }

    pub fn symbol_with(&mut self, name: &str, ty: Type, rank: usize, attrs: SymbolAttrs) -> Rc<Symbol> {
        Rc::new(Symbol {
            id: self.symbols.next_id(),
            name: name.to_string(),
            ty,
            rank,
            attrs,
        })
    }

    pub fn expr(&mut self, ty: Type, rank: usize, kind: ExprKind) -> Expr {
        let id = self.nodes.next_id();
        let line = id.0 as usize + 1;
        Expr {
            h: Header {
                id,
                span: Span::new(line, 1, line, 1),
            },
            ty,
            rank,
            kind,
        }
    }

    pub fn var(&mut self, sym: &Rc<Symbol>) -> Expr {
        self.designator(sym, vec![], sym.rank)
    }

    pub fn designator(&mut self, sym: &Rc<Symbol>, parts: Vec<PartRef>, rank: usize) -> Expr {
        self.expr(
            sym.ty.clone(),
            rank,
            ExprKind::Designator(Designator {
                base: sym.clone(),
                parts,
            }),
        )
    }

    /// `sym(subs...)`; the rank is the number of non-scalar subscripts.
    pub fn section(&mut self, sym: &Rc<Symbol>, subs: Vec<Subscript>) -> Expr {
        let rank = subs.iter().filter(|s| !matches!(s, Subscript::Index(_))).count();
        self.designator(sym, vec![PartRef::Subscripts(subs)], rank)
    }

    pub fn int(&mut self, v: i64) -> Expr {
        self.expr(types::i32(), 0, ExprKind::Literal(Literal::Int(v)))
    }

    pub fn real(&mut self, v: f64) -> Expr {
        self.expr(types::f64(), 0, ExprKind::Literal(Literal::Real(v)))
    }

    pub fn triplet(&mut self, lo: Option<i64>, hi: Option<i64>, stride: Option<i64>) -> Subscript {
        Subscript::Triplet {
            lo: lo.map(|v| Box::new(self.int(v))),
            hi: hi.map(|v| Box::new(self.int(v))),
            stride: stride.map(|v| Box::new(self.int(v))),
        }
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        let ty = lhs.ty.clone();
        let rank = lhs.rank.max(rhs.rank);
        self.expr(
            ty,
            rank,
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn relational(&mut self, op: RelOp, lhs: Expr, rhs: Expr) -> Expr {
        let rank = lhs.rank.max(rhs.rank);
        self.expr(
            types::logical(),
            rank,
            ExprKind::Relational {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn call(&mut self, iface: &Rc<ProcInterface>, args: Vec<Option<Expr>>, rank: usize) -> Expr {
        let ty = iface.result.clone().unwrap_or_else(types::unit);
        self.expr(
            ty,
            rank,
            ExprKind::ProcRef(ProcRef {
                proc: ProcDesignator::User(iface.clone()),
                args,
            }),
        )
    }

    pub fn intrinsic(&mut self, name: &str, args: Vec<Expr>, ty: Type, rank: usize) -> Expr {
        self.expr(
            ty,
            rank,
            ExprKind::ProcRef(ProcRef {
                proc: ProcDesignator::Intrinsic(name.to_string()),
                args: args.into_iter().map(Some).collect(),
            }),
        )
    }

    /// `base(lo:hi)` of type `ty`.
    pub fn substring(&mut self, base: Expr, lo: Option<i64>, hi: Option<i64>, ty: Type) -> Expr {
        let rank = base.rank;
        let lo = lo.map(|v| Box::new(self.int(v)));
        let hi = hi.map(|v| Box::new(self.int(v)));
        self.expr(
            ty,
            rank,
            ExprKind::Substring {
                base: Box::new(base),
                lo,
                hi,
            },
        )
    }

    pub fn complex_part(&mut self, base: Expr, imag: bool) -> Expr {
        let rank = base.rank;
        self.expr(
            types::f64(),
            rank,
            ExprKind::ComplexPart {
                base: Box::new(base),
                imag,
            },
        )
    }

    pub fn struct_ctor(&mut self, ty: Type, fields: Vec<Expr>) -> Expr {
        let rank = fields.iter().map(|f| f.rank).max().unwrap_or(0);
        self.expr(
            ty,
            rank,
            ExprKind::StructCtor {
                name: "t".to_string(),
                fields,
            },
        )
    }

    /// Inquiry of kind `kind` on `base`; rank 1 for bound queries without `dim`.
    pub fn inquiry(&mut self, kind: InquiryKind, base: &Rc<Symbol>, dim: Option<usize>) -> Expr {
        let rank = match kind {
            InquiryKind::LBound | InquiryKind::UBound | InquiryKind::Extent if dim.is_none() => 1,
            _ => 0,
        };
        self.expr(
            types::i32(),
            rank,
            ExprKind::DescriptorInquiry {
                kind,
                base: base.clone(),
                dim,
            },
        )
    }

    pub fn paren(&mut self, inner: Expr) -> Expr {
        let (ty, rank) = (inner.ty.clone(), inner.rank);
        self.expr(ty, rank, ExprKind::Parentheses(Box::new(inner)))
    }

    pub fn ctor(&mut self, ty: Type, items: Vec<AcItem>) -> Expr {
        self.expr(ty, 1, ExprKind::ArrayCtor(items))
    }
}

/// Interface of a procedure named `name` with `dummies`.
pub(crate) fn interface(
    name: &str,
    elemental: bool,
    pure: bool,
    dummies: Vec<DummyArg>,
    result: Option<Type>,
) -> Rc<ProcInterface> {
    Rc::new(ProcInterface {
        name: name.to_string(),
        elemental,
        pure,
        dummies,
        result,
        result_rank: 0,
        passed_object: None,
    })
}

// =============================================================================
// Lowering harness
// =============================================================================

/// How a symbol is passed into the function under test.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    /// Contiguous storage of the given extents, by address.
    Fixed(Vec<i64>),
    /// Contiguous storage declared `(lower:upper, ...)`, by address.
    Bounds(Vec<(i64, i64)>),
    /// Contiguous characters of the given extents whose length is only
    /// known at run time, as for a `character(len=*)` dummy.
    AssumedLen(Vec<i64>, i64),
    /// Descriptor.
    Boxed,
    /// Descriptor of an optional dummy; null when absent.
    Optional,
    /// Address of an allocatable's descriptor cell.
    Allocatable,
    /// Scalar value.
    Value,
}

pub(crate) struct Harness {
    pub b: FuncBuilder,
    pub symbols: SymbolMap,
    pub scalars: DefaultScalarLowering,
    pub options: LoweringOptions,
}

impl Harness {
    /// A function with one parameter per entry of `params`, in order, each
    /// bound to its symbol.
    pub fn new(params: &[(&Rc<Symbol>, Storage)]) -> Self {
        Self::with_options(params, LoweringOptions::default())
    }

    pub fn with_options(params: &[(&Rc<Symbol>, Storage)], options: LoweringOptions) -> Self {
        let sigs = params
            .iter()
            .map(|(sym, storage)| {
                let ty = match storage {
                    Storage::Fixed(_) | Storage::Bounds(_) | Storage::AssumedLen(..) => {
                        types::reference(sym.ty.clone())
                    }
                    Storage::Boxed | Storage::Optional => types::boxed(sym.rank, sym.ty.clone()),
                    Storage::Allocatable => types::reference(types::boxed(sym.rank, sym.ty.clone())),
                    Storage::Value => sym.ty.clone(),
                };
                (ty, sym.name.clone())
            })
            .collect();
        let mut b = FuncBuilder::new("test", sigs, types::unit());
        let mut symbols = SymbolMap::new();
        for (i, (sym, storage)) in params.iter().enumerate() {
            let param = b.get_param(i);
            let value = match storage {
                Storage::Fixed(extents) => {
                    let extents = extents.iter().map(|e| b.push_index(*e).unwrap()).collect();
                    ExtendedValue::Array(ArrayValue::new(param, extents))
                }
                Storage::Bounds(bounds) => {
                    let extents = bounds.iter().map(|(lo, hi)| b.push_index(hi - lo + 1).unwrap()).collect();
                    let lbounds = bounds.iter().map(|(lo, _)| b.push_index(*lo).unwrap()).collect();
                    ExtendedValue::Array(ArrayValue {
                        lbounds: Some(lbounds),
                        ..ArrayValue::new(param, extents)
                    })
                }
                Storage::AssumedLen(extents, len) => {
                    let extents = extents.iter().map(|e| b.push_index(*e).unwrap()).collect();
                    ExtendedValue::Array(ArrayValue {
                        len: Some(b.push_index(*len).unwrap()),
                        ..ArrayValue::new(param, extents)
                    })
                }
                Storage::Boxed => ExtendedValue::Boxed(BoxValue::new(param, sym.rank)),
                Storage::Optional => ExtendedValue::OptionalBox(BoxValue::new(param, sym.rank)),
                Storage::Allocatable => ExtendedValue::MutableBox {
                    cell: param,
                    rank: sym.rank,
                },
                Storage::Value => ExtendedValue::Scalar(param),
            };
            symbols.bind(sym, value);
        }
        Harness {
            b,
            symbols,
            scalars: DefaultScalarLowering::new(),
            options,
        }
    }

    pub fn lowering(&mut self) -> ArrayLowering<'_> {
        ArrayLowering::new(&mut self.b, &mut self.symbols, &mut self.scalars, &self.options)
    }

    /// Terminate and verify the function.
    pub fn finish(self) -> FuncBody {
        finish_function(self.b, &self.options).expect("lowered function failed verification")
    }
}
