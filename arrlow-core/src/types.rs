//! Type constructors for the lowered form.
//!
//! Front-end element types (`Int`, `Real`, `Char`, `Record`, ...) and the
//! lowered-only types the engine introduces (`Array`, `Ref`, `Box`, `Shape`,
//! ...) share one `TypeName` so SSA values and expressions use the same
//! `polytype::Type`.

pub type Type = polytype::Type<TypeName>;

/// Type name constructors.
///
/// - Numeric and logical kinds carry their width in bits.
/// - `Record(name)` carries its component types as type arguments.
/// - `Seq(extents)` is a fixed-size array component; its argument is the element type.
/// - `Array(rank)` is an SSA array value produced by `array_load`; its argument
///   is the element type.
/// - `Ref`/`Heap` are addresses of stack/heap storage; argument is the pointee.
/// - `Box(rank)` is an array descriptor; argument is the element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeName {
    Int(usize),
    Real(usize),
    Complex(usize),
    Logical(usize),
    Bool,
    Index,
    Char { kind: usize, len: Option<usize> },
    Record(String),
    Seq(Vec<usize>),
    Array(usize),
    Ref,
    Heap,
    Box(usize),
    Shape(usize),
    Slice(usize),
    /// Ragged buffer header: `{flags, data, shape}`.
    Header,
    Unit,
    Arrow,
}

impl polytype::Name for TypeName {
    fn arrow() -> Self {
        TypeName::Arrow
    }

    fn show(&self) -> String {
        match self {
            TypeName::Int(bits) => format!("i{}", bits),
            TypeName::Real(bits) => format!("f{}", bits),
            TypeName::Complex(bits) => format!("complex<f{}>", bits),
            TypeName::Logical(bits) => format!("logical<{}>", bits / 8),
            TypeName::Bool => "i1".to_string(),
            TypeName::Index => "index".to_string(),
            TypeName::Char { kind, len } => match len {
                Some(n) => format!("char<{},{}>", kind, n),
                None => format!("char<{},?>", kind),
            },
            TypeName::Record(name) => format!("type<{}>", name),
            TypeName::Seq(extents) => {
                let dims: Vec<String> = extents.iter().map(|e| e.to_string()).collect();
                format!("seq<{}>", dims.join("x"))
            }
            TypeName::Array(rank) => format!("array<{}>", rank),
            TypeName::Ref => "ref".to_string(),
            TypeName::Heap => "heap".to_string(),
            TypeName::Box(rank) => format!("box<{}>", rank),
            TypeName::Shape(rank) => format!("shape<{}>", rank),
            TypeName::Slice(rank) => format!("slice<{}>", rank),
            TypeName::Header => "ragged_header".to_string(),
            TypeName::Unit => "()".to_string(),
            TypeName::Arrow => "->".to_string(),
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

fn scalar(name: TypeName) -> Type {
    Type::Constructed(name, vec![])
}

pub fn int(bits: usize) -> Type {
    scalar(TypeName::Int(bits))
}

pub fn i32() -> Type {
    int(32)
}

pub fn i64() -> Type {
    int(64)
}

pub fn real(bits: usize) -> Type {
    scalar(TypeName::Real(bits))
}

pub fn f64() -> Type {
    real(64)
}

pub fn complex(bits: usize) -> Type {
    scalar(TypeName::Complex(bits))
}

pub fn logical() -> Type {
    scalar(TypeName::Logical(32))
}

pub fn bool_type() -> Type {
    scalar(TypeName::Bool)
}

pub fn index() -> Type {
    scalar(TypeName::Index)
}

pub fn unit() -> Type {
    scalar(TypeName::Unit)
}

pub fn character(len: Option<usize>) -> Type {
    scalar(TypeName::Char { kind: 1, len })
}

pub fn record(name: &str, fields: Vec<Type>) -> Type {
    Type::Constructed(TypeName::Record(name.to_string()), fields)
}

pub fn seq(extents: Vec<usize>, elem: Type) -> Type {
    Type::Constructed(TypeName::Seq(extents), vec![elem])
}

pub fn array_value(rank: usize, elem: Type) -> Type {
    Type::Constructed(TypeName::Array(rank), vec![elem])
}

pub fn reference(pointee: Type) -> Type {
    Type::Constructed(TypeName::Ref, vec![pointee])
}

pub fn heap(pointee: Type) -> Type {
    Type::Constructed(TypeName::Heap, vec![pointee])
}

pub fn boxed(rank: usize, elem: Type) -> Type {
    Type::Constructed(TypeName::Box(rank), vec![elem])
}

pub fn shape(rank: usize) -> Type {
    scalar(TypeName::Shape(rank))
}

pub fn slice(rank: usize) -> Type {
    scalar(TypeName::Slice(rank))
}

pub fn ragged_header() -> Type {
    scalar(TypeName::Header)
}

// =============================================================================
// Queries
// =============================================================================

/// Coarse classification used to pick element operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Real,
    Complex,
    Logical,
    Character,
    Derived,
    Other,
}

pub fn category(ty: &Type) -> TypeCategory {
    match ty {
        Type::Constructed(TypeName::Int(_) | TypeName::Index, _) => TypeCategory::Integer,
        Type::Constructed(TypeName::Real(_), _) => TypeCategory::Real,
        Type::Constructed(TypeName::Complex(_), _) => TypeCategory::Complex,
        Type::Constructed(TypeName::Logical(_) | TypeName::Bool, _) => TypeCategory::Logical,
        Type::Constructed(TypeName::Char { .. }, _) => TypeCategory::Character,
        Type::Constructed(TypeName::Record(_), _) => TypeCategory::Derived,
        _ => TypeCategory::Other,
    }
}

/// Element type argument of a lowered container type (`Array`, `Ref`, `Box`, `Seq`, ...).
pub fn element_of(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Constructed(
            TypeName::Array(_) | TypeName::Ref | TypeName::Heap | TypeName::Box(_) | TypeName::Seq(_),
            args,
        ) => args.first(),
        _ => None,
    }
}

/// Extents of a fixed-size component array type.
pub fn seq_extents(ty: &Type) -> Option<&[usize]> {
    match ty {
        Type::Constructed(TypeName::Seq(extents), _) => Some(extents),
        _ => None,
    }
}

pub fn record_fields(ty: &Type) -> Option<&[Type]> {
    match ty {
        Type::Constructed(TypeName::Record(_), fields) => Some(fields),
        _ => None,
    }
}

/// Declared length of a character type; `None` if not character or deferred.
pub fn char_len(ty: &Type) -> Option<usize> {
    match ty {
        Type::Constructed(TypeName::Char { len, .. }, _) => *len,
        _ => None,
    }
}

/// Bytes per character of a character type.
pub fn char_kind(ty: &Type) -> Option<usize> {
    match ty {
        Type::Constructed(TypeName::Char { kind, .. }, _) => Some(*kind),
        _ => None,
    }
}

pub fn is_character(ty: &Type) -> bool {
    category(ty) == TypeCategory::Character
}

/// Storage size of one element in bytes, when known statically.
///
/// Deferred-length characters have no static size; their size is computed at
/// run time from the value's length.
pub fn static_byte_size(ty: &Type) -> Option<u64> {
    match ty {
        Type::Constructed(name, args) => match name {
            TypeName::Int(bits) | TypeName::Real(bits) | TypeName::Logical(bits) => Some(*bits as u64 / 8),
            TypeName::Complex(bits) => Some(2 * *bits as u64 / 8),
            TypeName::Bool => Some(1),
            TypeName::Index => Some(8),
            TypeName::Char { kind, len } => len.map(|n| (*kind * n) as u64),
            TypeName::Record(_) => args.iter().map(static_byte_size).sum(),
            TypeName::Seq(extents) => {
                let count: u64 = extents.iter().map(|e| *e as u64).product();
                args.first().and_then(static_byte_size).map(|s| s * count)
            }
            TypeName::Ref | TypeName::Heap => Some(8),
            TypeName::Box(rank) => Some(24 + 24 * *rank as u64),
            TypeName::Header => Some(24),
            _ => None,
        },
        Type::Variable(_) => None,
    }
}

/// Integer width in bits, used for wrapping arithmetic.
pub fn int_bits(ty: &Type) -> Option<usize> {
    match ty {
        Type::Constructed(TypeName::Int(bits), _) => Some(*bits),
        Type::Constructed(TypeName::Index, _) => Some(64),
        _ => None,
    }
}
