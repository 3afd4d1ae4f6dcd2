//! Error types for array lowering.
//!
//! Internal contract violations are not represented here; they panic at the
//! point of detection.

use crate::ast::Span;
use crate::mir::interp::InterpError;
use crate::mir::ssa_builder::BuilderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    /// A legal construct the engine does not handle yet.
    #[error("unsupported: {0}")]
    Unsupported(String, Option<Span>),

    /// No governing shape could be determined for a loop nest.
    #[error("cannot infer iteration shape: {0}")]
    ShapeInference(String, Option<Span>),

    #[error("SSA builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("SSA verification failed: {0}")]
    Verify(String),

    #[error("invalid lowering options: {0}")]
    Config(String),

    #[error("interpreter error: {0}")]
    Interp(#[from] InterpError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompilerError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CompilerError::Unsupported(_, span) | CompilerError::ShapeInference(_, span) => *span,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

#[macro_export]
macro_rules! err_unsupported {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::Unsupported(format!($($arg)*), None)
    };
}

#[macro_export]
macro_rules! err_unsupported_at {
    ($span:expr, $($arg:tt)*) => {
        $crate::error::CompilerError::Unsupported(format!($($arg)*), Some($span))
    };
}

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::err_unsupported!($($arg)*))
    };
}

#[macro_export]
macro_rules! bail_unsupported_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::err_unsupported_at!($span, $($arg)*))
    };
}

#[macro_export]
macro_rules! bail_shape_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::ShapeInference(format!($($arg)*), Some($span)))
    };
}
