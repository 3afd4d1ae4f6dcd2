//! Classification of how an array reference is realized.

use log::trace;

use super::ArrayLowering;

/// How a leaf array reference must be realized in the loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only element values.
    ByValue,
    /// Element addresses; memory identity is observable by the callee.
    AddressOpaque,
    /// Whole destination loaded before the loop and merged after.
    CopyInCopyOut,
    /// A subspace of the destination is updated; still one load, one merge.
    ProjectedCopyInCopyOut,
    /// The caller's procedure performs the element write.
    CustomCopyInCopyOut,
    /// Descriptors for a callee expecting one.
    BoxedReference,
    /// Element copied into private scratch to emulate pass-by-value.
    ValueCopyArgument,
}

impl AccessMode {
    /// Modes that produce addresses rather than values.
    pub fn wants_address(self) -> bool {
        matches!(self, AccessMode::AddressOpaque | AccessMode::ValueCopyArgument | AccessMode::BoxedReference)
    }
}

impl ArrayLowering<'_> {
    /// Run `f` with `mode` as the ambient access mode; the previous mode is
    /// restored on every exit path.
    pub(crate) fn with_semantics<T>(&mut self, mode: AccessMode, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.semant, mode);
        trace!("access mode {:?} (was {:?})", mode, saved);
        let result = f(self);
        self.semant = saved;
        result
    }

    pub(crate) fn semantics(&self) -> AccessMode {
        self.semant
    }
}
