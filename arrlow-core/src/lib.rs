//! Array-expression lowering.
//!
//! Whole-array assignments, masked (WHERE/FORALL) assignments, elemental and
//! transformational calls, and array constructors are lowered into explicit
//! loop nests over an SSA form with block parameters. `lower::ArrayLowering`
//! is the entry point; `mir::interp` executes the result.

pub mod ast;
pub mod diags;
pub mod error;
pub mod lower;
pub mod mir;
pub mod options;
pub mod types;

use std::marker::PhantomData;

pub use error::{CompilerError, Result};
pub use lower::ArrayLowering;
pub use options::LoweringOptions;

// =============================================================================
// Generic ID allocation
// =============================================================================

/// Generic counter for generating unique IDs.
///
/// The ID type must implement `From<u32>` to convert the raw counter value.
#[derive(Debug, Clone)]
pub struct IdSource<Id> {
    next_id: u32,
    _phantom: PhantomData<Id>,
}

impl<Id: From<u32>> IdSource<Id> {
    pub fn new() -> Self {
        IdSource {
            next_id: 0,
            _phantom: PhantomData,
        }
    }

    pub fn next_id(&mut self) -> Id {
        let id = Id::from(self.next_id);
        self.next_id += 1;
        id
    }
}

impl<Id: From<u32>> Default for IdSource<Id> {
    fn default() -> Self {
        Self::new()
    }
}
