//! Lowered SSA form, its builder, verifier and reference interpreter.

pub mod interp;
pub mod ssa;
pub mod ssa_builder;
pub mod ssa_verify;
