//! Instruction implementations, grouped by family. Each handler is an
//! `op_*` method on [`crate::vm::VM`] returning how the macro step should
//! proceed; user-level failures come back as errors and are recorded on
//! the context by the executor.

pub mod access;
pub mod flow;
pub mod nary;
pub mod process;
pub mod stack;
