//! # harmony-vm
//!
//! The virtual machine at the core of the Harmony concurrency verifier:
//! the value algebra, per-process contexts, the shared global state, the
//! instruction set, and the macro-step executor that runs one context up
//! to its next scheduling point.
//!
//! ## Key components
//!
//! - [`value::Value`]: immutable, totally ordered, hashable values
//! - [`context::Context`]: per-process VM state, itself a value
//! - [`state::GlobalState`]: shared variables plus running/stopped bags
//! - [`program::Program`]: a compiled program and its JSON wire format
//! - [`vm::VM`]: the macro-step executor
//! - [`eval`]: compile-time constant evaluation on the same VM
//!
//! The state-space explorer that drives the executor lives in the
//! `harmony-checker` crate.

pub mod context;
pub mod errors;
pub mod eval;
pub mod opcode_handlers;
pub mod opcodes;
pub mod program;
pub mod state;
pub mod value;
pub mod vm;

pub use context::Context;
pub use errors::{CompileError, Failure, InternalError, VMError};
pub use opcodes::{NaryOp, Opcode};
pub use program::Program;
pub use state::{Bag, GlobalState};
pub use value::{Dict, Number, Set, Value};
pub use vm::{MacroStep, Microstep, VM};
