//! # harmony-checker
//!
//! The state-space explorer of the Harmony concurrency verifier: breadth-
//! first enumeration of reachable global states over the `harmony-vm`
//! macro-step executor, diagnosis of safety violations, non-terminating
//! executions and stopped processes, and report generation with shortest
//! counter-example traces.

pub mod diagnosis;
pub mod explorer;
pub mod graph;
pub mod report;

pub use diagnosis::{Diagnosis, IssueReport, diagnose};
pub use explorer::{Exploration, Explorer};
pub use graph::{Edge, Node, NodeId, StateGraph};
pub use report::{Report, dump_graph};

use harmony_vm::errors::InternalError;
use harmony_vm::program::Program;

/// Explore, diagnose and summarize one compiled program.
pub fn verify(program: &Program, blocking: bool) -> Result<(Report, Exploration), InternalError> {
    let mut exploration = Explorer::new(program).run()?;
    let diagnosis = diagnose(&mut exploration, blocking);
    let report = Report::new(&exploration, &diagnosis);
    Ok((report, exploration))
}
