//! Classification of explored states and counter-example extraction.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use harmony_vm::context::Context;
use harmony_vm::value::{Value, vars_string};
use harmony_vm::vm::Microstep;

use crate::explorer::Exploration;
use crate::graph::{NodeId, StateGraph};
use crate::report::strsteps;

pub const PROCESS_FAILURE: &str = "process failure";
pub const NON_TERMINATING: &str = "non-terminating state";
pub const STOPPED_PROCESS: &str = "stopped process";

/// One row of a counter-example: the macro steps of one context, with the
/// shared-variable snapshot after its last step.
#[derive(Clone, Debug, Serialize)]
pub struct PathRow {
    pub nametag: String,
    pub steps: String,
    pub vars: String,
}

/// One issue category with its shortest witness.
#[derive(Clone, Debug, Serialize)]
pub struct IssueReport {
    pub category: String,
    /// Number of states in the category (1 for a safety seed, since
    /// exploration stops at the first violation).
    pub count: usize,
    pub witness: NodeId,
    pub witness_len: usize,
    pub path: Vec<PathRow>,
    /// Failure message of the final context, for process failures.
    pub failure: Option<String>,
    /// Blocked and running processes at a non-terminating witness.
    pub blocked: Vec<String>,
    pub running: Vec<String>,
    /// Parked contexts at a stopped-state witness.
    pub stopped: Vec<String>,
}

pub struct Diagnosis {
    pub issues: Vec<IssueReport>,
    /// Root for the full-graph dump: the shortest witness, or the last
    /// state of a clean run.
    pub dump_root: NodeId,
}

/// Classify the explored graph and extract shortest counter-examples.
///
/// In `blocking` mode the termination targets are the states all of whose
/// enabled edges are self-loops, rather than the states with no runnable
/// context.
pub fn diagnose(expl: &mut Exploration, blocking: bool) -> Diagnosis {
    let mut issues = Vec::new();
    let mut witnesses = Vec::new();

    if let Some(seed) = expl.violation {
        let (path, failure) = build_path(&expl.graph, seed);
        issues.push(IssueReport {
            category: "Safety violation".to_string(),
            count: 1,
            witness: seed,
            witness_len: expl.graph[seed].len,
            path,
            failure,
            blocked: Vec::new(),
            running: Vec::new(),
            stopped: Vec::new(),
        });
        witnesses.push(seed);
    } else {
        // Termination: states that cannot reach a terminating target are
        // non-terminating. Only meaningful when the whole graph was
        // explored, i.e. no violation cut the run short.
        let reaches_end = backward_closure(&expl.graph, |node| {
            if blocking {
                node.edges.iter().all(|e| e.dest == node.id)
            } else {
                node.state.ctxbag.is_empty()
            }
        });
        let bad: Vec<NodeId> = expl
            .graph
            .iter()
            .map(|n| n.id)
            .filter(|id| !reaches_end[*id])
            .collect();
        if !bad.is_empty() {
            for id in &bad {
                expl.graph
                    .get_mut(*id)
                    .issues
                    .insert(NON_TERMINATING.to_string());
            }
            let witness = shortest(&expl.graph, &bad);
            let (path, failure) = build_path(&expl.graph, witness);
            let mut blocked = Vec::new();
            let mut running = Vec::new();
            for edge in &expl.graph[witness].edges {
                if edge.dest == witness {
                    blocked.push(edge.key.to_string());
                } else {
                    running.push(edge.key.to_string());
                }
            }
            issues.push(IssueReport {
                category: "Non-terminating states".to_string(),
                count: bad.len(),
                witness,
                witness_len: expl.graph[witness].len,
                path,
                failure,
                blocked,
                running,
                stopped: Vec::new(),
            });
            witnesses.push(witness);
        }
    }

    // States where nothing runs but parked processes remain.
    let stuck: Vec<NodeId> = expl
        .graph
        .iter()
        .filter(|n| n.state.ctxbag.is_empty() && !n.state.stopbag.is_empty())
        .map(|n| n.id)
        .collect();
    if !stuck.is_empty() {
        for id in &stuck {
            expl.graph
                .get_mut(*id)
                .issues
                .insert(STOPPED_PROCESS.to_string());
        }
        let witness = shortest(&expl.graph, &stuck);
        let (path, failure) = build_path(&expl.graph, witness);
        let stopped = expl.graph[witness]
            .state
            .stopbag
            .contexts()
            .map(|c| c.to_string())
            .collect();
        issues.push(IssueReport {
            category: "Stopped states".to_string(),
            count: stuck.len(),
            witness,
            witness_len: expl.graph[witness].len,
            path,
            failure,
            blocked: Vec::new(),
            running: Vec::new(),
            stopped,
        });
        witnesses.push(witness);
    }

    let dump_root = if witnesses.is_empty() {
        expl.last
    } else {
        shortest(&expl.graph, &witnesses)
    };
    Diagnosis { issues, dump_root }
}

/// Mark every node that can reach a node satisfying `target`, walking the
/// recorded back-edges.
fn backward_closure(
    graph: &StateGraph,
    target: impl Fn(&crate::graph::Node) -> bool,
) -> Vec<bool> {
    let mut marked = vec![false; graph.len()];
    let mut work: VecDeque<NodeId> = VecDeque::new();
    for node in graph.iter() {
        if target(node) {
            marked[node.id] = true;
            work.push_back(node.id);
        }
    }
    while let Some(id) = work.pop_front() {
        for &src in &graph[id].sources {
            if !marked[src] {
                marked[src] = true;
                work.push_back(src);
            }
        }
    }
    marked
}

/// The minimum-`len` state of a non-empty set, ties broken by discovery
/// order so runs are reproducible.
fn shortest(graph: &StateGraph, ids: &[NodeId]) -> NodeId {
    let mut best = ids[0];
    for &id in &ids[1..] {
        if (graph[id].len, id) < (graph[best].len, best) {
            best = id;
        }
    }
    best
}

/// Reconstruct the path from the initial state to `witness` and compress
/// consecutive macro steps by the same context into one row each.
fn build_path(graph: &StateGraph, witness: NodeId) -> (Vec<PathRow>, Option<String>) {
    let mut chain = Vec::new();
    let mut cursor = Some(witness);
    while let Some(id) = cursor {
        let node = &graph[id];
        if node.after.is_none() {
            break;
        }
        chain.push(id);
        cursor = node.parent;
    }
    chain.reverse();

    struct Group {
        after: Arc<Context>,
        steps: Vec<Microstep>,
        vars: Value,
    }
    let mut groups: Vec<Group> = Vec::new();
    for id in chain {
        let node = &graph[id];
        let Some(after) = node.after.clone() else {
            continue;
        };
        let merges = match (groups.last(), &node.before) {
            (Some(group), Some(before)) => group.after == *before,
            _ => false,
        };
        if let Some(group) = groups.last_mut().filter(|_| merges) {
            group.steps.extend(node.steps.iter().cloned());
            group.after = after;
            group.vars = node.state.vars.clone();
        } else {
            groups.push(Group {
                after,
                steps: node.steps.clone(),
                vars: node.state.vars.clone(),
            });
        }
    }

    let failure = groups.last().and_then(|g| g.after.failure.clone());
    let rows = groups
        .into_iter()
        .map(|g| PathRow {
            nametag: g.after.nametag_string(),
            steps: strsteps(&g.steps),
            vars: vars_string(&g.vars),
        })
        .collect();
    (rows, failure)
}
