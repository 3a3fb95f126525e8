//! Breadth-first exploration of the reachable global-state graph.
//!
//! Successors of an expanded state come from one macro step per runnable
//! context (plus one with the trap fired, for interruptable contexts), or
//! one per alternative when the state is choosing. Macro steps that stay
//! within the same context do not increase the path length and their
//! successors go to the front of the queue; a shorter path found to a
//! not-yet-expanded node relaxes that node's parent. Together these keep
//! every recorded `len` minimal in macro-step count.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use harmony_vm::context::Context;
use harmony_vm::errors::InternalError;
use harmony_vm::program::Program;
use harmony_vm::state::GlobalState;
use harmony_vm::value::{Value, atoms};
use harmony_vm::vm::{MacroStep, VM};

use crate::diagnosis::PROCESS_FAILURE;
use crate::graph::{Edge, NodeId, StateGraph};

/// Result of an exploration run.
pub struct Exploration {
    pub graph: StateGraph,
    pub initial: NodeId,
    /// First issue-carrying state popped, if any; exploration stops there.
    pub violation: Option<NodeId>,
    /// Largest macro-step distance among expanded states.
    pub diameter: usize,
    /// Last expanded state, the dump root for clean runs.
    pub last: NodeId,
}

pub struct Explorer<'a> {
    program: &'a Program,
}

impl<'a> Explorer<'a> {
    pub fn new(program: &'a Program) -> Explorer<'a> {
        Explorer { program }
    }

    /// The initial global state: one `__init__` context, atomic so that
    /// initialization runs without interleavings.
    fn initial_state(&self) -> GlobalState {
        let mut ctx = Context::new(
            Context::make_nametag(&atoms::INIT, Value::novalue()),
            0,
        );
        ctx.atomic = 1;
        let mut state = GlobalState::new();
        state.add(Arc::new(ctx));
        state
    }

    pub fn run(&self) -> Result<Exploration, InternalError> {
        let mut graph = StateGraph::new();
        let initial = graph.insert(
            Arc::new(self.initial_state()),
            None,
            0,
            None,
            None,
            Vec::new(),
        );

        let mut todo: VecDeque<NodeId> = VecDeque::from([initial]);
        let mut violation = None;
        let mut diameter = 0usize;
        let mut last = initial;

        while let Some(id) = todo.pop_front() {
            if !graph[id].issues.is_empty() {
                violation = Some(id);
                break;
            }
            if graph[id].expanded {
                continue;
            }
            graph.get_mut(id).expanded = true;
            last = id;
            if graph[id].len > diameter {
                diameter = graph[id].len;
            }

            let state = graph[id].state.clone();
            if let Some(choosing) = &state.choosing {
                let choosing = choosing.clone();
                let choices = choosing
                    .top()
                    .and_then(Value::as_set)
                    .ok_or(InternalError::MissingChoice)?
                    .clone();
                for choice in choices.iter() {
                    self.onestep(
                        &mut graph,
                        &mut todo,
                        id,
                        &choosing,
                        Some(choice.clone()),
                        false,
                    )?;
                }
            } else {
                let contexts: Vec<Arc<Context>> =
                    state.ctxbag.contexts().cloned().collect();
                for ctx in contexts {
                    self.onestep(&mut graph, &mut todo, id, &ctx, None, false)?;
                    if ctx.interruptable && ctx.trap.is_some() {
                        self.onestep(&mut graph, &mut todo, id, &ctx, None, true)?;
                    }
                }
            }

            if graph.len() % 10_000 == 0 {
                debug!(
                    states = graph.len(),
                    queued = todo.len(),
                    diameter,
                    "exploring"
                );
            }
        }

        info!(
            states = graph.len(),
            diameter,
            violation = violation.is_some(),
            "state space explored"
        );

        Ok(Exploration {
            graph,
            initial,
            violation,
            diameter,
            last,
        })
    }

    /// Run one macro step from the state at `node_id` and record the
    /// resulting edge, discovering or relaxing the successor node.
    fn onestep(
        &self,
        graph: &mut StateGraph,
        todo: &mut VecDeque<NodeId>,
        node_id: NodeId,
        ctx: &Arc<Context>,
        choice: Option<Value>,
        interrupt: bool,
    ) -> Result<(), InternalError> {
        let (parent_state, parent_len, samectx) = {
            let node = &graph[node_id];
            (
                node.state.clone(),
                node.len,
                node.after.as_deref() == Some(ctx.as_ref()),
            )
        };
        let was_choosing = parent_state.choosing.is_some();

        let vm = VM::new(self.program, &parent_state, ctx.clone());
        let MacroStep { state, ctx: after, steps } = vm.execute(choice.clone(), interrupt)?;
        let state = Arc::new(state);

        // A macro step by the context that already made the previous hop
        // does not lengthen the counter-example.
        let length = if samectx { parent_len } else { parent_len + 1 };

        let dest = match graph.node_for(&state) {
            None => {
                let id = graph.insert(
                    state,
                    Some(node_id),
                    length,
                    Some(ctx.clone()),
                    Some(after.clone()),
                    steps.clone(),
                );
                if samectx {
                    todo.push_front(id);
                } else {
                    todo.push_back(id);
                }
                id
            }
            Some(id) => {
                let next = graph.get_mut(id);
                if next.len > length && !next.expanded {
                    next.len = length;
                    next.parent = Some(node_id);
                    next.before = Some(ctx.clone());
                    next.after = Some(after.clone());
                    next.steps = steps.clone();
                    todo.push_front(id);
                }
                id
            }
        };

        let key = if was_choosing {
            choice.ok_or(InternalError::MissingChoice)?
        } else {
            Value::Context(ctx.clone())
        };
        let failed = after.failure.is_some();
        graph.get_mut(node_id).edges.push(Edge {
            key,
            interrupt,
            dest,
            after,
            steps,
        });

        let dest_node = graph.get_mut(dest);
        dest_node.sources.insert(node_id);
        if failed {
            dest_node.issues.insert(PROCESS_FAILURE.to_string());
        }
        Ok(())
    }
}
