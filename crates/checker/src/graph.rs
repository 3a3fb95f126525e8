//! The exploration graph: one node per reachable global state.

use std::collections::BTreeSet;
use std::ops::Index;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use harmony_vm::context::Context;
use harmony_vm::state::GlobalState;
use harmony_vm::value::Value;
use harmony_vm::vm::Microstep;

pub type NodeId = usize;

/// One outgoing transition of a node. `key` records the scheduling choice
/// that produced it: the stepping context as a value or, from a choosing
/// state, the chosen value.
#[derive(Clone, Debug)]
pub struct Edge {
    pub key: Value,
    pub interrupt: bool,
    pub dest: NodeId,
    pub after: Arc<Context>,
    pub steps: Vec<Microstep>,
}

/// Bookkeeping for one visited global state.
///
/// `parent`, `before`, `after` and `steps` describe the (shortest known)
/// macro step that discovered the state; they may be relaxed until the
/// node is expanded, after which the node is frozen.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub state: Arc<GlobalState>,
    pub parent: Option<NodeId>,
    /// Macro-step distance from the initial state.
    pub len: usize,
    pub before: Option<Arc<Context>>,
    pub after: Option<Arc<Context>>,
    pub steps: Vec<Microstep>,
    pub edges: Vec<Edge>,
    /// Predecessors, for the backward reachability pass of diagnosis.
    pub sources: BTreeSet<NodeId>,
    pub expanded: bool,
    /// Issue categories attached to this state.
    pub issues: BTreeSet<String>,
}

/// Node arena plus a state index. NodeIds are discovery order, which makes
/// them a deterministic tie-breaker.
#[derive(Debug, Default)]
pub struct StateGraph {
    nodes: Vec<Node>,
    index: FxHashMap<Arc<GlobalState>, NodeId>,
}

impl StateGraph {
    pub fn new() -> StateGraph {
        StateGraph::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_for(&self, state: &GlobalState) -> Option<NodeId> {
        self.index.get(state).copied()
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Record a newly discovered state.
    pub fn insert(
        &mut self,
        state: Arc<GlobalState>,
        parent: Option<NodeId>,
        len: usize,
        before: Option<Arc<Context>>,
        after: Option<Arc<Context>>,
        steps: Vec<Microstep>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            state: state.clone(),
            parent,
            len,
            before,
            after,
            steps,
            edges: Vec::new(),
            sources: BTreeSet::new(),
            expanded: false,
            issues: BTreeSet::new(),
        });
        self.index.insert(state, id);
        id
    }
}

impl Index<NodeId> for StateGraph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}
