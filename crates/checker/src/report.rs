//! Rendering of verification outcomes: the plain-text report and the
//! optional full state-graph dump.

use serde::Serialize;
use serde_json::Value as Json;
use serde_json::json;

use harmony_vm::program::value_to_json;
use harmony_vm::value::Value;
use harmony_vm::vm::Microstep;

use crate::diagnosis::{Diagnosis, IssueReport};
use crate::explorer::Exploration;
use crate::graph::StateGraph;

/// Compress a microstep trace: runs of consecutive pcs become `k-m`,
/// resolved choices print as `k(choose v)`, and interrupt injections as
/// `Interrupt`.
pub fn strsteps(steps: &[Microstep]) -> String {
    let mut result = String::new();
    let mut i = 0;
    while i < steps.len() {
        if !result.is_empty() {
            result.push(',');
        }
        let step = &steps[i];
        match step.pc {
            None => result.push_str("Interrupt"),
            Some(pc) => result.push_str(&pc.to_string()),
        }
        let mut j = i + 1;
        if let Some(choice) = &step.choice {
            result.push_str(&format!("(choose {choice})"));
        } else if let Some(mut last) = step.pc {
            while let Some(Microstep {
                pc: Some(pc),
                choice: None,
            }) = steps.get(j)
            {
                if *pc != last + 1 {
                    break;
                }
                last = *pc;
                j += 1;
            }
            if j > i + 1 {
                result.push_str(&format!("-{last}"));
            }
        }
        i = j;
    }
    format!("[{result}]")
}

/// The complete verification outcome for one program.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub states: usize,
    pub diameter: usize,
    pub issues: Vec<IssueReport>,
    /// Root state for graph dumps: the shortest witness, or the last
    /// state of a clean run.
    pub dump_root: crate::graph::NodeId,
}

impl Report {
    pub fn new(expl: &Exploration, diagnosis: &Diagnosis) -> Report {
        Report {
            states: expl.graph.len(),
            diameter: expl.diameter,
            issues: diagnosis.issues.clone(),
            dump_root: diagnosis.dump_root,
        }
    }

    pub fn ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "#states = {} diameter = {}\n",
            self.states, self.diameter
        ));
        for issue in &self.issues {
            self.render_issue(issue, &mut out);
        }
        if self.ok() {
            out.push_str("no issues found\n");
        }
        out
    }

    fn render_issue(&self, issue: &IssueReport, out: &mut String) {
        if issue.category == "Safety violation" {
            out.push_str(&format!("==== {} ====\n", issue.category));
        } else {
            out.push_str(&format!("==== {} ==== {}\n", issue.category, issue.count));
        }
        for row in &issue.path {
            out.push_str(&format!("{} {} {}\n", row.nametag, row.steps, row.vars));
        }
        if let Some(failure) = &issue.failure {
            out.push_str(&format!(">>> {failure}\n"));
        }
        for blocked in &issue.blocked {
            out.push_str(&format!("blocked process: {blocked}\n"));
        }
        for running in &issue.running {
            out.push_str(&format!("running process: {running}\n"));
        }
        if !issue.blocked.is_empty() || !issue.running.is_empty() {
            out.push_str(&format!(
                "#blocked: {} #running: {}\n",
                issue.blocked.len(),
                issue.running.len()
            ));
        }
        for stopped in &issue.stopped {
            out.push_str(&format!("stopped process: {stopped}\n"));
        }
    }
}

/// Serialize the whole exploration graph, one record per state.
pub fn dump_graph(graph: &StateGraph) -> Json {
    let nodes: Vec<Json> = graph
        .iter()
        .map(|node| {
            let contexts: Vec<Json> = node
                .state
                .ctxbag
                .iter()
                .map(|(ctx, count)| {
                    json!({
                        "context": value_to_json(&Value::Context(ctx.clone())),
                        "count": count,
                    })
                })
                .collect();
            let stopped: Vec<Json> = node
                .state
                .stopbag
                .iter()
                .map(|(ctx, count)| {
                    json!({
                        "context": value_to_json(&Value::Context(ctx.clone())),
                        "count": count,
                    })
                })
                .collect();
            let edges: Vec<Json> = node
                .edges
                .iter()
                .map(|edge| {
                    json!({
                        "key": value_to_json(&edge.key),
                        "interrupt": edge.interrupt,
                        "dest": edge.dest,
                        "steps": strsteps(&edge.steps),
                    })
                })
                .collect();
            json!({
                "id": node.id,
                "len": node.len,
                "parent": node.parent,
                "issues": node.issues.iter().collect::<Vec<_>>(),
                "choosing": node.state.choosing.is_some(),
                "vars": value_to_json(&node.state.vars),
                "contexts": contexts,
                "stopped": stopped,
                "edges": edges,
            })
        })
        .collect();
    json!({ "states": nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(pc: usize) -> Microstep {
        Microstep {
            pc: Some(pc),
            choice: None,
        }
    }

    #[test]
    fn compresses_consecutive_runs() {
        let steps: Vec<Microstep> = (3..=8).map(step).collect();
        assert_eq!(strsteps(&steps), "[3-8]");
    }

    #[test]
    fn breaks_runs_on_jumps_choices_and_interrupts() {
        let mut steps = vec![step(0), step(1), step(5)];
        steps.push(Microstep {
            pc: Some(6),
            choice: Some(Value::int(2)),
        });
        steps.push(Microstep {
            pc: None,
            choice: None,
        });
        steps.push(step(9));
        assert_eq!(strsteps(&steps), "[0-1,5,6(choose 2),Interrupt,9]");
    }

    #[test]
    fn empty_trace() {
        assert_eq!(strsteps(&[]), "[]");
    }
}
