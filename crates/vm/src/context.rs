//! Per-process execution state.
//!
//! A [`Context`] is both a value (it can sit in bags, in shared variables
//! after a `Stop`, and on other contexts' stacks) and the execution cursor
//! the macro-step executor advances. The executor works on a private
//! mutable copy and snapshots it (behind `Arc`) on entry and on yield;
//! everything outside the executor treats contexts as immutable.

use std::fmt;
use std::sync::Arc;

use crate::errors::{Failure, InternalError};
use crate::value::{AtomStr, Dict, Value, atoms};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Context {
    /// Process identity: a dict `{name, tag}`.
    pub nametag: Value,
    pub pc: usize,
    /// Frame pointer: index into `stack` just past the saved caller state.
    pub fp: usize,
    /// While positive the process runs without interleavings.
    pub atomic: u32,
    /// Whether a trap may fire before the next instruction.
    pub interruptable: bool,
    pub terminated: bool,
    pub stopped: bool,
    /// A failure message ends the process and marks the state it produced.
    pub failure: Option<String>,
    /// Pending trap handler: method entry point and argument.
    pub trap: Option<(usize, Value)>,
    pub stack: Vec<Value>,
    /// Local variables, including the distinguished `result`.
    pub vars: Value,
}

impl Context {
    pub fn new(nametag: Value, pc: usize) -> Context {
        Context {
            nametag,
            pc,
            fp: 0,
            atomic: 0,
            interruptable: false,
            terminated: false,
            stopped: false,
            failure: None,
            trap: None,
            stack: Vec::new(),
            vars: Value::novalue(),
        }
    }

    /// Build a `{name, tag}` identity dict.
    pub fn make_nametag(name: &AtomStr, tag: Value) -> Value {
        Value::dict(Dict::from_entries([
            (Value::Atom(atoms::NAME.clone()), Value::Atom(name.clone())),
            (Value::Atom(atoms::TAG.clone()), tag),
        ]))
    }

    pub fn name(&self) -> Option<AtomStr> {
        self.nametag
            .as_dict()?
            .get(&Value::Atom(atoms::NAME.clone()))?
            .as_atom()
            .cloned()
    }

    /// The `name/tag` rendering used in report rows.
    pub fn nametag_string(&self) -> String {
        let dict = match self.nametag.as_dict() {
            Some(d) => d,
            None => return self.nametag.to_string(),
        };
        let name = dict
            .get(&Value::Atom(atoms::NAME.clone()))
            .map(|v| match v {
                Value::Atom(a) => a.to_string(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let tag = dict
            .get(&Value::Atom(atoms::TAG.clone()))
            .map(|v| v.to_string())
            .unwrap_or_default();
        format!("{name}/{tag}")
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, InternalError> {
        self.stack
            .pop()
            .ok_or(InternalError::StackUnderflow { pc: self.pc })
    }

    pub fn top(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn set_top(&mut self, value: Value) -> Result<(), InternalError> {
        let top = self
            .stack
            .last_mut()
            .ok_or(InternalError::StackUnderflow { pc: self.pc })?;
        *top = value;
        Ok(())
    }

    /// Value of a local variable.
    pub fn get(&self, name: &AtomStr) -> Result<Value, Failure> {
        let key = Value::Atom(name.clone());
        self.vars
            .as_dict()
            .and_then(|d| d.get(&key))
            .cloned()
            .ok_or_else(|| Failure::UnknownVariable {
                name: name.to_string(),
            })
    }

    /// Traverse the locals record by an index path.
    pub fn iget(&self, path: &[Value]) -> Result<Value, Failure> {
        self.vars.iget(path)
    }

    /// Functional update of the locals record.
    pub fn set(&mut self, path: &[Value], value: Value) -> Result<(), Failure> {
        self.vars = self.vars.update(path, value)?;
        Ok(())
    }

    pub fn delete(&mut self, path: &[Value]) -> Result<(), Failure> {
        self.vars = self.vars.remove(path)?;
        Ok(())
    }

    pub fn record_failure(&mut self, failure: &Failure) {
        self.failure = Some(failure.to_string());
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CONTEXT({}, pc={})", self.nametag_string(), self.pc)
    }
}

/// Snapshot a working context for use as a value or bag member.
pub fn snapshot(ctx: &Context) -> Arc<Context> {
    Arc::new(ctx.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ctx() -> Context {
        let name: AtomStr = Arc::from("worker");
        Context::new(Context::make_nametag(&name, Value::int(1)), 0)
    }

    #[test]
    fn nametag_renders_name_and_tag() {
        assert_eq!(ctx().nametag_string(), "worker/1");
        assert_eq!(ctx().name().unwrap().as_ref(), "worker");
    }

    #[test]
    fn stack_is_lifo() {
        let mut c = ctx();
        c.push(Value::int(1));
        c.push(Value::int(2));
        assert_eq!(c.pop().unwrap(), Value::int(2));
        assert_eq!(c.pop().unwrap(), Value::int(1));
        assert!(c.pop().is_err());
    }

    #[test]
    fn locals_update_is_functional() {
        let mut c = ctx();
        let x: AtomStr = Arc::from("x");
        let path = [Value::Atom(x.clone())];
        c.set(&path, Value::int(3)).unwrap();
        let before = c.vars.clone();
        c.set(&path, Value::int(4)).unwrap();
        assert_eq!(before.iget(&path).unwrap(), Value::int(3));
        assert_eq!(c.get(&x).unwrap(), Value::int(4));
        c.delete(&path).unwrap();
        assert!(c.get(&x).is_err());
    }

    #[test]
    fn identical_contexts_are_equal_values() {
        let a = ctx();
        let mut b = ctx();
        assert_eq!(a, b);
        b.pc = 1;
        assert_ne!(a, b);
        assert!(Value::Context(Arc::new(a)) < Value::Context(Arc::new(b)));
    }
}
