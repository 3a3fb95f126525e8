//! The shared global state of a program under verification.

use std::sync::Arc;

use crate::context::Context;
use crate::errors::{Failure, InternalError};
use crate::value::Value;

/// A multiset of contexts, represented as a sorted association list so that
/// states derive structural equality, hashing and ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bag {
    entries: Vec<(Arc<Context>, u32)>,
}

impl Bag {
    pub fn new() -> Bag {
        Bag::default()
    }

    /// Number of distinct contexts.
    pub fn distinct_len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, ctx: &Context) -> u32 {
        self.entries
            .binary_search_by(|(c, _)| c.as_ref().cmp(ctx))
            .map(|i| self.entries[i].1)
            .unwrap_or(0)
    }

    pub fn contains(&self, ctx: &Context) -> bool {
        self.count(ctx) > 0
    }

    pub fn add(&mut self, ctx: Arc<Context>) {
        match self
            .entries
            .binary_search_by(|(c, _)| c.as_ref().cmp(&ctx))
        {
            Ok(i) => self.entries[i].1 += 1,
            Err(i) => self.entries.insert(i, (ctx, 1)),
        }
    }

    pub fn remove(&mut self, ctx: &Context) -> Result<(), InternalError> {
        if !self.remove_if_present(ctx) {
            return Err(InternalError::BagUnderflow);
        }
        Ok(())
    }

    /// Decrement a context's count if it is present at all.
    pub fn remove_if_present(&mut self, ctx: &Context) -> bool {
        match self
            .entries
            .binary_search_by(|(c, _)| c.as_ref().cmp(ctx))
        {
            Ok(i) => {
                if self.entries[i].1 > 1 {
                    self.entries[i].1 -= 1;
                } else {
                    self.entries.remove(i);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Distinct contexts with their counts, in value order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<Context>, u32)> {
        self.entries.iter().map(|(c, n)| (c, *n))
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Arc<Context>> {
        self.entries.iter().map(|(c, _)| c)
    }
}

/// A global state: the shared-variable record plus the process bags.
///
/// Global states are values from the explorer's point of view: structurally
/// comparable and hashable, with all compound content shared via `Arc`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalState {
    /// Root record of shared variables.
    pub vars: Value,
    /// Running processes.
    pub ctxbag: Bag,
    /// Processes parked by `Stop`, awaiting a `Go`.
    pub stopbag: Bag,
    /// When set, the unique context that must resolve a nondeterministic
    /// choice before any other context runs. Invariant: a member of
    /// `ctxbag`.
    pub choosing: Option<Arc<Context>>,
    /// True until the initial process terminates; while true, first-time
    /// assignment to an undeclared shared variable is allowed.
    pub initializing: bool,
}

impl GlobalState {
    pub fn new() -> GlobalState {
        GlobalState {
            vars: Value::novalue(),
            ctxbag: Bag::new(),
            stopbag: Bag::new(),
            choosing: None,
            initializing: true,
        }
    }

    /// Whether the root variable of `path` has been declared.
    pub fn declared(&self, name: &Value) -> bool {
        self.vars.as_dict().is_some_and(|d| d.contains_key(name))
    }

    pub fn iget(&self, path: &[Value]) -> Result<Value, Failure> {
        self.vars.iget(path)
    }

    /// Functional update of the shared record.
    pub fn set(&mut self, path: &[Value], value: Value) -> Result<(), Failure> {
        self.vars = self.vars.update(path, value)?;
        Ok(())
    }

    pub fn delete(&mut self, path: &[Value]) -> Result<(), Failure> {
        self.vars = self.vars.remove(path)?;
        Ok(())
    }

    /// Record a stopped context: append it to the list-valued shared
    /// variable at `path` and account for it in the stop bag.
    pub fn stop(&mut self, path: &[Value], ctx: Arc<Context>) -> Result<(), Failure> {
        let list = self.iget(path)?;
        let dict = list.as_dict().ok_or_else(|| Failure::NotADictionary {
            found: list.type_name().to_string(),
        })?;
        let mut copy = dict.clone();
        copy.push_back(Value::Context(ctx.clone()));
        self.vars = self.vars.update(path, Value::dict(copy))?;
        self.stopbag.add(ctx);
        Ok(())
    }

    pub fn add(&mut self, ctx: Arc<Context>) {
        self.ctxbag.add(ctx);
    }

    pub fn remove(&mut self, ctx: &Context) -> Result<(), InternalError> {
        self.ctxbag.remove(ctx)
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        GlobalState::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::{Dict, atoms};

    fn ctx(pc: usize) -> Arc<Context> {
        Arc::new(Context::new(
            Context::make_nametag(&atoms::INIT, Value::novalue()),
            pc,
        ))
    }

    #[test]
    fn bag_counts_multiplicity() {
        let mut bag = Bag::new();
        bag.add(ctx(0));
        bag.add(ctx(0));
        bag.add(ctx(1));
        assert_eq!(bag.distinct_len(), 2);
        assert_eq!(bag.count(&ctx(0)), 2);
        bag.remove(&ctx(0)).unwrap();
        assert_eq!(bag.count(&ctx(0)), 1);
        bag.remove(&ctx(0)).unwrap();
        assert!(!bag.contains(&ctx(0)));
        assert!(bag.remove(&ctx(0)).is_err());
    }

    #[test]
    fn bags_are_order_insensitive_values() {
        let mut a = Bag::new();
        a.add(ctx(0));
        a.add(ctx(1));
        let mut b = Bag::new();
        b.add(ctx(1));
        b.add(ctx(0));
        assert_eq!(a, b);
    }

    #[test]
    fn stop_appends_to_list_and_stop_bag() {
        let mut state = GlobalState::new();
        let q = [Value::atom("q")];
        state.set(&q, Value::dict(Dict::new())).unwrap();
        state.stop(&q, ctx(5)).unwrap();
        state.stop(&q, ctx(6)).unwrap();

        let list = state.iget(&q).unwrap();
        let dict = list.as_dict().unwrap();
        assert!(dict.is_list());
        assert_eq!(dict.len(), 2);
        assert_eq!(state.stopbag.distinct_len(), 2);
        assert_eq!(
            dict.get(&Value::int(0)).unwrap(),
            &Value::Context(ctx(5))
        );
    }

    #[test]
    fn stop_requires_a_list_target() {
        let mut state = GlobalState::new();
        let x = [Value::atom("x")];
        state.set(&x, Value::int(3)).unwrap();
        assert!(state.stop(&x, ctx(0)).is_err());
    }
}
