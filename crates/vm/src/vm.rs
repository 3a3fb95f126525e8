//! The macro-step executor.
//!
//! A macro step runs one context from its current program counter until a
//! scheduling point: termination, stop, failure, a multi-way choice, the
//! mandatory switch after `Continue`, or (outside atomic sections) the
//! instruction before any shared-memory access. The executor works on
//! private copies of the global state and the context; the caller receives
//! fresh snapshots and the microstep trace.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::context::{Context, snapshot};
use crate::errors::{Failure, InternalError, OpcodeResult, VMError};
use crate::opcodes::Opcode;
use crate::program::Program;
use crate::state::GlobalState;
use crate::value::{Set, Value, atoms};

/// Number of microsteps a macro step may take before the executor starts
/// checking for a repeated (state, context) pair, at which point the
/// context fails with `infinite loop`.
///
/// Tunable: too low produces false positives on deeply atomic programs,
/// too high delays the diagnosis of genuinely diverging macro steps.
pub const LOOP_GUARD: usize = 200;

/// One microstep of a trace: the pc executed and, for a resolved choice,
/// the chosen value. A `None` pc denotes an interrupt injection.
#[derive(Clone, Debug, PartialEq)]
pub struct Microstep {
    pub pc: Option<usize>,
    pub choice: Option<Value>,
}

/// Result of a macro step: the successor global state (process bags
/// already adjusted), the final snapshot of the stepped context, and the
/// microstep trace.
#[derive(Clone, Debug)]
pub struct MacroStep {
    pub state: GlobalState,
    pub ctx: Arc<Context>,
    pub steps: Vec<Microstep>,
}

pub struct VM<'a> {
    pub(crate) program: &'a Program,
    /// Working copy of the global state.
    pub(crate) state: GlobalState,
    /// Working copy of the running context.
    pub(crate) ctx: Context,
    /// Snapshot of the context as it entered the macro step; removed from
    /// the context bag when the step completes.
    entry: Arc<Context>,
    /// Value feeding the next `Choose` instruction.
    pub(crate) choice: Option<Value>,
    steps: Vec<Microstep>,
}

impl<'a> VM<'a> {
    pub fn new(program: &'a Program, state: &GlobalState, ctx: Arc<Context>) -> VM<'a> {
        VM {
            program,
            state: state.clone(),
            ctx: (*ctx).clone(),
            entry: ctx,
            choice: None,
            steps: Vec::new(),
        }
    }

    /// Run one macro step. `choice` resolves a pending `Choose` (the
    /// context must be the choosing one); `interrupt` fires the armed trap
    /// before the first microstep.
    pub fn execute(
        mut self,
        choice: Option<Value>,
        interrupt: bool,
    ) -> Result<MacroStep, InternalError> {
        self.state.choosing = None;
        self.choice = choice;

        if interrupt {
            self.fire_trap()?;
        }

        let mut choosing = false;
        let mut local_states: FxHashSet<(GlobalState, Context)> = FxHashSet::default();
        let mut microsteps = 0usize;

        loop {
            self.steps.push(Microstep {
                pc: Some(self.ctx.pc),
                choice: self.choice.clone(),
            });

            match self.step() {
                Ok(OpcodeResult::Continue) => {}
                Ok(OpcodeResult::Yield) => break,
                Err(VMError::Failure(failure)) => {
                    self.ctx.record_failure(&failure);
                    break;
                }
                Err(VMError::Internal(err)) => return Err(err),
            }

            // A nondeterministic choice at the next instruction either
            // resolves on the spot (singleton) or suspends the macro step
            // so the explorer can fan out over the alternatives.
            if let Some(Opcode::Choose) = self.peek() {
                match self.ctx.top() {
                    Some(Value::Set(s)) if !s.is_empty() => {
                        if s.len() > 1 {
                            choosing = true;
                            break;
                        }
                        self.choice = Set::min(s).cloned();
                    }
                    _ => {
                        self.ctx.record_failure(&Failure::ChooseBadOperand);
                        break;
                    }
                }
            } else if self.ctx.atomic == 0
                && matches!(
                    self.peek(),
                    Some(Opcode::Load(_) | Opcode::Store(_) | Opcode::AtomicInc)
                )
            {
                // About to touch shared memory outside an atomic section:
                // let other processes go first.
                break;
            }

            microsteps += 1;
            if microsteps > LOOP_GUARD {
                let here = (self.state.clone(), self.ctx.clone());
                if local_states.contains(&here) {
                    self.ctx.record_failure(&Failure::InfiniteLoop);
                    break;
                }
                local_states.insert(here);
            }
        }

        let final_ctx = snapshot(&self.ctx);
        if choosing {
            self.state.choosing = Some(final_ctx.clone());
        }

        self.state.remove(&self.entry)?;
        if self.ctx.terminated {
            if self.ctx.name().as_deref() == Some(atoms::INIT.as_ref()) {
                self.state.initializing = false;
            }
        } else if !self.ctx.stopped {
            self.state.add(final_ctx.clone());
        }

        Ok(MacroStep {
            state: self.state,
            ctx: final_ctx,
            steps: self.steps,
        })
    }

    /// Execute the single instruction at the context's pc.
    pub(crate) fn step(&mut self) -> Result<OpcodeResult, VMError> {
        let program = self.program;
        let pc = self.ctx.pc;
        let op = program
            .code
            .get(pc)
            .ok_or(InternalError::PcOutOfRange { pc })?;
        match op {
            Opcode::Push(constant) => self.op_push(constant),
            Opcode::Pop => self.op_pop(),
            Opcode::Dup => self.op_dup(),
            Opcode::Move(depth) => self.op_move(*depth),
            Opcode::Split => self.op_split(),
            Opcode::Cut => self.op_cut(),
            Opcode::LoadVar(name) => self.op_load_var(name.as_ref()),
            Opcode::StoreVar(name) => self.op_store_var(name.as_ref()),
            Opcode::DelVar(name) => self.op_del_var(name.as_ref()),
            Opcode::PushAddress(name) => self.op_push_address(name),
            Opcode::Address(count) => self.op_address(*count),
            Opcode::Load(name) => self.op_load(name.as_ref()),
            Opcode::Store(name) => self.op_store(name.as_ref()),
            Opcode::Del(name) => self.op_del(name.as_ref()),
            Opcode::Stop(name) => self.op_stop(name.as_ref()),
            Opcode::Continue => self.op_continue(),
            Opcode::Jump(target) => self.op_jump(*target),
            Opcode::JumpCond(cond, target) => self.op_jump_cond(cond, *target),
            Opcode::Set => self.op_set(),
            Opcode::Dict => self.op_dict(),
            Opcode::Nary(op, arity) => self.op_nary(*op, *arity),
            Opcode::Apply => self.op_apply(),
            Opcode::Frame { name, args } => self.op_frame(name, args),
            Opcode::Return => self.op_return(),
            Opcode::Spawn => self.op_spawn(),
            Opcode::Trap => self.op_trap(),
            Opcode::Go => self.op_go(),
            Opcode::AtomicInc => self.op_atomic_inc(),
            Opcode::AtomicDec => self.op_atomic_dec(),
            Opcode::Choose => self.op_choose(),
            Opcode::Assert(has_expr) => self.op_assert(*has_expr),
        }
    }

    pub(crate) fn peek(&self) -> Option<&Opcode> {
        self.program.code.get(self.ctx.pc)
    }

    /// Push an interrupt frame for the armed trap and jump to its handler.
    fn fire_trap(&mut self) -> Result<(), InternalError> {
        let (method, arg) = self.ctx.trap.clone().ok_or(InternalError::NoTrap)?;
        self.ctx.push(Value::Pc(self.ctx.pc));
        self.ctx.push(Value::Atom(atoms::INTERRUPT.clone()));
        self.ctx.push(arg);
        self.ctx.pc = method;
        self.ctx.interruptable = false;
        self.steps.push(Microstep {
            pc: None,
            choice: None,
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::opcodes::NaryOp;
    use crate::program::Program;

    fn init_ctx() -> Arc<Context> {
        let mut ctx = Context::new(
            Context::make_nametag(&atoms::INIT, Value::novalue()),
            0,
        );
        ctx.atomic = 1;
        Arc::new(ctx)
    }

    fn run(code: Vec<Opcode>) -> MacroStep {
        let program = Program::new(code);
        let mut state = GlobalState::new();
        let ctx = init_ctx();
        state.add(ctx.clone());
        VM::new(&program, &state, ctx)
            .execute(None, false)
            .unwrap()
    }

    #[test]
    fn init_runs_to_termination() {
        let step = run(vec![
            Opcode::Push(Value::int(3)),
            Opcode::Push(Value::int(4)),
            Opcode::Nary(NaryOp::Plus, 2),
            Opcode::Store(Some(Arc::from("x"))),
            Opcode::Return,
        ]);
        assert!(step.ctx.terminated);
        assert!(!step.state.initializing);
        assert!(step.state.ctxbag.is_empty());
        assert_eq!(
            step.state.iget(&[Value::atom("x")]).unwrap(),
            Value::int(7)
        );
        assert_eq!(step.steps.len(), 5);
    }

    #[test]
    fn assertion_failure_is_recorded_not_thrown() {
        let step = run(vec![
            Opcode::Push(Value::Bool(false)),
            Opcode::Assert(false),
            Opcode::Return,
        ]);
        assert_eq!(
            step.ctx.failure.as_deref(),
            Some("Harmony Assertion failed")
        );
        assert!(!step.ctx.terminated);
    }

    #[test]
    fn singleton_choose_resolves_inline() {
        let step = run(vec![
            Opcode::Push(Value::set(crate::value::Set::from_members([Value::int(9)]))),
            Opcode::Choose,
            Opcode::Store(Some(Arc::from("x"))),
            Opcode::Return,
        ]);
        assert!(step.ctx.terminated);
        assert_eq!(
            step.state.iget(&[Value::atom("x")]).unwrap(),
            Value::int(9)
        );
        // the choose microstep carries the chosen value
        assert_eq!(step.steps[1].choice, Some(Value::int(9)));
    }

    #[test]
    fn multiway_choose_suspends_the_macro_step() {
        let step = run(vec![
            Opcode::Push(Value::set(crate::value::Set::from_members([
                Value::int(1),
                Value::int(2),
            ]))),
            Opcode::Choose,
            Opcode::Return,
        ]);
        let choosing = step.state.choosing.clone().unwrap();
        assert_eq!(choosing.pc, 1);
        assert!(step.state.ctxbag.contains(&choosing));
    }

    #[test]
    fn infinite_loop_guard_trips() {
        let step = run(vec![Opcode::Jump(0), Opcode::Return]);
        assert_eq!(step.ctx.failure.as_deref(), Some("infinite loop"));
    }

    #[test]
    fn method_call_restores_the_caller_frame() {
        // __init__: x = double(21)
        let step = run(vec![
            Opcode::Push(Value::int(21)),
            Opcode::Push(Value::Pc(5)),
            Opcode::Apply,
            Opcode::Store(Some(Arc::from("x"))),
            Opcode::Return,
            Opcode::Frame {
                name: Arc::from("double"),
                args: vec![Arc::from("n")],
            },
            Opcode::LoadVar(Some(Arc::from("n"))),
            Opcode::Push(Value::int(2)),
            Opcode::Nary(NaryOp::Times, 2),
            Opcode::StoreVar(Some(Arc::from("result"))),
            Opcode::Return,
        ]);
        assert!(step.ctx.terminated);
        assert_eq!(
            step.state.iget(&[Value::atom("x")]).unwrap(),
            Value::int(42)
        );
    }

    #[test]
    fn argument_count_mismatch_fails_the_context() {
        let step = run(vec![
            Opcode::Push(Value::int(7)),
            Opcode::Push(Value::Pc(4)),
            Opcode::Apply,
            Opcode::Return,
            Opcode::Frame {
                name: Arc::from("two"),
                args: vec![Arc::from("a"), Arc::from("b")],
            },
            Opcode::Return,
        ]);
        let failure = step.ctx.failure.as_deref().unwrap();
        assert!(failure.contains("argument count mismatch"));
        assert!(failure.contains("expected 2"));
    }

    #[test]
    fn spawn_to_a_non_method_fails() {
        let step = run(vec![
            Opcode::Push(Value::int(3)), // tag
            Opcode::Push(Value::novalue()),
            Opcode::Push(Value::Pc(4)), // Return, not a Frame
            Opcode::Spawn,
            Opcode::Return,
            Opcode::Frame {
                name: Arc::from("worker"),
                args: vec![],
            },
            Opcode::Return,
        ]);
        assert!(step.ctx.failure.is_some());
    }

    #[test]
    fn spawn_targets_a_frame() {
        let step = run(vec![
            Opcode::Push(Value::int(3)), // tag
            Opcode::Push(Value::novalue()),
            Opcode::Push(Value::Pc(5)),
            Opcode::Spawn,
            Opcode::Return,
            Opcode::Frame {
                name: Arc::from("worker"),
                args: vec![],
            },
            Opcode::Return,
        ]);
        assert!(step.ctx.terminated, "{:?}", step.ctx.failure);
        let spawned = step.state.ctxbag.contexts().next().unwrap();
        assert_eq!(spawned.pc, 5);
        assert_eq!(spawned.nametag_string(), "worker/3");
        assert_eq!(
            spawned.stack,
            vec![Value::Atom(Arc::from("process")), Value::novalue()]
        );
    }

    #[test]
    fn microstep_count_before_loop_detection_is_bounded() {
        let step = run(vec![Opcode::Jump(0), Opcode::Return]);
        // one warm-up pass of LOOP_GUARD steps, then one revisit
        assert!(step.steps.len() <= LOOP_GUARD + 3);
    }
}
