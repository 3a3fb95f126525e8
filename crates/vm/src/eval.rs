//! Compile-time constant evaluation.
//!
//! A named constant arrives as a closed code slice. It runs on the same VM
//! as the model itself, in a fresh global state with a single atomic
//! context, until the pc falls off the end of the slice; the single value
//! left on the stack is the constant. A failure, a stop, a multi-way
//! choice or divergence is a compile error.

use std::sync::Arc;

use crate::context::Context;
use crate::errors::{CompileError, VMError};
use crate::opcodes::Opcode;
use crate::program::Program;
use crate::state::GlobalState;
use crate::value::{Value, atoms};
use crate::vm::VM;

/// Cap on evaluation length, since constant slices carry no loop guard.
const EVAL_STEP_LIMIT: usize = 1_000_000;

pub fn eval_constant(
    code: Vec<Opcode>,
    name: &str,
    filename: &str,
) -> Result<Value, CompileError> {
    let program = Program::new(code);
    let mut state = GlobalState::new();
    let mut ctx = Context::new(
        Context::make_nametag(&atoms::CONST, Value::novalue()),
        0,
    );
    ctx.atomic = 1;
    let ctx = Arc::new(ctx);
    state.add(ctx.clone());

    let mut vm = VM::new(&program, &state, ctx);
    let mut steps = 0usize;
    while vm.ctx.pc != program.code.len() {
        if vm.ctx.terminated || vm.ctx.stopped {
            return Err(CompileError::new(
                filename,
                format!("constant {name}: evaluation did not run to completion"),
            ));
        }
        match vm.step() {
            Ok(_) => {}
            Err(VMError::Failure(failure)) => {
                return Err(CompileError::new(
                    filename,
                    format!("constant {name}: {failure}"),
                ));
            }
            Err(VMError::Internal(err)) => {
                return Err(CompileError::new(filename, format!("constant {name}: {err}")));
            }
        }
        steps += 1;
        if steps > EVAL_STEP_LIMIT {
            return Err(CompileError::new(
                filename,
                format!("constant {name}: evaluation does not terminate"),
            ));
        }
    }

    match vm.ctx.stack.pop() {
        Some(value) => Ok(value),
        None => Err(CompileError::new(
            filename,
            format!("constant {name}: evaluation leaves no value"),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::opcodes::NaryOp;
    use crate::value::Set;

    #[test]
    fn arithmetic_slice() {
        let value = eval_constant(
            vec![
                Opcode::Push(Value::int(6)),
                Opcode::Push(Value::int(7)),
                Opcode::Nary(NaryOp::Times, 2),
            ],
            "N",
            "t",
        )
        .unwrap();
        assert_eq!(value, Value::int(42));
    }

    #[test]
    fn singleton_choose_is_allowed() {
        let value = eval_constant(
            vec![
                Opcode::Push(Value::set(Set::from_members([Value::int(4)]))),
                Opcode::Choose,
            ],
            "N",
            "t",
        )
        .unwrap();
        assert_eq!(value, Value::int(4));
    }

    #[test]
    fn failures_become_compile_errors() {
        let err = eval_constant(
            vec![
                Opcode::Push(Value::int(1)),
                Opcode::Push(Value::int(0)),
                Opcode::Nary(NaryOp::Div, 2),
            ],
            "N",
            "t",
        )
        .unwrap_err();
        assert!(err.message.contains("division by zero"));
    }

    #[test]
    fn divergence_is_reported() {
        let err = eval_constant(vec![Opcode::Jump(0)], "N", "t").unwrap_err();
        assert!(err.message.contains("N"));
    }
}
