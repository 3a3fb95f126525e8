use crate::errors::{Failure, InternalError, OpcodeResult, VMError};
use crate::value::{AtomStr, Dict, Number, Value, atoms};
use crate::vm::VM;

// Control flow and the calling convention (9)
// Opcodes: Jump, JumpCond, Choose, Assert, Apply, Frame, Return,
//          AtomicInc, AtomicDec

impl<'a> VM<'a> {
    pub fn op_jump(&mut self, target: usize) -> Result<OpcodeResult, VMError> {
        self.ctx.pc = target;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_jump_cond(&mut self, cond: &Value, target: usize) -> Result<OpcodeResult, VMError> {
        let v = self.ctx.pop()?;
        if v == *cond {
            self.ctx.pc = target;
        } else {
            self.ctx.pc += 1;
        }
        Ok(OpcodeResult::Continue)
    }

    /// Resolve a choice. The executor (or the explorer, for multi-way
    /// choices) supplies the chosen value; without one this must be a
    /// singleton, which is the only form constant evaluation accepts.
    pub fn op_choose(&mut self) -> Result<OpcodeResult, VMError> {
        match self.choice.take() {
            Some(choice) => self.ctx.set_top(choice)?,
            None => {
                let v = self.ctx.pop()?;
                let set = v.as_set().ok_or(Failure::ChooseBadOperand)?;
                match set.cut() {
                    Some((only, rest)) if rest.is_empty() => self.ctx.push(only),
                    _ => return Err(Failure::ChooseBadOperand.into()),
                }
            }
        }
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_assert(&mut self, has_expr: bool) -> Result<OpcodeResult, VMError> {
        let expr = if has_expr {
            Some(self.ctx.pop()?)
        } else {
            None
        };
        let cond = self.ctx.pop()?;
        let holds = cond.as_bool().ok_or_else(|| Failure::AssertionOperand {
            found: cond.to_string(),
        })?;
        if !holds {
            return Err(Failure::AssertionFailed {
                expr: expr.map(|e| e.to_string()),
            }
            .into());
        }
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Dictionary lookup, or a method call when the applied value is a
    /// program counter.
    pub fn op_apply(&mut self) -> Result<OpcodeResult, VMError> {
        let callee = self.ctx.pop()?;
        let arg = self.ctx.pop()?;
        match callee {
            Value::Dict(d) => {
                let value = d.get(&arg).cloned().ok_or_else(|| Failure::NoSuchEntry {
                    index: arg.to_string(),
                })?;
                self.ctx.push(value);
                self.ctx.pc += 1;
            }
            Value::Pc(method) => {
                self.ctx.push(Value::Pc(self.ctx.pc + 1));
                self.ctx.push(Value::Atom(atoms::NORMAL.clone()));
                self.ctx.push(arg);
                self.ctx.pc = method;
            }
            other => {
                return Err(Failure::NotCallable {
                    found: other.to_string(),
                }
                .into());
            }
        }
        Ok(OpcodeResult::Continue)
    }

    /// Method prologue: save the caller's locals and frame pointer, then
    /// bind the argument(s). The popped argument is pushed back before the
    /// saved state so traces show what the method was called with.
    pub fn op_frame(&mut self, name: &AtomStr, args: &[AtomStr]) -> Result<OpcodeResult, VMError> {
        let arg = self.ctx.pop()?;
        self.ctx.push(arg.clone());
        self.ctx.push(self.ctx.vars.clone());
        self.ctx.push(Value::int(self.ctx.fp as i64));
        self.ctx.fp = self.ctx.stack.len();

        if args.len() != 1 {
            let matching = arg.as_dict().is_some_and(|d| d.len() == args.len());
            if !matching {
                let found = match arg.as_dict() {
                    Some(d) => d.len().to_string(),
                    None => "1".to_string(),
                };
                return Err(Failure::ArgumentMismatch {
                    method: name.to_string(),
                    expected: args.len(),
                    found,
                }
                .into());
            }
        }

        let mut vars = Dict::from_entries([(
            Value::Atom(atoms::RESULT.clone()),
            Value::novalue(),
        )]);
        match args {
            [] => {}
            [only] => vars.insert(Value::Atom(only.clone()), arg),
            _ => {
                for (i, formal) in args.iter().enumerate() {
                    let actual = arg.iget(&[Value::int(i as i64)])?;
                    vars.insert(Value::Atom(formal.clone()), actual);
                }
            }
        }
        self.ctx.vars = Value::dict(vars);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Method epilogue. An empty stack means the initial process is
    /// ending; otherwise the saved frame is restored and the call type
    /// decides what happens to the result.
    pub fn op_return(&mut self) -> Result<OpcodeResult, VMError> {
        if self.ctx.stack.is_empty() {
            self.ctx.terminated = true;
            return Ok(OpcodeResult::Yield);
        }

        let result = self.ctx.get(&atoms::RESULT)?;

        let fp = self.ctx.pop()?;
        self.ctx.fp = match fp {
            Value::Int(Number::Finite(n)) if n >= 0 => n as usize,
            _ => return Err(InternalError::CorruptStack("frame pointer").into()),
        };

        let vars = self.ctx.pop()?;
        if vars.as_dict().is_none() {
            return Err(InternalError::CorruptStack("saved locals").into());
        }
        self.ctx.vars = vars;

        self.ctx.pop()?; // argument copy kept for traces

        let calltype = self.ctx.pop()?;
        let calltype = calltype
            .as_atom()
            .ok_or(InternalError::CorruptStack("call type"))?;
        if *calltype == *atoms::NORMAL {
            let ret = self.ctx.pop()?;
            self.ctx.pc = ret
                .as_pc()
                .ok_or(InternalError::CorruptStack("return address"))?;
            self.ctx.push(result);
            Ok(OpcodeResult::Continue)
        } else if *calltype == *atoms::INTERRUPT {
            let ret = self.ctx.pop()?;
            self.ctx.pc = ret
                .as_pc()
                .ok_or(InternalError::CorruptStack("return address"))?;
            Ok(OpcodeResult::Continue)
        } else if *calltype == *atoms::PROCESS {
            self.ctx.terminated = true;
            Ok(OpcodeResult::Yield)
        } else {
            Err(InternalError::CorruptStack("unknown call type").into())
        }
    }

    pub fn op_atomic_inc(&mut self) -> Result<OpcodeResult, VMError> {
        self.ctx.atomic += 1;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_atomic_dec(&mut self) -> Result<OpcodeResult, VMError> {
        if self.ctx.atomic == 0 {
            return Err(InternalError::UnbalancedAtomic { pc: self.ctx.pc }.into());
        }
        self.ctx.atomic -= 1;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }
}
