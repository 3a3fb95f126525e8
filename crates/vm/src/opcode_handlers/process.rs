use std::sync::Arc;

use crate::context::Context;
use crate::errors::{Failure, OpcodeResult, VMError};
use crate::opcodes::Opcode;
use crate::value::{AtomStr, Value, atoms};
use crate::vm::VM;

// Process management (3)
// Opcodes: Spawn, Trap, Go

impl<'a> VM<'a> {
    /// Look up the method prologue at `pc`, which names the process or
    /// handler being entered.
    fn method_name(&self, pc: usize) -> Result<AtomStr, Failure> {
        match self.program.code.get(pc) {
            Some(Opcode::Frame { name, .. }) => Ok(name.clone()),
            _ => Err(Failure::NotAMethod { pc }),
        }
    }

    /// Pop a method, argument and tag; add a fresh process context whose
    /// stack carries the `process` call type, so its final `Return`
    /// terminates it.
    pub fn op_spawn(&mut self) -> Result<OpcodeResult, VMError> {
        let method = self.ctx.pop()?;
        let method = method.as_pc().ok_or_else(|| Failure::UnexpectedType {
            expected: "program counter",
            found: method.to_string(),
        })?;
        let arg = self.ctx.pop()?;
        let tag = self.ctx.pop()?;
        let name = self.method_name(method)?;

        let mut spawned = Context::new(Context::make_nametag(&name, tag), method);
        spawned.push(Value::Atom(atoms::PROCESS.clone()));
        spawned.push(arg);
        self.state.add(Arc::new(spawned));

        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop a method and argument; arm the interrupt trap and make the
    /// context interruptable.
    pub fn op_trap(&mut self) -> Result<OpcodeResult, VMError> {
        let method = self.ctx.pop()?;
        let method = method.as_pc().ok_or_else(|| Failure::UnexpectedType {
            expected: "program counter",
            found: method.to_string(),
        })?;
        let arg = self.ctx.pop()?;
        self.method_name(method)?;

        self.ctx.trap = Some((method, arg));
        self.ctx.interruptable = true;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop a stopped context and a result; put a resumed copy of the
    /// context, with the result pushed, back among the running processes.
    pub fn op_go(&mut self) -> Result<OpcodeResult, VMError> {
        let v = self.ctx.pop()?;
        let parked = v.as_context().ok_or_else(|| Failure::NotAContext {
            found: v.to_string(),
        })?;
        let result = self.ctx.pop()?;

        self.state.stopbag.remove_if_present(parked);

        let mut resumed = (**parked).clone();
        resumed.push(result);
        resumed.stopped = false;
        self.state.add(Arc::new(resumed));

        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }
}
