use crate::context::snapshot;
use crate::errors::{Failure, InternalError, OpcodeResult, VMError};
use crate::opcodes::Opcode;
use crate::value::{AtomStr, Value};
use crate::vm::VM;

// Variable access, local and shared (10)
// Opcodes: LoadVar, StoreVar, DelVar, PushAddress, Address,
//          Load, Store, Del, Stop, Continue

impl<'a> VM<'a> {
    /// Pop an address value and return its non-empty index path.
    fn pop_address(&mut self) -> Result<Vec<Value>, VMError> {
        let v = self.ctx.pop()?;
        match v.as_address() {
            Some(path) if !path.is_empty() => Ok(path.to_vec()),
            _ => Err(Failure::NotAnAddress {
                found: v.to_string(),
            }
            .into()),
        }
    }

    fn root_name(path: &[Value]) -> String {
        match path.first() {
            Some(Value::Atom(a)) => a.to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Enforce the initialization rule for shared-variable writes: once the
    /// initial process has finished, the root variable must already exist.
    fn check_shared_root(&self, path: &[Value]) -> Result<(), Failure> {
        let root = path.first().cloned().unwrap_or_else(Value::novalue);
        if !self.state.initializing && !self.state.declared(&root) {
            return Err(Failure::UninitializedVariable {
                name: Self::root_name(path),
            });
        }
        Ok(())
    }

    pub fn op_load_var(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let value = match name {
            Some(name) => self.ctx.get(name)?,
            None => {
                let path = self.pop_address()?;
                self.ctx.iget(&path)?
            }
        };
        self.ctx.push(value);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_store_var(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let value = self.ctx.pop()?;
        match name {
            Some(name) => {
                let path = [Value::Atom(name.clone())];
                self.ctx.set(&path, value)?;
            }
            None => {
                let path = self.pop_address()?;
                self.ctx.set(&path, value)?;
            }
        }
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_del_var(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        match name {
            Some(name) => {
                let path = [Value::Atom(name.clone())];
                self.ctx.delete(&path)?;
            }
            None => {
                let path = self.pop_address()?;
                self.ctx.delete(&path)?;
            }
        }
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_push_address(&mut self, name: &AtomStr) -> Result<OpcodeResult, VMError> {
        self.ctx
            .push(Value::address(vec![Value::Atom(name.clone())]));
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop `count` values; the bottom one is a base address which the
    /// remaining values extend in order.
    pub fn op_address(&mut self, count: usize) -> Result<OpcodeResult, VMError> {
        let mut indexes = Vec::with_capacity(count);
        for _ in 0..count {
            indexes.push(self.ctx.pop()?);
        }
        indexes.reverse();
        let (base, tail) = indexes.split_first().ok_or(InternalError::BadStackIndex {
            pc: self.ctx.pc,
            index: count,
        })?;
        let mut path = match base.as_address() {
            Some(path) => path.to_vec(),
            None => {
                return Err(Failure::NotAnAddress {
                    found: base.to_string(),
                }
                .into());
            }
        };
        path.extend(tail.iter().cloned());
        self.ctx.push(Value::address(path));
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_load(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let value = match name {
            Some(name) => {
                let key = Value::Atom(name.clone());
                if !self.state.declared(&key) {
                    return Err(Failure::UnknownVariable {
                        name: name.to_string(),
                    }
                    .into());
                }
                self.state.iget(&[key])?
            }
            None => {
                let path = self.pop_address()?;
                self.state.iget(&path)?
            }
        };
        self.ctx.push(value);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_store(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let value = self.ctx.pop()?;
        let path = match name {
            Some(name) => vec![Value::Atom(name.clone())],
            None => self.pop_address()?,
        };
        self.check_shared_root(&path)?;
        self.state.set(&path, value)?;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_del(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let path = match name {
            Some(name) => vec![Value::Atom(name.clone())],
            None => self.pop_address()?,
        };
        self.check_shared_root(&path)?;
        self.state.delete(&path)?;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Park this context at a list-valued shared variable. The stored
    /// snapshot has `stopped` set and its pc on the following `Continue`,
    /// which is where a later `Go` resumes it.
    pub fn op_stop(&mut self, name: Option<&AtomStr>) -> Result<OpcodeResult, VMError> {
        let path = match name {
            Some(name) => vec![Value::Atom(name.clone())],
            None => self.pop_address()?,
        };
        self.check_shared_root(&path)?;

        self.ctx.stopped = true;
        self.ctx.pc += 1;
        if !matches!(self.peek(), Some(Opcode::Continue)) {
            return Err(InternalError::StopWithoutContinue {
                pc: self.ctx.pc - 1,
            }
            .into());
        }

        let parked = snapshot(&self.ctx);
        self.state.stop(&path, parked)?;
        Ok(OpcodeResult::Yield)
    }

    /// No-op marking the resumption point of a `Stop`; always yields.
    pub fn op_continue(&mut self) -> Result<OpcodeResult, VMError> {
        self.ctx.pc += 1;
        Ok(OpcodeResult::Yield)
    }
}
