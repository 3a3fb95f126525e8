use crate::errors::{Failure, InternalError, OpcodeResult, VMError};
use crate::value::{Dict, Number, Set, Value};
use crate::vm::VM;

// Pure stack manipulation (7)
// Opcodes: Push, Pop, Dup, Move, Split, Cut, Set, Dict

impl<'a> VM<'a> {
    pub fn op_push(&mut self, constant: &Value) -> Result<OpcodeResult, VMError> {
        self.ctx.push(constant.clone());
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_pop(&mut self) -> Result<OpcodeResult, VMError> {
        self.ctx.pop()?;
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    pub fn op_dup(&mut self) -> Result<OpcodeResult, VMError> {
        let v = self.ctx.pop()?;
        self.ctx.push(v.clone());
        self.ctx.push(v);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop the value `depth` positions from the top and push it.
    pub fn op_move(&mut self, depth: usize) -> Result<OpcodeResult, VMError> {
        let len = self.ctx.stack.len();
        if depth == 0 || depth > len {
            return Err(InternalError::BadStackIndex {
                pc: self.ctx.pc,
                index: depth,
            }
            .into());
        }
        let v = self.ctx.stack.remove(len - depth);
        self.ctx.push(v);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop a tuple (a list-shaped dict) and push its values in order.
    pub fn op_split(&mut self) -> Result<OpcodeResult, VMError> {
        let v = self.ctx.pop()?;
        let dict = v.as_dict().filter(|d| d.is_list()).ok_or_else(|| {
            Failure::UnexpectedType {
                expected: "tuple",
                found: v.to_string(),
            }
        })?;
        for element in dict.values() {
            self.ctx.push(element.clone());
        }
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop a non-empty set; push its minimum, then the remainder.
    pub fn op_cut(&mut self) -> Result<OpcodeResult, VMError> {
        let v = self.ctx.pop()?;
        let set = v.as_set().ok_or_else(|| Failure::UnexpectedType {
            expected: "set",
            found: v.to_string(),
        })?;
        let (min, rest) = set.cut().ok_or(Failure::UnexpectedType {
            expected: "non-empty set",
            found: "{}".to_string(),
        })?;
        self.ctx.push(min);
        self.ctx.push(Value::set(rest));
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    fn pop_count(&mut self) -> Result<usize, VMError> {
        let v = self.ctx.pop()?;
        match v {
            Value::Int(Number::Finite(n)) if n >= 0 => Ok(n as usize),
            other => Err(Failure::UnexpectedType {
                expected: "non-negative count",
                found: other.to_string(),
            }
            .into()),
        }
    }

    /// Pop a count, then that many values; push a set.
    pub fn op_set(&mut self) -> Result<OpcodeResult, VMError> {
        let count = self.pop_count()?;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            members.push(self.ctx.pop()?);
        }
        self.ctx.push(Value::set(Set::from_members(members)));
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Pop a count, then that many key/value pairs; push a dict.
    pub fn op_dict(&mut self) -> Result<OpcodeResult, VMError> {
        let count = self.pop_count()?;
        let mut dict = Dict::new();
        for _ in 0..count {
            let key = self.ctx.pop()?;
            let value = self.ctx.pop()?;
            dict.insert(key, value);
        }
        self.ctx.push(Value::dict(dict));
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }
}
