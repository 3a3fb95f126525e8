use crate::errors::{Failure, InternalError, OpcodeResult, VMError};
use crate::opcodes::NaryOp;
use crate::value::{Dict, Number, Set, Value, content_hash};
use crate::vm::VM;

// The n-ary operator table (one opcode, many operators)

/// Render popped operands for a type-mismatch message, in source order.
fn operands_string(popped: &[Value]) -> String {
    let mut parts: Vec<String> = popped.iter().map(|v| v.to_string()).collect();
    parts.reverse();
    format!("[{}]", parts.join(", "))
}

fn mismatch(op: NaryOp, popped: &[Value]) -> VMError {
    Failure::OperandMismatch {
        op: op.to_string(),
        operands: operands_string(popped),
    }
    .into()
}

impl<'a> VM<'a> {
    pub fn op_nary(&mut self, op: NaryOp, arity: usize) -> Result<OpcodeResult, VMError> {
        let result = match arity {
            1 => self.eval_unary(op),
            2 if !matches!(op, NaryOp::Plus | NaryOp::Times) => self.eval_binary(op),
            _ => self.eval_variadic(op, arity),
        }?;
        self.ctx.push(result);
        self.ctx.pc += 1;
        Ok(OpcodeResult::Continue)
    }

    /// Fold `+` or `*` over the operands, accumulating from the last
    /// operand backwards so list concatenation keeps source order.
    fn eval_variadic(&mut self, op: NaryOp, arity: usize) -> Result<Value, VMError> {
        if arity < 2 || !matches!(op, NaryOp::Plus | NaryOp::Times) {
            return Err(InternalError::BadArity {
                op: op.to_string(),
                arity,
            }
            .into());
        }
        let mut acc = self.ctx.pop()?;
        for _ in 1..arity {
            let earlier = self.ctx.pop()?;
            let pair = [acc.clone(), earlier.clone()];
            acc = match op {
                NaryOp::Plus => match (&earlier, &acc) {
                    (Value::Int(a), Value::Int(b)) => a
                        .checked_add(*b)
                        .map(Value::Int)
                        .ok_or(Failure::IntegerOverflow)?,
                    (Value::Set(a), Value::Set(b)) => Value::set(a.union(b)),
                    (Value::Dict(a), Value::Dict(b)) => Value::dict(a.concat(b)),
                    _ => return Err(mismatch(op, &pair)),
                },
                _ => match (&earlier, &acc) {
                    (Value::Int(a), Value::Int(b)) => a
                        .checked_mul(*b)
                        .map(Value::Int)
                        .ok_or(Failure::IntegerOverflow)?,
                    (Value::Set(a), Value::Set(b)) => Value::set(a.intersection(b)),
                    _ => return Err(mismatch(op, &pair)),
                },
            };
        }
        Ok(acc)
    }

    fn eval_unary(&mut self, op: NaryOp) -> Result<Value, VMError> {
        let e = self.ctx.pop()?;
        let popped = std::slice::from_ref(&e);
        match op {
            NaryOp::Minus => {
                let n = e.as_number().ok_or_else(|| mismatch(op, popped))?;
                Ok(Value::Int(n.checked_neg().ok_or(Failure::IntegerOverflow)?))
            }
            NaryOp::Not => {
                let b = e.as_bool().ok_or_else(|| mismatch(op, popped))?;
                Ok(Value::Bool(!b))
            }
            NaryOp::Cardinality => {
                let s = e.as_set().ok_or_else(|| mismatch(op, popped))?;
                Ok(Value::int(s.len() as i64))
            }
            NaryOp::Min => {
                let s = e.as_set().ok_or_else(|| mismatch(op, popped))?;
                s.min().cloned().ok_or_else(|| {
                    Failure::UnexpectedType {
                        expected: "non-empty set",
                        found: e.to_string(),
                    }
                    .into()
                })
            }
            NaryOp::Max => {
                let s = e.as_set().ok_or_else(|| mismatch(op, popped))?;
                s.max().cloned().ok_or_else(|| {
                    Failure::UnexpectedType {
                        expected: "non-empty set",
                        found: e.to_string(),
                    }
                    .into()
                })
            }
            NaryOp::Len => {
                let d = e.as_dict().ok_or_else(|| mismatch(op, popped))?;
                Ok(Value::int(d.len() as i64))
            }
            NaryOp::Keys => {
                let d = e.as_dict().ok_or_else(|| mismatch(op, popped))?;
                Ok(Value::set(Set::from_members(d.keys().cloned())))
            }
            NaryOp::BagSize => {
                let d = e.as_dict().ok_or_else(|| mismatch(op, popped))?;
                let mut total: i64 = 0;
                for count in d.values() {
                    let n = count
                        .as_number()
                        .and_then(Number::as_finite)
                        .ok_or_else(|| mismatch(op, popped))?;
                    total = total.checked_add(n).ok_or(Failure::IntegerOverflow)?;
                }
                Ok(Value::int(total))
            }
            NaryOp::Hash => Ok(Value::int(content_hash(&e) as i64)),
            NaryOp::Nametag => {
                if !e.is_novalue() {
                    return Err(mismatch(op, popped));
                }
                Ok(self.ctx.nametag.clone())
            }
            NaryOp::Processes => {
                if !e.is_novalue() {
                    return Err(mismatch(op, popped));
                }
                self.require_atomic(op)?;
                let mut tally = Dict::new();
                for (ctx, count) in self.state.ctxbag.iter() {
                    add_count(&mut tally, ctx.nametag.clone(), count)?;
                }
                Ok(Value::dict(tally))
            }
            NaryOp::AtLabel => {
                let label = e.as_atom().ok_or_else(|| mismatch(op, popped))?.clone();
                self.require_atomic(op)?;
                let pc = self
                    .program
                    .labels
                    .get(label.as_ref())
                    .copied()
                    .ok_or_else(|| Failure::UnknownLabel {
                        label: label.to_string(),
                    })?;
                let mut tally = Dict::new();
                for (ctx, count) in self.state.ctxbag.iter() {
                    if ctx.pc == pc {
                        add_count(&mut tally, ctx.nametag.clone(), count)?;
                    }
                }
                Ok(Value::dict(tally))
            }
            _ => Err(InternalError::BadArity {
                op: op.to_string(),
                arity: 1,
            }
            .into()),
        }
    }

    fn eval_binary(&mut self, op: NaryOp) -> Result<Value, VMError> {
        let e2 = self.ctx.pop()?;
        let e1 = self.ctx.pop()?;
        let popped = [e2.clone(), e1.clone()];
        match op {
            NaryOp::Eq => Ok(Value::Bool(e1 == e2)),
            NaryOp::Ne => Ok(Value::Bool(e1 != e2)),
            NaryOp::Lt => Ok(Value::Bool(e1 < e2)),
            NaryOp::Le => Ok(Value::Bool(e1 <= e2)),
            NaryOp::Gt => Ok(Value::Bool(e1 > e2)),
            NaryOp::Ge => Ok(Value::Bool(e1 >= e2)),
            NaryOp::Minus => match (&e1, &e2) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(
                    a.checked_sub(*b).ok_or(Failure::IntegerOverflow)?,
                )),
                (Value::Set(a), Value::Set(b)) => Ok(Value::set(a.difference(b))),
                _ => Err(mismatch(op, &popped)),
            },
            NaryOp::Div => {
                let a = e1.as_number().ok_or_else(|| mismatch(op, &popped))?;
                let b = e2.as_number().ok_or_else(|| mismatch(op, &popped))?;
                Ok(Value::Int(a.floor_div(b)?))
            }
            NaryOp::Mod => {
                let a = e1.as_number().ok_or_else(|| mismatch(op, &popped))?;
                let b = e2.as_number().ok_or_else(|| mismatch(op, &popped))?;
                Ok(Value::Int(a.floor_mod(b)?))
            }
            NaryOp::Range => {
                let lo = e1
                    .as_number()
                    .and_then(Number::as_finite)
                    .ok_or_else(|| mismatch(op, &popped))?;
                let hi = e2
                    .as_number()
                    .and_then(Number::as_finite)
                    .ok_or_else(|| mismatch(op, &popped))?;
                Ok(Value::set(Set::from_members(
                    (lo..=hi).map(Value::int),
                )))
            }
            NaryOp::In => {
                let s = e2.as_set().ok_or_else(|| mismatch(op, &popped))?;
                Ok(Value::Bool(s.contains(&e1)))
            }
            _ => Err(InternalError::BadArity {
                op: op.to_string(),
                arity: 2,
            }
            .into()),
        }
    }

    /// `processes` and `atLabel` inspect the context bag and are only
    /// meaningful when no other process can be mid-step.
    fn require_atomic(&self, op: NaryOp) -> Result<(), Failure> {
        if self.ctx.atomic == 0 {
            return Err(Failure::NotInAtomicBlock { op: op.to_string() });
        }
        Ok(())
    }
}

fn add_count(tally: &mut Dict, key: Value, count: u32) -> Result<(), Failure> {
    let existing = tally
        .get(&key)
        .and_then(Value::as_number)
        .and_then(Number::as_finite)
        .unwrap_or(0);
    let total = existing
        .checked_add(count as i64)
        .ok_or(Failure::IntegerOverflow)?;
    tally.insert(key, Value::int(total));
    Ok(())
}
