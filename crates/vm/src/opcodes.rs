//! The instruction set the surface compiler targets.

use std::fmt;

use strum::{Display as StrumDisplay, EnumString};

use crate::value::{AtomStr, Value};

/// Symbol table of the n-ary operators. The strum serializations are the
/// operator lexemes used by the wire format and the instruction listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
pub enum NaryOp {
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "*")]
    Times,
    /// Unary negation or binary subtraction / set difference, by arity.
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "..")]
    Range,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "cardinality")]
    Cardinality,
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "max")]
    Max,
    #[strum(serialize = "len")]
    Len,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "bagsize")]
    BagSize,
    #[strum(serialize = "hash")]
    Hash,
    #[strum(serialize = "nametag")]
    Nametag,
    #[strum(serialize = "processes")]
    Processes,
    #[strum(serialize = "atLabel")]
    AtLabel,
}

/// One instruction. Operand-carrying variants hold their operands directly;
/// `None` on the variable-addressing opcodes means the address is popped
/// from the stack instead of being named statically.
#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    /// Push a constant.
    Push(Value),
    /// Discard the top of the stack.
    Pop,
    /// Duplicate the top of the stack.
    Dup,
    /// Pop the value at the given depth from the top and push it.
    Move(usize),
    /// Pop a list-valued dict and push its values in key order.
    Split,
    /// Pop a non-empty set; push its minimum, then the remainder.
    Cut,
    /// Push the value of a local variable (or via a popped address).
    LoadVar(Option<AtomStr>),
    /// Pop a value and store it into a local (or via a popped address).
    StoreVar(Option<AtomStr>),
    /// Delete a local variable (or via a popped address).
    DelVar(Option<AtomStr>),
    /// Push the address `[name]` of a shared variable.
    PushAddress(AtomStr),
    /// Pop `n` values; the bottom one is a base address, extended by the
    /// others in order.
    Address(usize),
    /// Push the value of a shared variable (or via a popped address).
    Load(Option<AtomStr>),
    /// Pop a value and write it to a shared variable (or via a popped
    /// address).
    Store(Option<AtomStr>),
    /// Delete a shared variable or subtree.
    Del(Option<AtomStr>),
    /// Park this context at the given address. Must be followed by
    /// `Continue`.
    Stop(Option<AtomStr>),
    /// No-op marking the resumption point of a `Stop`; always a scheduling
    /// point.
    Continue,
    Jump(usize),
    /// Pop a value; jump when it equals the condition constant.
    JumpCond(Value, usize),
    /// Pop a count `n`, then `n` values; push a set.
    Set,
    /// Pop a count `n`, then `n` key/value pairs; push a dict.
    Dict,
    /// Apply an operator of the given arity to popped operands.
    Nary(NaryOp, usize),
    /// Pop `f` and an index/argument: dict lookup, or a method call when
    /// `f` is a program counter.
    Apply,
    /// Method prologue: binds arguments and saves the caller's frame.
    Frame { name: AtomStr, args: Vec<AtomStr> },
    /// Method epilogue; also terminates processes and the initial context.
    Return,
    /// Pop a method, argument and tag; add a fresh process context.
    Spawn,
    /// Pop a method and argument; arm the interrupt trap.
    Trap,
    /// Pop a stopped context and a result; resume the context.
    Go,
    AtomicInc,
    AtomicDec,
    /// Pop a set and push one of its elements. Multi-way choices suspend
    /// the macro step and are resolved by the explorer.
    Choose,
    /// Pop a condition (preceded by a message expression when the flag is
    /// set) and fail when it is false.
    Assert(bool),
}

impl Opcode {
    /// The wire-format mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Push(_) => "Push",
            Opcode::Pop => "Pop",
            Opcode::Dup => "Dup",
            Opcode::Move(_) => "Move",
            Opcode::Split => "Split",
            Opcode::Cut => "Cut",
            Opcode::LoadVar(_) => "LoadVar",
            Opcode::StoreVar(_) => "StoreVar",
            Opcode::DelVar(_) => "DelVar",
            Opcode::PushAddress(_) => "PushAddress",
            Opcode::Address(_) => "Address",
            Opcode::Load(_) => "Load",
            Opcode::Store(_) => "Store",
            Opcode::Del(_) => "Del",
            Opcode::Stop(_) => "Stop",
            Opcode::Continue => "Continue",
            Opcode::Jump(_) => "Jump",
            Opcode::JumpCond(_, _) => "JumpCond",
            Opcode::Set => "Set",
            Opcode::Dict => "Dict",
            Opcode::Nary(_, _) => "Nary",
            Opcode::Apply => "Apply",
            Opcode::Frame { .. } => "Frame",
            Opcode::Return => "Return",
            Opcode::Spawn => "Spawn",
            Opcode::Trap => "Trap",
            Opcode::Go => "Go",
            Opcode::AtomicInc => "AtomicInc",
            Opcode::AtomicDec => "AtomicDec",
            Opcode::Choose => "Choose",
            Opcode::Assert(_) => "Assert",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Push(v) => write!(f, "Push {v}"),
            Opcode::Move(n) => write!(f, "Move {n}"),
            Opcode::LoadVar(Some(name)) => write!(f, "LoadVar {name}"),
            Opcode::StoreVar(Some(name)) => write!(f, "StoreVar {name}"),
            Opcode::DelVar(Some(name)) => write!(f, "DelVar {name}"),
            Opcode::PushAddress(name) => write!(f, "PushAddress {name}"),
            Opcode::Address(n) => write!(f, "Address {n}"),
            Opcode::Load(Some(name)) => write!(f, "Load {name}"),
            Opcode::Store(Some(name)) => write!(f, "Store {name}"),
            Opcode::Del(Some(name)) => write!(f, "Del {name}"),
            Opcode::Stop(Some(name)) => write!(f, "Stop {name}"),
            Opcode::Jump(pc) => write!(f, "Jump {pc}"),
            Opcode::JumpCond(cond, pc) => write!(f, "JumpCond {cond} {pc}"),
            Opcode::Nary(op, n) => write!(f, "{n}-ary {op}"),
            Opcode::Frame { name, args } => {
                write!(f, "Frame {name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Opcode::Assert(true) => write!(f, "Assert2"),
            other => write!(f, "{}", other.mnemonic()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn operator_symbols_round_trip() {
        for op in [
            NaryOp::Plus,
            NaryOp::Range,
            NaryOp::AtLabel,
            NaryOp::Not,
            NaryOp::Le,
        ] {
            assert_eq!(NaryOp::from_str(&op.to_string()).unwrap(), op);
        }
        assert!(NaryOp::from_str("<<").is_err());
    }

    #[test]
    fn listing_format() {
        assert_eq!(Opcode::Push(Value::int(3)).to_string(), "Push 3");
        assert_eq!(Opcode::Load(None).to_string(), "Load");
        assert_eq!(
            Opcode::Load(Some(std::sync::Arc::from("x"))).to_string(),
            "Load x"
        );
        assert_eq!(Opcode::Nary(NaryOp::Plus, 2).to_string(), "2-ary +");
        assert_eq!(
            Opcode::JumpCond(Value::Bool(false), 9).to_string(),
            "JumpCond False 9"
        );
        assert_eq!(Opcode::Assert(false).to_string(), "Assert");
        assert_eq!(Opcode::Assert(true).to_string(), "Assert2");
    }
}
