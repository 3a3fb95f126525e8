use thiserror::Error;

/// A user-level failure of the modeled program.
///
/// Failures are part of the model, not of the host: they are rendered to a
/// message, stored on the failing context, and end the owning macro step.
/// The explorer then tags the resulting state with a `process failure`
/// issue. They are never propagated as host errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("Harmony Assertion failed{}", .expr.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    AssertionFailed { expr: Option<String> },
    #[error("Error: argument to assert must be a boolean: {found}")]
    AssertionOperand { found: String },
    #[error("Error: not an address: {found}")]
    NotAnAddress { found: String },
    #[error("Error: not a dictionary: {found}")]
    NotADictionary { found: String },
    #[error("Error: no entry {index}")]
    NoSuchEntry { index: String },
    #[error("Error: no variable {name}")]
    UnknownVariable { name: String },
    #[error("Error: using an uninitialized shared variable {name}")]
    UninitializedVariable { name: String },
    #[error("Error: no label {label}")]
    UnknownLabel { label: String },
    #[error("Error: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: String,
    },
    #[error("Error: unexpected types in {op} operands: {operands}")]
    OperandMismatch { op: String, operands: String },
    #[error("Error: division by zero")]
    DivisionByZero,
    #[error("Error: integer overflow")]
    IntegerOverflow,
    #[error("not in atomic block: {op}")]
    NotInAtomicBlock { op: String },
    #[error("Error: choose can only be applied to non-empty sets")]
    ChooseBadOperand,
    #[error("Error: must be either a method or a dictionary, got {found}")]
    NotCallable { found: String },
    #[error("Error: pc {pc} is not the start of a method")]
    NotAMethod { pc: usize },
    #[error("Error: expected context value, got {found}")]
    NotAContext { found: String },
    #[error("Error: argument count mismatch {method}: expected {expected} arguments but got {found}")]
    ArgumentMismatch {
        method: String,
        expected: usize,
        found: String,
    },
    #[error("infinite loop")]
    InfiniteLoop,
}

/// A violation of the compiler contract or of the checker's own
/// invariants. Unlike [`Failure`] this is not part of the model: it
/// propagates out of the explorer and aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },
    #[error("pc {pc} out of range")]
    PcOutOfRange { pc: usize },
    #[error("stack element {index} out of range at pc {pc}")]
    BadStackIndex { pc: usize, index: usize },
    #[error("AtomicDec without matching AtomicInc at pc {pc}")]
    UnbalancedAtomic { pc: usize },
    #[error("context missing from bag")]
    BagUnderflow,
    #[error("corrupt call stack: {0}")]
    CorruptStack(&'static str),
    #[error("choosing context has no pending choice")]
    MissingChoice,
    #[error("interrupt fired without an armed trap")]
    NoTrap,
    #[error("{op} operator with arity {arity}")]
    BadArity { op: String, arity: usize },
    #[error("Stop at pc {pc} not followed by Continue")]
    StopWithoutContinue { pc: usize },
}

/// Outcome of a successfully executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeResult {
    /// Keep executing within the current macro step.
    Continue,
    /// The instruction demands a scheduling point (`Continue`, `Stop`,
    /// process termination).
    Yield,
}

/// Error type of a single instruction step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    #[error(transparent)]
    Failure(#[from] Failure),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Error encountered while loading or constant-evaluating a compiled
/// program, before verification starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{filename}:{line}:{column}: {message}")]
pub struct CompileError {
    pub message: String,
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub lexeme: Option<String>,
    pub is_eof: bool,
}

impl CompileError {
    /// A compile error without a useful source position.
    pub fn new(filename: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError {
            message: message.into(),
            filename: filename.into(),
            line: 0,
            column: 0,
            lexeme: None,
            is_eof: false,
        }
    }

    pub fn with_lexeme(mut self, lexeme: impl Into<String>) -> Self {
        self.lexeme = Some(lexeme.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_messages() {
        let plain = Failure::AssertionFailed { expr: None };
        assert_eq!(plain.to_string(), "Harmony Assertion failed");
        let with_expr = Failure::AssertionFailed {
            expr: Some("3".to_string()),
        };
        assert_eq!(with_expr.to_string(), "Harmony Assertion failed: 3");
    }

    #[test]
    fn compile_error_position() {
        let err = CompileError {
            message: "bad opcode".to_string(),
            filename: "prog.json".to_string(),
            line: 4,
            column: 7,
            lexeme: Some("Pusj".to_string()),
            is_eof: false,
        };
        assert_eq!(err.to_string(), "prog.json:4:7: bad opcode");
    }
}
