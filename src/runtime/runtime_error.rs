use crate::bytecode::op::DecodeError;
use thiserror::Error;

/// A condition that aborts execution.
///
/// All of these mean the chunk broke its contract with the VM (or the VM
/// has a bug); none of them is recoverable by the running program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error("cannot divide by zero")]
    DivisionByZero,
    #[error("cannot modulo by zero")]
    ModuloByZero,
    #[error("cannot bitshift by a negative amount ({0})")]
    NegativeShift(i32),
    #[error("stack overflow (capacity {0})")]
    StackOverflow(usize),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("frame stack overflow (capacity {0})")]
    FrameOverflow(usize),
    #[error("no active frame")]
    FrameUnderflow,
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("cannot pop {count} element(s) from a list of length {len}")]
    ListUnderflow { count: i64, len: usize },
    #[error("undefined native function '{0}'")]
    UnknownNative(String),
    #[error("native '{name}' takes {expected} argument(s), stack holds {found}")]
    NativeArity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("native '{name}' failed: {message}")]
    NativeFailed { name: String, message: String },
    #[error("malformed instruction: {0}")]
    MalformedOpcode(#[from] DecodeError),
    #[error("type error: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid slot {0}")]
    InvalidSlot(usize),
    #[error("invalid constant index {0}")]
    InvalidConstant(usize),
    #[error("invalid function index {0}")]
    InvalidFunction(usize),
    #[error("invalid stack depth {0}")]
    InvalidDepth(usize),
    #[error("jump target outside chunk")]
    JumpOutOfBounds,
    #[error("instruction pointer {0} past end of chunk")]
    InstructionOutOfBounds(usize),
    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),
    #[error("no module loaded")]
    NoModule,
}

/// A fault located at the instruction that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub fault: Fault,
    /// Byte offset of the faulting instruction in its chunk.
    pub offset: usize,
    pub line: usize,
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "runtime error: line {} (byte {:#010x}): {}",
            self.line, self.offset, self.fault
        )?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.fault)
    }
}

impl RuntimeError {
    pub fn new(fault: Fault, offset: usize, line: usize) -> Self {
        RuntimeError {
            fault,
            offset,
            line,
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}
