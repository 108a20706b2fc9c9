pub mod chunk;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod stack_check_error;

pub use chunk::Chunk;
pub use ir::{Function, Module};
pub use op::{OpCode, OperandKind, Word};
