//! wis: the bytecode core of the wis language.
//!
//! [`bytecode`] holds the instruction encoding, chunks, modules and the
//! disassembler; [`runtime`] holds the stack virtual machine that executes
//! them; [`lang`] holds the value type shared by both.

pub mod bytecode;
pub mod lang;
pub mod runtime;

pub use bytecode::{Chunk, Function, Module, OpCode};
pub use lang::value::Value;
pub use runtime::{ExecutionState, RuntimeError, VmBc, VmBcConfig};
