use crate::bytecode::Chunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic prefix of a serialized module file.
pub const MODULE_MAGIC: &[u8; 4] = b"WISB";

/// A compiled module: top-level code plus the functions it defines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,

    /// Entry chunk. Its locals double as the module's globals.
    pub top_level: Chunk,

    /// Function table, indexed by the `LOAD_FUNCTION` operand.
    pub functions: Vec<Function>,
}

/// A compiled user function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Number of arguments; they become locals `0..arity` of the callee.
    pub arity: usize,
    pub code: Chunk,
}

#[derive(Debug, Error)]
pub enum ModuleFormatError {
    #[error("not a wis module (bad magic)")]
    BadMagic,
    #[error("malformed module payload: {0}")]
    Payload(#[from] postcard::Error),
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Register a function and return its index in the function table.
    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    pub fn function(&self, index: usize) -> Option<&Function> {
        self.functions.get(index)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModuleFormatError> {
        let mut bytes = MODULE_MAGIC.to_vec();
        bytes.extend(postcard::to_allocvec(self)?);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModuleFormatError> {
        let payload = bytes
            .strip_prefix(MODULE_MAGIC.as_slice())
            .ok_or(ModuleFormatError::BadMagic)?;
        Ok(postcard::from_bytes(payload)?)
    }
}

impl Function {
    pub fn new(name: impl Into<String>, arity: usize, code: Chunk) -> Self {
        Self {
            name: name.into(),
            arity,
            code,
        }
    }
}
