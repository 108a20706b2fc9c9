//! # wis runtime values
//!
//! The value type consumed by the virtual machine and shown by the
//! disassembler. Values are what lives on the value stack, in the constant
//! pool and in list storage.

pub mod value;
