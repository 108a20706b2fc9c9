pub mod natives;
pub mod runtime_error;
pub mod stack;
pub mod vm_bc;

pub use natives::{NativeFn, NativeTable};
pub use runtime_error::{Fault, RuntimeError};
pub use vm_bc::{ExecutionState, VmBc, VmBcConfig};
