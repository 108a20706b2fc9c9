use crate::bytecode::{Chunk, OpCode};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("stack-check error at {index:04}: {message}")]
pub struct StackCheckError {
    pub message: String,
    pub index: usize,
}

impl StackCheckError {
    fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// Returns (pops, pushes) for an opcode, or None if the instruction
/// transfers control (jumps, calls, returns, halt).
pub fn effect(op: OpCode) -> Option<(usize, usize)> {
    use OpCode::*;
    Some(match op {
        Pop | PopString | PopList => (1, 0),

        ConstShort | ConstLong | Constant | ConstantString => (0, 1),

        IAdd | ISub | IMul | IDiv | IMod => (2, 1),
        FAdd | FSub | FMul | FDiv | FMod => (2, 1),
        INeg | FNeg | FloatToInt | IntToFloat => (1, 1),

        ShiftLeft | ShiftRight | BitAnd | BitOr | BitXor => (2, 1),
        BitNot => (1, 1),

        Not => (1, 1),
        Equal | EqualSl | Greater | Lesser => (2, 1),

        PushTrue | PushFalse | PushNull => (0, 1),

        AccessLocal | AccessLocalString | AccessLocalList => (0, 1),
        AccessGlobal | AccessGlobalString | AccessGlobalList => (0, 1),
        AssignLocal | AssignLocalList | AssignGlobal | AssignGlobalList => (1, 0),
        IncrLocal | DecrLocal | MulLocal | DivLocal => (1, 0),
        IncrGlobal | DecrGlobal | MulGlobal | DivGlobal => (1, 0),
        MakeRefToLocal | MakeRefToGlobal => (0, 1),
        Deref => (1, 1),

        // ( size -- list )
        MakeList => (1, 1),
        CopyList => (1, 1),
        // ( list value -- list )
        AppendList => (2, 1),
        // ( list count -- list )
        PopFromList => (2, 1),
        // ( list index value -- )
        AssignList => (3, 0),
        // ( list index -- item )
        IndexList | IndexString => (2, 1),
        // ( list index -- list index )
        CheckIndex | CheckStringIndex => (2, 2),
        // ( list index -- ref )
        MakeRefToIndex => (2, 1),
        AccessFromTop => (0, 1),
        AssignFromTop => (1, 0),

        Concatenate => (2, 1),

        LoadFunction => (0, 1),

        // Control transfer: stop the linear scan
        Halt | JumpForward | JumpBackward | JumpIfTrue | JumpIfFalse | PopJumpIfFalse
        | PopJumpIfEqual | PopJumpBackIfTrue | CallFunction | CallNative | Return
        | TrapReturn => return None,
    })
}

/// Check stack effects of a chunk's straight-line prefix.
///
/// The scan stops at the first control transfer: past a jump or call the
/// stack height depends on run-time values.
pub fn check_chunk(chunk: &Chunk, initial_height: usize) -> Result<(), StackCheckError> {
    let mut h = initial_height;

    for index in 0..chunk.len() {
        let (op, _) = chunk
            .decode_at(index)
            .map_err(|e| StackCheckError::new(index, e.to_string()))?;

        match effect(op) {
            Some((pops, pushes)) => {
                h = h.checked_sub(pops).ok_or_else(|| {
                    StackCheckError::new(
                        index,
                        format!("stack underflow, {} needs {} items, have {}", op, pops, h),
                    )
                })?;
                h += pushes;
            }
            None => return Ok(()),
        }
    }

    Ok(())
}
