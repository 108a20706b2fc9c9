use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Instruction word layout
// =============================================================================

/// One packed instruction: opcode in bits 31..24, operand in bits 23..0.
pub type Word = u32;

pub const OPCODE_SHIFT: u32 = 24;
pub const OPERAND_MASK: Word = 0x00ff_ffff;
pub const OPERAND_MAX: u32 = OPERAND_MASK;

/// Operand family of an opcode: what the 24-bit field means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Operand is unused and encoded as zero.
    None,
    /// Index into the chunk's constant pool.
    Constant,
    /// Displacement in words, added to the index after the jump.
    ForwardJump,
    /// Displacement in words, subtracted from the index after the jump.
    BackwardJump,
    /// Frame-relative local slot.
    Local,
    /// Global slot.
    Global,
    /// In-place update of a local slot.
    ModifyLocal,
    /// In-place update of a global slot.
    ModifyGlobal,
    /// Distance below the top of the stack.
    Depth,
    /// Index into the module's function table.
    Function,
    /// Number of locals discarded by a return.
    PopCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unrecognized opcode byte {0:#04x}")]
    UnknownOpcode(u8),
    #[error("operand {0:#x} does not fit in 24 bits")]
    OperandTooLarge(u32),
    #[error("no instruction at index {0}")]
    MissingInstruction(usize),
}

macro_rules! opcodes {
    ($($variant:ident = $name:literal, $kind:ident;)*) => {
        /// Closed set of VM instructions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum OpCode {
            $($variant,)*
        }

        impl OpCode {
            /// Every opcode, in encoding order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant,)*];

            /// Mnemonic as printed by the disassembler.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(OpCode::$variant => OperandKind::$kind,)*
                }
            }
        }
    };
}

opcodes! {
    Halt = "HALT", None;
    Pop = "POP", None;
    PopString = "POP_STRING", None;
    PopList = "POP_LIST", None;

    // constants
    ConstShort = "CONST_SHORT", Constant;
    ConstLong = "CONST_LONG", Constant;
    Constant = "CONSTANT", Constant;
    ConstantString = "CONSTANT_STRING", Constant;

    // integer arithmetic
    IAdd = "IADD", None;
    ISub = "ISUB", None;
    IMul = "IMUL", None;
    IDiv = "IDIV", None;
    IMod = "IMOD", None;
    INeg = "INEG", None;

    // float arithmetic
    FAdd = "FADD", None;
    FSub = "FSUB", None;
    FMul = "FMUL", None;
    FDiv = "FDIV", None;
    FMod = "FMOD", None;
    FNeg = "FNEG", None;

    FloatToInt = "FLOAT_TO_INT", None;
    IntToFloat = "INT_TO_FLOAT", None;

    // bitwise
    ShiftLeft = "SHIFT_LEFT", None;
    ShiftRight = "SHIFT_RIGHT", None;
    BitAnd = "BIT_AND", None;
    BitOr = "BIT_OR", None;
    BitNot = "BIT_NOT", None;
    BitXor = "BIT_XOR", None;

    // logic
    Not = "NOT", None;
    Equal = "EQUAL", None;
    EqualSl = "EQUAL_SL", None;
    Greater = "GREATER", None;
    Lesser = "LESSER", None;

    PushTrue = "PUSH_TRUE", None;
    PushFalse = "PUSH_FALSE", None;
    PushNull = "PUSH_NULL", None;

    // jumps
    JumpForward = "JUMP_FORWARD", ForwardJump;
    JumpBackward = "JUMP_BACKWARD", BackwardJump;
    JumpIfTrue = "JUMP_IF_TRUE", ForwardJump;
    JumpIfFalse = "JUMP_IF_FALSE", ForwardJump;
    PopJumpIfFalse = "POP_JUMP_IF_FALSE", ForwardJump;
    PopJumpIfEqual = "POP_JUMP_IF_EQUAL", ForwardJump;
    PopJumpBackIfTrue = "POP_JUMP_BACK_IF_TRUE", BackwardJump;

    // locals
    AccessLocal = "ACCESS_LOCAL", Local;
    AccessLocalString = "ACCESS_LOCAL_STRING", Local;
    AccessLocalList = "ACCESS_LOCAL_LIST", Local;
    AssignLocal = "ASSIGN_LOCAL", Local;
    AssignLocalList = "ASSIGN_LOCAL_LIST", Local;
    IncrLocal = "INCR_LOCAL", ModifyLocal;
    DecrLocal = "DECR_LOCAL", ModifyLocal;
    MulLocal = "MUL_LOCAL", ModifyLocal;
    DivLocal = "DIV_LOCAL", ModifyLocal;
    MakeRefToLocal = "MAKE_REF_TO_LOCAL", Local;

    // globals
    AccessGlobal = "ACCESS_GLOBAL", Global;
    AccessGlobalString = "ACCESS_GLOBAL_STRING", Global;
    AccessGlobalList = "ACCESS_GLOBAL_LIST", Global;
    AssignGlobal = "ASSIGN_GLOBAL", Global;
    AssignGlobalList = "ASSIGN_GLOBAL_LIST", Global;
    IncrGlobal = "INCR_GLOBAL", ModifyGlobal;
    DecrGlobal = "DECR_GLOBAL", ModifyGlobal;
    MulGlobal = "MUL_GLOBAL", ModifyGlobal;
    DivGlobal = "DIV_GLOBAL", ModifyGlobal;
    MakeRefToGlobal = "MAKE_REF_TO_GLOBAL", Global;

    Deref = "DEREF", None;

    // lists
    MakeList = "MAKE_LIST", None;
    CopyList = "COPY_LIST", None;
    AppendList = "APPEND_LIST", None;
    PopFromList = "POP_FROM_LIST", None;
    AssignList = "ASSIGN_LIST", None;
    IndexList = "INDEX_LIST", None;
    CheckIndex = "CHECK_INDEX", None;
    MakeRefToIndex = "MAKE_REF_TO_INDEX", None;
    AccessFromTop = "ACCESS_FROM_TOP", Depth;
    AssignFromTop = "ASSIGN_FROM_TOP", Depth;

    // strings
    IndexString = "INDEX_STRING", None;
    CheckStringIndex = "CHECK_STRING_INDEX", None;
    Concatenate = "CONCATENATE", None;

    // functions
    LoadFunction = "LOAD_FUNCTION", Function;
    CallFunction = "CALL_FUNCTION", None;
    CallNative = "CALL_NATIVE", None;
    Return = "RETURN", PopCount;
    TrapReturn = "TRAP_RETURN", None;
}

impl TryFrom<u8> for OpCode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::ALL
            .get(byte as usize)
            .copied()
            .ok_or(DecodeError::UnknownOpcode(byte))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Pack an opcode and operand. Operand bits above 23 are discarded.
pub fn encode(op: OpCode, operand: u32) -> Word {
    ((op as u8 as Word) << OPCODE_SHIFT) | (operand & OPERAND_MASK)
}

/// Like [`encode`], but rejects operands that would be truncated.
pub fn try_encode(op: OpCode, operand: u32) -> Result<Word, DecodeError> {
    if operand > OPERAND_MAX {
        return Err(DecodeError::OperandTooLarge(operand));
    }
    Ok(encode(op, operand))
}

pub fn decode(word: Word) -> Result<(OpCode, u32), DecodeError> {
    let op = OpCode::try_from((word >> OPCODE_SHIFT) as u8)?;
    Ok((op, word & OPERAND_MASK))
}

/// Target of a jump-family instruction at `index`.
///
/// The displacement is measured from the word following the jump: forward
/// jumps land on `index + 1 + d`, backward jumps on `index + 1 - d`.
/// Returns `None` for non-jump opcodes and for backward jumps before the
/// start of the chunk.
pub fn jump_target(op: OpCode, index: usize, displacement: u32) -> Option<usize> {
    let next = index + 1;
    match op.operand_kind() {
        OperandKind::ForwardJump => Some(next + displacement as usize),
        OperandKind::BackwardJump => next.checked_sub(displacement as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_discriminants_follow_table_order() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i, "{} out of order", op);
            assert_eq!(OpCode::try_from(i as u8), Ok(*op));
        }
    }

    #[test]
    fn test_unknown_byte_is_rejected() {
        let byte = OpCode::ALL.len() as u8;
        assert_eq!(OpCode::try_from(byte), Err(DecodeError::UnknownOpcode(byte)));
        assert!(decode(0xff00_0000).is_err());
    }

    #[test]
    fn test_word_layout() {
        let word = encode(OpCode::JumpForward, 0x01_0203);
        assert_eq!(word >> 24, OpCode::JumpForward as u32);
        assert_eq!(word & 0x00ff_ffff, 0x01_0203);
        assert_eq!(decode(word), Ok((OpCode::JumpForward, 0x01_0203)));
    }

    #[test]
    fn test_try_encode_rejects_wide_operand() {
        assert_eq!(
            try_encode(OpCode::Constant, 1 << 24),
            Err(DecodeError::OperandTooLarge(1 << 24))
        );
        assert!(try_encode(OpCode::Constant, OPERAND_MAX).is_ok());
    }

    #[test]
    fn test_jump_target_non_jump() {
        assert_eq!(jump_target(OpCode::IAdd, 4, 2), None);
        assert_eq!(jump_target(OpCode::JumpBackward, 0, 2), None);
        assert_eq!(jump_target(OpCode::JumpBackward, 4, 5), Some(0));
    }

    proptest! {
        #[test]
        fn forward_jump_lands_after_displacement(i in 0usize..100_000, d in 0u32..=OPERAND_MAX) {
            for op in [OpCode::JumpForward, OpCode::JumpIfTrue, OpCode::JumpIfFalse,
                       OpCode::PopJumpIfFalse, OpCode::PopJumpIfEqual] {
                prop_assert_eq!(jump_target(op, i, d), Some(i + 1 + d as usize));
            }
        }

        #[test]
        fn backward_jump_lands_before(i in 0usize..100_000, d in 0u32..100_001) {
            let expected = (i + 1).checked_sub(d as usize);
            prop_assert_eq!(jump_target(OpCode::JumpBackward, i, d), expected);
            prop_assert_eq!(jump_target(OpCode::PopJumpBackIfTrue, i, d), expected);
        }

        #[test]
        fn decode_inverts_encode(idx in 0usize..OpCode::ALL.len(), operand in 0u32..=OPERAND_MAX) {
            let op = OpCode::ALL[idx];
            prop_assert_eq!(decode(encode(op, operand)), Ok((op, operand)));
        }
    }
}
