use crate::bytecode::op::{DecodeError, OpCode, OperandKind, decode, jump_target};
use crate::bytecode::{Chunk, Module};
use std::fmt;

/// Size of one instruction word in bytes, used for the offset columns.
const WORD_BYTES: usize = 4;

/// One decoded instruction, ready for display or inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionRecord {
    /// Source line, or `None` when unchanged from the previous record.
    pub line: Option<usize>,
    /// Word index inside the chunk.
    pub index: usize,
    pub opcode: OpCode,
    pub operand: u32,
    pub annotation: Annotation,
}

/// Family-specific detail shown after the mnemonic.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    None,
    Constant { index: u32, preview: String },
    Jump { forward: bool, displacement: u32, target: Option<usize> },
    Local(u32),
    Global(u32),
    Modify(u32),
    FromTop(u32),
    Function(u32),
    PopLocals(u32),
}

impl InstructionRecord {
    /// Byte offset of the instruction inside the chunk.
    pub fn offset(&self) -> usize {
        self.index * WORD_BYTES
    }
}

impl fmt::Display for InstructionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{:04}  ", line)?,
            None => write!(f, "{:>4}  ", "|")?,
        }
        write!(
            f,
            "{:08x}    {:>8}    {:<22}",
            self.offset(),
            self.offset(),
            self.opcode.name()
        )?;
        write!(f, "{}", self.annotation)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::None => Ok(()),
            Annotation::Constant { index, preview } => {
                write!(f, "-> {} | value = {}", index, preview)
            }
            Annotation::Jump {
                forward,
                displacement,
                target,
            } => {
                let sign = if *forward { '+' } else { '-' };
                write!(f, "| offset = {}{}, jump to = ", sign, displacement)?;
                match target {
                    Some(t) => write!(f, "{:04}", t),
                    None => write!(f, "<before start>"),
                }
            }
            Annotation::Local(slot) => write!(f, "| local {}", slot),
            Annotation::Global(slot) => write!(f, "| global {}", slot),
            Annotation::Modify(slot) => write!(f, "| modify {}", slot),
            Annotation::FromTop(depth) => write!(f, "| from top {}", depth),
            Annotation::Function(index) => write!(f, "| function {}", index),
            Annotation::PopLocals(n) => write!(f, "| pop {} local(s)", n),
        }
    }
}

fn annotate(chunk: &Chunk, op: OpCode, index: usize, operand: u32) -> Annotation {
    match op.operand_kind() {
        OperandKind::None => Annotation::None,
        OperandKind::Constant => Annotation::Constant {
            index: operand,
            preview: chunk
                .constants
                .get(operand as usize)
                .map(|v| v.repr())
                .unwrap_or_else(|| "<missing>".to_string()),
        },
        OperandKind::ForwardJump | OperandKind::BackwardJump => Annotation::Jump {
            forward: op.operand_kind() == OperandKind::ForwardJump,
            displacement: operand,
            target: jump_target(op, index, operand),
        },
        OperandKind::Local => Annotation::Local(operand),
        OperandKind::Global => Annotation::Global(operand),
        OperandKind::ModifyLocal | OperandKind::ModifyGlobal => Annotation::Modify(operand),
        OperandKind::Depth => Annotation::FromTop(operand),
        OperandKind::Function => Annotation::Function(operand),
        OperandKind::PopCount => Annotation::PopLocals(operand),
    }
}

/// Decode the instruction at `index`, showing its line only if it differs
/// from `previous_line`.
pub fn disassemble_instruction(
    chunk: &Chunk,
    index: usize,
    previous_line: Option<usize>,
) -> Result<InstructionRecord, DecodeError> {
    let word = *chunk
        .bytes
        .get(index)
        .ok_or(DecodeError::MissingInstruction(index))?;
    let (opcode, operand) = decode(word)?;
    let line = chunk.get_line_number(index);

    Ok(InstructionRecord {
        line: if previous_line == Some(line) { None } else { Some(line) },
        index,
        opcode,
        operand,
        annotation: annotate(chunk, opcode, index, operand),
    })
}

/// Decode every instruction of a chunk, in order.
pub fn disassemble(chunk: &Chunk) -> Result<Vec<InstructionRecord>, DecodeError> {
    let mut records = Vec::with_capacity(chunk.len());
    let mut previous_line = None;

    for index in 0..chunk.len() {
        let record = disassemble_instruction(chunk, index, previous_line)?;
        previous_line = Some(chunk.get_line_number(index));
        records.push(record);
    }

    Ok(records)
}

fn header(name: &str) -> String {
    let mut out = format!("==== {} ====\n", name);
    out.push_str("Line  Hexa        Byte        Instruction\n");
    out.push_str("----  --------    --------    ----------------------------------------\n");
    out
}

/// Return the disassembly of a chunk as a String.
pub fn disassemble_to_string(chunk: &Chunk, name: &str) -> Result<String, DecodeError> {
    let mut output = header(name);

    for record in disassemble(chunk)? {
        output.push_str(&record.to_string());
        output.push('\n');
    }

    Ok(output)
}

/// Print disassembly of a chunk
pub fn print_chunk(chunk: &Chunk, name: &str) -> Result<(), DecodeError> {
    println!("{}", disassemble_to_string(chunk, name)?);
    Ok(())
}

/// Print disassembly of a module: top-level code first, then every function.
pub fn print_module(module: &Module) -> Result<(), DecodeError> {
    print_chunk(&module.top_level, &module.name)?;

    for (i, function) in module.functions.iter().enumerate() {
        let label = format!("{} [fn {}, arity {}]", function.name, i, function.arity);
        print_chunk(&function.code, &label)?;
    }

    Ok(())
}
