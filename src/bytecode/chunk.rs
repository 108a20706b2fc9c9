use crate::bytecode::op::{DecodeError, OpCode, Word, decode, encode};
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};

/// First instruction index of a run of words sharing one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRun {
    pub start: usize,
    pub line: usize,
}

/// A compiled unit: instruction words, constant pool and line table.
///
/// Built once by the code generator, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub bytes: Vec<Word>,
    pub constants: Vec<Value>,
    lines: Vec<LineRun>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append one instruction word produced on `line`, returning its index.
    ///
    /// Line numbers never decrease along the chunk; an earlier line is
    /// recorded as the current one.
    pub fn append(&mut self, word: Word, line: usize) -> usize {
        let index = self.bytes.len();
        self.bytes.push(word);

        match self.lines.last() {
            Some(run) if run.line >= line => {}
            _ => self.lines.push(LineRun { start: index, line }),
        }

        index
    }

    /// Encode and append an instruction.
    pub fn emit(&mut self, op: OpCode, operand: u32, line: usize) -> usize {
        self.append(encode(op, operand), line)
    }

    pub fn append_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Overwrite the operand of an already emitted instruction, keeping its
    /// opcode. Used to back-patch forward jumps.
    pub fn patch_operand(&mut self, index: usize, operand: u32) -> Result<(), DecodeError> {
        let (op, _) = self.decode_at(index)?;
        self.bytes[index] = encode(op, operand);
        Ok(())
    }

    pub fn decode_at(&self, index: usize) -> Result<(OpCode, u32), DecodeError> {
        match self.bytes.get(index) {
            Some(word) => decode(*word),
            None => Err(DecodeError::MissingInstruction(index)),
        }
    }

    /// Source line of the instruction at `index`, or 0 if the chunk has no
    /// line information for it.
    pub fn get_line_number(&self, index: usize) -> usize {
        let runs_before = self.lines.partition_point(|run| run.start <= index);
        match runs_before {
            0 => 0,
            n => self.lines[n - 1].line,
        }
    }

    pub fn line_runs(&self) -> &[LineRun] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_runs_are_compressed() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::PushTrue, 0, 1);
        chunk.emit(OpCode::Pop, 0, 1);
        chunk.emit(OpCode::PushNull, 0, 3);
        chunk.emit(OpCode::Halt, 0, 3);

        assert_eq!(
            chunk.line_runs(),
            &[LineRun { start: 0, line: 1 }, LineRun { start: 2, line: 3 }]
        );
    }

    #[test]
    fn test_get_line_number() {
        let mut chunk = Chunk::new();
        for line in [1, 1, 2, 5, 5, 5, 9] {
            chunk.emit(OpCode::Pop, 0, line);
        }

        let lines: Vec<usize> = (0..chunk.len()).map(|i| chunk.get_line_number(i)).collect();
        assert_eq!(lines, vec![1, 1, 2, 5, 5, 5, 9]);
        // past the end keeps the last known line
        assert_eq!(chunk.get_line_number(100), 9);
    }

    #[test]
    fn test_line_number_never_decreases() {
        let mut chunk = Chunk::new();
        chunk.emit(OpCode::Pop, 0, 4);
        chunk.emit(OpCode::Pop, 0, 2);
        assert_eq!(chunk.get_line_number(1), 4);
    }

    #[test]
    fn test_empty_chunk_has_no_lines() {
        assert_eq!(Chunk::new().get_line_number(0), 0);
    }

    #[test]
    fn test_append_constant_returns_index() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.append_constant(Value::Int(3)), 0);
        assert_eq!(chunk.append_constant(Value::Int(4)), 1);
        assert_eq!(chunk.constants[1], Value::Int(4));
    }

    #[test]
    fn test_patch_operand_keeps_opcode() {
        let mut chunk = Chunk::new();
        let jump = chunk.emit(OpCode::JumpIfFalse, 0, 1);
        chunk.patch_operand(jump, 7).unwrap();
        assert_eq!(chunk.decode_at(jump), Ok((OpCode::JumpIfFalse, 7)));
    }
}
