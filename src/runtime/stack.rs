use crate::lang::value::Value;
use crate::runtime::runtime_error::Fault;

/// Default number of value-stack slots.
pub const STACK_CAPACITY: usize = 32_768;
/// Default number of call frames.
pub const FRAME_CAPACITY: usize = 1_024;

/// Value stack with a fixed capacity.
///
/// Storage is reserved up front and never grows past `capacity`; pushing
/// onto a full stack or popping an empty one is a fault.
#[derive(Debug)]
pub struct ValueStack {
    values: Vec<Value>,
    capacity: usize,
}

impl ValueStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn push(&mut self, value: Value) -> Result<(), Fault> {
        if self.values.len() >= self.capacity {
            return Err(Fault::StackOverflow(self.capacity));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, Fault> {
        self.values.pop().ok_or(Fault::StackUnderflow)
    }

    /// Value `depth` slots below the top; depth 0 is the top itself.
    pub fn peek(&self, depth: usize) -> Result<&Value, Fault> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.values.get(i))
            .ok_or(Fault::StackUnderflow)
    }

    pub fn get(&self, index: usize) -> Result<&Value, Fault> {
        self.values.get(index).ok_or(Fault::InvalidSlot(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Value, Fault> {
        self.values.get_mut(index).ok_or(Fault::InvalidSlot(index))
    }

    /// Drop the top `count` values.
    pub fn discard(&mut self, count: usize) -> Result<(), Fault> {
        let new_len = self
            .values
            .len()
            .checked_sub(count)
            .ok_or(Fault::StackUnderflow)?;
        self.values.truncate(new_len);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Code unit a frame executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkId {
    TopLevel,
    Function(usize),
}

/// Where execution resumes when a frame returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnSite {
    pub chunk: ChunkId,
    pub ip: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub chunk: ChunkId,
    /// Value-stack index of local 0.
    pub base: usize,
    /// `None` for the top-level frame.
    pub return_site: Option<ReturnSite>,
}

#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
    capacity: usize,
}

impl FrameStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), Fault> {
        if self.frames.len() >= self.capacity {
            return Err(Fault::FrameOverflow(self.capacity));
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Frame, Fault> {
        self.frames.pop().ok_or(Fault::FrameUnderflow)
    }

    pub fn current(&self) -> Result<&Frame, Fault> {
        self.frames.last().ok_or(Fault::FrameUnderflow)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
