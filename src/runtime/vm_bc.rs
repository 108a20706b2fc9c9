use crate::bytecode::disasm::disassemble_instruction;
use crate::bytecode::op::{OpCode, decode, jump_target};
use crate::bytecode::{Chunk, Module};
use crate::lang::value::{ElementRef, List, SlotRef, Value};
use crate::runtime::natives::NativeTable;
use crate::runtime::runtime_error::{Fault, RuntimeError};
use crate::runtime::stack::{
    ChunkId, FRAME_CAPACITY, Frame, FrameStack, ReturnSite, STACK_CAPACITY, ValueStack,
};
use std::cmp::Ordering;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct VmBcConfig {
    /// Log each instruction before it executes.
    pub trace_instructions: bool,
    /// Log the value stack before each instruction.
    pub trace_stack: bool,
    pub stack_capacity: usize,
    pub frame_capacity: usize,
    pub max_steps: Option<usize>,
}

impl Default for VmBcConfig {
    fn default() -> Self {
        VmBcConfig {
            trace_instructions: false,
            trace_stack: false,
            stack_capacity: STACK_CAPACITY,
            frame_capacity: FRAME_CAPACITY,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy)]
enum Modify {
    Incr,
    Decr,
    Mul,
    Div,
}

pub struct VmBc<'m> {
    module: Option<&'m Module>,
    stack: ValueStack,
    frames: FrameStack,
    natives: NativeTable,
    config: VmBcConfig,
    chunk: ChunkId,
    ip: usize,
    steps: usize,
    state: ExecutionState,
    fault: Option<RuntimeError>,
}

impl<'m> VmBc<'m> {
    pub fn new(trace_stack: bool, trace_instructions: bool) -> Self {
        Self::with_config(VmBcConfig {
            trace_stack,
            trace_instructions,
            ..VmBcConfig::default()
        })
    }

    pub fn with_config(config: VmBcConfig) -> Self {
        Self::with_natives(config, NativeTable::standard())
    }

    pub fn with_natives(config: VmBcConfig, natives: NativeTable) -> Self {
        Self {
            module: None,
            stack: ValueStack::with_capacity(config.stack_capacity),
            frames: FrameStack::with_capacity(config.frame_capacity),
            natives,
            config,
            chunk: ChunkId::TopLevel,
            ip: 0,
            steps: 0,
            state: ExecutionState::Finished,
            fault: None,
        }
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Index of the next instruction to execute, or of the faulting one
    /// after an error.
    pub fn instruction_pointer(&self) -> usize {
        self.ip
    }

    pub fn current_chunk(&self) -> ChunkId {
        self.chunk
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Reset all execution state and point the VM at the module's entry chunk.
    pub fn load(&mut self, module: &'m Module) {
        self.stack.clear();
        self.frames.clear();
        self.module = Some(module);
        self.chunk = ChunkId::TopLevel;
        self.ip = 0;
        self.steps = 0;
        self.state = ExecutionState::Running;
        self.fault = None;

        // A zero frame capacity surfaces on the first step.
        if let Err(fault) = self.frames.push(Frame {
            chunk: ChunkId::TopLevel,
            base: 0,
            return_site: None,
        }) {
            self.fault = Some(RuntimeError::new(fault, 0, 0));
        }
    }

    pub fn run(&mut self, module: &'m Module) -> Result<(), RuntimeError> {
        self.load(module);

        while self.step()? == ExecutionState::Running {}

        Ok(())
    }

    /// Execute exactly one instruction.
    ///
    /// Fails with `NoModule` until a module is loaded. Once finished,
    /// further calls return `Finished` without doing anything; once
    /// faulted, they return the same error.
    pub fn step(&mut self) -> Result<ExecutionState, RuntimeError> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }
        let module = self
            .module
            .ok_or_else(|| RuntimeError::new(Fault::NoModule, 0, 0))?;
        if self.state == ExecutionState::Finished {
            return Ok(ExecutionState::Finished);
        }

        let index = self.ip;

        let result = Self::chunk_in(module, self.chunk)
            .and_then(|chunk| self.execute(module, chunk, index));

        match result {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(fault) => {
                let err = self.locate(module, fault, index);
                error!(target: "wis::vm", line = err.line, offset = err.offset, "{}", err.fault);
                self.ip = index;
                self.fault = Some(err.clone());
                Err(err)
            }
        }
    }

    fn chunk_in(module: &'m Module, id: ChunkId) -> Result<&'m Chunk, Fault> {
        match id {
            ChunkId::TopLevel => Ok(&module.top_level),
            ChunkId::Function(i) => module
                .function(i)
                .map(|f| &f.code)
                .ok_or(Fault::InvalidFunction(i)),
        }
    }

    fn frame_name(module: &Module, id: ChunkId) -> String {
        match id {
            ChunkId::TopLevel => format!("<{}>", module.name),
            ChunkId::Function(i) => module
                .function(i)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("<fn {}>", i)),
        }
    }

    fn locate(&self, module: &'m Module, fault: Fault, index: usize) -> RuntimeError {
        let line = Self::chunk_in(module, self.chunk)
            .map(|chunk| chunk.get_line_number(index))
            .unwrap_or(0);

        self.frames.iter().fold(
            RuntimeError::new(fault, index * 4, line),
            |err, frame| err.with_context(&Self::frame_name(module, frame.chunk)),
        )
    }

    fn execute(
        &mut self,
        module: &'m Module,
        chunk: &'m Chunk,
        index: usize,
    ) -> Result<ExecutionState, Fault> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(Fault::StepLimitExceeded(max));
            }
        }

        let word = *chunk
            .bytes
            .get(index)
            .ok_or(Fault::InstructionOutOfBounds(index))?;
        let (op, operand) = decode(word)?;

        if self.config.trace_instructions {
            Self::trace_instruction(chunk, index);
        }

        self.ip = index + 1;
        let state = self.dispatch(module, chunk, op, operand, index)?;

        if self.config.trace_stack {
            self.trace_stack();
        }
        Ok(state)
    }

    fn trace_stack(&self) {
        let rendered: Vec<String> = self
            .stack
            .as_slice()
            .iter()
            .map(|v| format!("[ {} ]", v.repr()))
            .collect();
        info!(target: "wis::trace", "          {}", rendered.join(" "));
    }

    fn trace_instruction(chunk: &Chunk, index: usize) {
        if let Ok(record) = disassemble_instruction(chunk, index, None) {
            info!(target: "wis::trace", "{}", record);
        }
    }

    fn dispatch(
        &mut self,
        module: &'m Module,
        chunk: &'m Chunk,
        op: OpCode,
        operand: u32,
        index: usize,
    ) -> Result<ExecutionState, Fault> {
        use OpCode::*;

        match op {
            Halt => return Ok(ExecutionState::Finished),

            Pop => {
                self.pop()?;
            }
            PopString => {
                self.pop_string()?;
            }
            PopList => {
                self.pop_list()?;
            }

            // Constants
            ConstShort | ConstLong | Constant => {
                let value = Self::constant(chunk, operand)?;
                self.push(value)?;
            }
            ConstantString => {
                let value = Self::constant(chunk, operand)?;
                if !matches!(value, Value::String(_)) {
                    return Err(type_mismatch("string", &value));
                }
                self.push(value)?;
            }

            // Integer arithmetic
            IAdd => self.int_binary(|a, b| Ok(a.wrapping_add(b)))?,
            ISub => self.int_binary(|a, b| Ok(a.wrapping_sub(b)))?,
            IMul => self.int_binary(|a, b| Ok(a.wrapping_mul(b)))?,
            IDiv => self.int_binary(|a, b| match b {
                0 => Err(Fault::DivisionByZero),
                _ => Ok(a.wrapping_div(b)),
            })?,
            IMod => self.int_binary(|a, b| match b {
                0 => Err(Fault::ModuloByZero),
                _ => Ok(a.wrapping_rem(b)),
            })?,
            INeg => {
                let a = self.pop_int()?;
                self.push(Value::Int(a.wrapping_neg()))?;
            }

            // Float arithmetic
            FAdd => self.float_binary(|a, b| a + b)?,
            FSub => self.float_binary(|a, b| a - b)?,
            FMul => self.float_binary(|a, b| a * b)?,
            FDiv => self.float_binary(|a, b| a / b)?,
            FMod => self.float_binary(|a, b| a % b)?,
            FNeg => {
                let a = self.pop_float()?;
                self.push(Value::Float(-a))?;
            }

            FloatToInt => {
                let a = self.pop_float()?;
                self.push(Value::Int(a as i32))?;
            }
            IntToFloat => {
                let a = self.pop_int()?;
                self.push(Value::Float(a as f64))?;
            }

            // Bitwise
            ShiftLeft => self.int_binary(|a, b| {
                let amount = shift_amount(b)?;
                Ok(a.checked_shl(amount).unwrap_or(0))
            })?,
            ShiftRight => self.int_binary(|a, b| {
                let amount = shift_amount(b)?;
                Ok(a.checked_shr(amount).unwrap_or(if a < 0 { -1 } else { 0 }))
            })?,
            BitAnd => self.int_binary(|a, b| Ok(a & b))?,
            BitOr => self.int_binary(|a, b| Ok(a | b))?,
            BitXor => self.int_binary(|a, b| Ok(a ^ b))?,
            BitNot => {
                let a = self.pop_int()?;
                self.push(Value::Int(!a))?;
            }

            // Logic
            Not => {
                let a = self.pop_resolved()?;
                self.push(Value::Bool(!a.is_truthy()))?;
            }
            Equal | EqualSl => {
                let b = self.pop_resolved()?;
                let a = self.pop_resolved()?;
                self.push(Value::Bool(a == b))?;
            }
            Greater => {
                let b = self.pop_resolved()?;
                let a = self.pop_resolved()?;
                self.push(Value::Bool(a.compare(&b) == Some(Ordering::Greater)))?;
            }
            Lesser => {
                let b = self.pop_resolved()?;
                let a = self.pop_resolved()?;
                self.push(Value::Bool(a.compare(&b) == Some(Ordering::Less)))?;
            }

            PushTrue => self.push(Value::Bool(true))?,
            PushFalse => self.push(Value::Bool(false))?,
            PushNull => self.push(Value::Null)?,

            // Jumps
            JumpForward | JumpBackward => self.jump(chunk, op, index, operand)?,
            JumpIfTrue => {
                if self.peek_truthy()? {
                    self.jump(chunk, op, index, operand)?;
                }
            }
            JumpIfFalse => {
                if !self.peek_truthy()? {
                    self.jump(chunk, op, index, operand)?;
                }
            }
            PopJumpIfFalse => {
                if !self.pop_resolved()?.is_truthy() {
                    self.jump(chunk, op, index, operand)?;
                }
            }
            PopJumpBackIfTrue => {
                if self.pop_resolved()?.is_truthy() {
                    self.jump(chunk, op, index, operand)?;
                }
            }
            PopJumpIfEqual => {
                let case = self.pop_resolved()?;
                let scrutinee = self.resolve(self.stack.peek(0)?.clone())?;
                if case == scrutinee {
                    self.pop()?;
                    self.jump(chunk, op, index, operand)?;
                }
            }

            // Locals and globals
            AccessLocal => {
                let slot = self.local_index(operand)?;
                self.access(slot)?;
            }
            AccessGlobal => {
                let slot = self.global_index(operand)?;
                self.access(slot)?;
            }
            AccessLocalString => {
                let slot = self.local_index(operand)?;
                self.access_kind(slot, "string")?;
            }
            AccessGlobalString => {
                let slot = self.global_index(operand)?;
                self.access_kind(slot, "string")?;
            }
            AccessLocalList => {
                let slot = self.local_index(operand)?;
                self.access_kind(slot, "list")?;
            }
            AccessGlobalList => {
                let slot = self.global_index(operand)?;
                self.access_kind(slot, "list")?;
            }
            AssignLocal => {
                let slot = self.local_index(operand)?;
                let value = self.pop()?;
                self.assign(slot, value)?;
            }
            AssignGlobal => {
                let slot = self.global_index(operand)?;
                let value = self.pop()?;
                self.assign(slot, value)?;
            }
            AssignLocalList => {
                let slot = self.local_index(operand)?;
                let list = self.pop_list()?;
                self.assign(slot, Value::List(list))?;
            }
            AssignGlobalList => {
                let slot = self.global_index(operand)?;
                let list = self.pop_list()?;
                self.assign(slot, Value::List(list))?;
            }
            IncrLocal | DecrLocal | MulLocal | DivLocal => {
                let slot = self.local_index(operand)?;
                self.modify(slot, modify_kind(op))?;
            }
            IncrGlobal | DecrGlobal | MulGlobal | DivGlobal => {
                let slot = self.global_index(operand)?;
                self.modify(slot, modify_kind(op))?;
            }
            MakeRefToLocal => {
                let slot = self.local_index(operand)?;
                self.make_ref(SlotRef::Local(slot))?;
            }
            MakeRefToGlobal => {
                let slot = self.global_index(operand)?;
                self.make_ref(SlotRef::Global(slot))?;
            }
            Deref => {
                let value = self.pop_resolved()?;
                self.push(value)?;
            }

            // Lists
            MakeList => {
                let size = self.pop_int()?;
                let size = usize::try_from(size).map_err(|_| Fault::TypeMismatch {
                    expected: "non-negative size",
                    found: "negative int",
                })?;
                self.push(Value::new_list(vec![Value::Null; size]))?;
            }
            CopyList => {
                let list = self.pop_list()?;
                self.push(Value::List(list).deep_copy())?;
            }
            AppendList => {
                let value = self.pop()?;
                let list = self.peek_list(0)?;
                list.borrow_mut().push(value);
            }
            PopFromList => {
                let count = self.pop_int()?;
                let list = self.peek_list(0)?;
                let mut items = list.borrow_mut();
                let len = items.len();
                let keep = usize::try_from(count)
                    .ok()
                    .and_then(|n| len.checked_sub(n))
                    .ok_or(Fault::ListUnderflow {
                        count: count as i64,
                        len,
                    })?;
                items.truncate(keep);
            }
            AssignList => {
                let value = self.pop()?;
                let position = self.pop_int()?;
                let list = self.pop_list()?;
                let mut items = list.borrow_mut();
                let i = check_bounds(position, items.len())?;
                items[i] = value;
            }
            IndexList => {
                let position = self.pop_int()?;
                let list = self.pop_list()?;
                let item = {
                    let items = list.borrow();
                    let i = check_bounds(position, items.len())?;
                    items[i].clone()
                };
                self.push(item)?;
            }
            CheckIndex => {
                let position = self.peek_int(0)?;
                let list = self.peek_list(1)?;
                let len = list.borrow().len();
                check_bounds(position, len)?;
            }
            MakeRefToIndex => {
                let position = self.pop_int()?;
                let list = self.pop_list()?;
                let at = check_bounds(position, list.borrow().len())?;
                let element = list.borrow()[at].clone();
                let value = match element {
                    Value::List(inner) => Value::List(inner),
                    _ => Value::ElementRef(ElementRef { list, index: at }),
                };
                self.push(value)?;
            }
            AccessFromTop => {
                let depth = operand as usize;
                let value = depth
                    .checked_sub(1)
                    .and_then(|d| self.stack.peek(d).ok())
                    .cloned()
                    .ok_or(Fault::InvalidDepth(depth))?;
                self.push(value)?;
            }
            AssignFromTop => {
                let value = self.pop()?;
                let depth = operand as usize;
                let slot = self
                    .stack
                    .len()
                    .checked_sub(depth)
                    .filter(|_| depth > 0)
                    .ok_or(Fault::InvalidDepth(depth))?;
                self.assign(slot, value)?;
            }

            // Strings
            IndexString => {
                let position = self.pop_int()?;
                let s = self.pop_string()?;
                let i = check_bounds(position, s.chars().count())?;
                let ch = s.chars().nth(i).map(String::from).unwrap_or_default();
                self.push(Value::String(ch))?;
            }
            CheckStringIndex => {
                let position = self.peek_int(0)?;
                let len = match self.stack.peek(1)? {
                    Value::String(s) => s.chars().count(),
                    other => return Err(type_mismatch("string", other)),
                };
                check_bounds(position, len)?;
            }
            Concatenate => {
                let b = self.pop_string()?;
                let mut a = self.pop_string()?;
                a.push_str(&b);
                self.push(Value::String(a))?;
            }

            // Functions
            LoadFunction => {
                let f = operand as usize;
                if module.function(f).is_none() {
                    return Err(Fault::InvalidFunction(f));
                }
                self.push(Value::Function(f))?;
            }
            CallFunction => self.call_function(module)?,
            CallNative => self.call_native()?,
            Return => return self.return_from(operand as usize),
            TrapReturn => {
                warn!(target: "wis::vm", "reached end of non-null function");
                if self.frames.len() > 1 {
                    let frame = self.frames.pop()?;
                    if let Some(site) = frame.return_site {
                        self.chunk = site.chunk;
                        self.ip = site.ip;
                    }
                }
                return Ok(ExecutionState::Finished);
            }
        }

        Ok(ExecutionState::Running)
    }

    // Stack helpers

    fn push(&mut self, value: Value) -> Result<(), Fault> {
        self.stack.push(value)
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop()
    }

    fn pop_int(&mut self) -> Result<i32, Fault> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(type_mismatch("int", &other)),
        }
    }

    fn pop_float(&mut self) -> Result<f64, Fault> {
        match self.pop()? {
            Value::Float(n) => Ok(n),
            other => Err(type_mismatch("float", &other)),
        }
    }

    fn pop_string(&mut self) -> Result<String, Fault> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => Err(type_mismatch("string", &other)),
        }
    }

    fn pop_list(&mut self) -> Result<List, Fault> {
        match self.pop()? {
            Value::List(list) => Ok(list),
            other => Err(type_mismatch("list", &other)),
        }
    }

    fn pop_resolved(&mut self) -> Result<Value, Fault> {
        let value = self.pop()?;
        self.resolve(value)
    }

    fn peek_int(&self, depth: usize) -> Result<i32, Fault> {
        match self.stack.peek(depth)? {
            Value::Int(n) => Ok(*n),
            other => Err(type_mismatch("int", other)),
        }
    }

    fn peek_list(&self, depth: usize) -> Result<List, Fault> {
        match self.stack.peek(depth)? {
            Value::List(list) => Ok(list.clone()),
            other => Err(type_mismatch("list", other)),
        }
    }

    fn peek_truthy(&self) -> Result<bool, Fault> {
        let top = self.stack.peek(0)?.clone();
        Ok(self.resolve(top)?.is_truthy())
    }

    fn int_binary(&mut self, f: impl FnOnce(i32, i32) -> Result<i32, Fault>) -> Result<(), Fault> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Int(f(a, b)?))
    }

    fn float_binary(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<(), Fault> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Float(f(a, b)))
    }

    fn constant(chunk: &Chunk, index: u32) -> Result<Value, Fault> {
        chunk
            .constants
            .get(index as usize)
            .map(Value::deep_copy)
            .ok_or(Fault::InvalidConstant(index as usize))
    }

    fn jump(
        &mut self,
        chunk: &Chunk,
        op: OpCode,
        index: usize,
        displacement: u32,
    ) -> Result<(), Fault> {
        self.ip = jump_target(op, index, displacement)
            .filter(|&target| target < chunk.len())
            .ok_or(Fault::JumpOutOfBounds)?;
        Ok(())
    }

    // Slots and references

    fn local_index(&self, slot: u32) -> Result<usize, Fault> {
        let index = self.frames.current()?.base + slot as usize;
        self.stack.get(index)?;
        Ok(index)
    }

    fn global_index(&self, slot: u32) -> Result<usize, Fault> {
        let index = slot as usize;
        self.stack.get(index)?;
        Ok(index)
    }

    /// Follow references held in slot `index` to the slot that owns the value.
    fn resolve_slot(&self, mut index: usize) -> Result<usize, Fault> {
        for _ in 0..=self.stack.len() {
            match self.stack.get(index)? {
                Value::Ref(target) => index = target.index(),
                _ => return Ok(index),
            }
        }
        Err(Fault::InvalidSlot(index))
    }

    fn resolve(&self, value: Value) -> Result<Value, Fault> {
        match value {
            Value::Ref(target) => {
                let slot = self.resolve_slot(target.index())?;
                match self.stack.get(slot)? {
                    Value::ElementRef(element) => read_element(element),
                    other => Ok(other.clone()),
                }
            }
            Value::ElementRef(element) => read_element(&element),
            other => Ok(other),
        }
    }

    fn access(&mut self, slot: usize) -> Result<(), Fault> {
        let value = self.stack.get(slot)?.clone();
        self.push(value)
    }

    fn access_kind(&mut self, slot: usize, expected: &'static str) -> Result<(), Fault> {
        let value = self.resolve(self.stack.get(slot)?.clone())?;
        if value.type_name() != expected {
            return Err(type_mismatch(expected, &value));
        }
        self.push(value)
    }

    fn assign(&mut self, slot: usize, value: Value) -> Result<(), Fault> {
        let target = self.resolve_slot(slot)?;
        let current = self.stack.get_mut(target)?;
        if let Value::ElementRef(element) = &*current {
            return write_element(element, value);
        }
        *current = value;
        Ok(())
    }

    fn modify(&mut self, slot: usize, kind: Modify) -> Result<(), Fault> {
        let operand = self.pop()?;
        let current = self.resolve(self.stack.get(slot)?.clone())?;

        let updated = match (&current, &operand) {
            (Value::Int(a), Value::Int(b)) => Value::Int(match kind {
                Modify::Incr => a.wrapping_add(*b),
                Modify::Decr => a.wrapping_sub(*b),
                Modify::Mul => a.wrapping_mul(*b),
                Modify::Div if *b == 0 => return Err(Fault::DivisionByZero),
                Modify::Div => a.wrapping_div(*b),
            }),
            (Value::Float(a), Value::Float(b)) => Value::Float(match kind {
                Modify::Incr => a + b,
                Modify::Decr => a - b,
                Modify::Mul => a * b,
                Modify::Div => a / b,
            }),
            (Value::Int(_), other) => return Err(type_mismatch("int", other)),
            (Value::Float(_), other) => return Err(type_mismatch("float", other)),
            (other, _) => return Err(type_mismatch("int or float", other)),
        };
        self.assign(slot, updated)
    }

    fn make_ref(&mut self, slot: SlotRef) -> Result<(), Fault> {
        let value = match self.stack.get(slot.index())? {
            Value::List(list) => Value::List(list.clone()),
            Value::Ref(existing) => Value::Ref(*existing),
            Value::ElementRef(element) => Value::ElementRef(element.clone()),
            _ => Value::Ref(slot),
        };
        self.push(value)
    }

    // Calls

    fn call_function(&mut self, module: &'m Module) -> Result<(), Fault> {
        let index = match self.pop()? {
            Value::Function(index) => index,
            other => return Err(type_mismatch("function", &other)),
        };
        let function = module.function(index).ok_or(Fault::InvalidFunction(index))?;
        let base = self
            .stack
            .len()
            .checked_sub(function.arity)
            .ok_or(Fault::StackUnderflow)?;

        self.frames.push(Frame {
            chunk: ChunkId::Function(index),
            base,
            return_site: Some(ReturnSite {
                chunk: self.chunk,
                ip: self.ip,
            }),
        })?;
        debug!(target: "wis::vm", function = %function.name, depth = self.frames.len(), "call");

        self.chunk = ChunkId::Function(index);
        self.ip = 0;
        Ok(())
    }

    /// The native's name sits on top of the stack, its arguments beneath it.
    /// Nothing is popped until the lookup and arity check succeed.
    fn call_native(&mut self) -> Result<(), Fault> {
        let name = match self.stack.peek(0)? {
            Value::String(name) => name.clone(),
            other => return Err(type_mismatch("string", other)),
        };
        let native = self
            .natives
            .get(&name)
            .cloned()
            .ok_or_else(|| Fault::UnknownNative(name.clone()))?;

        let available = self.stack.len() - 1;
        if available < native.arity {
            return Err(Fault::NativeArity {
                name,
                expected: native.arity,
                found: available,
            });
        }

        let first = available - native.arity;
        let args = self.stack.as_slice()[first..available]
            .iter()
            .map(|arg| self.resolve(arg.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let result = (native.func)(&args).map_err(|e| Fault::NativeFailed {
            name,
            message: e.to_string(),
        })?;

        self.stack.discard(native.arity + 1)?;
        self.push(result)
    }

    fn return_from(&mut self, locals: usize) -> Result<ExecutionState, Fault> {
        let result = self.pop()?;

        if self.frames.len() <= 1 {
            self.push(result)?;
            return Ok(ExecutionState::Finished);
        }

        self.stack.discard(locals)?;
        let frame = self.frames.pop()?;
        self.push(result)?;

        let site = frame.return_site.ok_or(Fault::FrameUnderflow)?;
        self.chunk = site.chunk;
        self.ip = site.ip;
        debug!(target: "wis::vm", depth = self.frames.len(), "return");

        Ok(ExecutionState::Running)
    }
}

fn type_mismatch(expected: &'static str, found: &Value) -> Fault {
    Fault::TypeMismatch {
        expected,
        found: found.type_name(),
    }
}

fn read_element(element: &ElementRef) -> Result<Value, Fault> {
    let items = element.list.borrow();
    items
        .get(element.index)
        .cloned()
        .ok_or(Fault::IndexOutOfRange {
            index: element.index as i64,
            len: items.len(),
        })
}

fn write_element(element: &ElementRef, value: Value) -> Result<(), Fault> {
    let mut items = element.list.borrow_mut();
    let len = items.len();
    let slot = items.get_mut(element.index).ok_or(Fault::IndexOutOfRange {
        index: element.index as i64,
        len,
    })?;
    *slot = value;
    Ok(())
}

fn shift_amount(amount: i32) -> Result<u32, Fault> {
    u32::try_from(amount).map_err(|_| Fault::NegativeShift(amount))
}

fn check_bounds(position: i32, len: usize) -> Result<usize, Fault> {
    usize::try_from(position)
        .ok()
        .filter(|&i| i < len)
        .ok_or(Fault::IndexOutOfRange {
            index: position as i64,
            len,
        })
}

fn modify_kind(op: OpCode) -> Modify {
    match op {
        OpCode::IncrLocal | OpCode::IncrGlobal => Modify::Incr,
        OpCode::DecrLocal | OpCode::DecrGlobal => Modify::Decr,
        OpCode::MulLocal | OpCode::MulGlobal => Modify::Mul,
        _ => Modify::Div,
    }
}
