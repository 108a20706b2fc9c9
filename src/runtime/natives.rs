use crate::lang::value::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NativeError {
    #[error("expected {expected}, got {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
    #[error("cannot convert {0:?} to {1}")]
    Conversion(String, &'static str),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type NativeFunc = fn(&[Value]) -> Result<Value, NativeError>;

/// A host function callable through `CALL_NATIVE`.
///
/// `func` receives exactly `arity` arguments, in push order, with
/// references already resolved.
#[derive(Debug, Clone)]
pub struct NativeFn {
    pub name: String,
    pub arity: usize,
    pub func: NativeFunc,
}

/// Name-keyed registry of natives, fixed once the VM is built.
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    natives: HashMap<String, NativeFn>,
}

impl NativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in natives: print, println, int, float,
    /// string and readline.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register("print", 1, native_print);
        table.register("println", 1, native_println);
        table.register("int", 1, native_int);
        table.register("float", 1, native_float);
        table.register("string", 1, native_string);
        table.register("readline", 1, native_readline);
        table
    }

    /// Add or replace a native.
    pub fn register(&mut self, name: &str, arity: usize, func: NativeFunc) {
        self.natives.insert(
            name.to_string(),
            NativeFn {
                name: name.to_string(),
                arity,
                func,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.natives.get(name)
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }
}

fn native_print(args: &[Value]) -> Result<Value, NativeError> {
    let mut out = io::stdout().lock();
    write!(out, "{}", args[0])?;
    out.flush()?;
    Ok(Value::Null)
}

fn native_println(args: &[Value]) -> Result<Value, NativeError> {
    writeln!(io::stdout().lock(), "{}", args[0])?;
    Ok(Value::Null)
}

fn native_int(args: &[Value]) -> Result<Value, NativeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(f) => Ok(Value::Int(*f as i32)),
        Value::Bool(b) => Ok(Value::Int(*b as i32)),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| NativeError::Conversion(s.clone(), "int")),
        other => Err(NativeError::Type {
            expected: "int, float, bool or string",
            found: other.type_name(),
        }),
    }
}

fn native_float(args: &[Value]) -> Result<Value, NativeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| NativeError::Conversion(s.clone(), "float")),
        other => Err(NativeError::Type {
            expected: "int, float, bool or string",
            found: other.type_name(),
        }),
    }
}

fn native_string(args: &[Value]) -> Result<Value, NativeError> {
    match &args[0] {
        v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::String(_)) => {
            Ok(Value::String(v.to_string()))
        }
        other => Err(NativeError::Type {
            expected: "int, float, bool or string",
            found: other.type_name(),
        }),
    }
}

/// Print the prompt, then read one line from stdin without its newline.
fn native_readline(args: &[Value]) -> Result<Value, NativeError> {
    {
        let mut out = io::stdout().lock();
        write!(out, "{}", args[0])?;
        out.flush()?;
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    Ok(Value::String(line))
}
