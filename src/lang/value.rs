use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

/// Shared, mutable list storage. Cloning the handle aliases the list.
pub type List = Rc<RefCell<Vec<Value>>>;

/// Handle to a value-stack slot.
///
/// References never own storage: they are absolute positions in the VM's
/// value stack, resolved through a checked lookup on every dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotRef {
    Local(usize),
    Global(usize),
}

impl SlotRef {
    pub fn index(self) -> usize {
        match self {
            SlotRef::Local(i) | SlotRef::Global(i) => i,
        }
    }
}

/// Handle to one element of a list.
///
/// Holds the list alias, so the element stays reachable however the list
/// is moved around. The index is checked on every access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRef {
    pub list: List,
    pub index: usize,
}

/// Runtime value of the wis language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit signed integer, wrapping on overflow.
    Int(i32),

    /// 64-bit IEEE-754 float.
    Float(f64),

    Bool(bool),

    Null,

    String(String),

    /// List handle. See [`List`].
    List(List),

    /// Reference to a local or global slot.
    Ref(SlotRef),

    /// Reference to a list element.
    ElementRef(ElementRef),

    /// Index into the owning module's function table.
    Function(usize),
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Ref(_) | Value::ElementRef(_) => "reference",
            Value::Function(_) => "function",
        }
    }

    /// Truthiness used by the conditional jumps and `NOT`.
    ///
    /// References must be resolved by the caller; an unresolved reference
    /// counts as true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Ref(_) | Value::ElementRef(_) | Value::Function(_) => true,
        }
    }

    /// Ordering between two values of the same primitive kind.
    ///
    /// Mixed kinds, lists, references and functions are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Deep copy: nested lists get fresh storage, everything else is cloned.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => {
                Value::new_list(items.borrow().iter().map(Value::deep_copy).collect())
            }
            other => other.clone(),
        }
    }

    /// Human-readable representation used by the disassembler and the
    /// stack trace.
    pub fn repr(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::String(s) => format!("{:?}", s),
            Value::List(items) => {
                let inner: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Ref(SlotRef::Local(i)) => format!("ref to local {}", i),
            Value::Ref(SlotRef::Global(i)) => format!("ref to global {}", i),
            Value::ElementRef(e) => format!("ref to element {}", e.index),
            Value::Function(id) => format!("<function #{}>", id),
        }
    }
}

impl std::fmt::Display for Value {
    /// Format a value the way `print` shows it: strings unquoted.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Float(n) => write!(f, "{}", n),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            other => write!(f, "{}", other.repr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Int(3).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
        assert!(!Value::new_list(vec![]).is_truthy());
    }

    #[test]
    fn test_mixed_kinds_are_unordered() {
        assert_eq!(Value::Int(1).compare(&Value::Float(1.0)), None);
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(
            Value::String("a".into()).compare(&Value::String("b".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_list_clone_aliases_and_deep_copy_does_not() {
        let list = Value::new_list(vec![Value::Int(1), Value::new_list(vec![Value::Int(2)])]);
        let alias = list.clone();
        let copy = list.deep_copy();

        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(3));
        }

        assert_eq!(alias.repr(), "[1, [2], 3]");
        assert_eq!(copy.repr(), "[1, [2]]");
    }

    #[test]
    fn test_repr_quotes_strings() {
        assert_eq!(Value::String("a\"b".into()).repr(), "\"a\\\"b\"");
        assert_eq!(Value::String("ab".into()).to_string(), "ab");
        assert_eq!(Value::Float(1.5).repr(), "1.5");
        assert_eq!(Value::Ref(SlotRef::Local(4)).repr(), "ref to local 4");
        let element = ElementRef {
            list: Rc::new(RefCell::new(vec![Value::Null])),
            index: 0,
        };
        assert_eq!(Value::ElementRef(element).repr(), "ref to element 0");
    }
}
