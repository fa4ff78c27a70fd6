//! Typed local variables owned by a single IOSTS instance.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

/// A variable value (boolean, integer, or string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Str(_) => ValueKind::Str,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Str => write!(f, "string"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("variable name must be non-empty")]
    EmptyName,
    #[error("variable '{name}' is unbound")]
    Unbound { name: String },
    #[error("variable '{name}' is bound to {stored}, not {requested}")]
    TypeMismatch {
        name: String,
        stored: ValueKind,
        requested: ValueKind,
    },
}

/// Named, type-tagged variables. A name keeps its type for the lifetime of
/// the binding: rebinding with a different type fails and leaves the store
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    vars: IndexMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind or update `name`. Fails on an empty name or when an existing
    /// binding has a different type.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if let Some(existing) = self.vars.get(name) {
            if existing.kind() != value.kind() {
                return Err(StoreError::TypeMismatch {
                    name: name.into(),
                    stored: existing.kind(),
                    requested: value.kind(),
                });
            }
        }
        self.vars.insert(name.into(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value, StoreError> {
        self.vars.get(name).ok_or_else(|| StoreError::Unbound {
            name: name.into(),
        })
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, StoreError> {
        match self.get(name)? {
            Value::Bool(b) => Ok(*b),
            other => Err(StoreError::TypeMismatch {
                name: name.into(),
                stored: other.kind(),
                requested: ValueKind::Bool,
            }),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64, StoreError> {
        match self.get(name)? {
            Value::Int(n) => Ok(*n),
            other => Err(StoreError::TypeMismatch {
                name: name.into(),
                stored: other.kind(),
                requested: ValueKind::Int,
            }),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, StoreError> {
        match self.get(name)? {
            Value::Str(s) => Ok(s),
            other => Err(StoreError::TypeMismatch {
                name: name.into(),
                stored: other.kind(),
                requested: ValueKind::Str,
            }),
        }
    }

    /// Remove the binding for `name`, returning its value.
    pub fn clear(&mut self, name: &str) -> Result<Value, StoreError> {
        self.vars
            .shift_remove(name)
            .ok_or_else(|| StoreError::Unbound { name: name.into() })
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
