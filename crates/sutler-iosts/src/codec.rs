//! Textual encoding of model actions for the runner wire.
//!
//! A model action crosses the wire as `Name(lit, lit, ...)`: `true`/`false`
//! for booleans, signed decimals for integers, double-quoted strings with
//! `\\`, `\"`, `\n`, `\t` escapes. A zero-field action is just `Name`.
//! Decoding recovers the concrete action from the leading type-name token
//! through a registered [`ActionSchema`] table.

use std::fmt::Write as _;

use indexmap::IndexMap;
use thiserror::Error;

use crate::action::{ActionType, ModelAction, ERROR_ACTION};
use crate::store::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("no schema registered for action '{name}'")]
    UnknownAction { name: String },
    #[error("schema for action '{name}' is already registered")]
    DuplicateSchema { name: String },
    #[error("action '{action}' is missing field '{field}'")]
    MissingField { action: String, field: String },
    #[error("field '{field}' of action '{action}' is {got}, expected {expected}")]
    FieldType {
        action: String,
        field: String,
        expected: ValueKind,
        got: ValueKind,
    },
    #[error("action '{action}' carries {got} fields, schema has {expected}")]
    FieldCount {
        action: String,
        expected: usize,
        got: usize,
    },
    #[error("syntax error at byte {at}: {message}")]
    Syntax { at: usize, message: String },
}

/// The field layout of one model-action type.
#[derive(Debug, Clone)]
pub struct ActionSchema {
    ty: ActionType,
    fields: Vec<(String, ValueKind)>,
}

impl ActionSchema {
    /// Describe a model-action type. `ty` must be a model-realm type.
    pub fn new(ty: ActionType, fields: &[(&str, ValueKind)]) -> Self {
        debug_assert!(ty.is_model(), "schema built for {ty:?}");
        ActionSchema {
            ty,
            fields: fields
                .iter()
                .map(|(n, k)| ((*n).to_owned(), *k))
                .collect(),
        }
    }

    pub fn ty(&self) -> ActionType {
        self.ty
    }

    pub fn fields(&self) -> &[(String, ValueKind)] {
        &self.fields
    }

    /// Build an action of this type from positional values.
    pub fn action(&self, values: Vec<Value>) -> Result<ModelAction, CodecError> {
        if values.len() != self.fields.len() {
            return Err(CodecError::FieldCount {
                action: self.ty.name().into(),
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        let mut fields = Vec::with_capacity(values.len());
        for ((name, kind), value) in self.fields.iter().zip(values) {
            if value.kind() != *kind {
                return Err(CodecError::FieldType {
                    action: self.ty.name().into(),
                    field: name.clone(),
                    expected: *kind,
                    got: value.kind(),
                });
            }
            fields.push((name.clone(), value));
        }
        Ok(ModelAction::new(self.ty, fields))
    }
}

/// Schema table mapping type-name tokens to concrete model-action layouts.
///
/// The `Error` reply schema is pre-registered so refinement errors can
/// always be encoded.
#[derive(Debug, Clone)]
pub struct ActionCodec {
    schemas: IndexMap<&'static str, ActionSchema>,
}

impl ActionCodec {
    pub fn new() -> Self {
        let mut codec = ActionCodec {
            schemas: IndexMap::new(),
        };
        codec
            .schemas
            .insert(ERROR_ACTION.name(), ActionSchema::new(ERROR_ACTION, &[("reason", ValueKind::Str)]));
        codec
    }

    pub fn register(&mut self, schema: ActionSchema) -> Result<(), CodecError> {
        let name = schema.ty.name();
        if self.schemas.contains_key(name) {
            return Err(CodecError::DuplicateSchema { name: name.into() });
        }
        self.schemas.insert(name, schema);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Option<&ActionSchema> {
        self.schemas.get(name)
    }

    /// Encode `action` against its registered schema.
    pub fn serialize(&self, action: &ModelAction) -> Result<String, CodecError> {
        let name = action.ty().name();
        let schema = self
            .schemas
            .get(name)
            .ok_or_else(|| CodecError::UnknownAction { name: name.into() })?;
        if action.fields().len() != schema.fields.len() {
            return Err(CodecError::FieldCount {
                action: name.into(),
                expected: schema.fields.len(),
                got: action.fields().len(),
            });
        }
        let mut out = String::from(name);
        if schema.fields.is_empty() {
            return Ok(out);
        }
        out.push('(');
        for (i, (field, kind)) in schema.fields.iter().enumerate() {
            let value = action
                .field(field)
                .ok_or_else(|| CodecError::MissingField {
                    action: name.into(),
                    field: field.clone(),
                })?;
            if value.kind() != *kind {
                return Err(CodecError::FieldType {
                    action: name.into(),
                    field: field.clone(),
                    expected: *kind,
                    got: value.kind(),
                });
            }
            if i > 0 {
                out.push(',');
            }
            write_literal(&mut out, value);
        }
        out.push(')');
        Ok(out)
    }

    /// Decode the textual form back into a model action.
    pub fn deserialize(&self, text: &str) -> Result<ModelAction, CodecError> {
        let mut scanner = Scanner::new(text);
        scanner.skip_ws();
        let name = scanner.ident()?;
        let schema = self
            .schemas
            .get(name.as_str())
            .ok_or(CodecError::UnknownAction { name: name.clone() })?;

        let mut fields = Vec::with_capacity(schema.fields.len());
        scanner.skip_ws();
        if schema.fields.is_empty() {
            scanner.expect_end()?;
            return Ok(ModelAction::new(schema.ty, fields));
        }
        scanner.expect('(')?;
        for (i, (field, kind)) in schema.fields.iter().enumerate() {
            if i > 0 {
                scanner.skip_ws();
                scanner.expect(',')?;
            }
            scanner.skip_ws();
            let value = scanner.literal()?;
            if value.kind() != *kind {
                return Err(CodecError::FieldType {
                    action: name.clone(),
                    field: field.clone(),
                    expected: *kind,
                    got: value.kind(),
                });
            }
            fields.push((field.clone(), value));
        }
        scanner.skip_ws();
        scanner.expect(')')?;
        scanner.expect_end()?;
        Ok(ModelAction::new(schema.ty, fields))
    }
}

impl Default for ActionCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn write_literal(out: &mut String, value: &Value) {
    match value {
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
    }
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn err(&self, message: impl Into<String>) -> CodecError {
        CodecError::Syntax {
            at: self.pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, want: char) -> Result<(), CodecError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.err(format!("expected '{want}', found '{c}'"))),
            None => Err(self.err(format!("expected '{want}', found end of input"))),
        }
    }

    fn expect_end(&mut self) -> Result<(), CodecError> {
        self.skip_ws();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(self.err(format!("trailing input starting at '{c}'"))),
        }
    }

    fn ident(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return Err(self.err("expected an action name")),
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        Ok(self.src[start..self.pos].to_owned())
    }

    fn literal(&mut self) -> Result<Value, CodecError> {
        match self.peek() {
            Some('"') => self.string_literal(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.int_literal(),
            Some(c) if c.is_ascii_alphabetic() => {
                let word = self.ident()?;
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(self.err(format!("unknown literal '{other}'"))),
                }
            }
            Some(c) => Err(self.err(format!("expected a literal, found '{c}'"))),
            None => Err(self.err("expected a literal, found end of input")),
        }
    }

    fn int_literal(&mut self) -> Result<Value, CodecError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(self.err("expected digits after '-'"));
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| self.err(format!("integer '{text}' out of range")))
    }

    fn string_literal(&mut self) -> Result<Value, CodecError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Value::Str(out)),
                Some('\\') => match self.bump() {
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => return Err(self.err(format!("unknown escape '\\{c}'"))),
                    None => return Err(self.err("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.err("unterminated string literal")),
            }
        }
    }
}
