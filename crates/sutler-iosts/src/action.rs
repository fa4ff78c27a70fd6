//! Actions exchanged between the test runner, the engine, and the SUT.
//!
//! Every action carries a stable [`ActionType`] identity; the engine never
//! inspects payloads beyond that identity. Model actions additionally carry
//! a record of primitive fields so they can cross the runner wire in a
//! textual form (see [`crate::codec`]).

use std::fmt;

use crate::store::Value;

/// Which vocabulary an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Realm {
    /// The test runner's vocabulary: inputs it sends, outputs it expects.
    Model,
    /// The SUT's vocabulary: commands it accepts, events it emits.
    System,
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Realm::Model => write!(f, "model"),
            Realm::System => write!(f, "system"),
        }
    }
}

/// Stable identity of an action kind, usable as a hash key.
///
/// Transitions are keyed on these, and the scheduler's four filter sets are
/// sets of these. The name doubles as the leading token of the textual form
/// for model actions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionType {
    name: &'static str,
    realm: Realm,
}

impl ActionType {
    pub const fn model(name: &'static str) -> Self {
        ActionType {
            name,
            realm: Realm::Model,
        }
    }

    pub const fn system(name: &'static str) -> Self {
        ActionType {
            name,
            realm: Realm::System,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn realm(&self) -> Realm {
        self.realm
    }

    pub fn is_model(&self) -> bool {
        self.realm == Realm::Model
    }

    pub fn is_system(&self) -> bool {
        self.realm == Realm::System
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.realm, self.name)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The reply sent to the runner when a model input has no enabled
/// refinement. Not part of any IOSTS alphabet; always deliverable.
pub const ERROR_ACTION: ActionType = ActionType::model("Error");

/// An action in the runner's vocabulary, with a primitive-field payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAction {
    ty: ActionType,
    fields: Vec<(String, Value)>,
}

impl ModelAction {
    /// Build a model action. `ty` must be a model-realm type.
    pub fn new(ty: ActionType, fields: Vec<(String, Value)>) -> Self {
        debug_assert!(ty.is_model(), "model action built with {ty:?}");
        ModelAction { ty, fields }
    }

    /// The distinguished refinement-error reply.
    pub fn error(reason: impl Into<String>) -> Self {
        ModelAction {
            ty: ERROR_ACTION,
            fields: vec![("reason".into(), Value::Str(reason.into()))],
        }
    }

    pub fn ty(&self) -> ActionType {
        self.ty
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn is_error(&self) -> bool {
        self.ty == ERROR_ACTION
    }
}

impl fmt::Display for ModelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty.name())?;
        if !self.fields.is_empty() {
            write!(f, "(")?;
            for (i, (name, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}={value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// An action in the SUT's vocabulary. The payload is opaque to the engine;
/// only the type identity is ever matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAction {
    ty: ActionType,
    fields: Vec<(String, String)>,
}

impl SystemAction {
    /// Build a system action. `ty` must be a system-realm type.
    pub fn new(ty: ActionType, fields: Vec<(String, String)>) -> Self {
        debug_assert!(ty.is_system(), "system action built with {ty:?}");
        SystemAction { ty, fields }
    }

    pub fn ty(&self) -> ActionType {
        self.ty
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for SystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty.name())
    }
}

/// Either side of the action taxonomy, as carried through transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Model(ModelAction),
    System(SystemAction),
}

impl Action {
    pub fn ty(&self) -> ActionType {
        match self {
            Action::Model(m) => m.ty(),
            Action::System(s) => s.ty(),
        }
    }

    pub fn as_model(&self) -> Option<&ModelAction> {
        match self {
            Action::Model(m) => Some(m),
            Action::System(_) => None,
        }
    }

    pub fn as_system(&self) -> Option<&SystemAction> {
        match self {
            Action::System(s) => Some(s),
            Action::Model(_) => None,
        }
    }
}

impl From<ModelAction> for Action {
    fn from(m: ModelAction) -> Self {
        Action::Model(m)
    }
}

impl From<SystemAction> for Action {
    fn from(s: SystemAction) -> Self {
        Action::System(s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Model(m) => write!(f, "{m}"),
            Action::System(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COFFEE: ActionType = ActionType::model("Coffee");
    const BREW: ActionType = ActionType::system("Brew");

    #[test]
    fn action_type_identity_is_name_and_realm() {
        assert_eq!(COFFEE, ActionType::model("Coffee"));
        assert_ne!(COFFEE, ActionType::system("Coffee"));
        assert_ne!(COFFEE, ActionType::model("Tea"));
    }

    #[test]
    fn model_action_field_lookup() {
        let a = ModelAction::new(
            COFFEE,
            vec![
                ("strength".into(), Value::Int(3)),
                ("milk".into(), Value::Bool(false)),
            ],
        );
        assert_eq!(a.field("strength"), Some(&Value::Int(3)));
        assert_eq!(a.field("sugar"), None);
    }

    #[test]
    fn error_action_is_distinguished() {
        let e = ModelAction::error("no refinement");
        assert!(e.is_error());
        assert_eq!(e.ty(), ERROR_ACTION);
        assert_eq!(
            e.field("reason"),
            Some(&Value::Str("no refinement".into()))
        );
    }

    #[test]
    fn action_ty_dispatches_over_both_realms() {
        let m: Action = ModelAction::new(COFFEE, vec![]).into();
        let s: Action = SystemAction::new(BREW, vec![]).into();
        assert_eq!(m.ty(), COFFEE);
        assert_eq!(s.ty(), BREW);
        assert!(m.as_model().is_some());
        assert!(m.as_system().is_none());
        assert!(s.as_system().is_some());
    }
}
