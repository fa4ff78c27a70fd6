//! Input-Output Symbolic Transition Systems.
//!
//! An IOSTS is a finite-state machine refining one model input: reactive
//! transitions consume an incoming action when their guard holds, proactive
//! transitions generate an outgoing action when theirs does. Guards and
//! updates are first-class callables over the instance's local variable
//! store.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::action::{Action, ActionType, Realm};
use crate::store::{StoreError, Value, VariableStore};

/// Index of a state within its owning IOSTS.
pub type StateId = usize;
/// Index of a transition within its owning IOSTS.
pub type TransitionId = usize;

/// A named vertex. Equality is by [`StateId`]; the name is diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub name: String,
}

/// Guard of a reactive transition, over the store and the incoming action.
pub type ReactiveGuard = Arc<dyn Fn(&VariableStore, &Action) -> Result<bool, StoreError> + Send + Sync>;
/// Guard of a proactive transition, over the store alone.
pub type ProactiveGuard = Arc<dyn Fn(&VariableStore) -> Result<bool, StoreError> + Send + Sync>;
/// Update run when a transition fires; sees the consumed or generated action.
pub type UpdateFn = Arc<dyn Fn(&mut VariableStore, &Action) -> Result<(), StoreError> + Send + Sync>;
/// Generator of a proactive transition's outgoing action.
pub type GenerateFn = Arc<dyn Fn(&VariableStore) -> Result<Action, StoreError> + Send + Sync>;

/// The two transition flavors. Function values compare by reference
/// identity only; transitions are therefore identified by index.
#[derive(Clone)]
pub enum TransitionKind {
    Reactive {
        guard: ReactiveGuard,
        update: UpdateFn,
    },
    Proactive {
        guard: ProactiveGuard,
        update: UpdateFn,
        generate: GenerateFn,
    },
}

/// An edge between two states, keyed on an action type.
#[derive(Clone)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    pub action_type: ActionType,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn is_reactive(&self) -> bool {
        matches!(self.kind, TransitionKind::Reactive { .. })
    }

    pub fn is_proactive(&self) -> bool {
        matches!(self.kind, TransitionKind::Proactive { .. })
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavor = if self.is_reactive() {
            "reactive"
        } else {
            "proactive"
        };
        write!(
            f,
            "S{} --{flavor}({:?})--> S{}",
            self.from, self.action_type, self.to
        )
    }
}

#[derive(Debug, Error)]
pub enum IostsError {
    #[error("IOSTS '{name}' has no states")]
    NoStates { name: String },
    #[error("IOSTS '{name}' has no initial state")]
    NoInitialState { name: String },
    #[error("state index {state} out of range in IOSTS '{name}' ({count} states)")]
    UnknownState {
        name: String,
        state: StateId,
        count: usize,
    },
    #[error("transition {transition} is not enabled in state '{state}' of IOSTS '{name}'")]
    IllegalTransition {
        name: String,
        transition: TransitionId,
        state: String,
    },
    #[error("generator of transition {transition} in IOSTS '{name}' produced '{got}', keyed on '{expected}'")]
    GeneratedTypeMismatch {
        name: String,
        transition: TransitionId,
        expected: ActionType,
        got: ActionType,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One refinement: states, transitions, local variables, and the current
/// position of the traversal.
pub struct Iosts {
    name: String,
    states: Vec<State>,
    initial: StateId,
    current: StateId,
    transitions: Vec<Transition>,
    vars: VariableStore,
    refined_inputs: Vec<ActionType>,
}

impl Iosts {
    pub fn builder(name: impl Into<String>) -> IostsBuilder {
        IostsBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    pub fn current_state_name(&self) -> &str {
        &self.states[self.current].name
    }

    pub fn at_initial(&self) -> bool {
        self.current == self.initial
    }

    pub fn vars(&self) -> &VariableStore {
        &self.vars
    }

    /// The model input this IOSTS refines, when exactly one distinct
    /// reactive model-action type appears across its transitions.
    pub fn refined_input(&self) -> Option<ActionType> {
        match self.refined_inputs.as_slice() {
            [unique] => Some(*unique),
            _ => None,
        }
    }

    /// All distinct reactive model-action types (diagnostics for the
    /// ill-formed case).
    pub fn refined_inputs(&self) -> &[ActionType] {
        &self.refined_inputs
    }

    /// Reactive transitions out of the current state keyed on the action's
    /// exact type whose guard accepts the store/action pair.
    pub fn enabled_reactive(&self, action: &Action) -> Result<Vec<TransitionId>, StoreError> {
        let mut enabled = Vec::new();
        for (id, t) in self.transitions.iter().enumerate() {
            if t.from != self.current || t.action_type != action.ty() {
                continue;
            }
            if let TransitionKind::Reactive { guard, .. } = &t.kind {
                if guard(&self.vars, action)? {
                    enabled.push(id);
                }
            }
        }
        Ok(enabled)
    }

    /// Proactive transitions out of the current state whose guard accepts
    /// the store.
    pub fn enabled_proactive(&self) -> Result<Vec<TransitionId>, StoreError> {
        let mut enabled = Vec::new();
        for (id, t) in self.transitions.iter().enumerate() {
            if t.from != self.current {
                continue;
            }
            if let TransitionKind::Proactive { guard, .. } = &t.kind {
                if guard(&self.vars)? {
                    enabled.push(id);
                }
            }
        }
        Ok(enabled)
    }

    /// Consume `action` through transition `t`.
    ///
    /// Precondition: `t` is in `enabled_reactive(action)`; violation is
    /// [`IostsError::IllegalTransition`]. The update runs before the state
    /// moves, so a failing update leaves the current state untouched.
    pub fn fire_reactive(&mut self, action: &Action, t: TransitionId) -> Result<(), IostsError> {
        if !self.enabled_reactive(action)?.contains(&t) {
            return Err(self.illegal(t));
        }
        let transition = self.transitions[t].clone();
        let TransitionKind::Reactive { update, .. } = &transition.kind else {
            return Err(self.illegal(t));
        };
        update(&mut self.vars, action)?;
        self.current = transition.to;
        Ok(())
    }

    /// Fire proactive transition `t`, returning the generated action.
    ///
    /// The observable order is: generate, then update (which sees the
    /// generated action), then move.
    pub fn fire_proactive(&mut self, t: TransitionId) -> Result<Action, IostsError> {
        if !self.enabled_proactive()?.contains(&t) {
            return Err(self.illegal(t));
        }
        let transition = self.transitions[t].clone();
        let TransitionKind::Proactive {
            update, generate, ..
        } = &transition.kind
        else {
            return Err(self.illegal(t));
        };
        let action = generate(&self.vars)?;
        if action.ty() != transition.action_type {
            return Err(IostsError::GeneratedTypeMismatch {
                name: self.name.clone(),
                transition: t,
                expected: transition.action_type,
                got: action.ty(),
            });
        }
        update(&mut self.vars, &action)?;
        self.current = transition.to;
        Ok(action)
    }

    fn illegal(&self, t: TransitionId) -> IostsError {
        IostsError::IllegalTransition {
            name: self.name.clone(),
            transition: t,
            state: self.current_state_name().to_owned(),
        }
    }
}

impl fmt::Debug for Iosts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iosts")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("transitions", &self.transitions.len())
            .field("current", &self.current_state_name())
            .finish()
    }
}

/// Incremental construction of an [`Iosts`].
///
/// States and transitions are added by index, in the style of an automaton
/// builder; `build` validates endpoints and computes the refined input.
pub struct IostsBuilder {
    name: String,
    states: Vec<State>,
    initial: Option<StateId>,
    transitions: Vec<Transition>,
    vars: VariableStore,
    var_error: Option<StoreError>,
}

impl IostsBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        IostsBuilder {
            name: name.into(),
            states: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            vars: VariableStore::new(),
            var_error: None,
        }
    }

    /// Add a state and return its id. The first state added is the initial
    /// state unless [`initial`](Self::initial) overrides it.
    pub fn state(&mut self, name: impl Into<String>) -> StateId {
        let id = self.states.len();
        self.states.push(State { name: name.into() });
        if self.initial.is_none() {
            self.initial = Some(id);
        }
        id
    }

    pub fn initial(&mut self, state: StateId) -> &mut Self {
        self.initial = Some(state);
        self
    }

    /// Seed a local variable. Errors surface at `build`.
    pub fn variable(&mut self, name: &str, value: Value) -> &mut Self {
        if let Err(e) = self.vars.set(name, value) {
            self.var_error.get_or_insert(e);
        }
        self
    }

    /// Add a reactive transition keyed on `ty`.
    pub fn reactive<G, U>(
        &mut self,
        from: StateId,
        to: StateId,
        ty: ActionType,
        guard: G,
        update: U,
    ) -> TransitionId
    where
        G: Fn(&VariableStore, &Action) -> Result<bool, StoreError> + Send + Sync + 'static,
        U: Fn(&mut VariableStore, &Action) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        let id = self.transitions.len();
        self.transitions.push(Transition {
            from,
            to,
            action_type: ty,
            kind: TransitionKind::Reactive {
                guard: Arc::new(guard),
                update: Arc::new(update),
            },
        });
        id
    }

    /// Add a proactive transition keyed on `ty`.
    pub fn proactive<G, N, U>(
        &mut self,
        from: StateId,
        to: StateId,
        ty: ActionType,
        guard: G,
        generate: N,
        update: U,
    ) -> TransitionId
    where
        G: Fn(&VariableStore) -> Result<bool, StoreError> + Send + Sync + 'static,
        N: Fn(&VariableStore) -> Result<Action, StoreError> + Send + Sync + 'static,
        U: Fn(&mut VariableStore, &Action) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        let id = self.transitions.len();
        self.transitions.push(Transition {
            from,
            to,
            action_type: ty,
            kind: TransitionKind::Proactive {
                guard: Arc::new(guard),
                generate: Arc::new(generate),
                update: Arc::new(update),
            },
        });
        id
    }

    pub fn build(self) -> Result<Iosts, IostsError> {
        if let Some(e) = self.var_error {
            return Err(e.into());
        }
        if self.states.is_empty() {
            return Err(IostsError::NoStates { name: self.name });
        }
        let initial = self.initial.ok_or(IostsError::NoInitialState {
            name: self.name.clone(),
        })?;
        let count = self.states.len();
        if initial >= count {
            return Err(IostsError::UnknownState {
                name: self.name,
                state: initial,
                count,
            });
        }
        for t in &self.transitions {
            for endpoint in [t.from, t.to] {
                if endpoint >= count {
                    return Err(IostsError::UnknownState {
                        name: self.name,
                        state: endpoint,
                        count,
                    });
                }
            }
        }

        let mut refined_inputs: Vec<ActionType> = Vec::new();
        for t in &self.transitions {
            if t.is_reactive()
                && t.action_type.realm() == Realm::Model
                && !refined_inputs.contains(&t.action_type)
            {
                refined_inputs.push(t.action_type);
            }
        }
        if refined_inputs.len() != 1 {
            warn!(
                iosts = %self.name,
                found = refined_inputs.len(),
                "IOSTS does not refine exactly one model input"
            );
        }

        Ok(Iosts {
            name: self.name,
            states: self.states,
            initial,
            current: initial,
            transitions: self.transitions,
            vars: self.vars,
            refined_inputs,
        })
    }
}
