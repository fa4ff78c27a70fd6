//! The refinement scheduler.
//!
//! Owns the registered IOSTS set, the two FIFO queues, and the
//! current-refinement pointer. Dispatch is a fixed-point loop over three
//! strictly ordered phases: proactive firings first, then one queued
//! system event, then one queued model input; the loop re-runs until
//! quiescence. Once any transition fires in an IOSTS, that instance is the
//! only one allowed to fire until it returns to its initial state.
//!
//! Every mutating operation takes the single scheduler-wide lock, and
//! `tick` holds it for its entire fixed-point run. Output and command
//! callbacks are invoked under the lock and must not call back into the
//! scheduler.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use sutler_iosts::{Action, ActionType, Iosts, ModelAction, SystemAction, TransitionId};

use crate::config::EngineOptions;
use crate::error::EngineError;

/// Receives serialized-bound model outputs (normally the runner transport).
pub trait ModelOutputSink: Send + Sync {
    fn deliver(&self, output: &ModelAction);
}

impl<F: Fn(&ModelAction) + Send + Sync> ModelOutputSink for F {
    fn deliver(&self, output: &ModelAction) {
        self(output)
    }
}

/// Executes system commands against the SUT, synchronously from `tick`.
pub trait SystemCommandHandler: Send + Sync {
    fn execute(&self, command: &SystemAction);
}

impl<F: Fn(&SystemAction) + Send + Sync> SystemCommandHandler for F {
    fn execute(&self, command: &SystemAction) {
        self(command)
    }
}

/// The four cached action-type filter sets: the image of all registered
/// transitions under the (reactive/proactive) × (model/system)
/// classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilters {
    pub model_inputs: HashSet<ActionType>,
    pub model_outputs: HashSet<ActionType>,
    pub system_commands: HashSet<ActionType>,
    pub system_events: HashSet<ActionType>,
}

impl ActionFilters {
    fn index(systems: &[Iosts]) -> Self {
        let mut filters = ActionFilters::default();
        for system in systems {
            for t in system.transitions() {
                let set = match (t.is_reactive(), t.action_type.is_model()) {
                    (true, true) => &mut filters.model_inputs,
                    (false, true) => &mut filters.model_outputs,
                    (true, false) => &mut filters.system_events,
                    (false, false) => &mut filters.system_commands,
                };
                set.insert(t.action_type);
            }
        }
        filters
    }
}

struct Inner {
    systems: Vec<Iosts>,
    filters: ActionFilters,
    inputs: VecDeque<ModelAction>,
    events: VecDeque<SystemAction>,
    current: Option<usize>,
    rng: StdRng,
}

impl Inner {
    /// Candidate aggregation scope: the active IOSTS alone while a
    /// refinement is in progress, all registered systems otherwise.
    fn scope(&self) -> Vec<usize> {
        match self.current {
            Some(idx) => vec![idx],
            None => (0..self.systems.len()).collect(),
        }
    }
}

/// Dispatches model inputs and system events across the registered IOSTS.
pub struct Scheduler {
    inner: Mutex<Inner>,
    output: Box<dyn ModelOutputSink>,
    commands: Box<dyn SystemCommandHandler>,
    options: EngineOptions,
}

impl Scheduler {
    pub fn new(
        options: EngineOptions,
        output: Box<dyn ModelOutputSink>,
        commands: Box<dyn SystemCommandHandler>,
    ) -> Result<Self, EngineError> {
        Self::build(options, output, commands, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a deterministic random source, so
    /// nondeterministic choices replay under a fixed seed.
    pub fn with_seed(
        options: EngineOptions,
        output: Box<dyn ModelOutputSink>,
        commands: Box<dyn SystemCommandHandler>,
        seed: u64,
    ) -> Result<Self, EngineError> {
        Self::build(options, output, commands, StdRng::seed_from_u64(seed))
    }

    fn build(
        options: EngineOptions,
        output: Box<dyn ModelOutputSink>,
        commands: Box<dyn SystemCommandHandler>,
        rng: StdRng,
    ) -> Result<Self, EngineError> {
        if !options.atomic_refinement {
            return Err(EngineError::AtomicRefinementRequired);
        }
        Ok(Scheduler {
            inner: Mutex::new(Inner {
                systems: Vec::new(),
                filters: ActionFilters::default(),
                inputs: VecDeque::new(),
                events: VecDeque::new(),
                current: None,
                rng,
            }),
            output,
            commands,
            options,
        })
    }

    /// Register an IOSTS and reindex the filter sets. Returns `false` when
    /// an instance of the same name is already registered. Instances that
    /// do not refine exactly one model input are rejected.
    pub fn add_system(&self, system: Iosts) -> Result<bool, EngineError> {
        if system.refined_input().is_none() {
            return Err(EngineError::IllFormedIosts {
                name: system.name().into(),
                found: system.refined_inputs().len(),
            });
        }
        let mut inner = self.locked();
        if inner.systems.iter().any(|s| s.name() == system.name()) {
            return Ok(false);
        }
        debug!(system = %system.name(), "registering IOSTS");
        inner.systems.push(system);
        inner.filters = ActionFilters::index(&inner.systems);
        Ok(true)
    }

    /// Deregister by name and reindex. Returns `false` when no such
    /// instance exists; removing the mid-refinement instance is an error.
    pub fn remove_system(&self, name: &str) -> Result<bool, EngineError> {
        let mut inner = self.locked();
        let Some(idx) = inner.systems.iter().position(|s| s.name() == name) else {
            return Ok(false);
        };
        if inner.current == Some(idx) {
            return Err(EngineError::SystemActive { name: name.into() });
        }
        inner.systems.remove(idx);
        if let Some(active) = inner.current {
            if active > idx {
                inner.current = Some(active - 1);
            }
        }
        inner.filters = ActionFilters::index(&inner.systems);
        debug!(system = name, "deregistered IOSTS");
        Ok(true)
    }

    /// Enqueue a model input. Inputs whose type no registered IOSTS reacts
    /// to are dropped without reply. Does not advance the scheduler; call
    /// [`tick`](Self::tick).
    pub fn handle_model_input(&self, input: ModelAction) {
        let mut inner = self.locked();
        if !inner.filters.model_inputs.contains(&input.ty()) {
            debug!(input = %input.ty(), "dropping model input outside refinement alphabet");
            return;
        }
        inner.inputs.push_back(input);
    }

    /// Enqueue a system event, symmetrically to `handle_model_input`.
    pub fn handle_system_event(&self, event: SystemAction) {
        let mut inner = self.locked();
        if !inner.filters.system_events.contains(&event.ty()) {
            debug!(event = %event.ty(), "dropping system event outside refinement alphabet");
            return;
        }
        inner.events.push_back(event);
    }

    /// Deliver a model output through the sink, subject to type filtering.
    /// The `Error` reply bypasses the filter.
    pub fn send_model_output(&self, output: &ModelAction) {
        let inner = self.locked();
        self.deliver_output(&inner.filters, output);
    }

    /// Deliver a system command through the handler, subject to filtering.
    pub fn send_system_command(&self, command: &SystemAction) {
        let inner = self.locked();
        self.deliver_command(&inner.filters, command);
    }

    /// Run dispatch to quiescence: fire enabled proactive transitions,
    /// consume queued events, then queued inputs, re-evaluating after every
    /// step until nothing more can happen.
    ///
    /// A guard or update error aborts the run; the element under
    /// evaluation and everything behind it stay queued, and
    /// `CurrentSystem` keeps its pre-firing value.
    pub fn tick(&self) -> Result<(), EngineError> {
        let mut inner = self.locked();
        loop {
            let progressed = self.step(&mut inner)?;
            if !progressed && inner.inputs.is_empty() && inner.events.is_empty() {
                return Ok(());
            }
        }
    }

    /// One pass over the three phases; stops at the first that progresses.
    fn step(&self, inner: &mut Inner) -> Result<bool, EngineError> {
        let scope = inner.scope();

        // Phase P: proactive firings take precedence over both queues.
        let mut candidates: Vec<(usize, TransitionId)> = Vec::new();
        for &idx in &scope {
            for t in inner.systems[idx].enabled_proactive()? {
                candidates.push((idx, t));
            }
        }
        if let Some((idx, t)) = choose(&mut inner.rng, &candidates) {
            let generated = self.fire_proactive(inner, idx, t)?;
            match generated {
                Action::Model(output) => self.deliver_output(&inner.filters, &output),
                Action::System(command) => self.deliver_command(&inner.filters, &command),
            }
            return Ok(true);
        }

        // Phase E: events are observations and precede new stimuli. The
        // front element stays queued until a firing or discard commits, so
        // a guard error leaves the queue untouched.
        if let Some(front) = inner.events.front() {
            let event: Action = front.clone().into();
            let mut candidates: Vec<(usize, TransitionId)> = Vec::new();
            for &idx in &scope {
                for t in inner.systems[idx].enabled_reactive(&event)? {
                    candidates.push((idx, t));
                }
            }
            if let Some((idx, t)) = choose(&mut inner.rng, &candidates) {
                self.fire_reactive(inner, idx, &event, t)?;
                inner.events.pop_front();
                return Ok(true);
            }
            // Nothing reacts: events are broadcast and may legitimately
            // have no refinement in the current state. Report no progress
            // so the next pass restarts at Phase P/E; an input must not
            // overtake an event still waiting behind this one.
            inner.events.pop_front();
            warn!(event = %event.ty(), "no refinement consumes event; discarding");
            return Ok(false);
        }

        // Phase I: the front input stays queued until its fate commits. A
        // model input with no enabled reaction is a refinement error;
        // reply immediately so the runner does not wait forever.
        if let Some(front) = inner.inputs.front() {
            let action: Action = front.clone().into();
            let mut candidates: Vec<(usize, TransitionId)> = Vec::new();
            for &idx in &scope {
                for t in inner.systems[idx].enabled_reactive(&action)? {
                    candidates.push((idx, t));
                }
            }
            if let Some((idx, t)) = choose(&mut inner.rng, &candidates) {
                self.fire_reactive(inner, idx, &action, t)?;
                inner.inputs.pop_front();
                return Ok(true);
            }
            inner.inputs.pop_front();
            warn!(input = %action.ty(), "no refinement enabled for model input");
            let reply =
                ModelAction::error(format!("no refinement enabled for input '{}'", action.ty()));
            self.deliver_output(&inner.filters, &reply);
            return Ok(true);
        }

        Ok(false)
    }

    fn fire_reactive(
        &self,
        inner: &mut Inner,
        idx: usize,
        action: &Action,
        t: TransitionId,
    ) -> Result<(), EngineError> {
        self.ensure_activatable(inner, idx)?;
        inner.systems[idx].fire_reactive(action, t)?;
        self.note_fired(inner, idx, t);
        Ok(())
    }

    fn fire_proactive(
        &self,
        inner: &mut Inner,
        idx: usize,
        t: TransitionId,
    ) -> Result<Action, EngineError> {
        self.ensure_activatable(inner, idx)?;
        let action = inner.systems[idx].fire_proactive(t)?;
        self.note_fired(inner, idx, t);
        Ok(action)
    }

    /// Defensive re-check of the atomicity rule; unreachable from `step`
    /// because the scope already restricts candidates to the active IOSTS.
    fn ensure_activatable(&self, inner: &Inner, idx: usize) -> Result<(), EngineError> {
        match inner.current {
            Some(active) if active != idx => Err(EngineError::SystemNotActivatable {
                name: inner.systems[idx].name().into(),
                active: inner.systems[active].name().into(),
            }),
            _ => Ok(()),
        }
    }

    /// Track the atomic-refinement pointer after a firing: the refinement
    /// closes when the just-advanced IOSTS is back at its initial state.
    fn note_fired(&self, inner: &mut Inner, idx: usize, t: TransitionId) {
        let at_initial = inner.systems[idx].at_initial();
        inner.current = if at_initial { None } else { Some(idx) };
        let system = &inner.systems[idx];
        if self.options.log_console_to_trace {
            info!(
                system = %system.name(),
                transition = t,
                state = %system.current_state_name(),
                closed = at_initial,
                "fired"
            );
        } else {
            debug!(
                system = %system.name(),
                transition = t,
                state = %system.current_state_name(),
                closed = at_initial,
                "fired"
            );
        }
    }

    fn deliver_output(&self, filters: &ActionFilters, output: &ModelAction) {
        if !output.is_error() && !filters.model_outputs.contains(&output.ty()) {
            warn!(output = %output.ty(), "dropping model output outside refinement alphabet");
            return;
        }
        if self.options.log_console_to_trace {
            info!(output = %output, "delivering model output");
        } else {
            debug!(output = %output, "delivering model output");
        }
        self.output.deliver(output);
    }

    fn deliver_command(&self, filters: &ActionFilters, command: &SystemAction) {
        if !filters.system_commands.contains(&command.ty()) {
            warn!(command = %command.ty(), "dropping system command outside refinement alphabet");
            return;
        }
        if self.options.log_console_to_trace {
            info!(command = %command, "executing system command");
        } else {
            debug!(command = %command, "executing system command");
        }
        self.commands.execute(command);
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Snapshot of the four filter sets.
    pub fn filters(&self) -> ActionFilters {
        self.locked().filters.clone()
    }

    /// Name of the IOSTS currently mid-refinement, if any.
    pub fn current_system(&self) -> Option<String> {
        let inner = self.locked();
        inner.current.map(|idx| inner.systems[idx].name().to_owned())
    }

    pub fn system_names(&self) -> Vec<String> {
        self.locked()
            .systems
            .iter()
            .map(|s| s.name().to_owned())
            .collect()
    }

    /// Current state name of the named IOSTS.
    pub fn system_state(&self, name: &str) -> Option<String> {
        self.locked()
            .systems
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.current_state_name().to_owned())
    }

    pub fn system_at_initial(&self, name: &str) -> Option<bool> {
        self.locked()
            .systems
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.at_initial())
    }

    pub fn pending_inputs(&self) -> usize {
        self.locked().inputs.len()
    }

    pub fn pending_events(&self) -> usize {
        self.locked().events.len()
    }

    /// Both queues empty and no proactive transition enabled in scope.
    pub fn is_quiescent(&self) -> Result<bool, EngineError> {
        let inner = self.locked();
        if !inner.inputs.is_empty() || !inner.events.is_empty() {
            return Ok(false);
        }
        for &idx in &inner.scope() {
            if !inner.systems[idx].enabled_proactive()?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Uniform choice across the whole candidate union.
fn choose<T: Copy>(rng: &mut StdRng, candidates: &[T]) -> Option<T> {
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0]),
        n => Some(candidates[rng.gen_range(0..n)]),
    }
}
