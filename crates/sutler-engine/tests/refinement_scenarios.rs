//! End-to-end refinement scenarios driven through the public scheduler API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use sutler_engine::{EngineError, EngineOptions, Scheduler};
use sutler_iosts::{ActionType, Iosts, ModelAction, SystemAction, Value};

const IN_A: ActionType = ActionType::model("InA");
const OUT_B: ActionType = ActionType::model("OutB");
const OUT_OK: ActionType = ActionType::model("Ok");
const IN_Z: ActionType = ActionType::model("InZ");
const CMD_C: ActionType = ActionType::system("CmdC");
const EV_D: ActionType = ActionType::system("EvD");

#[derive(Clone, Default)]
struct Probe {
    outputs: Arc<Mutex<Vec<ModelAction>>>,
    commands: Arc<Mutex<Vec<SystemAction>>>,
}

impl Probe {
    fn outputs(&self) -> Vec<ModelAction> {
        self.outputs.lock().unwrap().clone()
    }

    fn commands(&self) -> Vec<SystemAction> {
        self.commands.lock().unwrap().clone()
    }
}

fn scheduler_with_seed(probe: &Probe, seed: u64) -> Scheduler {
    let outputs = Arc::clone(&probe.outputs);
    let commands = Arc::clone(&probe.commands);
    Scheduler::with_seed(
        EngineOptions::default(),
        Box::new(move |o: &ModelAction| outputs.lock().unwrap().push(o.clone())),
        Box::new(move |c: &SystemAction| commands.lock().unwrap().push(c.clone())),
        seed,
    )
    .unwrap()
}

fn scheduler(probe: &Probe) -> Scheduler {
    scheduler_with_seed(probe, 11)
}

fn input(ty: ActionType) -> ModelAction {
    ModelAction::new(ty, vec![])
}

#[test]
fn happy_refinement_produces_one_output_and_closes() {
    // S0 --reactive(InA)--> S1 --proactive(OutB)--> S0
    let mut b = Iosts::builder("happy");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.variable("x", Value::Int(0));
    b.reactive(s0, s1, IN_A, |_, _| Ok(true), |vars, action| {
        if let Some(Value::Int(x)) = action.as_model().and_then(|m| m.field("x")) {
            vars.set("x", Value::Int(*x))?;
        }
        Ok(())
    });
    b.proactive(
        s1,
        s0,
        OUT_B,
        |_| Ok(true),
        |vars| {
            let x = vars.get_int("x")?;
            Ok(ModelAction::new(OUT_B, vec![("x".into(), Value::Int(x))]).into())
        },
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(ModelAction::new(IN_A, vec![("x".into(), Value::Int(1))]));
    scheduler.tick().unwrap();

    let outputs = probe.outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].ty(), OUT_B);
    assert_eq!(outputs[0].field("x"), Some(&Value::Int(1)));
    assert_eq!(scheduler.current_system(), None);
    assert!(scheduler.is_quiescent().unwrap());
}

/// S0 --reactive(InA)--> S1 --proactive(CmdC)--> S2 --reactive(EvD)--> S0,
/// plus S0 --proactive(Ok)--> S0 held shut by its guard.
fn event_driven() -> Iosts {
    let mut b = Iosts::builder("event-driven");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    let s2 = b.state("S2");
    b.variable("announce", Value::Bool(false));
    b.reactive(s0, s1, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        s1,
        s2,
        CMD_C,
        |_| Ok(true),
        |_| Ok(SystemAction::new(CMD_C, vec![]).into()),
        |_, _| Ok(()),
    );
    b.reactive(s2, s0, EV_D, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        s0,
        s0,
        OUT_OK,
        |vars| vars.get_bool("announce"),
        |_| Ok(ModelAction::new(OUT_OK, vec![]).into()),
        |_, _| Ok(()),
    );
    b.build().unwrap()
}

#[test]
fn event_drives_commands_and_closes_silently() {
    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(event_driven()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    scheduler.tick().unwrap();
    assert_eq!(probe.commands().len(), 1);
    assert_eq!(probe.commands()[0].ty(), CMD_C);
    assert!(probe.outputs().is_empty());
    assert_eq!(scheduler.current_system(), Some("event-driven".into()));

    scheduler.handle_system_event(SystemAction::new(EV_D, vec![]));
    scheduler.tick().unwrap();
    assert_eq!(probe.commands().len(), 1, "no further command");
    assert!(probe.outputs().is_empty(), "no model output");
    assert_eq!(scheduler.current_system(), None);
}

#[test]
fn unmatched_input_yields_exactly_one_error_reply() {
    // InZ is in the alphabet but its only transition is guard-closed.
    let mut b = Iosts::builder("guarded");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.reactive(s0, s1, IN_Z, |_, _| Ok(false), |_, _| Ok(()));
    b.proactive(
        s1,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_Z));
    scheduler.tick().unwrap();

    let outputs = probe.outputs();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].is_error());
    assert_eq!(scheduler.pending_inputs(), 0);
    assert_eq!(scheduler.current_system(), None);
}

#[test]
fn inputs_outside_the_alphabet_are_dropped_silently() {
    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(event_driven()).unwrap();

    scheduler.handle_model_input(input(ActionType::model("InY")));
    assert_eq!(scheduler.pending_inputs(), 0);
    scheduler.tick().unwrap();
    assert!(probe.outputs().is_empty());
    assert!(probe.commands().is_empty());
}

/// One of a pair: S0 --proactive(cmd)--> S1 --reactive(ev)--> S0, with the
/// proactive firing once only so reopening does not race the other system.
fn eager(name: &str, refined: ActionType, cmd: ActionType, ev: ActionType) -> Iosts {
    let mut b = Iosts::builder(name);
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.variable("fired", Value::Bool(false));
    b.proactive(
        s0,
        s1,
        cmd,
        |vars| Ok(!vars.get_bool("fired")?),
        move |_| Ok(SystemAction::new(cmd, vec![]).into()),
        |vars, _| vars.set("fired", Value::Bool(true)),
    );
    b.reactive(s1, s0, ev, |_, _| Ok(true), |_, _| Ok(()));
    // The refined model input, consumed only from S1.
    b.reactive(s1, s1, refined, |_, _| Ok(true), |_, _| Ok(()));
    b.build().unwrap()
}

const IN_ONE: ActionType = ActionType::model("InOne");
const IN_TWO: ActionType = ActionType::model("InTwo");
const CMD_ONE: ActionType = ActionType::system("CmdOne");
const CMD_TWO: ActionType = ActionType::system("CmdTwo");
const EV_ONE: ActionType = ActionType::system("EvOne");
const EV_TWO: ActionType = ActionType::system("EvTwo");

#[test]
fn atomic_lockout_holds_until_the_refinement_closes() {
    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler
        .add_system(eager("one", IN_ONE, CMD_ONE, EV_ONE))
        .unwrap();
    scheduler
        .add_system(eager("two", IN_TWO, CMD_TWO, EV_TWO))
        .unwrap();

    // Both proactive transitions are enabled; only one may fire, and the
    // other stays locked out even though its guard stays true.
    scheduler.tick().unwrap();
    let first = probe.commands();
    assert_eq!(first.len(), 1);
    let winner = scheduler.current_system().expect("one refinement open");

    scheduler.tick().unwrap();
    assert_eq!(probe.commands().len(), 1, "lockout while mid-refinement");
    assert_eq!(scheduler.current_system(), Some(winner.clone()));

    // Close the winner; the loser's pending proactive then fires.
    let closing_event = if winner == "one" { EV_ONE } else { EV_TWO };
    scheduler.handle_system_event(SystemAction::new(closing_event, vec![]));
    scheduler.tick().unwrap();

    let commands = probe.commands();
    assert_eq!(commands.len(), 2);
    assert_ne!(commands[0].ty(), commands[1].ty());
    assert_eq!(
        scheduler.current_system().as_deref(),
        Some(if winner == "one" { "two" } else { "one" })
    );
}

#[test]
fn nondeterministic_choice_is_not_starved_across_seeds() {
    let mut winners = HashSet::new();
    for seed in 0..64 {
        let probe = Probe::default();
        let scheduler = scheduler_with_seed(&probe, seed);
        scheduler
            .add_system(eager("one", IN_ONE, CMD_ONE, EV_ONE))
            .unwrap();
        scheduler
            .add_system(eager("two", IN_TWO, CMD_TWO, EV_TWO))
            .unwrap();
        scheduler.tick().unwrap();
        winners.insert(probe.commands()[0].ty());
    }
    assert_eq!(
        winners,
        HashSet::from([CMD_ONE, CMD_TWO]),
        "both candidates must be observed under a uniform source"
    );
}

#[test]
fn proactive_phase_precedes_input_consumption() {
    // S0 carries a one-shot proactive and the reactive for InA; with both
    // a proactive candidate and a queued input, the proactive fires first.
    let mut b = Iosts::builder("phased");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.variable("greeted", Value::Bool(false));
    b.proactive(
        s0,
        s0,
        OUT_OK,
        |vars| Ok(!vars.get_bool("greeted")?),
        |_| Ok(ModelAction::new(OUT_OK, vec![]).into()),
        |vars, _| vars.set("greeted", Value::Bool(true)),
    );
    b.reactive(s0, s1, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        s1,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    scheduler.tick().unwrap();

    let outputs: Vec<ActionType> = probe.outputs().iter().map(|o| o.ty()).collect();
    assert_eq!(outputs, vec![OUT_OK, OUT_B]);
}

#[test]
fn events_are_consumed_before_inputs() {
    // From S0 both an event and an input can fire; with both queued, the
    // event goes first.
    let mut b = Iosts::builder("ordered");
    let s0 = b.state("S0");
    let se = b.state("SE");
    let si = b.state("SI");
    b.reactive(s0, se, EV_D, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        se,
        s0,
        OUT_OK,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_OK, vec![]).into()),
        |_, _| Ok(()),
    );
    b.reactive(s0, si, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        si,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    scheduler.handle_system_event(SystemAction::new(EV_D, vec![]));
    scheduler.tick().unwrap();

    let outputs: Vec<ActionType> = probe.outputs().iter().map(|o| o.ty()).collect();
    assert_eq!(outputs, vec![OUT_OK, OUT_B]);
}

#[test]
fn events_nothing_consumes_are_discarded_without_reply() {
    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(event_driven()).unwrap();

    // EvD is in the alphabet but only consumable from S2.
    scheduler.handle_system_event(SystemAction::new(EV_D, vec![]));
    scheduler.tick().unwrap();
    assert!(probe.outputs().is_empty());
    assert!(probe.commands().is_empty());
    assert_eq!(scheduler.pending_events(), 0);
    assert_eq!(scheduler.current_system(), None);
}

#[test]
fn discarded_event_does_not_let_inputs_overtake_later_events() {
    let mut b = Iosts::builder("reorder");
    let s0 = b.state("S0");
    let sx = b.state("SX");
    let se = b.state("SE");
    let si = b.state("SI");
    // EvOne is in the alphabet but only consumable from SX.
    b.reactive(sx, s0, EV_ONE, |_, _| Ok(true), |_, _| Ok(()));
    b.reactive(s0, se, EV_TWO, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        se,
        s0,
        OUT_OK,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_OK, vec![]).into()),
        |_, _| Ok(()),
    );
    b.reactive(s0, si, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        si,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    scheduler.handle_system_event(SystemAction::new(EV_ONE, vec![]));
    scheduler.handle_system_event(SystemAction::new(EV_TWO, vec![]));
    scheduler.tick().unwrap();

    // EvOne is discarded, but EvTwo still goes before the queued input.
    let outputs: Vec<ActionType> = probe.outputs().iter().map(|o| o.ty()).collect();
    assert_eq!(outputs, vec![OUT_OK, OUT_B]);
    assert_eq!(scheduler.pending_events(), 0);
    assert_eq!(scheduler.pending_inputs(), 0);
}

#[test]
fn reactive_guard_errors_retain_the_queued_element() {
    // The event guard reads an unbound variable; the erroring element and
    // everything behind it stay queued.
    let mut b = Iosts::builder("broken-event-guard");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.reactive(s0, s1, EV_D, |vars, _| vars.get_bool("missing"), |_, _| Ok(()));
    b.reactive(s0, s1, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        s1,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_system_event(SystemAction::new(EV_D, vec![]));
    scheduler.handle_model_input(input(IN_A));
    let err = scheduler.tick().unwrap_err();
    assert!(matches!(err, EngineError::Iosts(_)));
    assert_eq!(scheduler.pending_events(), 1);
    assert_eq!(scheduler.pending_inputs(), 1);
    assert_eq!(scheduler.current_system(), None);
    assert!(probe.outputs().is_empty());
}

#[test]
fn input_guard_errors_retain_the_queued_input() {
    let mut b = Iosts::builder("broken-input-guard");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.reactive(s0, s1, IN_A, |vars, _| vars.get_bool("missing"), |_, _| Ok(()));
    b.proactive(
        s1,
        s0,
        OUT_B,
        |_| Ok(true),
        |_| Ok(ModelAction::new(OUT_B, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    let err = scheduler.tick().unwrap_err();
    assert!(matches!(err, EngineError::Iosts(_)));
    assert_eq!(scheduler.pending_inputs(), 1);
    assert!(probe.outputs().is_empty());
}

#[test]
fn guard_errors_abort_the_tick_and_retain_the_queue() {
    let mut b = Iosts::builder("broken");
    let s0 = b.state("S0");
    let s1 = b.state("S1");
    b.reactive(s0, s1, IN_A, |_, _| Ok(true), |_, _| Ok(()));
    // Proactive guard reads a variable that is never bound.
    b.proactive(
        s0,
        s0,
        OUT_OK,
        |vars| vars.get_bool("missing"),
        |_| Ok(ModelAction::new(OUT_OK, vec![]).into()),
        |_, _| Ok(()),
    );

    let probe = Probe::default();
    let scheduler = scheduler(&probe);
    scheduler.add_system(b.build().unwrap()).unwrap();

    scheduler.handle_model_input(input(IN_A));
    let err = scheduler.tick().unwrap_err();
    assert!(matches!(err, EngineError::Iosts(_)));
    // The guard raised before anything was dequeued or fired.
    assert_eq!(scheduler.pending_inputs(), 1);
    assert_eq!(scheduler.current_system(), None);
    assert!(probe.outputs().is_empty());
}

#[test]
fn current_system_mirrors_off_initial_states_across_seeds() {
    // Invariant: CurrentSystem is nil exactly when every registered IOSTS
    // sits at its initial state.
    for seed in 0..16 {
        let probe = Probe::default();
        let scheduler = scheduler_with_seed(&probe, seed);
        scheduler.add_system(event_driven()).unwrap();
        scheduler
            .add_system(eager("one", IN_ONE, CMD_ONE, EV_ONE))
            .unwrap();

        let steps: Vec<Box<dyn Fn(&Scheduler)>> = vec![
            Box::new(|s| s.handle_model_input(input(IN_A))),
            Box::new(|s| s.handle_system_event(SystemAction::new(EV_ONE, vec![]))),
            Box::new(|s| s.handle_system_event(SystemAction::new(EV_D, vec![]))),
        ];
        for step in &steps {
            step(&scheduler);
            scheduler.tick().unwrap();

            let all_initial = scheduler
                .system_names()
                .iter()
                .all(|name| scheduler.system_at_initial(name).unwrap());
            assert_eq!(scheduler.current_system().is_none(), all_initial);
            // Quiescence after a clean tick: both queues drained, nothing
            // proactive enabled in scope.
            assert!(scheduler.is_quiescent().unwrap());
        }
    }
}
