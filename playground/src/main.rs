//! Demo: refine the runner input `Order(strength)` into a `Brew` command,
//! wait for the stub SUT's `BrewDone`, and answer `Served(strength)`.
//!
//! The stub SUT only records commands here: the command handler runs under
//! the scheduler lock, so events are fed back from the outer loop instead
//! of from inside the callback.

use std::sync::{Arc, Mutex};

use tracing::info;

use sutler_engine::{EngineOptions, Scheduler};
use sutler_iosts::{
    ActionCodec, ActionSchema, ActionType, Iosts, ModelAction, SystemAction, Value, ValueKind,
};

const ORDER: ActionType = ActionType::model("Order");
const SERVED: ActionType = ActionType::model("Served");
const BREW: ActionType = ActionType::system("Brew");
const DONE: ActionType = ActionType::system("BrewDone");

fn codec() -> ActionCodec {
    let mut codec = ActionCodec::new();
    codec
        .register(ActionSchema::new(ORDER, &[("strength", ValueKind::Int)]))
        .expect("fresh codec");
    codec
        .register(ActionSchema::new(SERVED, &[("strength", ValueKind::Int)]))
        .expect("fresh codec");
    codec
}

fn coffee_machine() -> Iosts {
    let mut b = Iosts::builder("coffee-machine");
    let idle = b.state("idle");
    let busy = b.state("busy");
    let waiting = b.state("waiting");
    let done = b.state("done");
    b.variable("strength", Value::Int(0));
    b.reactive(idle, busy, ORDER, |_, _| Ok(true), |vars, action| {
        if let Some(Value::Int(n)) = action.as_model().and_then(|m| m.field("strength")) {
            vars.set("strength", Value::Int(*n))?;
        }
        Ok(())
    });
    b.proactive(
        busy,
        waiting,
        BREW,
        |_| Ok(true),
        |vars| {
            let strength = vars.get_int("strength")?;
            Ok(SystemAction::new(BREW, vec![("strength".into(), strength.to_string())]).into())
        },
        |_, _| Ok(()),
    );
    b.reactive(waiting, done, DONE, |_, _| Ok(true), |_, _| Ok(()));
    b.proactive(
        done,
        idle,
        SERVED,
        |_| Ok(true),
        |vars| {
            let strength = vars.get_int("strength")?;
            Ok(ModelAction::new(SERVED, vec![("strength".into(), Value::Int(strength))]).into())
        },
        |_, _| Ok(()),
    );
    b.build().expect("well-formed machine")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let codec = codec();
    let pending_commands: Arc<Mutex<Vec<SystemAction>>> = Arc::default();

    let wire = codec.clone();
    let sut_queue = Arc::clone(&pending_commands);
    let scheduler = Scheduler::with_seed(
        EngineOptions {
            log_console_to_trace: true,
            ..EngineOptions::default()
        },
        Box::new(move |output: &ModelAction| {
            let line = wire.serialize(output).unwrap_or_else(|_| output.to_string());
            info!(%line, "-> runner");
        }),
        Box::new(move |command: &SystemAction| {
            info!(command = %command, "-> sut");
            sut_queue.lock().expect("sut queue").push(command.clone());
        }),
        42,
    )
    .expect("atomic refinement enabled");
    scheduler
        .add_system(coffee_machine())
        .expect("machine registers");

    for line in ["Order(2)", "Order(5)"] {
        info!(%line, "<- runner");
        let input = codec.deserialize(line).expect("well-formed demo input");
        scheduler.handle_model_input(input);
        scheduler.tick().expect("dispatch");

        // The stub SUT finishes every brew it was asked for.
        let brews: Vec<SystemAction> = pending_commands.lock().expect("sut queue").drain(..).collect();
        for brew in brews {
            info!(command = %brew, "<- sut");
            scheduler.handle_system_event(SystemAction::new(DONE, vec![]));
            scheduler.tick().expect("dispatch");
        }
    }

    info!(
        quiescent = scheduler.is_quiescent().expect("guards are total"),
        "demo finished"
    );
}
