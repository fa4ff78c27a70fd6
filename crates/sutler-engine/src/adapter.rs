//! Facade binding the scheduler to the runner transport and the SUT.
//!
//! Incoming wire actions on the bound input channel are decoded and fed to
//! the scheduler; model outputs are encoded and written back on the output
//! channel. The SUT side stays callback-shaped: commands leave through the
//! embedder's [`SystemCommandHandler`], observed events come back through
//! [`Adapter::handle_system_event`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use sutler_connector::{
    ChannelBinding, Direction, RunnerConnector, RunnerListener, TorxAction,
};
use sutler_iosts::{ActionCodec, ModelAction, SystemAction};

use crate::config::EngineOptions;
use crate::error::EngineError;
use crate::scheduler::{ModelOutputSink, Scheduler, SystemCommandHandler};

/// The assembled adapter: scheduler + codec + runner transport.
pub struct Adapter {
    scheduler: Arc<Scheduler>,
    connector: RunnerConnector,
}

impl Adapter {
    pub fn new(
        options: EngineOptions,
        codec: ActionCodec,
        binding: ChannelBinding,
        commands: Box<dyn SystemCommandHandler>,
    ) -> Result<Self, EngineError> {
        Self::build(options, codec, binding, commands, None)
    }

    pub fn with_seed(
        options: EngineOptions,
        codec: ActionCodec,
        binding: ChannelBinding,
        commands: Box<dyn SystemCommandHandler>,
        seed: u64,
    ) -> Result<Self, EngineError> {
        Self::build(options, codec, binding, commands, Some(seed))
    }

    fn build(
        options: EngineOptions,
        codec: ActionCodec,
        binding: ChannelBinding,
        commands: Box<dyn SystemCommandHandler>,
        seed: Option<u64>,
    ) -> Result<Self, EngineError> {
        let connector = RunnerConnector::new(binding.clone());
        let sink = WireSink {
            connector: connector.clone(),
            codec: codec.clone(),
            channel: binding.output.clone(),
        };
        let scheduler = match seed {
            Some(seed) => Scheduler::with_seed(options, Box::new(sink), commands, seed)?,
            None => Scheduler::new(options, Box::new(sink), commands)?,
        };
        let scheduler = Arc::new(scheduler);
        connector.set_listener(Arc::new(RunnerBridge {
            scheduler: Arc::clone(&scheduler),
            codec,
            input_channel: binding.input,
        }));
        Ok(Adapter {
            scheduler,
            connector,
        })
    }

    /// The scheduler, for IOSTS registration and diagnostics.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Start accepting the runner's connection.
    pub fn start(&self) -> Result<(), EngineError> {
        self.connector.start().map_err(EngineError::from)
    }

    /// Release the transport. Idempotent.
    pub fn stop(&self) {
        self.connector.stop();
    }

    /// The bound runner port (after `start`).
    pub fn local_port(&self) -> u16 {
        self.connector.local_port()
    }

    /// Deliver an observed SUT event and advance the scheduler.
    pub fn handle_system_event(&self, event: SystemAction) -> Result<(), EngineError> {
        self.scheduler.handle_system_event(event);
        self.scheduler.tick()
    }
}

/// Encodes model outputs and writes them on the runner wire.
struct WireSink {
    connector: RunnerConnector,
    codec: ActionCodec,
    channel: String,
}

impl ModelOutputSink for WireSink {
    fn deliver(&self, output: &ModelAction) {
        let data = match self.codec.serialize(output) {
            Ok(data) => data,
            Err(e) => {
                error!(output = %output, error = %e, "model output is not encodable");
                return;
            }
        };
        let action = TorxAction::output(self.channel.clone(), data);
        if let Err(e) = self.connector.send_output(&action) {
            warn!(output = %output, error = %e, "could not deliver model output to runner");
        }
    }
}

/// Decodes runner wire actions and drives the scheduler.
struct RunnerBridge {
    scheduler: Arc<Scheduler>,
    codec: ActionCodec,
    input_channel: String,
}

impl RunnerListener for RunnerBridge {
    fn started(&self) {
        info!("runner connected");
    }

    fn input_received(&self, action: TorxAction) {
        if action.direction != Direction::Input || action.channel != self.input_channel {
            debug!(action = %action, "ignoring wire action outside the input channel");
            return;
        }
        let input = match self.codec.deserialize(&action.data) {
            Ok(input) => input,
            Err(e) => {
                warn!(data = %action.data, error = %e, "undecodable runner input");
                return;
            }
        };
        self.scheduler.handle_model_input(input);
        if let Err(e) = self.scheduler.tick() {
            error!(error = %e, "dispatch failed");
        }
    }
}
