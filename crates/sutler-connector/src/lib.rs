#![doc = include_str!("../README.md")]

pub mod model_file;
pub mod runner;
pub mod wire;

pub use model_file::{parse_bindings, ChannelBinding, ModelFileError};
pub use runner::{ConnectorError, RunnerConnector, RunnerListener};
pub use wire::{Direction, TorxAction};
