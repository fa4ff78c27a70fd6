#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod config;
pub mod error;
pub mod scheduler;

pub use adapter::Adapter;
pub use config::EngineOptions;
pub use error::EngineError;
pub use scheduler::{ActionFilters, ModelOutputSink, Scheduler, SystemCommandHandler};
