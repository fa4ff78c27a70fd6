#![doc = include_str!("../README.md")]

pub mod action;
pub mod codec;
pub mod iosts;
pub mod store;

pub use action::{Action, ActionType, ModelAction, Realm, SystemAction, ERROR_ACTION};
pub use codec::{ActionCodec, ActionSchema, CodecError};
pub use iosts::{
    Iosts, IostsBuilder, IostsError, State, StateId, Transition, TransitionId, TransitionKind,
};
pub use store::{StoreError, Value, ValueKind, VariableStore};
