//! Engine error taxonomy.

use thiserror::Error;

use sutler_connector::ConnectorError;
use sutler_iosts::{IostsError, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("atomic refinement cannot be disabled")]
    AtomicRefinementRequired,
    #[error("IOSTS '{name}' must refine exactly one model input, found {found}")]
    IllFormedIosts { name: String, found: usize },
    #[error("IOSTS '{name}' is not activatable while '{active}' is mid-refinement")]
    SystemNotActivatable { name: String, active: String },
    #[error("IOSTS '{name}' cannot be removed while mid-refinement")]
    SystemActive { name: String },
    #[error(transparent)]
    Iosts(#[from] IostsError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Iosts(IostsError::Store(e))
    }
}
