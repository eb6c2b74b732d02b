//! Command error type.

use device_relay_core::{PathError, StoreError};
use thiserror::Error;

/// Error raised while dispatching or awaiting a command.
///
/// A missing response is not an error; see [`crate::AwaitOutcome`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid store path: {0}")]
    Path(#[from] PathError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
