use device_relay_core::{PathError, StoreError};
use thiserror::Error;

use crate::DecodeError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid path: {0}")]
    Path(#[from] PathError),
    #[error("Discarded chunk: {0}")]
    Decode(#[from] DecodeError),
    #[error("No modality matches path: {0}")]
    UnknownModality(String),
}
