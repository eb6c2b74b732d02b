//! Mediated store backends for the device command relay.
//!
//! Provides:
//! - `MemoryStore` - In-process store (feature: memory)
//! - `FirebaseStore` - Firebase Realtime Database over REST (feature: firebase)
//! - `connect` - Build the backend selected by a `RelayConfig`

use std::sync::Arc;

use device_relay_core::{Backend, MediatedStore, RelayConfig, StoreError};

pub mod storage;

#[cfg(feature = "memory")]
pub use storage::MemoryStore;

#[cfg(feature = "firebase")]
pub use storage::FirebaseStore;

/// Build and initialize the backend named in `config`.
///
/// Initialization failures are meant to be fatal for the caller.
///
/// # Errors
/// Returns error if the backend is not compiled in, or it cannot be reached
/// with the configured credentials.
pub async fn connect(config: &RelayConfig) -> Result<Arc<dyn MediatedStore>, StoreError> {
    match config.backend {
        #[cfg(feature = "memory")]
        Backend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "firebase")]
        Backend::Firebase => Ok(Arc::new(FirebaseStore::connect(config).await?)),
        #[allow(unreachable_patterns)]
        other => Err(StoreError::Internal(format!(
            "{other:?} backend is not enabled in this build"
        ))),
    }
}
