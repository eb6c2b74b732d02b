//! Core abstractions for the device command relay.
//!
//! This crate provides the fundamental building blocks:
//! - `MediatedStore` - Contract for the shared hierarchical store
//! - `StorePath` / `Modality` - Path layout of the relay namespace
//! - `CommandEnvelope` / `ResponseEnvelope` - Records exchanged with the agent
//! - `RelayConfig` - Explicit configuration passed into every component

pub mod config;
pub mod envelope;
pub mod path;
pub mod traits;

pub use config::{Backend, ConfigError, CorrelationMode, RelayConfig, WaitMode};
pub use envelope::{CommandEnvelope, CorrelationKey, ResponseEnvelope};
pub use path::{Modality, PathError, StorePath};
pub use traits::{ChangeStream, MediatedStore, StoreError, StoreEvent};
