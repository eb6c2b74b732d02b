//! Command dispatch and response correlation over the mediated store.
//!
//! Provides:
//! - `Dispatcher` - Append command envelopes and return correlation keys
//! - `Correlator` - Bounded wait for the matching response, consumed once
//! - `CommandClient` - Both, bound to one device and its configured defaults

pub mod client;
pub mod correlator;
pub mod dispatcher;
pub mod error;

pub use client::{CommandClient, SendReport};
pub use correlator::{AwaitOutcome, Correlation, Correlator, CorrelatorConfig};
pub use dispatcher::{Dispatcher, parse_params};
pub use error::CommandError;
