//! Stream ingestion for the device command relay.
//!
//! Provides:
//! - `decode_payload` - Base64 decoding with stripped-padding repair
//! - `MediaSink` - Timestamped, collision-free media files
//! - `StreamIngestor` - Per-modality subscriptions feeding the sink

pub mod decode;
pub mod error;
pub mod ingestor;
pub mod sink;

pub use decode::{DecodeError, decode_payload, decode_str, repair_padding};
pub use error::IngestError;
pub use ingestor::{IngestConfig, IngestCounts, IngestHandle, IngestStats, StreamIngestor};
pub use sink::{MediaSink, base_name};
