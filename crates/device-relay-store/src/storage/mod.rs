//! Store implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "firebase")]
pub mod firebase;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "firebase")]
pub use firebase::FirebaseStore;
