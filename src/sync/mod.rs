//! Offline-first read protocols over the catalog.

pub mod error;
pub mod orchestrator;
pub mod stream;

pub use error::{ReadError, SyncError};
pub use orchestrator::{SyncOptions, SyncOrchestrator};
pub use stream::{ReadStream, Resource, SyncDecision};
