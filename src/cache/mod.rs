//! Local persistence for the catalog and the rule deciding when it is stale.
//!
//! The store is a plain keyed table: rows are only ever written by a
//! successful remote read and removed by explicit maintenance.

pub mod error;
pub mod freshness;
pub mod storage;

pub use error::CacheError;
pub use freshness::{should_refresh, FreshnessPolicy};
pub use storage::{EntityStore, SqliteStore};
