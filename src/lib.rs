//! Offline-first cache for the falla catalog.
//!
//! Reads go through [`sync::SyncOrchestrator`], which decides per call
//! whether to trust the remote service, the local SQLite copy, or neither.

pub mod app;
pub mod cache;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod geo;
pub mod net;
pub mod sync;
