//! Remote catalog access: wire types, domain types and the HTTP client.
//!
//! Everything the service sends is normalized into [`Falla`] inside this
//! module; nothing outside it reads wire field names.

pub mod api_types;
pub mod client;
pub mod error;
pub mod types;

pub use client::{CatalogClient, RemoteCatalog};
pub use error::FetchError;
pub use types::{Category, Falla, GeoPoint, RemoteCategory};
