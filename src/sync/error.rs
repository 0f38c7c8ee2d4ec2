use thiserror::Error;

use crate::cache::CacheError;
use crate::catalog::FetchError;

/// Why a read could not produce data.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error("no connection and no local data")]
  Offline(#[source] CacheError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Cache(#[from] CacheError),
}

impl SyncError {
  /// Text suitable for showing to a person, without internal codes.
  pub fn user_message(&self) -> String {
    match self {
      SyncError::Offline(_) => "No connection and no local data".to_string(),
      SyncError::Fetch(FetchError::Timeout) => "The server took too long to respond".to_string(),
      SyncError::Fetch(FetchError::Unreachable(_)) => "Could not reach the server".to_string(),
      SyncError::Fetch(FetchError::ServerRejected { message, .. }) => match message {
        Some(m) if m.len() <= 120 && !m.contains('{') => format!("The server rejected the request: {}", m),
        _ => "The server rejected the request".to_string(),
      },
      SyncError::Fetch(FetchError::Malformed(_)) => {
        "The server sent a response that could not be read".to_string()
      }
      SyncError::Cache(CacheError::Empty) => "No local data available".to_string(),
      SyncError::Cache(_) => "Local data could not be read".to_string(),
    }
  }
}

/// Caller-visible failure: a display message plus the typed cause.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ReadError {
  pub message: String,
  #[source]
  pub cause: SyncError,
}

impl From<SyncError> for ReadError {
  fn from(cause: SyncError) -> Self {
    Self {
      message: cause.user_message(),
      cause,
    }
  }
}

impl From<FetchError> for ReadError {
  fn from(err: FetchError) -> Self {
    SyncError::from(err).into()
  }
}

impl From<CacheError> for ReadError {
  fn from(err: CacheError) -> Self {
    SyncError::from(err).into()
  }
}
