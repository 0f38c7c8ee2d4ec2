use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
  #[error("no cached data available")]
  Empty,

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("database lock poisoned")]
  Poisoned,

  #[error("corrupt cached row {id}: {reason}")]
  Corrupt { id: i64, reason: String },

  #[error("cache task failed: {0}")]
  Task(String),
}

impl From<crate::db::PoisonedConnection> for CacheError {
  fn from(_: crate::db::PoisonedConnection) -> Self {
    CacheError::Poisoned
  }
}

impl From<tokio::task::JoinError> for CacheError {
  fn from(err: tokio::task::JoinError) -> Self {
    CacheError::Task(err.to_string())
  }
}
