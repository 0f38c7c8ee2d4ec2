pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Database connection handle for the entity cache.
///
/// Opened once at startup and shared by reference; the connection closes
/// when the last owner drops it.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    // Readers and the write-through path may overlap across processes
    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    Self::with_connection(conn)
  }

  /// Private in-memory database, used by tests and throwaway runs
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()
      .map_err(|e| eyre!("{}", e))?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection
  pub fn conn(&self) -> std::result::Result<MutexGuard<'_, Connection>, PoisonedConnection> {
    self.conn.lock().map_err(|_| PoisonedConnection)
  }
}

/// A previous holder of the connection panicked mid-statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoisonedConnection;

impl std::fmt::Display for PoisonedConnection {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("database lock poisoned")
  }
}

impl std::error::Error for PoisonedConnection {}
