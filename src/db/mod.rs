pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DataError, Result};

/// Handle to the single on-device SQLite database.
///
/// Backs the record store, the pending-request queue, the read cache and
/// the identity row. Cloning shares the underlying connection; all access
/// is serialized through one mutex, which matches the single-writer model
/// the rest of the layer assumes.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| DataError::Storage(format!("failed to create data directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      DataError::Storage(format!(
        "failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// In-memory database for tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| DataError::Storage(format!("failed to open in-memory database: {}", e)))?;

    let db = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Default database path under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| DataError::Storage("could not determine data directory".to_string()))?;

    Ok(data_dir.join("khata").join("khata.db"))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| DataError::Storage(format!("failed to run migrations: {}", e)))?;
    Ok(())
  }

  /// Acquire the connection. A poisoned lock is a storage failure.
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| DataError::Storage(format!("lock poisoned: {}", e)))
  }
}
