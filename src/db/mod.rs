pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Where the database file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
  File(PathBuf),
  /// Private in-memory database, lives as long as the handle
  Memory,
}

/// Lazily opened database handle shared by the store and the asset cache.
///
/// The connection is opened (and migrated) on first use and then kept for the
/// life of the process. Clones share the same connection. SQLite calls are
/// blocking, so every access runs on the blocking pool and the caller awaits
/// a single outcome.
#[derive(Clone)]
pub struct Database {
  location: Location,
  conn: Arc<OnceCell<Arc<Mutex<Connection>>>>,
}

impl Database {
  pub fn new(location: Location) -> Self {
    Self {
      location,
      conn: Arc::new(OnceCell::new()),
    }
  }

  /// Handle for a database file at `path`. Nothing is opened yet.
  pub fn at(path: impl Into<PathBuf>) -> Self {
    Self::new(Location::File(path.into()))
  }

  pub fn in_memory() -> Self {
    Self::new(Location::Memory)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tasklist-edge").join("store.db"))
  }

  /// Whether the connection has been opened yet.
  #[cfg(test)]
  pub fn is_open(&self) -> bool {
    self.conn.initialized()
  }

  /// Run `f` inside the shared connection and await its result.
  pub async fn call<F, T>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let conn = self.connection().await?;

    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      f(&mut conn)
    })
    .await
    .map_err(|e| eyre!("Database task failed: {}", e))?
  }

  async fn connection(&self) -> Result<Arc<Mutex<Connection>>> {
    let conn = self
      .conn
      .get_or_try_init(|| async {
        let location = self.location.clone();
        let conn = tokio::task::spawn_blocking(move || open_connection(&location))
          .await
          .map_err(|e| eyre!("Database task failed: {}", e))??;
        Ok::<_, color_eyre::Report>(Arc::new(Mutex::new(conn)))
      })
      .await?;

    Ok(Arc::clone(conn))
  }
}

fn open_connection(location: &Location) -> Result<Connection> {
  let conn = match location {
    Location::File(path) => open_file(path)?,
    Location::Memory => Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
  };

  run_migrations(&conn)?;
  tracing::debug!(?location, "database opened");

  Ok(conn)
}

fn open_file(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<()> {
  conn
    .execute_batch(schema::SCHEMA)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
  Ok(())
}
