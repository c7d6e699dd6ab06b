//! SQLite storage for cache generations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;
use crate::upstream::{FetchRequest, FetchResponse};

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: FetchResponse,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Cache generations stored alongside the key-value tables.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Create the generation if it does not exist yet.
  pub async fn open_generation(&self, generation: &str) -> Result<()> {
    let generation = generation.to_string();

    self
      .db
      .call(move |conn| insert_generation(conn, &generation))
      .await
  }

  /// Names of every generation, oldest first.
  pub async fn generation_names(&self) -> Result<Vec<String>> {
    self
      .db
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT name FROM cache_generations ORDER BY created_at, name")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let names = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read cache generations: {}", e))?;
        Ok(names)
      })
      .await
  }

  /// Delete a generation and everything stored in it.
  pub async fn delete_generation(&self, generation: &str) -> Result<()> {
    let generation = generation.to_string();

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        tx.execute(
          "DELETE FROM cache_entries WHERE generation = ?",
          params![generation],
        )
        .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;

        tx.execute(
          "DELETE FROM cache_generations WHERE name = ?",
          params![generation],
        )
        .map_err(|e| eyre!("Failed to delete cache generation: {}", e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      })
      .await
  }

  /// Look up a request in a generation.
  pub async fn get(&self, generation: &str, request: &FetchRequest) -> Result<Option<CachedEntry>> {
    let generation = generation.to_string();
    let hash = request.cache_hash();

    self
      .db
      .call(move |conn| {
        let row: Option<(u16, String, Vec<u8>, String)> = conn
          .query_row(
            "SELECT status, headers, body, cached_at FROM cache_entries
             WHERE generation = ? AND request_hash = ?",
            params![generation, hash],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to query cache: {}", e))?;

        match row {
          Some((status, headers, body, cached_at_str)) => {
            let headers: Vec<(String, String)> = serde_json::from_str(&headers)
              .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
            let cached_at = parse_datetime(&cached_at_str)?;
            Ok(Some(CachedEntry {
              response: FetchResponse {
                status,
                headers,
                body,
              },
              cached_at,
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  /// Store a single response.
  pub async fn put(&self, generation: &str, request: &FetchRequest, response: &FetchResponse) -> Result<()> {
    self
      .put_all(generation, vec![(request.clone(), response.clone())])
      .await
  }

  /// Store a batch of responses in one transaction, creating the generation
  /// if needed. Either every entry is stored or none is.
  pub async fn put_all(
    &self,
    generation: &str,
    entries: Vec<(FetchRequest, FetchResponse)>,
  ) -> Result<()> {
    let generation = generation.to_string();

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        insert_generation(&tx, &generation)?;

        for (request, response) in &entries {
          let headers = serde_json::to_string(&response.headers)
            .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

          tx.execute(
            "INSERT OR REPLACE INTO cache_entries
               (generation, request_hash, method, url, status, headers, body, cached_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
            params![
              generation,
              request.cache_hash(),
              request.method,
              request.url,
              response.status,
              headers,
              response.body,
            ],
          )
          .map_err(|e| eyre!("Failed to store {} {}: {}", request.method, request.url, e))?;
        }

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      })
      .await
  }

  /// Number of responses stored in a generation.
  pub async fn entry_count(&self, generation: &str) -> Result<usize> {
    let generation = generation.to_string();

    self
      .db
      .call(move |conn| {
        let count: i64 = conn
          .query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
            params![generation],
            |row| row.get(0),
          )
          .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
        Ok(count as usize)
      })
      .await
  }
}

fn insert_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;
  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::in_memory())
  }

  #[tokio::test]
  async fn test_put_then_get() {
    let storage = storage();
    let request = FetchRequest::get("/app.js");
    let response = FetchResponse::new(200, "console.log(1)")
      .with_header("content-type", "text/javascript");

    storage.put("v1", &request, &response).await.unwrap();

    let entry = storage.get("v1", &request).await.unwrap().unwrap();
    assert_eq!(entry.response, response);
    assert!(storage.get("v2", &request).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_open_generation_is_idempotent() {
    let storage = storage();
    storage.open_generation("v1").await.unwrap();
    storage.open_generation("v1").await.unwrap();

    assert_eq!(storage.generation_names().await.unwrap(), vec!["v1".to_string()]);
  }

  #[tokio::test]
  async fn test_delete_generation_removes_entries() {
    let storage = storage();
    let request = FetchRequest::get("/");
    storage
      .put("old", &request, &FetchResponse::new(200, "old"))
      .await
      .unwrap();
    storage
      .put("new", &request, &FetchResponse::new(200, "new"))
      .await
      .unwrap();

    storage.delete_generation("old").await.unwrap();

    assert_eq!(storage.generation_names().await.unwrap(), vec!["new".to_string()]);
    assert_eq!(storage.entry_count("old").await.unwrap(), 0);
    assert_eq!(storage.entry_count("new").await.unwrap(), 1);
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-03-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-03-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
