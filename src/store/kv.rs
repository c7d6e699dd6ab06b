use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::db::Database;

/// Async key-value store for values of type `V` in a single named table.
pub struct KvStore<V> {
  db: Database,
  table: Arc<str>,
  _values: PhantomData<fn() -> V>,
}

impl<V> KvStore<V>
where
  V: Serialize + DeserializeOwned + Send + 'static,
{
  pub fn new(db: Database, table: &str) -> Self {
    Self {
      db,
      table: Arc::from(table),
      _values: PhantomData,
    }
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  /// Read a value. A missing key is `Ok(None)`.
  #[allow(dead_code)]
  pub async fn get(&self, key: &str) -> Result<Option<V>> {
    let table = Arc::clone(&self.table);
    let key = key.to_string();

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
        let value = read_value(&tx, &table, &key)?;
        tx.finish()
          .map_err(|e| eyre!("Failed to finish transaction: {}", e))?;
        Ok(value)
      })
      .await
  }

  /// Insert or replace `key`. Resolves once the write is committed.
  pub async fn set(&self, key: &str, value: &V) -> Result<()> {
    let table = Arc::clone(&self.table);
    let key = key.to_string();
    let data = encode(value)?;

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction_with_behavior(TransactionBehavior::Immediate)
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
        write_raw(&tx, &table, &key, &data)?;
        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      })
      .await
  }

  /// Read-modify-write `key` atomically.
  ///
  /// `f` sees the current value (if any) and returns the value to store. If
  /// `f` fails, the transaction is rolled back and nothing is written.
  pub async fn update<F>(&self, key: &str, f: F) -> Result<V>
  where
    F: FnOnce(Option<V>) -> Result<V> + Send + 'static,
  {
    let table = Arc::clone(&self.table);
    let key = key.to_string();

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction_with_behavior(TransactionBehavior::Immediate)
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        let current = read_value::<V>(&tx, &table, &key)?;
        // Dropping `tx` on error rolls back
        let next = f(current)?;
        write_raw(&tx, &table, &key, &encode(&next)?)?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(next)
      })
      .await
  }

  /// Remove `key`. Removing an absent key succeeds.
  pub async fn del(&self, key: &str) -> Result<()> {
    let table = Arc::clone(&self.table);
    let key = key.to_string();

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction_with_behavior(TransactionBehavior::Immediate)
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
        tx.execute(
          "DELETE FROM kv_store WHERE tbl = ? AND key = ?",
          params![&*table, key],
        )
        .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;
        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      })
      .await
  }

  /// All `(key, value)` pairs, ordered by key.
  ///
  /// Keys and values are read by the same statement inside one transaction,
  /// so each value is paired with its own key.
  pub async fn entries(&self) -> Result<Vec<(String, V)>> {
    let table = Arc::clone(&self.table);

    self
      .db
      .call(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        let rows: Vec<(String, Vec<u8>)> = {
          let mut stmt = tx
            .prepare("SELECT key, value FROM kv_store WHERE tbl = ? ORDER BY key")
            .map_err(|e| eyre!("Failed to prepare entries query: {}", e))?;

          let rows = stmt
            .query_map(params![&*table], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| eyre!("Failed to query entries: {}", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| eyre!("Failed to read entries: {}", e))?;
          rows
        };

        tx.finish()
          .map_err(|e| eyre!("Failed to finish transaction: {}", e))?;

        rows
          .into_iter()
          .map(|(key, data)| {
            let value = decode(&key, &data)?;
            Ok((key, value))
          })
          .collect()
      })
      .await
  }

  /// Number of keys in the table.
  pub async fn len(&self) -> Result<usize> {
    let table = Arc::clone(&self.table);

    self
      .db
      .call(move |conn| {
        let count: i64 = conn
          .query_row(
            "SELECT COUNT(*) FROM kv_store WHERE tbl = ?",
            params![&*table],
            |row| row.get(0),
          )
          .map_err(|e| eyre!("Failed to count entries: {}", e))?;
        Ok(count as usize)
      })
      .await
  }
}

impl<V> Clone for KvStore<V> {
  fn clone(&self) -> Self {
    Self {
      db: self.db.clone(),
      table: Arc::clone(&self.table),
      _values: PhantomData,
    }
  }
}

fn read_value<V: DeserializeOwned>(conn: &Connection, table: &str, key: &str) -> Result<Option<V>> {
  let data: Option<Vec<u8>> = conn
    .query_row(
      "SELECT value FROM kv_store WHERE tbl = ? AND key = ?",
      params![table, key],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read {}: {}", key, e))?;

  data.map(|data| decode(key, &data)).transpose()
}

fn write_raw(conn: &Connection, table: &str, key: &str, data: &[u8]) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO kv_store (tbl, key, value) VALUES (?, ?, ?)",
      params![table, key, data],
    )
    .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
  Ok(())
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
  serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))
}

fn decode<V: DeserializeOwned>(key: &str, data: &[u8]) -> Result<V> {
  serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize value for {}: {}", key, e))
}
