//! Transactional key-value store over the shared SQLite database.
//!
//! Each [`KvStore`] is bound to one logical table and stores JSON-encoded
//! values under string keys. Every operation is a single SQLite transaction;
//! writes resolve only after the commit, and [`KvStore::update`] performs its
//! read and write inside the same immediate transaction.

mod kv;

pub use kv::KvStore;
