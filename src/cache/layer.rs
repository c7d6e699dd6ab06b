//! Cache layer that orchestrates cache generations with upstream fetching.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::storage::SqliteStorage;
use super::traits::CacheResult;
use crate::upstream::{FetchRequest, FetchResponse, Upstream};

/// Name of the generation for a deployed version.
pub fn generation_name(prefix: &str, version: &str) -> String {
  format!("{}-{}", prefix, version)
}

/// Versioned asset cache.
///
/// Responses live in the generation named after the current version. Hits are
/// served straight from storage with no revalidation; misses are fetched from
/// upstream and stored.
pub struct AssetCache<U: Upstream> {
  storage: SqliteStorage,
  upstream: Arc<U>,
  generation: String,
}

impl<U: Upstream> AssetCache<U> {
  pub fn new(storage: SqliteStorage, upstream: Arc<U>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      upstream,
      generation: generation.into(),
    }
  }

  /// The current generation's name.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn upstream(&self) -> &Arc<U> {
    &self.upstream
  }

  /// Fetch every manifest path and store the lot in the current generation.
  ///
  /// All-or-nothing: if any fetch fails or comes back unsuccessful, nothing
  /// is stored.
  pub async fn populate(&self, manifest: &[String]) -> Result<()> {
    let fetches: Vec<_> = manifest
      .iter()
      .map(|path| async move {
        let request = FetchRequest::get(path.as_str());
        let response = self.upstream.fetch(&request).await?;
        if !response.is_success() {
          return Err(eyre!(
            "Failed to cache {}: upstream returned {}",
            path,
            response.status
          ));
        }
        Ok((request, response))
      })
      .collect();

    let batch = try_join_all(fetches).await?;
    let count = batch.len();
    self.storage.put_all(&self.generation, batch).await?;

    info!(generation = %self.generation, count, "asset cache populated");
    Ok(())
  }

  /// Delete every generation other than the current one.
  ///
  /// Returns the names that were deleted.
  pub async fn purge_stale(&self) -> Result<Vec<String>> {
    let stale: Vec<String> = self
      .storage
      .generation_names()
      .await?
      .into_iter()
      .filter(|name| name != &self.generation)
      .collect();

    for name in &stale {
      self.storage.delete_generation(name).await?;
      info!(generation = %name, "purged stale cache generation");
    }

    Ok(stale)
  }

  /// Serve a request cache-first.
  ///
  /// 1. Hit in the current generation - return it, no network
  /// 2. Miss - fetch from upstream, store a copy, return the response
  ///
  /// Upstream failure on a miss is returned as an error; there is no
  /// fallback content.
  pub async fn serve(&self, request: &FetchRequest) -> Result<CacheResult<FetchResponse>> {
    if let Some(cached) = self.storage.get(&self.generation, request).await? {
      debug!(url = %request.url, "asset cache hit");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = self.upstream.fetch(request).await?;
    self
      .storage
      .put(&self.generation, request, &response)
      .await?;

    debug!(url = %request.url, status = response.status, "asset cache miss stored");
    Ok(CacheResult::from_network(response))
  }

  /// Number of responses in the current generation.
  pub async fn len(&self) -> Result<usize> {
    self.storage.entry_count(&self.generation).await
  }
}

impl<U: Upstream> Clone for AssetCache<U> {
  fn clone(&self) -> Self {
    Self {
      storage: self.storage.clone(),
      upstream: Arc::clone(&self.upstream),
      generation: self.generation.clone(),
    }
  }
}
