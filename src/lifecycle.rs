//! Install and activation phases.
//!
//! Install populates the current cache generation from the asset manifest
//! and opens the store. Activation runs install, purges stale generations and
//! starts taking requests. Each phase completes at most once; a failed phase
//! is retried on the next call.

use color_eyre::Result;
use tokio::sync::OnceCell;
use tracing::info;

use crate::cache::AssetCache;
use crate::store::KvStore;
use crate::todo::TodoItem;
use crate::upstream::Upstream;

pub struct Lifecycle<U: Upstream> {
  cache: AssetCache<U>,
  todos: KvStore<TodoItem>,
  manifest: Vec<String>,
  installed: OnceCell<()>,
  activated: OnceCell<()>,
}

impl<U: Upstream> Lifecycle<U> {
  pub fn new(cache: AssetCache<U>, todos: KvStore<TodoItem>, manifest: Vec<String>) -> Self {
    Self {
      cache,
      todos,
      manifest,
      installed: OnceCell::new(),
      activated: OnceCell::new(),
    }
  }

  pub async fn install(&self) -> Result<()> {
    self
      .installed
      .get_or_try_init(|| async {
        self.cache.populate(&self.manifest).await?;
        let cached = self.cache.len().await?;
        let count = self.todos.len().await?;
        info!(
          generation = %self.cache.generation(),
          cached,
          table = %self.todos.table(),
          todos = count,
          "installed"
        );
        Ok::<_, color_eyre::Report>(())
      })
      .await?;
    Ok(())
  }

  pub async fn activate(&self) -> Result<()> {
    self
      .activated
      .get_or_try_init(|| async {
        self.install().await?;
        let purged = self.cache.purge_stale().await?;
        info!(
          generation = %self.cache.generation(),
          purged = purged.len(),
          "activated, claiming clients"
        );
        Ok::<_, color_eyre::Report>(())
      })
      .await?;
    Ok(())
  }

  /// Resolves once activation has completed.
  pub async fn ready(&self) -> Result<()> {
    self.activate().await
  }

  #[cfg(test)]
  pub fn is_active(&self) -> bool {
    self.activated.initialized()
  }
}
