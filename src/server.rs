use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::router::{self, AppState};
use crate::upstream::HttpUpstream;

/// Install, activate, then serve until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
  let db = Database::at(config.database_path()?);
  let upstream = HttpUpstream::new(&config.upstream)?;
  let state = Arc::new(AppState::new(&config, db, upstream));

  info!(
    version = %config.version,
    upstream = %config.upstream,
    assets = config.assets.len(),
    "installing"
  );
  state.lifecycle.activate().await?;

  let listener = TcpListener::bind(&config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  info!("listening on http://{}", listener.local_addr()?);

  let app = router::router(Arc::clone(&state));
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  let pending = state.writes.pending();
  if pending > 0 {
    info!(pending, "waiting for background writes");
  }
  state.writes.drain().await;

  info!("stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}
