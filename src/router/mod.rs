//! Request interception: classify each request by path and answer it from
//! the store, the asset cache, or the upstream origin.

mod background;
mod error;

pub use background::BackgroundWrites;
pub use error::AppError;

use axum::body::Bytes;
use axum::extract::{RawQuery, Request, State};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{any, get};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assembler;
use crate::cache::{generation_name, AssetCache, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::lifecycle::Lifecycle;
use crate::store::KvStore;
use crate::todo::TodoItem;
use crate::upstream::{FetchRequest, Upstream};

/// Cached document the list is spliced into
const SHELL_PATH: &str = "/index.html";

/// Shared state behind every handler
pub struct AppState<U: Upstream> {
  pub todos: KvStore<TodoItem>,
  pub cache: AssetCache<U>,
  pub lifecycle: Lifecycle<U>,
  pub writes: BackgroundWrites,
  assets: HashSet<String>,
  await_writes: bool,
}

impl<U: Upstream> AppState<U> {
  pub fn new(config: &Config, db: Database, upstream: U) -> Self {
    let cache = AssetCache::new(
      SqliteStorage::new(db.clone()),
      Arc::new(upstream),
      generation_name(&config.cache_prefix, &config.version),
    );
    let todos = KvStore::new(db, &config.store.table);
    let lifecycle = Lifecycle::new(cache.clone(), todos.clone(), config.assets.clone());

    Self {
      todos,
      cache,
      lifecycle,
      writes: BackgroundWrites::new(),
      assets: config.assets.iter().cloned().collect(),
      await_writes: config.mutations.await_writes,
    }
  }

  fn is_asset(&self, path: &str) -> bool {
    self.assets.contains(path)
  }

  /// Run a mutation's write, in the background unless configured to wait.
  async fn dispatch<F>(&self, operation: &'static str, write: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    if self.await_writes {
      if let Err(e) = write.await {
        warn!(operation, error = %e, "write failed");
      }
    } else {
      self.writes.spawn(operation, write);
    }
  }
}

/// Build the router for the fixed set of intercepted paths.
pub fn router<U: Upstream>(state: Arc<AppState<U>>) -> Router {
  Router::new()
    .route("/", get(index::<U>))
    .route("/index.html", get(index::<U>))
    .route("/create", any(create::<U>))
    .route("/delete", any(delete::<U>))
    .route("/complete", any(complete::<U>))
    .fallback(passthrough::<U>)
    .layer(middleware::from_fn_with_state(
      Arc::clone(&state),
      await_ready::<U>,
    ))
    .with_state(state)
}

/// Hold every request until install and activation have settled.
async fn await_ready<U: Upstream>(
  State(state): State<Arc<AppState<U>>>,
  request: Request,
  next: Next,
) -> Response {
  match state.lifecycle.ready().await {
    Ok(()) => next.run(request).await,
    Err(e) => AppError::unavailable(e).into_response(),
  }
}

/// First value of `name` in a urlencoded form or query; empty when absent.
fn form_value(input: &[u8], name: &str) -> String {
  url::form_urlencoded::parse(input)
    .find(|(key, _)| key == name)
    .map(|(_, value)| value.into_owned())
    .unwrap_or_default()
}

fn query_id(query: Option<String>) -> String {
  form_value(query.unwrap_or_default().as_bytes(), "id")
}

async fn index<U: Upstream>(
  State(state): State<Arc<AppState<U>>>,
) -> Result<Html<String>, AppError> {
  let shell = state
    .cache
    .serve(&FetchRequest::get(SHELL_PATH))
    .await
    .map_err(AppError::upstream)?;

  if !shell.data.is_success() {
    return Err(AppError::upstream(eyre!(
      "Upstream returned {} for {}",
      shell.data.status,
      SHELL_PATH
    )));
  }

  let items: Vec<TodoItem> = state
    .todos
    .entries()
    .await
    .map_err(AppError::storage)?
    .into_iter()
    .map(|(_, item)| item)
    .collect();

  debug!(items = items.len(), source = ?shell.source, "assembled page");
  Ok(Html(assembler::splice(&shell.data.text(), &items)))
}

async fn create<U: Upstream>(State(state): State<Arc<AppState<U>>>, body: Bytes) -> Redirect {
  let title = form_value(&body, "title");

  let item = TodoItem::create(assembler::escape_text(&title));
  info!(id = %item.id, "creating todo");

  let todos = state.todos.clone();
  state
    .dispatch("create", async move { todos.set(&item.id, &item).await })
    .await;

  Redirect::to("/")
}

async fn delete<U: Upstream>(
  State(state): State<Arc<AppState<U>>>,
  RawQuery(query): RawQuery,
) -> Redirect {
  let id = query_id(query);
  info!(%id, "deleting todo");

  let todos = state.todos.clone();
  state
    .dispatch("delete", async move { todos.del(&id).await })
    .await;

  Redirect::to("/")
}

async fn complete<U: Upstream>(
  State(state): State<Arc<AppState<U>>>,
  RawQuery(query): RawQuery,
) -> Redirect {
  let id = query_id(query);
  info!(%id, "completing todo");

  let todos = state.todos.clone();
  state
    .dispatch("complete", async move {
      let missing = id.clone();
      todos
        .update(&id, move |current| {
          current
            .map(|item| item.complete())
            .ok_or_else(|| eyre!("No todo with id {:?}", missing))
        })
        .await
        .map(|_| ())
    })
    .await;

  Redirect::to("/")
}

/// Manifest assets go through the cache; everything else goes upstream as-is.
async fn passthrough<U: Upstream>(
  State(state): State<Arc<AppState<U>>>,
  request: Request,
) -> Result<Response, AppError> {
  let path = request.uri().path().to_string();
  let request = FetchRequest::from_request(request)
    .await
    .map_err(AppError::bad_request)?;

  if state.is_asset(&path) {
    let served = state
      .cache
      .serve(&request)
      .await
      .map_err(AppError::upstream)?;
    debug!(%path, source = ?served.source, cached_at = ?served.cached_at, "served asset");
    return Ok(served.data.into_response());
  }

  let response = state
    .cache
    .upstream()
    .fetch(&request)
    .await
    .map_err(AppError::upstream)?;
  Ok(response.into_response())
}
