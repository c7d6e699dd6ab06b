mod assembler;
mod cache;
mod config;
mod db;
mod lifecycle;
mod router;
mod server;
mod store;
mod todo;
mod upstream;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tasklist-edge")]
#[command(about = "Serves a task-list app from a local store and versioned asset cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tasklist-edge/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Address to listen on
  #[arg(short, long)]
  listen: Option<String>,

  /// Upstream origin URL
  #[arg(short, long)]
  upstream: Option<String>,

  /// Database file
  #[arg(short, long)]
  database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(listen) = args.listen {
    config.listen = listen;
  }
  if let Some(upstream) = args.upstream {
    config.upstream = upstream;
  }
  if let Some(database) = args.database {
    config.database = Some(database);
  }

  let _guard = init_tracing(config.log_dir.as_deref());

  server::run(config).await
}

/// Log to stderr, and to a daily file when a log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "tasklist-edge.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}
