use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::db::Database;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Address the edge listens on
  pub listen: String,
  /// Origin that unhandled requests and cache misses go to
  pub upstream: String,
  /// Deployed version; names the current cache generation
  pub version: String,
  pub cache_prefix: String,
  /// Paths cached at install and served cache-first
  pub assets: Vec<String>,
  /// Database file (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Directory for rolling log files; stderr only when unset
  pub log_dir: Option<PathBuf>,
  pub store: StoreConfig,
  pub mutations: MutationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Logical table holding the todo records
  pub table: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MutationsConfig {
  /// Wait for the write to commit before redirecting
  pub await_writes: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen: "127.0.0.1:8080".to_string(),
      upstream: "http://127.0.0.1:3000".to_string(),
      version: format!("v{}", env!("CARGO_PKG_VERSION")),
      cache_prefix: "tasklist-edge".to_string(),
      assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/app.js".to_string(),
      ],
      database: None,
      log_dir: None,
      store: StoreConfig::default(),
      mutations: MutationsConfig::default(),
    }
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      table: "todos".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tasklist-edge.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tasklist-edge/config.yaml
  ///
  /// Defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tasklist-edge.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tasklist-edge").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if let Some(bad) = self.assets.iter().find(|a| !a.starts_with('/')) {
      return Err(eyre!("asset path must start with '/': {}", bad));
    }
    Ok(())
  }

  /// Database file to use, falling back to the data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(p) => Ok(p.clone()),
      None => Database::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.listen, "127.0.0.1:8080");
    assert_eq!(config.store.table, "todos");
    assert!(!config.mutations.await_writes);
    assert!(config.assets.contains(&"/index.html".to_string()));
  }

  #[test]
  fn test_partial_override() {
    let config = Config::parse(
      r#"
upstream: "http://origin.internal:9000"
version: "2024-05-01"
assets: ["/", "/index.html", "/app.js", "/style.css"]
mutations:
  await_writes: true
"#,
    )
    .unwrap();

    assert_eq!(config.upstream, "http://origin.internal:9000");
    assert_eq!(config.version, "2024-05-01");
    assert_eq!(config.assets.len(), 4);
    assert!(config.mutations.await_writes);
    assert_eq!(config.cache_prefix, "tasklist-edge");
  }

  #[test]
  fn test_relative_asset_rejected() {
    assert!(Config::parse("assets: [\"app.js\"]").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "listen: \"0.0.0.0:9999\"\nstore:\n  table: tasks\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.listen, "0.0.0.0:9999");
    assert_eq!(config.store.table, "tasks");
  }

  #[test]
  fn test_explicit_database_path_wins() {
    let config = Config {
      database: Some(PathBuf::from("/tmp/edge.db")),
      ..Config::default()
    };
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/edge.db"));
  }
}
