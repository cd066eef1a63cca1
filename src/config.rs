use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application is served from (e.g. "http://localhost:5000")
  pub origin: String,
  /// Namespace shared by every cache generation this worker owns
  pub cache_prefix: String,
  /// Label of the current cache generation
  pub cache_version: String,
  /// Page served to document requests when offline and uncached
  pub offline_url: String,
  /// Assets fetched and stored at install time
  pub precache: Vec<String>,
  pub api_prefix: String,
  pub static_prefix: String,
  /// Deferred-sync tag the mutation queue registers under
  pub sync_tag: String,
  /// Upper bound for any single network attempt
  pub fetch_timeout_secs: u64,
  /// Whether the host offers deferred-sync (the CLI host honours this)
  pub background_sync: bool,
  /// SQLite database path (default: $XDG_DATA_HOME/offgrid/offgrid.db)
  pub database: Option<PathBuf>,
  /// Log file path (default: next to the database)
  pub log_file: Option<PathBuf>,
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub open_label: String,
  pub close_label: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      cache_prefix: "rechnungen-cache-".to_string(),
      cache_version: "v1".to_string(),
      offline_url: "/offline".to_string(),
      precache: vec![
        "/".to_string(),
        "/offline".to_string(),
        "/static/manifest.json".to_string(),
        "/static/icons/icon-192x192.png".to_string(),
        "/static/icons/icon-512x512.png".to_string(),
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css".to_string(),
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js".to_string(),
      ],
      api_prefix: "/api/".to_string(),
      static_prefix: "/static/".to_string(),
      sync_tag: "sync-invoices".to_string(),
      fetch_timeout_secs: 30,
      background_sync: true,
      database: None,
      log_file: None,
      notifications: NotificationConfig::default(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Rechnungsverwaltung".to_string(),
      body: "Neue Benachrichtigung".to_string(),
      icon: "/static/icons/icon-192x192.png".to_string(),
      badge: "/static/icons/badge-72x72.png".to_string(),
      tag: "default".to_string(),
      open_label: "Öffnen".to_string(),
      close_label: "Schließen".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offgrid.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offgrid/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offgrid.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offgrid").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.cache_prefix.is_empty() {
      return Err(eyre!("cache_prefix must not be empty"));
    }
    if self.fetch_timeout_secs == 0 {
      return Err(eyre!("fetch_timeout_secs must be greater than zero"));
    }
    Ok(())
  }

  /// Name of the store owned by the current generation.
  pub fn cache_name(&self) -> String {
    format!("{}{}", self.cache_prefix, self.cache_version)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a possibly relative URL against the configured origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }

  /// Database path, falling back to the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("offgrid.db"))
  }

  pub fn log_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.log_file {
      return Ok(path.clone());
    }
    let db = self.database_path()?;
    Ok(db.with_file_name("offgrid.log"))
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offgrid"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_match_worker_constants() {
    let config = Config::default();
    assert_eq!(config.cache_name(), "rechnungen-cache-v1");
    assert_eq!(config.sync_tag, "sync-invoices");
    assert_eq!(config.precache.len(), 7);
    assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache_version: v2\napi_prefix: /rest/").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.cache_name(), "rechnungen-cache-v2");
    assert_eq!(config.api_prefix, "/rest/");
    assert_eq!(config.static_prefix, "/static/");
    assert_eq!(config.notifications.tag, "default");
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "origin: not a url").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let config = Config::default();
    assert_eq!(
      config.resolve("/static/app.css").unwrap().as_str(),
      "http://localhost:5000/static/app.css"
    );
    assert_eq!(
      config.resolve("https://cdn.example.com/x.js").unwrap().as_str(),
      "https://cdn.example.com/x.js"
    );
  }

  #[test]
  fn test_log_path_next_to_database() {
    let config = Config {
      database: Some(PathBuf::from("/tmp/offgrid/test.db")),
      ..Config::default()
    };
    assert_eq!(config.log_path().unwrap(), PathBuf::from("/tmp/offgrid/offgrid.log"));
  }
}
