//! Generation-aware cache layer over a storage backend.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::storage::{blocking, CacheStorage};
use super::traits::{CacheKey, CachedResponse};
use crate::config::Config;
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::network::Network;

/// Cache layer bound to one generation.
///
/// All writes go to the current generation's store. Reads search every store,
/// which after activation means only the current one is left. Storage calls
/// run on the blocking pool.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Namespace every generation of this worker shares
  prefix: String,
  /// Store name of the current generation
  current: String,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn from_config(storage: Arc<S>, config: &Config) -> Self {
    Self {
      storage,
      prefix: config.cache_prefix.clone(),
      current: config.cache_name(),
    }
  }

  /// Store name of the current generation.
  pub fn current(&self) -> &str {
    &self.current
  }

  /// Create the current generation's store if absent.
  pub async fn open(&self) -> Result<()> {
    let current = self.current.clone();
    blocking(&self.storage, move |s| s.open_store(&current)).await
  }

  /// Store a copy of `response` under the request's key.
  pub async fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let key = CacheKey::from(request);
    debug!(store = %self.current, url = key.url(), "cache put");

    let current = self.current.clone();
    let response = response.clone();
    blocking(&self.storage, move |s| s.put(&current, &key, &response)).await
  }

  /// Most recent snapshot for the request, from any store.
  pub async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let key = CacheKey::from(request);
    blocking(&self.storage, move |s| s.match_any(&key)).await
  }

  pub async fn match_url(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let key = CacheKey::get(url);
    blocking(&self.storage, move |s| s.match_any(&key)).await
  }

  /// Lookup restricted to the current generation.
  pub async fn match_current(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let key = CacheKey::get(url);
    let current = self.current.clone();
    blocking(&self.storage, move |s| s.match_in(&current, &key)).await
  }

  /// Fetch every URL and store the results in one transaction.
  ///
  /// Nothing is written unless every fetch resolved with a success status.
  pub async fn add_all(&self, urls: &[Url], network: &dyn Network) -> Result<()> {
    let mut entries = Vec::with_capacity(urls.len());

    for url in urls {
      let request = Request::get(url.clone());
      let response = network
        .fetch(&request)
        .await
        .map_err(|e| WorkerError::InstallFailure {
          url: url.to_string(),
          reason: e.to_string(),
        })?;

      if !response.is_success() {
        return Err(
          WorkerError::InstallFailure {
            url: url.to_string(),
            reason: format!("status {}", response.status),
          }
          .into(),
        );
      }

      entries.push((CacheKey::from(&request), response));
    }

    let count = entries.len();
    let current = self.current.clone();
    blocking(&self.storage, move |s| s.put_all(&current, &entries)).await?;
    info!(store = %self.current, count, "cached urls");
    Ok(())
  }

  /// Delete every store in this namespace other than the current one.
  ///
  /// Returns the names of the deleted stores.
  pub async fn evict_superseded(&self) -> Result<Vec<String>> {
    let prefix = self.prefix.clone();
    let current = self.current.clone();

    blocking(&self.storage, move |s| {
      let mut deleted = Vec::new();
      for name in s.store_names()? {
        if name.starts_with(&prefix) && name != current {
          info!(store = %name, "deleting old cache");
          s.delete_store(&name)?;
          deleted.push(name);
        }
      }
      Ok(deleted)
    })
    .await
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      prefix: self.prefix.clone(),
      current: self.current.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::FakeNetwork;

  fn layer(version: &str, storage: &Arc<SqliteStorage>) -> CacheLayer<SqliteStorage> {
    let config = Config {
      cache_version: version.to_string(),
      ..Config::default()
    };
    CacheLayer::from_config(Arc::clone(storage), &config)
  }

  fn url(path: &str) -> Url {
    Url::parse(&format!("http://localhost:5000{}", path)).unwrap()
  }

  #[test]
  fn test_current_generation_follows_config() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    assert_eq!(layer("v7", &storage).current(), "rechnungen-cache-v7");
  }

  #[tokio::test]
  async fn test_add_all_stores_byte_identical_snapshots() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = layer("v1", &storage);
    let network = FakeNetwork::new();
    network.respond(url("/x").as_str(), Response::new(200, vec![0u8, 159, 146, 150]));
    network.respond(url("/y").as_str(), Response::new(200, "y"));

    cache.add_all(&[url("/x"), url("/y")], &network).await.unwrap();

    let x = cache.match_current(&url("/x")).await.unwrap().unwrap();
    assert_eq!(x.response.body, vec![0u8, 159, 146, 150]);
    assert!(cache.match_current(&url("/y")).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_add_all_is_atomic() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = layer("v1", &storage);
    let network = FakeNetwork::new();
    network.respond(url("/x").as_str(), Response::new(200, "x"));
    network.respond(url("/y").as_str(), Response::new(404, "missing"));

    let err = cache.add_all(&[url("/x"), url("/y")], &network).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<WorkerError>(),
      Some(WorkerError::InstallFailure { .. })
    ));
    assert!(cache.match_current(&url("/x")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_add_all_fails_on_network_error() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = layer("v1", &storage);
    let network = FakeNetwork::new();
    network.respond(url("/x").as_str(), Response::new(200, "x"));
    // /z has no scripted response, so it fails like an offline fetch

    assert!(cache.add_all(&[url("/x"), url("/z")], &network).await.is_err());
    assert!(cache.match_current(&url("/x")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_evict_superseded_keeps_foreign_stores() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let old = layer("v1", &storage);
    old
      .put(&Request::get(url("/a")), &Response::new(200, "a"))
      .await
      .unwrap();
    storage.open_store("someone-else").unwrap();

    let new = layer("v2", &storage);
    new.open().await.unwrap();
    let deleted = new.evict_superseded().await.unwrap();

    assert_eq!(deleted, vec!["rechnungen-cache-v1".to_string()]);
    assert_eq!(
      storage.store_names().unwrap(),
      vec!["someone-else", "rechnungen-cache-v2"]
    );
    assert!(new.match_url(&url("/a")).await.unwrap().is_none());
  }
}
