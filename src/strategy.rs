//! Network-first and cache-first read policies.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, CachedResponse, ResponseSource};
use crate::completion::Completion;
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::network::Network;

/// A response together with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
    }
  }

  fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
    }
  }
}

/// Read strategies over a cache layer and the live network.
pub struct Strategies<S: CacheStorage> {
  cache: CacheLayer<S>,
  network: Arc<dyn Network>,
  offline_url: Url,
}

impl<S: CacheStorage + 'static> Strategies<S> {
  pub fn new(cache: CacheLayer<S>, network: Arc<dyn Network>, offline_url: Url) -> Self {
    Self {
      cache,
      network,
      offline_url,
    }
  }

  /// Live fetch first; on transport failure fall back to the cache, then to
  /// the offline page (documents) or a JSON 503 (everything else).
  pub async fn network_first(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.cache.put(request, &response).await {
            warn!(url = %request.url, error = %e, "failed to cache response");
          }
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %WorkerError::from(e), "trying cache");

        if let Some(cached) = self.lookup(request).await {
          return Served::cache(cached);
        }
        debug!(error = %miss(request), "serving fallback");

        if request.accepts_html() {
          return match self.lookup_url(&self.offline_url).await {
            Some(offline) => Served::fallback(offline.response),
            None => Served::fallback(Response::text(503, "Offline")),
          };
        }

        Served::fallback(Response::json(
          503,
          &json!({
            "success": false,
            "error": "Offline - keine gecachten Daten verfügbar",
            "offline": true,
          }),
        ))
      }
    }
  }

  /// Serve a stored snapshot immediately and refresh it in the background;
  /// without a snapshot, fetch live.
  ///
  /// The refresh is registered on `completion` and only ever writes to the
  /// cache; the snapshot already returned is never affected.
  pub async fn cache_first(&self, request: &Request, completion: &mut Completion) -> Served {
    if let Some(cached) = self.lookup(request).await {
      let cache = self.cache.clone();
      let network = Arc::clone(&self.network);
      let request = request.clone();

      completion.wait_until(async move {
        match network.fetch(&request).await {
          Ok(response) if response.is_success() => {
            if let Err(e) = cache.put(&request, &response).await {
              warn!(url = %request.url, error = %e, "failed to refresh cached response");
            }
          }
          Ok(response) => {
            debug!(url = %request.url, status = response.status, "revalidation not cached");
          }
          Err(e) => {
            debug!(url = %request.url, error = %e, "revalidation failed");
          }
        }
        Ok(())
      });

      return Served::cache(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = self.cache.put(request, &response).await {
            warn!(url = %request.url, error = %e, "failed to cache response");
          }
        }
        Served::network(response)
      }
      Err(e) => {
        debug!(miss = %miss(request), error = %WorkerError::from(e), "serving fallback");
        Served::fallback(Response::text(503, "Offline"))
      }
    }
  }

  /// Cache lookup where a storage error counts as a miss.
  async fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    self.cache.match_request(request).await.unwrap_or_else(|e| {
      warn!(url = %request.url, error = %e, "cache lookup failed");
      None
    })
  }

  async fn lookup_url(&self, url: &Url) -> Option<CachedResponse> {
    self.cache.match_url(url).await.unwrap_or_else(|e| {
      warn!(url = %url, error = %e, "cache lookup failed");
      None
    })
  }
}

fn miss(request: &Request) -> WorkerError {
  WorkerError::CacheMiss {
    method: request.method.to_string(),
    url: request.url.to_string(),
  }
}
