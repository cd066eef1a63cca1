//! Core types for the response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};

/// Normalized cache identity: URL without fragment plus upper-case method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  url: String,
  method: String,
}

impl CacheKey {
  pub fn new(url: &Url, method: &str) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      url: url.to_string(),
      method: method.to_ascii_uppercase(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(url, "GET")
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  /// Stable, fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&Request> for CacheKey {
  fn from(request: &Request) -> Self {
    Self::new(&request.url, request.method.as_str())
  }
}

/// A stored snapshot and where it lives.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub store: String,
  /// Last write time
  pub cached_at: DateTime<Utc>,
}

/// Where a response handed back to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Stored snapshot
  Cache,
  /// Offline page or synthesized unavailable response
  Fallback,
}
