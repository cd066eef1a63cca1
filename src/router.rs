//! Request classification.

use url::Url;

use crate::config::Config;
use crate::http::Request;

/// How an intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  NetworkFirst,
  CacheFirst,
  /// Mutating request: live fetch, queued for replay on failure
  Mutation,
  /// Not intercepted; the host handles it natively
  Passthrough,
}

/// Path prefixes and origin used to classify requests.
#[derive(Debug, Clone)]
pub struct Router {
  origin: Url,
  api_prefix: String,
  static_prefix: String,
}

impl Router {
  pub fn new(origin: Url, api_prefix: &str, static_prefix: &str) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.to_string(),
      static_prefix: static_prefix.to_string(),
    }
  }

  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    Ok(Self::new(
      config.origin_url()?,
      &config.api_prefix,
      &config.static_prefix,
    ))
  }

  /// First match wins:
  /// 1. document requests -> network-first
  /// 2. API paths -> network-first
  /// 3. static paths or another origin -> cache-first
  /// 4. everything else -> network-first
  pub fn classify(&self, request: &Request) -> Route {
    if !request.is_http() {
      return Route::Passthrough;
    }
    if request.is_mutating() {
      return Route::Mutation;
    }

    let path = request.url.path();
    if request.accepts_html() {
      Route::NetworkFirst
    } else if path.starts_with(&self.api_prefix) {
      Route::NetworkFirst
    } else if path.starts_with(&self.static_prefix) || !self.is_same_origin(&request.url) {
      Route::CacheFirst
    } else {
      Route::NetworkFirst
    }
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }
}
