//! Failure taxonomy of the offline layer.
//!
//! These errors travel inside `color_eyre` reports; callers that need to tell
//! them apart use `Report::downcast_ref::<WorkerError>()`.

use thiserror::Error;

/// Transport-level failure of a live fetch. A fetch that resolves with any
/// HTTP status is not an error at this layer.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("connection to {url} failed: {reason}")]
  Connect { url: String, reason: String },

  #[error("network unavailable")]
  Offline,

  #[error("{0}")]
  Other(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("network failure: {0}")]
  NetworkFailure(#[from] NetworkError),

  #[error("no cached snapshot for {method} {url}")]
  CacheMiss { method: String, url: String },

  #[error("install failed: {url}: {reason}")]
  InstallFailure { url: String, reason: String },

  #[error("deferred sync is not available")]
  SyncUnavailable,

  #[error("replay of queued {method} {url} failed: {reason}")]
  ReplayFailure {
    method: String,
    url: String,
    reason: String,
  },

  #[error("cannot {event} while {state}")]
  InvalidTransition { event: &'static str, state: String },
}
