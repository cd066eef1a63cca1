//! Messages between the application and the worker.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Commands the application can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  /// Activate a waiting install immediately
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Add URLs to the current cache generation
  #[serde(rename = "CACHE_URLS")]
  CacheUrls { urls: Vec<String> },
}

impl ControlMessage {
  /// Decode a message; anything unrecognised is `None`.
  pub fn parse(value: &serde_json::Value) -> Option<Self> {
    match serde_json::from_value(value.clone()) {
      Ok(message) => Some(message),
      Err(e) => {
        debug!(message = %value, error = %e, "ignoring control message");
        None
      }
    }
  }
}

/// Messages broadcast to application windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
  SyncComplete { message: String },
}
