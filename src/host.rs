//! Platform facilities other than the network: window clients, notifications
//! and deferred sync.

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Mutex;
use tracing::info;

use crate::control::ClientMessage;
use crate::notify::NotificationRequest;

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: String,
}

#[async_trait]
pub trait Host: Send + Sync {
  /// All application windows, including ones not yet controlled.
  async fn match_all_windows(&self) -> Result<Vec<WindowClient>>;

  async fn focus(&self, client_id: &str) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<()>;

  async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()>;

  /// Take control of every already-open page.
  async fn claim(&self) -> Result<()>;

  async fn show_notification(&self, notification: &NotificationRequest) -> Result<()>;

  async fn close_notification(&self, tag: &str) -> Result<()>;

  /// Whether a deferred-sync facility exists at all.
  fn sync_supported(&self) -> bool;

  async fn register_sync(&self, tag: &str) -> Result<()>;
}

/// Host used by the command line driver.
///
/// It has no windows of its own; broadcast messages are printed to stdout as
/// JSON lines so a wrapping process can pick them up.
pub struct ConsoleHost {
  sync_supported: bool,
  registered: Mutex<Vec<String>>,
}

impl ConsoleHost {
  pub fn new(sync_supported: bool) -> Self {
    Self {
      sync_supported,
      registered: Mutex::new(Vec::new()),
    }
  }

  /// Tags registered for deferred sync during this run.
  pub fn registered_tags(&self) -> Vec<String> {
    self
      .registered
      .lock()
      .map(|tags| tags.clone())
      .unwrap_or_default()
  }
}

#[async_trait]
impl Host for ConsoleHost {
  async fn match_all_windows(&self) -> Result<Vec<WindowClient>> {
    // The console is the single "window"
    Ok(vec![WindowClient {
      id: "console".to_string(),
      url: String::new(),
    }])
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    info!(client_id, "focus window");
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    info!(url, "open window");
    println!("open {}", url);
    Ok(())
  }

  async fn post_message(&self, _client_id: &str, message: &ClientMessage) -> Result<()> {
    println!("{}", serde_json::to_string(message)?);
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    info!("claimed clients");
    Ok(())
  }

  async fn show_notification(&self, notification: &NotificationRequest) -> Result<()> {
    info!(title = %notification.title, tag = %notification.tag, "show notification");
    println!("{}", serde_json::to_string(notification)?);
    Ok(())
  }

  async fn close_notification(&self, tag: &str) -> Result<()> {
    info!(tag, "close notification");
    Ok(())
  }

  fn sync_supported(&self) -> bool {
    self.sync_supported
  }

  async fn register_sync(&self, tag: &str) -> Result<()> {
    let mut registered = self
      .registered
      .lock()
      .map_err(|e| color_eyre::eyre::eyre!("Lock poisoned: {}", e))?;
    if !registered.iter().any(|t| t == tag) {
      registered.push(tag.to_string());
    }
    info!(tag, "registered deferred sync");
    Ok(())
  }
}
