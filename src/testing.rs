//! Scripted network and host used by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::control::ClientMessage;
use crate::error::NetworkError;
use crate::host::{Host, WindowClient};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::notify::NotificationRequest;

/// Network answering from a table of URL -> response. Unknown URLs and an
/// offline network fail like a rejected fetch.
#[derive(Default)]
pub struct FakeNetwork {
  responses: Mutex<HashMap<String, Response>>,
  offline: Mutex<bool>,
  requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    self.requests.lock().unwrap().push(request.clone());
    if *self.offline.lock().unwrap() {
      return Err(NetworkError::Offline);
    }
    self
      .responses
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| NetworkError::Connect {
        url: request.url.to_string(),
        reason: "no route".to_string(),
      })
  }
}

/// Host recording every interaction.
pub struct FakeHost {
  pub windows: Mutex<Vec<WindowClient>>,
  pub messages: Mutex<Vec<(String, ClientMessage)>>,
  pub focused: Mutex<Vec<String>>,
  pub opened: Mutex<Vec<String>>,
  pub notifications: Mutex<Vec<NotificationRequest>>,
  pub closed: Mutex<Vec<String>>,
  pub sync_tags: Mutex<Vec<String>>,
  pub claims: Mutex<usize>,
  sync_supported: bool,
  sync_fails: bool,
}

impl FakeHost {
  pub fn new(sync_supported: bool) -> Self {
    Self {
      windows: Mutex::new(Vec::new()),
      messages: Mutex::new(Vec::new()),
      focused: Mutex::new(Vec::new()),
      opened: Mutex::new(Vec::new()),
      notifications: Mutex::new(Vec::new()),
      closed: Mutex::new(Vec::new()),
      sync_tags: Mutex::new(Vec::new()),
      claims: Mutex::new(0),
      sync_supported,
      sync_fails: false,
    }
  }

  /// Advertise deferred sync but reject every registration.
  pub fn with_failing_sync(mut self) -> Self {
    self.sync_fails = true;
    self
  }

  pub fn with_window(self, id: &str, url: &str) -> Self {
    self.windows.lock().unwrap().push(WindowClient {
      id: id.to_string(),
      url: url.to_string(),
    });
    self
  }

  pub fn messages(&self) -> Vec<(String, ClientMessage)> {
    self.messages.lock().unwrap().clone()
  }
}

#[async_trait]
impl Host for FakeHost {
  async fn match_all_windows(&self) -> Result<Vec<WindowClient>> {
    Ok(self.windows.lock().unwrap().clone())
  }

  async fn focus(&self, client_id: &str) -> Result<()> {
    self.focused.lock().unwrap().push(client_id.to_string());
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<()> {
    self.opened.lock().unwrap().push(url.to_string());
    Ok(())
  }

  async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()> {
    self
      .messages
      .lock()
      .unwrap()
      .push((client_id.to_string(), message.clone()));
    Ok(())
  }

  async fn claim(&self) -> Result<()> {
    *self.claims.lock().unwrap() += 1;
    Ok(())
  }

  async fn show_notification(&self, notification: &NotificationRequest) -> Result<()> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close_notification(&self, tag: &str) -> Result<()> {
    self.closed.lock().unwrap().push(tag.to_string());
    Ok(())
  }

  fn sync_supported(&self) -> bool {
    self.sync_supported
  }

  async fn register_sync(&self, tag: &str) -> Result<()> {
    if self.sync_fails {
      return Err(eyre!("sync registration rejected for {}", tag));
    }
    self.sync_tags.lock().unwrap().push(tag.to_string());
    Ok(())
  }
}
