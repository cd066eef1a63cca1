//! Push payloads to notifications, and notification clicks back to windows.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, NotificationConfig};
use crate::host::Host;

/// Optional fields a push message may carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
  pub tag: Option<String>,
  pub url: Option<String>,
}

impl PushPayload {
  /// Decode raw push data. Missing or malformed data yields all defaults.
  pub fn parse(data: Option<&[u8]>) -> Self {
    data
      .and_then(|bytes| serde_json::from_slice(bytes).ok())
      .unwrap_or_default()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// A notification ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

/// A click on a displayed notification.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationClick {
  #[serde(default)]
  pub action: Option<String>,
  pub notification: ClickedNotification,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClickedNotification {
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub data: NotificationData,
}

/// What a click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(String),
  Opened(String),
  Dismissed,
}

pub struct NotificationBridge {
  host: Arc<dyn Host>,
  defaults: NotificationConfig,
  origin: url::Url,
}

impl NotificationBridge {
  pub fn new(host: Arc<dyn Host>, config: &Config) -> Result<Self> {
    Ok(Self {
      host,
      defaults: config.notifications.clone(),
      origin: config.origin_url()?,
    })
  }

  /// Build the notification for a payload, filling in defaults.
  pub fn build(&self, payload: &PushPayload) -> NotificationRequest {
    let d = &self.defaults;
    NotificationRequest {
      title: payload.title.clone().unwrap_or_else(|| d.title.clone()),
      body: payload.body.clone().unwrap_or_else(|| d.body.clone()),
      icon: payload.icon.clone().unwrap_or_else(|| d.icon.clone()),
      badge: d.badge.clone(),
      tag: payload.tag.clone().unwrap_or_else(|| d.tag.clone()),
      data: NotificationData {
        url: payload.url.clone(),
      },
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: d.open_label.clone(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: d.close_label.clone(),
        },
      ],
    }
  }

  pub async fn on_push(&self, payload: &PushPayload) -> Result<()> {
    let notification = self.build(payload);
    info!(title = %notification.title, tag = %notification.tag, "push received");
    self.host.show_notification(&notification).await
  }

  /// Close the notification; on "open" (or a plain click) focus a window
  /// already showing the target URL, or open one.
  pub async fn on_click(&self, click: &NotificationClick) -> Result<ClickOutcome> {
    let tag = click
      .notification
      .tag
      .clone()
      .unwrap_or_else(|| self.defaults.tag.clone());
    self.host.close_notification(&tag).await?;

    match click.action.as_deref() {
      None | Some("") | Some("open") => {}
      Some(other) => {
        debug!(action = other, "notification dismissed");
        return Ok(ClickOutcome::Dismissed);
      }
    }

    let target = click.notification.data.url.as_deref().unwrap_or("/");
    let target = self
      .origin
      .join(target)
      .map(|u| u.to_string())
      .unwrap_or_else(|_| target.to_string());

    for window in self.host.match_all_windows().await? {
      if window.url == target {
        self.host.focus(&window.id).await?;
        return Ok(ClickOutcome::Focused(window.id));
      }
    }

    self.host.open_window(&target).await?;
    Ok(ClickOutcome::Opened(target))
  }
}
