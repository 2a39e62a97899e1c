use serde::{Deserialize, Serialize};

/// A user-facing button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Inbound push message, as sent by the application server.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub title: String,
  #[serde(default)]
  pub body: String,
  pub icon: Option<String>,
  pub badge: Option<String>,
  pub url: Option<String>,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}

impl PushPayload {
  /// Parse raw push data; `None` for absent or malformed payloads.
  pub fn parse(raw: Option<&[u8]>) -> Option<Self> {
    serde_json::from_slice(raw?).ok()
  }
}

/// Notification-local data carried through to the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  /// Absolute URL the click navigates to
  pub url: String,
}

/// A notification as handed to the host tray.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  #[serde(default)]
  pub actions: Vec<NotificationAction>,
}
