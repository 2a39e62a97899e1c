use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::payload::{Notification, NotificationData, PushPayload};
use crate::config::NotificationConfig;
use crate::host::Host;

/// Where a notification click sent the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum ClickRoute {
  /// An open view already showed the target URL
  Focused { view_id: String },
  /// No view matched; a new one was opened
  Opened { view_id: String, url: String },
}

/// Turns push messages into notifications and routes their clicks.
pub struct NotificationDispatcher<H: Host> {
  host: Arc<H>,
  origin: Url,
  defaults: NotificationConfig,
}

impl<H: Host> NotificationDispatcher<H> {
  pub fn new(host: Arc<H>, origin: Url, defaults: NotificationConfig) -> Self {
    Self {
      host,
      origin,
      defaults,
    }
  }

  /// Build the notification for a raw push payload, if it is well-formed.
  pub fn build(&self, raw: Option<&[u8]>) -> Option<Notification> {
    let payload = PushPayload::parse(raw)?;
    let target = payload.url.as_deref().unwrap_or(&self.defaults.default_url);
    let url = self.origin.join(target).ok()?;

    Some(Notification {
      title: payload.title,
      body: payload.body,
      icon: payload.icon.unwrap_or_else(|| self.defaults.icon.clone()),
      badge: payload.badge.unwrap_or_else(|| self.defaults.badge.clone()),
      vibrate: self.defaults.vibrate.clone(),
      data: NotificationData {
        url: url.to_string(),
      },
      actions: payload.actions,
    })
  }

  /// Show a notification for a push message.
  ///
  /// Absent or malformed payloads are ignored and yield `None`.
  pub async fn on_push(&self, raw: Option<&[u8]>) -> Result<Option<Notification>> {
    let Some(notification) = self.build(raw) else {
      debug!("ignoring absent or malformed push payload");
      return Ok(None);
    };

    self.host.show_notification(&notification).await?;
    info!(title = %notification.title, url = %notification.data.url, "notification shown");

    Ok(Some(notification))
  }

  /// Close the notification, then focus a view showing its target URL or
  /// open exactly one new view there.
  pub async fn on_notification_click(&self, notification: &Notification) -> Result<ClickRoute> {
    self.host.close_notification(notification).await?;

    let target = self
      .origin
      .join(&notification.data.url)
      .map(|u| u.to_string())
      .unwrap_or_else(|_| notification.data.url.clone());

    let views = self.host.views().await?;
    if let Some(view) = views.into_iter().find(|v| v.url == target) {
      self.host.focus_view(&view).await?;
      info!(view = %view.id, url = %target, "focused existing view");
      return Ok(ClickRoute::Focused { view_id: view.id });
    }

    let view = self.host.open_view(&target).await?;
    info!(view = %view.id, url = %target, "opened new view");

    Ok(ClickRoute::Opened {
      view_id: view.id,
      url: target,
    })
  }
}
