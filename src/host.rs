//! Capabilities the hosting environment provides to the engine.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::notify::Notification;

/// An open application view (window or tab).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
  pub id: String,
  pub url: String,
}

/// Notification tray and view management.
pub trait Host: Send + Sync + 'static {
  fn show_notification(
    &self,
    notification: &Notification,
  ) -> impl Future<Output = Result<()>> + Send;

  fn close_notification(
    &self,
    notification: &Notification,
  ) -> impl Future<Output = Result<()>> + Send;

  /// Currently open application views.
  fn views(&self) -> impl Future<Output = Result<Vec<View>>> + Send;

  fn focus_view(&self, view: &View) -> impl Future<Output = Result<()>> + Send;

  fn open_view(&self, url: &str) -> impl Future<Output = Result<View>> + Send;
}

/// Line-oriented output channel shared by outcomes and host commands.
pub type Output = mpsc::UnboundedSender<Value>;

/// Host that emits its commands as JSON lines and tracks open views locally.
pub struct StdioHost {
  out: Output,
  views: Mutex<Vec<View>>,
  next_view: AtomicU64,
}

impl StdioHost {
  pub fn new(out: Output) -> Self {
    Self {
      out,
      views: Mutex::new(Vec::new()),
      next_view: AtomicU64::new(1),
    }
  }

  /// Replace the known views with the host's current list.
  pub fn replace_views(&self, views: Vec<View>) -> Result<()> {
    *self.views.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = views;
    Ok(())
  }

  fn emit(&self, command: Value) -> Result<()> {
    self
      .out
      .send(command)
      .map_err(|_| eyre!("Host output channel closed"))
  }
}

impl Host for StdioHost {
  async fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.emit(json!({ "host": "show_notification", "notification": notification }))
  }

  async fn close_notification(&self, notification: &Notification) -> Result<()> {
    self.emit(json!({ "host": "close_notification", "notification": notification }))
  }

  async fn views(&self) -> Result<Vec<View>> {
    let views = self.views.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(views.clone())
  }

  async fn focus_view(&self, view: &View) -> Result<()> {
    self.emit(json!({ "host": "focus_view", "view": view }))
  }

  async fn open_view(&self, url: &str) -> Result<View> {
    let view = View {
      id: format!("view-{}", self.next_view.fetch_add(1, Ordering::SeqCst)),
      url: url.to_string(),
    };

    self.emit(json!({ "host": "open_view", "view": &view }))?;
    self
      .views
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(view.clone());

    Ok(view)
  }
}

#[cfg(test)]
pub mod recording {
  //! Host double that records every command.

  use super::*;

  #[derive(Debug, Clone, PartialEq, Eq)]
  pub enum HostCall {
    Show(Notification),
    Close(Notification),
    Focus(String),
    Open(String),
  }

  #[derive(Default)]
  pub struct RecordingHost {
    pub views: Mutex<Vec<View>>,
    pub calls: Mutex<Vec<HostCall>>,
  }

  impl RecordingHost {
    pub fn with_views(views: Vec<View>) -> Self {
      Self {
        views: Mutex::new(views),
        calls: Mutex::default(),
      }
    }

    pub fn calls(&self) -> Vec<HostCall> {
      self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) {
      self.calls.lock().unwrap().push(call);
    }
  }

  impl Host for RecordingHost {
    async fn show_notification(&self, notification: &Notification) -> Result<()> {
      self.record(HostCall::Show(notification.clone()));
      Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<()> {
      self.record(HostCall::Close(notification.clone()));
      Ok(())
    }

    async fn views(&self) -> Result<Vec<View>> {
      Ok(self.views.lock().unwrap().clone())
    }

    async fn focus_view(&self, view: &View) -> Result<()> {
      self.record(HostCall::Focus(view.id.clone()));
      Ok(())
    }

    async fn open_view(&self, url: &str) -> Result<View> {
      self.record(HostCall::Open(url.to_string()));
      Ok(View {
        id: "opened".to_string(),
        url: url.to_string(),
      })
    }
  }
}
