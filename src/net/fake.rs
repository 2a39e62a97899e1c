//! In-process network double for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::client::Network;
use super::types::{Request, ResponseSnapshot};

/// Serves canned responses by `METHOD path`; fails everything while offline.
#[derive(Default)]
pub struct FakeNetwork {
  offline: AtomicBool,
  routes: Mutex<HashMap<String, ResponseSnapshot>>,
  failing: Mutex<Vec<String>>,
  calls: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, method: &str, url: &str, response: ResponseSnapshot) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(route_key(method, url), response);
  }

  /// Make one route fail with a transport error, even while online.
  pub fn fail(&self, method: &str, url: &str) {
    self.failing.lock().unwrap().push(route_key(method, url));
  }

  pub fn heal(&self, method: &str, url: &str) {
    let key = route_key(method, url);
    self.failing.lock().unwrap().retain(|k| *k != key);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

fn route_key(method: &str, url: &str) -> String {
  let path = url::Url::parse(url)
    .map(|u| u.path().to_string())
    .unwrap_or_else(|_| url.to_string());
  format!("{} {}", method.to_uppercase(), path)
}

impl Network for FakeNetwork {
  async fn send(&self, request: Request) -> Result<ResponseSnapshot> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    let key = route_key(&request.method, &request.url);
    if self.failing.lock().unwrap().contains(&key) {
      return Err(eyre!("connection reset for {}", key));
    }

    let routed = self.routes.lock().unwrap().get(&key).cloned();
    Ok(routed.unwrap_or_else(|| ResponseSnapshot::new(404)))
  }
}
