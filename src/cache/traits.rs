//! Core types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, ResponseSnapshot};

/// Normalized identity of a read request: upper-cased method plus the
/// absolute URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);

    Self {
      method: method.to_uppercase(),
      url: url.to_string(),
    }
  }

  /// Build the key for a request, resolving relative URLs against the origin.
  pub fn for_request(request: &Request, origin: &Url) -> Result<Self> {
    let url = origin
      .join(&request.url)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", request.url, e))?;

    Ok(Self::new(&request.method, &url))
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: ResponseSnapshot,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Network failed, serving the cached snapshot
  Cache,
  /// Network failed on a navigation with no cached snapshot
  OfflinePage,
  /// Network failed and nothing could stand in for it
  Unavailable,
}
