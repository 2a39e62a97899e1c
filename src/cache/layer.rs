//! Versioned cache store bound to the current namespace.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CachedEntry, RequestKey};
use crate::net::{Network, Request, ResponseSnapshot};

/// Cache store for one deployed version.
///
/// Reads and writes always go to the current namespace; other namespaces are
/// only ever enumerated and deleted.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  namespace: String,
}

impl<S: CacheStorage> CacheStore<S> {
  /// Create a cache store with the given storage backend and current version.
  pub fn new(storage: S, namespace: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      namespace: namespace.into(),
    }
  }

  /// The current namespace identifier.
  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// A store over the same backend bound to another namespace.
  pub fn for_namespace(&self, namespace: impl Into<String>) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      namespace: namespace.into(),
    }
  }

  /// The namespace recorded as serving fetches by the last activation.
  pub fn active_namespace(&self) -> Result<Option<String>> {
    self.storage.active_namespace()
  }

  /// Record this namespace as the one serving fetches.
  pub fn mark_active(&self) -> Result<()> {
    self.storage.set_active(&self.namespace)
  }

  /// Store a snapshot under the current namespace (last write wins).
  pub fn put(&self, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    self.storage.put(&self.namespace, key, response)?;
    debug!(url = key.url(), status = response.status, "cached response");
    Ok(())
  }

  /// Look up the snapshot stored for a key in the current namespace.
  pub fn match_request(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.get(&self.namespace, key)
  }

  /// Delete every namespace other than `current_version`.
  ///
  /// Returns the deleted identifiers; empty when nothing was stale.
  pub fn evict_stale(&self, current_version: &str) -> Result<Vec<String>> {
    let mut evicted = Vec::new();

    for name in self.storage.namespaces()? {
      if name != current_version && self.storage.delete_namespace(&name)? {
        info!(namespace = %name, "evicted stale cache namespace");
        evicted.push(name);
      }
    }

    Ok(evicted)
  }

  /// Fetch every manifest asset and store them under the current namespace.
  ///
  /// All-or-nothing: nothing is written unless every asset fetched with a
  /// 2xx status.
  pub async fn precache<N: Network>(
    &self,
    network: &N,
    origin: &Url,
    manifest: &[String],
  ) -> Result<usize> {
    let mut entries = Vec::with_capacity(manifest.len());

    for path in manifest {
      let request = Request::get(path.clone());
      let key = RequestKey::for_request(&request, origin)?;

      let response = network
        .send(request)
        .await
        .map_err(|e| eyre!("Failed to pre-cache {}: {}", path, e))?;

      if !response.is_success() {
        return Err(eyre!(
          "Failed to pre-cache {}: status {}",
          path,
          response.status
        ));
      }

      entries.push((key, response));
    }

    self.storage.create_namespace(&self.namespace)?;
    self.storage.put_all(&self.namespace, &entries)?;

    Ok(entries.len())
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      namespace: self.namespace.clone(),
    }
  }
}
