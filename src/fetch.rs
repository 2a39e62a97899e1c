//! Network-first fetch interception with cache fallback.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheSource, CacheStore, CachedEntry, RequestKey, SqliteStorage};
use crate::config::Config;
use crate::lifetime::WaitUntil;
use crate::net::{Network, Request, ResponseSnapshot};

/// Served for failed navigations when the offline route is not cached either.
const OFFLINE_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
</head>
<body>
<h1>You're offline</h1>
<p>This page isn't available right now. Pages you've visited before still work.</p>
</body>
</html>
"#;

/// Result of handing a read request to the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself
  PassThrough,
  /// Intercepted and answered
  Respond {
    response: ResponseSnapshot,
    source: CacheSource,
  },
}

/// Intercepts same-origin reads and applies the network-first policy.
///
/// The cache to read and write is passed per request, so the caller decides
/// which namespace is serving.
pub struct FetchInterceptor<N: Network> {
  network: Arc<N>,
  origin: Url,
  realtime_prefix: String,
  offline_page: String,
}

impl<N: Network> FetchInterceptor<N> {
  pub fn new(network: Arc<N>, origin: Url, config: &Config) -> Self {
    Self {
      network,
      origin,
      realtime_prefix: config.realtime_prefix.clone(),
      offline_page: config.offline_page.clone(),
    }
  }

  /// Decide whether a request is intercepted, returning its cache key if so.
  ///
  /// Only same-origin GETs outside the live-session transport qualify.
  pub fn intercept_key(&self, request: &Request) -> Option<RequestKey> {
    if !request.is_read() {
      return None;
    }

    let url = self.origin.join(&request.url).ok()?;
    if url.origin() != self.origin.origin() {
      return None;
    }

    if self.is_realtime(url.path()) {
      return None;
    }

    Some(RequestKey::new(&request.method, &url))
  }

  fn is_realtime(&self, path: &str) -> bool {
    let prefix = self.realtime_prefix.trim_end_matches('/');
    if prefix.is_empty() {
      return false;
    }

    path == prefix
      || path
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
  }

  /// Handle an outgoing read request.
  ///
  /// 1. Try the network; a response with any status is returned as-is
  /// 2. Successful responses are cached in the background
  /// 3. On network failure, serve the cached snapshot
  /// 4. Otherwise serve the offline page for navigations, or a bare 503
  pub async fn handle(
    &self,
    cache: &CacheStore<SqliteStorage>,
    request: Request,
    wait_until: &WaitUntil,
  ) -> FetchOutcome {
    let Some(key) = self.intercept_key(&request) else {
      return FetchOutcome::PassThrough;
    };
    let is_navigation = request.is_navigation();

    match self.network.send(request).await {
      Ok(response) => {
        if response.is_success() {
          let cache = cache.clone();
          let snapshot = response.clone();
          wait_until.spawn(async move {
            if let Err(e) = cache.put(&key, &snapshot) {
              warn!(url = key.url(), "failed to cache response: {}", e);
            }
          });
        }

        FetchOutcome::Respond {
          response,
          source: CacheSource::Network,
        }
      }
      Err(e) => {
        debug!(url = key.url(), "network failed, falling back to cache: {}", e);
        self.fallback(cache, &key, is_navigation)
      }
    }
  }

  fn fallback(
    &self,
    cache: &CacheStore<SqliteStorage>,
    key: &RequestKey,
    is_navigation: bool,
  ) -> FetchOutcome {
    if let Some(cached) = lookup(cache, key) {
      info!(url = key.url(), cached_at = %cached.cached_at, "serving cached response while offline");
      return FetchOutcome::Respond {
        response: cached.response,
        source: CacheSource::Cache,
      };
    }

    if is_navigation {
      info!(url = key.url(), "serving offline page");
      return FetchOutcome::Respond {
        response: self.offline_page(cache),
        source: CacheSource::OfflinePage,
      };
    }

    info!(url = key.url(), "no cached response, answering 503");
    FetchOutcome::Respond {
      response: ResponseSnapshot::service_unavailable(),
      source: CacheSource::Unavailable,
    }
  }

  fn offline_page(&self, cache: &CacheStore<SqliteStorage>) -> ResponseSnapshot {
    let cached = self
      .origin
      .join(&self.offline_page)
      .ok()
      .map(|url| RequestKey::new("GET", &url))
      .and_then(|key| lookup(cache, &key))
      .map(|entry| entry.response);

    cached.unwrap_or_else(|| {
      ResponseSnapshot::new(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(OFFLINE_DOCUMENT)
    })
  }
}

/// Cache read that treats storage errors as a miss.
fn lookup(cache: &CacheStore<SqliteStorage>, key: &RequestKey) -> Option<CachedEntry> {
  match cache.match_request(key) {
    Ok(entry) => entry,
    Err(e) => {
      warn!(url = key.url(), "cache lookup failed: {}", e);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::test_config;
  use crate::db::Database;
  use crate::net::fake::FakeNetwork;

  struct Fixture {
    network: Arc<FakeNetwork>,
    cache: CacheStore<SqliteStorage>,
    interceptor: FetchInterceptor<FakeNetwork>,
    wait_until: WaitUntil,
  }

  fn fixture() -> Fixture {
    let config = test_config();
    let network = Arc::new(FakeNetwork::new());
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    let cache = CacheStore::new(storage, "v1");
    let interceptor = FetchInterceptor::new(network.clone(), config.origin_url().unwrap(), &config);

    Fixture {
      network,
      cache,
      interceptor,
      wait_until: WaitUntil::new(),
    }
  }

  fn key(path: &str) -> RequestKey {
    let origin = Url::parse("https://feedme.test").unwrap();
    RequestKey::for_request(&Request::get(path), &origin).unwrap()
  }

  #[tokio::test]
  async fn test_offline_replay_matches_last_live_response() {
    let f = fixture();
    let live = ResponseSnapshot::new(200)
      .with_header("content-type", "application/json")
      .with_header("etag", "\"abc\"")
      .with_body(r#"{"items":[1,2]}"#);
    f.network.route("GET", "/lists", live.clone());

    let first = f.interceptor.handle(&f.cache, Request::get("/lists"), &f.wait_until).await;
    assert_eq!(
      first,
      FetchOutcome::Respond {
        response: live.clone(),
        source: CacheSource::Network
      }
    );
    f.wait_until.settle().await;

    f.network.set_offline(true);
    let second = f.interceptor.handle(&f.cache, Request::get("/lists"), &f.wait_until).await;
    assert_eq!(
      second,
      FetchOutcome::Respond {
        response: live,
        source: CacheSource::Cache
      }
    );
  }

  #[tokio::test]
  async fn test_non_success_passes_through_uncached() {
    let f = fixture();
    f.network.route("GET", "/lists", ResponseSnapshot::new(500).with_body("boom"));

    let outcome = f.interceptor.handle(&f.cache, Request::get("/lists"), &f.wait_until).await;
    f.wait_until.settle().await;

    match outcome {
      FetchOutcome::Respond { response, source } => {
        assert_eq!(response.status, 500);
        assert_eq!(source, CacheSource::Network);
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(f.cache.match_request(&key("/lists")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_pass_through_never_touches_cache() {
    let f = fixture();
    f.cache
      .put(&key("/live/websocket"), &ResponseSnapshot::new(200))
      .unwrap();

    let requests = vec![
      Request::get("/shopping_list/42").with_method("POST"),
      Request::get("https://cdn.example.com/lib.js"),
      Request::get("/live/websocket"),
      Request::get("/live"),
    ];

    for request in requests {
      let outcome = f.interceptor.handle(&f.cache, request, &f.wait_until).await;
      assert_eq!(outcome, FetchOutcome::PassThrough);
    }
    f.wait_until.settle().await;

    assert_eq!(f.network.call_count(), 0);
  }

  #[test]
  fn test_realtime_prefix_is_segment_aware() {
    let f = fixture();
    assert!(f.interceptor.intercept_key(&Request::get("/lively")).is_some());
    assert!(f.interceptor.intercept_key(&Request::get("/live/x")).is_none());
    assert!(f
      .interceptor
      .intercept_key(&Request::get("https://feedme.test/items"))
      .is_some());
  }

  #[tokio::test]
  async fn test_navigation_miss_serves_offline_document() {
    let f = fixture();
    f.network.set_offline(true);

    let outcome = f
      .interceptor
      .handle(&f.cache, Request::navigate("/recipes"), &f.wait_until)
      .await;

    match outcome {
      FetchOutcome::Respond { response, source } => {
        assert_eq!(source, CacheSource::OfflinePage);
        assert_eq!(response.status, 200);
        assert!(String::from_utf8_lossy(&response.body).contains("offline"));
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_cached_offline_route_preferred() {
    let f = fixture();
    let page = ResponseSnapshot::new(200).with_body("<p>custom offline</p>");
    f.cache.put(&key("/offline.html"), &page).unwrap();
    f.network.set_offline(true);

    let outcome = f
      .interceptor
      .handle(&f.cache, Request::navigate("/recipes"), &f.wait_until)
      .await;

    assert_eq!(
      outcome,
      FetchOutcome::Respond {
        response: page,
        source: CacheSource::OfflinePage
      }
    );
  }

  #[tokio::test]
  async fn test_subresource_miss_is_503_without_body() {
    let f = fixture();
    f.network.set_offline(true);

    let outcome = f
      .interceptor
      .handle(&f.cache, Request::get("/images/new.png"), &f.wait_until)
      .await;

    assert_eq!(
      outcome,
      FetchOutcome::Respond {
        response: ResponseSnapshot::new(503),
        source: CacheSource::Unavailable
      }
    );
  }
}
