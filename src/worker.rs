//! The offline engine: lifecycle state plus one handler per event kind.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheSource, CacheStore, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Event, EventKind};
use crate::fetch::{FetchInterceptor, FetchOutcome};
use crate::host::Host;
use crate::lifetime::WaitUntil;
use crate::net::{is_delivered, Network, Request, ResponseSnapshot};
use crate::notify::{ClickRoute, Notification, NotificationDispatcher};
use crate::queue::{PendingAction, PendingActionQueue, ReplayReport, SyncReplayer};

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Started, nothing cached yet
  Parsed,
  /// Manifest pre-cached into the current namespace
  Installed,
  /// Stale namespaces evicted; fetches are intercepted
  Activated,
  /// Install failed; this version never takes control and any previously
  /// active version keeps serving
  Redundant,
}

/// What handling an event produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
  Installed {
    namespace: String,
    assets: usize,
  },
  Activated {
    namespace: String,
    evicted: Vec<String>,
  },
  /// The configured version was already active from an earlier run
  Resumed {
    namespace: String,
  },
  /// The host should perform the request itself
  PassThrough,
  Response {
    source: CacheSource,
    response: ResponseSnapshot,
  },
  /// A submitted request reached the server
  Delivered {
    response: ResponseSnapshot,
  },
  /// A submitted request failed and now waits for replay
  Queued {
    action: PendingAction,
  },
  Synced {
    report: ReplayReport,
  },
  NotificationShown {
    notification: Notification,
  },
  ClickRouted {
    route: ClickRoute,
  },
  Ignored {
    reason: String,
  },
}

/// Offline resilience engine for one deployed version
pub struct Worker<N: Network, H: Host> {
  config: Config,
  lifecycle: Mutex<Lifecycle>,
  origin: Url,
  network: Arc<N>,
  /// Namespace of the configured version; install and activate target it
  cache: CacheStore<SqliteStorage>,
  /// Namespace answering fetches, if any version is active
  serving: RwLock<Option<CacheStore<SqliteStorage>>>,
  queue: PendingActionQueue,
  interceptor: FetchInterceptor<N>,
  replayer: SyncReplayer<N>,
  notifications: NotificationDispatcher<H>,
  wait_until: WaitUntil,
}

impl<N: Network, H: Host> Worker<N, H> {
  pub fn new(
    config: Config,
    db: Database,
    network: Arc<N>,
    host: Arc<H>,
    wait_until: WaitUntil,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let cache = CacheStore::new(SqliteStorage::new(db.clone()), config.cache_version.clone());
    let queue = PendingActionQueue::new(db);

    let interceptor = FetchInterceptor::new(network.clone(), origin.clone(), &config);
    let replayer = SyncReplayer::new(network.clone(), queue.clone());
    let notifications =
      NotificationDispatcher::new(host, origin.clone(), config.notifications.clone());

    Ok(Self {
      config,
      lifecycle: Mutex::new(Lifecycle::Parsed),
      origin,
      network,
      cache,
      serving: RwLock::new(None),
      queue,
      interceptor,
      replayer,
      notifications,
      wait_until,
    })
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self
      .lifecycle
      .lock()
      .map(|l| *l)
      .unwrap_or(Lifecycle::Redundant)
  }

  fn set_lifecycle(&self, next: Lifecycle) -> Result<()> {
    *self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = next;
    Ok(())
  }

  fn serving(&self) -> Option<CacheStore<SqliteStorage>> {
    self.serving.read().ok().and_then(|s| s.clone())
  }

  fn set_serving(&self, cache: CacheStore<SqliteStorage>) -> Result<()> {
    *self
      .serving
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(cache);
    Ok(())
  }

  /// Pick up the namespace an earlier run left active.
  ///
  /// Returns `Resumed` when that is the configured version, which then needs
  /// neither install nor activate. An older active namespace keeps answering
  /// fetches until this version activates.
  pub fn resume(&self) -> Result<Option<Outcome>> {
    let Some(active) = self.cache.active_namespace()? else {
      return Ok(None);
    };

    if active == self.cache.namespace() {
      self.set_lifecycle(Lifecycle::Activated)?;
      self.set_serving(self.cache.clone())?;
      info!(namespace = %active, "resumed active version");
      return Ok(Some(Outcome::Resumed { namespace: active }));
    }

    info!(
      namespace = %active,
      next = self.cache.namespace(),
      "previous version serves until activation"
    );
    self.set_serving(self.cache.for_namespace(active))?;
    Ok(None)
  }

  /// Pre-cache the manifest. Failure leaves every existing namespace as it was.
  pub async fn install(&self) -> Result<Outcome> {
    let namespace = self.cache.namespace().to_string();
    info!(namespace = %namespace, assets = self.config.manifest.len(), "installing");

    match self
      .cache
      .precache(self.network.as_ref(), &self.origin, &self.config.manifest)
      .await
    {
      Ok(assets) => {
        if self.lifecycle() != Lifecycle::Activated {
          self.set_lifecycle(Lifecycle::Installed)?;
        }
        info!(namespace = %namespace, assets, "install complete");
        Ok(Outcome::Installed { namespace, assets })
      }
      Err(e) => {
        if self.lifecycle() != Lifecycle::Activated {
          self.set_lifecycle(Lifecycle::Redundant)?;
        }
        error!(namespace = %namespace, "install failed: {}", e);
        Err(eyre!("Install of {} failed: {}", namespace, e))
      }
    }
  }

  /// Evict every namespace but the current one and take control of fetches.
  pub async fn activate(&self) -> Result<Outcome> {
    match self.lifecycle() {
      Lifecycle::Installed | Lifecycle::Activated => {}
      state => {
        return Err(eyre!(
          "Cannot activate {} while {:?}; install must succeed first",
          self.cache.namespace(),
          state
        ))
      }
    }

    let namespace = self.cache.namespace().to_string();
    self.cache.mark_active()?;
    let evicted = self.cache.evict_stale(&namespace)?;
    self.set_lifecycle(Lifecycle::Activated)?;
    self.set_serving(self.cache.clone())?;
    info!(namespace = %namespace, evicted = evicted.len(), "activated");

    Ok(Outcome::Activated { namespace, evicted })
  }

  /// Answer a read request; never fails.
  pub async fn fetch(&self, request: Request) -> Outcome {
    let Some(cache) = self.serving() else {
      return Outcome::PassThrough;
    };

    match self.interceptor.handle(&cache, request, &self.wait_until).await {
      FetchOutcome::PassThrough => Outcome::PassThrough,
      FetchOutcome::Respond { response, source } => Outcome::Response { source, response },
    }
  }

  /// Deliver a mutating request now, or queue it for replay if delivery fails.
  pub async fn submit(&self, request: Request) -> Result<Outcome> {
    if request.is_read() {
      return Err(eyre!(
        "Submit expects a mutating request, got GET {}",
        request.url
      ));
    }

    let result = self.network.send(request.clone()).await;
    if is_delivered(&result) {
      let response = result?;
      return Ok(Outcome::Delivered { response });
    }

    let action = self.queue.enqueue(&request)?;
    match result {
      Ok(response) => warn!(id = action.id, url = %action.url, status = response.status, "delivery failed, queued"),
      Err(e) => warn!(id = action.id, url = %action.url, "delivery failed, queued: {}", e),
    }

    Ok(Outcome::Queued { action })
  }

  /// Replay pending actions when the sync tag is ours.
  pub async fn sync(&self, tag: &str) -> Result<Outcome> {
    if tag != self.config.sync_tag {
      return Ok(Outcome::Ignored {
        reason: format!("unknown sync tag '{}'", tag),
      });
    }

    let report = self.replayer.replay().await?;
    Ok(Outcome::Synced { report })
  }

  pub async fn push(&self, data: Option<&str>) -> Result<Outcome> {
    let shown = self
      .notifications
      .on_push(data.map(str::as_bytes))
      .await?;

    Ok(match shown {
      Some(notification) => Outcome::NotificationShown { notification },
      None => Outcome::Ignored {
        reason: "absent or malformed push payload".to_string(),
      },
    })
  }

  pub async fn notification_click(&self, notification: &Notification) -> Result<Outcome> {
    let route = self
      .notifications
      .on_notification_click(notification)
      .await?;
    Ok(Outcome::ClickRouted { route })
  }

  #[cfg(test)]
  pub fn queue(&self) -> &PendingActionQueue {
    &self.queue
  }
}

/// Future returned by every handler; the scheduler awaits it before the
/// event counts as processed.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Outcome>> + Send>>;

pub type Handler<N, H> = fn(Arc<Worker<N, H>>, Event) -> HandlerFuture;

/// Dispatch table from event kind to handler.
///
/// `views_changed` is host bookkeeping and has no entry.
pub fn handlers<N: Network, H: Host>() -> HashMap<EventKind, Handler<N, H>> {
  let mut table: HashMap<EventKind, Handler<N, H>> = HashMap::new();
  table.insert(EventKind::Install, on_install::<N, H>);
  table.insert(EventKind::Activate, on_activate::<N, H>);
  table.insert(EventKind::Fetch, on_fetch::<N, H>);
  table.insert(EventKind::Submit, on_submit::<N, H>);
  table.insert(EventKind::Sync, on_sync::<N, H>);
  table.insert(EventKind::Push, on_push::<N, H>);
  table.insert(EventKind::NotificationClick, on_notification_click::<N, H>);
  table
}

fn mismatched(expected: EventKind, event: &Event) -> color_eyre::Report {
  eyre!(
    "Handler for {:?} received {:?} event",
    expected,
    event.kind()
  )
}

fn on_install<N: Network, H: Host>(worker: Arc<Worker<N, H>>, _event: Event) -> HandlerFuture {
  Box::pin(async move { worker.install().await })
}

fn on_activate<N: Network, H: Host>(worker: Arc<Worker<N, H>>, _event: Event) -> HandlerFuture {
  Box::pin(async move { worker.activate().await })
}

fn on_fetch<N: Network, H: Host>(worker: Arc<Worker<N, H>>, event: Event) -> HandlerFuture {
  Box::pin(async move {
    match event {
      Event::Fetch { request } => Ok(worker.fetch(request).await),
      other => Err(mismatched(EventKind::Fetch, &other)),
    }
  })
}

fn on_submit<N: Network, H: Host>(worker: Arc<Worker<N, H>>, event: Event) -> HandlerFuture {
  Box::pin(async move {
    match event {
      Event::Submit { request } => worker.submit(request).await,
      other => Err(mismatched(EventKind::Submit, &other)),
    }
  })
}

fn on_sync<N: Network, H: Host>(worker: Arc<Worker<N, H>>, event: Event) -> HandlerFuture {
  Box::pin(async move {
    match event {
      Event::Sync { tag } => worker.sync(&tag).await,
      other => Err(mismatched(EventKind::Sync, &other)),
    }
  })
}

fn on_push<N: Network, H: Host>(worker: Arc<Worker<N, H>>, event: Event) -> HandlerFuture {
  Box::pin(async move {
    match event {
      Event::Push { data } => worker.push(data.as_deref()).await,
      other => Err(mismatched(EventKind::Push, &other)),
    }
  })
}

fn on_notification_click<N: Network, H: Host>(
  worker: Arc<Worker<N, H>>,
  event: Event,
) -> HandlerFuture {
  Box::pin(async move {
    match event {
      Event::NotificationClick { notification } => worker.notification_click(&notification).await,
      other => Err(mismatched(EventKind::NotificationClick, &other)),
    }
  })
}
