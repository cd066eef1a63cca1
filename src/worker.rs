//! Event dispatch for the offline worker.
//!
//! Every platform callback arrives as an [`Event`] and goes through
//! [`Worker::dispatch`]. Work that outlives the call is registered on the
//! returned [`Completion`], which the host awaits before treating the event as
//! finished.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{CacheLayer, SqliteStorage};
use crate::completion::Completion;
use crate::config::Config;
use crate::control::ControlMessage;
use crate::host::Host;
use crate::http::{Request, Response};
use crate::lifecycle::{LifecycleManager, LifecycleState};
use crate::network::Network;
use crate::notify::{NotificationBridge, NotificationClick, PushPayload};
use crate::queue::MutationQueue;
use crate::router::{Route, Router};
use crate::strategy::Strategies;

/// Platform callbacks.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Connectivity restored for a deferred-sync tag
  Sync { tag: String },
  /// Raw push data, if any
  Push(Option<Vec<u8>>),
  NotificationClick(NotificationClick),
  Message(serde_json::Value),
}

/// Outcome of dispatching one event.
pub struct Dispatched {
  /// Set for intercepted fetches only
  pub response: Option<Response>,
  pub completion: Completion,
}

impl Dispatched {
  fn new(completion: Completion) -> Self {
    Self {
      response: None,
      completion,
    }
  }
}

struct Inner {
  config: Config,
  router: Router,
  cache: CacheLayer<SqliteStorage>,
  strategies: Strategies<SqliteStorage>,
  queue: MutationQueue<SqliteStorage>,
  notifications: NotificationBridge,
  lifecycle: Mutex<LifecycleManager>,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
}

/// The offline worker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Worker {
  inner: Arc<Inner>,
}

impl Worker {
  pub fn new(
    config: Config,
    storage: Arc<SqliteStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Result<Self> {
    let router = Router::from_config(&config)?;
    let cache = CacheLayer::from_config(Arc::clone(&storage), &config);
    let strategies = Strategies::new(
      cache.clone(),
      Arc::clone(&network),
      config.resolve(&config.offline_url)?,
    );
    let queue = MutationQueue::new(
      storage,
      Arc::clone(&network),
      Arc::clone(&host),
      &config.sync_tag,
    );
    let notifications = NotificationBridge::new(Arc::clone(&host), &config)?;

    Ok(Self {
      inner: Arc::new(Inner {
        config,
        router,
        cache,
        strategies,
        queue,
        notifications,
        lifecycle: Mutex::new(LifecycleManager::new()),
        network,
        host,
      }),
    })
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  pub fn cache(&self) -> &CacheLayer<SqliteStorage> {
    &self.inner.cache
  }

  pub fn queue(&self) -> &MutationQueue<SqliteStorage> {
    &self.inner.queue
  }

  pub fn state(&self) -> Result<LifecycleState> {
    Ok(self.lifecycle()?.state())
  }

  /// Whether an installed worker asked to activate right away.
  pub fn should_activate(&self) -> Result<bool> {
    Ok(self.lifecycle()?.should_activate())
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, LifecycleManager>> {
    self
      .inner
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Route an event to its handler.
  pub async fn dispatch(&self, event: Event) -> Result<Dispatched> {
    let mut completion = Completion::new();

    match event {
      Event::Install => {
        self.lifecycle()?.begin_install()?;
        let worker = self.clone();
        completion.wait_until(async move { worker.install().await });
      }
      Event::Activate => {
        self.lifecycle()?.begin_activate()?;
        let worker = self.clone();
        completion.wait_until(async move { worker.activate().await });
      }
      Event::Fetch(request) => {
        let response = self.fetch(&request, &mut completion).await;
        return Ok(Dispatched {
          response,
          completion,
        });
      }
      Event::Sync { tag } => {
        if tag == self.inner.queue.tag() {
          let worker = self.clone();
          completion.wait_until(async move {
            let outcome = worker.inner.queue.replay().await?;
            info!(replayed = outcome.replayed, remaining = outcome.remaining, "sync finished");
            Ok(())
          });
        } else {
          debug!(tag = %tag, "ignoring sync for unknown tag");
        }
      }
      Event::Push(data) => {
        let payload = PushPayload::parse(data.as_deref());
        let worker = self.clone();
        completion.wait_until(async move { worker.inner.notifications.on_push(&payload).await });
      }
      Event::NotificationClick(click) => {
        let worker = self.clone();
        completion.wait_until(async move {
          worker.inner.notifications.on_click(&click).await?;
          Ok(())
        });
      }
      Event::Message(value) => {
        info!(message = %value, "message received");
        self.on_message(&value, &mut completion)?;
      }
    }

    Ok(Dispatched::new(completion))
  }

  async fn install(&self) -> Result<()> {
    info!(version = %self.inner.config.cache_version, "installing");

    match self.precache().await {
      Ok(()) => {
        let mut lifecycle = self.lifecycle()?;
        lifecycle.finish_install()?;
        lifecycle.skip_waiting();
        info!("installation complete");
        Ok(())
      }
      Err(e) => {
        self.lifecycle()?.fail_install();
        error!(error = %e, "installation failed");
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<()> {
    let cache = &self.inner.cache;
    cache.open().await?;
    let urls = self.resolve_all(&self.inner.config.precache)?;
    cache.add_all(&urls, self.inner.network.as_ref()).await
  }

  async fn activate(&self) -> Result<()> {
    info!(version = %self.inner.config.cache_version, "activating");

    self.inner.cache.evict_superseded().await?;
    self.inner.host.claim().await?;
    self.lifecycle()?.finish_activate()?;

    info!("activation complete");
    Ok(())
  }

  async fn fetch(&self, request: &Request, completion: &mut Completion) -> Option<Response> {
    let strategies = &self.inner.strategies;

    let served = match self.inner.router.classify(request) {
      Route::Passthrough => return None,
      Route::Mutation => return Some(self.inner.queue.send(request).await),
      Route::NetworkFirst => strategies.network_first(request).await,
      Route::CacheFirst => strategies.cache_first(request, completion).await,
    };

    debug!(url = %request.url, source = ?served.source, status = served.response.status, "served");
    Some(served.response)
  }

  fn on_message(&self, value: &serde_json::Value, completion: &mut Completion) -> Result<()> {
    match ControlMessage::parse(value) {
      Some(ControlMessage::SkipWaiting) => {
        self.lifecycle()?.skip_waiting();
      }
      Some(ControlMessage::CacheUrls { urls }) => {
        let urls = self.resolve_all(&urls)?;
        let worker = self.clone();
        completion.wait_until(async move {
          worker
            .inner
            .cache
            .add_all(&urls, worker.inner.network.as_ref())
            .await
        });
      }
      None => {}
    }
    Ok(())
  }

  fn resolve_all(&self, urls: &[String]) -> Result<Vec<Url>> {
    urls.iter().map(|u| self.inner.config.resolve(u)).collect()
  }
}
