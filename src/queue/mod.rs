//! Durable at-least-once queue for mutating requests that failed offline.
//!
//! A mutation whose live fetch is rejected is persisted and registered for
//! deferred sync. When the host signals that connectivity is back, the queue
//! is resent in FIFO order and every record is dropped only after the server
//! confirmed it with a success status.

mod storage;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

pub use storage::QueueStorage;

use crate::cache::blocking;
use crate::control::ClientMessage;
use crate::error::WorkerError;
use crate::host::Host;
use crate::http::{Headers, Request, Response};
use crate::network::Network;

/// Header carrying a queued record's id on every resend, so a backend can
/// recognise duplicates.
pub const REPLAY_ID_HEADER: &str = "x-offline-replay-id";

/// A persisted mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMutation {
  /// FIFO position; assigned by storage
  pub seq: i64,
  pub tag: String,
  pub replay_id: String,
  pub method: String,
  pub url: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
  pub last_error: Option<String>,
}

impl QueuedMutation {
  pub fn from_request(tag: &str, request: &Request) -> Self {
    Self {
      seq: 0,
      tag: tag.to_string(),
      replay_id: uuid::Uuid::new_v4().to_string(),
      method: request.method.to_string(),
      url: request.url.to_string(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at: Utc::now(),
      attempts: 0,
      last_error: None,
    }
  }

  /// Rebuild the request to resend.
  pub fn to_request(&self) -> Result<Request> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|e| eyre!("Invalid queued method '{}': {}", self.method, e))?;
    let url = Url::parse(&self.url).map_err(|e| eyre!("Invalid queued URL '{}': {}", self.url, e))?;

    Ok(Request {
      method,
      url,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
    .with_header(REPLAY_ID_HEADER, &self.replay_id))
  }
}

/// Result of one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
  pub replayed: usize,
  pub remaining: usize,
}

impl ReplayOutcome {
  pub fn is_complete(&self) -> bool {
    self.remaining == 0
  }
}

pub struct MutationQueue<S: QueueStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
  tag: String,
  /// Serializes replay runs for this tag
  replay_lock: Mutex<()>,
}

impl<S: QueueStorage + 'static> MutationQueue<S> {
  pub fn new(storage: Arc<S>, network: Arc<dyn Network>, host: Arc<dyn Host>, tag: &str) -> Self {
    Self {
      storage,
      network,
      host,
      tag: tag.to_string(),
      replay_lock: Mutex::new(()),
    }
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub async fn pending(&self) -> Result<Vec<QueuedMutation>> {
    let tag = self.tag.clone();
    blocking(&self.storage, move |s| s.pending(&tag)).await
  }

  /// Send a mutating request live, deferring it when the network is down.
  pub async fn send(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        info!(method = %request.method, url = %request.url, error = %e, "mutation failed offline");
        self.defer(request).await
      }
    }
  }

  /// Register for deferred sync, then persist a failed mutation.
  ///
  /// Without a deferred-sync facility nothing is stored and the caller gets
  /// an offline error instead. The same holds when registration is rejected:
  /// a 503 always means nothing was queued.
  pub async fn defer(&self, request: &Request) -> Response {
    if !self.host.sync_supported() {
      warn!(error = %WorkerError::SyncUnavailable, url = %request.url, "mutation not queued");
      return offline_response();
    }

    match self.enqueue(request).await {
      Ok(seq) => {
        info!(seq, tag = %self.tag, url = %request.url, "mutation queued");
        Response::json(
          202,
          &json!({
            "success": false,
            "message": "Offline - wird synchronisiert wenn online",
            "queued": true,
          }),
        )
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "failed to queue mutation");
        offline_response()
      }
    }
  }

  async fn enqueue(&self, request: &Request) -> Result<i64> {
    // Persist only behind a successful registration
    self.host.register_sync(&self.tag).await?;

    let record = QueuedMutation::from_request(&self.tag, request);
    blocking(&self.storage, move |s| s.enqueue(&record)).await
  }

  /// Resend queued mutations oldest first.
  ///
  /// A record is removed only after a success status. The first failure stops
  /// the run and leaves that record and everything after it queued. Records
  /// deferred while the run is in progress are picked up by the same run, so
  /// `sync-complete` is broadcast to every window only once the queue is
  /// really empty. A record that can no longer be turned into a request is
  /// dropped with a warning.
  pub async fn replay(&self) -> Result<ReplayOutcome> {
    let _guard = self.replay_lock.lock().await;
    let mut replayed = 0;

    loop {
      let pending = self.pending().await?;
      if pending.is_empty() {
        break;
      }
      info!(tag = %self.tag, count = pending.len(), "syncing offline mutations");

      for record in pending {
        let request = match record.to_request() {
          Ok(request) => request,
          Err(e) => {
            warn!(seq = record.seq, error = %e, "dropping unreadable queued mutation");
            self.remove(record.seq).await?;
            continue;
          }
        };

        if let Err(reason) = self.resend(&request).await {
          let seq = record.seq;
          let failure = WorkerError::ReplayFailure {
            method: record.method.clone(),
            url: record.url.clone(),
            reason: reason.clone(),
          };
          warn!(seq, attempts = record.attempts + 1, error = %failure, "replay stopped");
          blocking(&self.storage, move |s| s.record_attempt(seq, &reason)).await?;

          return Ok(ReplayOutcome {
            replayed,
            remaining: self.pending().await?.len(),
          });
        }

        self.remove(record.seq).await?;
        replayed += 1;
      }
    }

    self.broadcast_complete().await;
    Ok(ReplayOutcome {
      replayed,
      remaining: 0,
    })
  }

  async fn resend(&self, request: &Request) -> std::result::Result<(), String> {
    let response = self
      .network
      .fetch(request)
      .await
      .map_err(|e| e.to_string())?;

    if response.is_success() {
      Ok(())
    } else {
      Err(format!("status {}", response.status))
    }
  }

  async fn remove(&self, seq: i64) -> Result<()> {
    blocking(&self.storage, move |s| s.remove(seq)).await
  }

  async fn broadcast_complete(&self) {
    let message = ClientMessage::SyncComplete {
      message: "Offline-Daten erfolgreich synchronisiert".to_string(),
    };

    let windows = match self.host.match_all_windows().await {
      Ok(windows) => windows,
      Err(e) => {
        warn!(error = %e, "failed to list clients for sync-complete");
        return;
      }
    };

    for window in windows {
      if let Err(e) = self.host.post_message(&window.id, &message).await {
        warn!(client = %window.id, error = %e, "failed to post sync-complete");
      }
    }
  }
}

fn offline_response() -> Response {
  Response::json(
    503,
    &json!({
      "success": false,
      "error": "Offline - keine Verbindung zum Server",
      "offline": true,
    }),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::error::NetworkError;
  use crate::testing::{FakeHost, FakeNetwork};
  use async_trait::async_trait;
  use std::sync::Mutex as StdMutex;

  const TAG: &str = "sync-invoices";

  fn post(path: &str, body: &str) -> Request {
    Request::new(
      Method::POST,
      Url::parse(&format!("http://localhost:5000{}", path)).unwrap(),
    )
    .with_header("content-type", "application/json")
    .with_body(body)
  }

  fn host(sync: bool) -> FakeHost {
    FakeHost::new(sync)
      .with_window("w1", "http://localhost:5000/")
      .with_window("w2", "http://localhost:5000/invoices")
  }

  fn setup_with(
    host: FakeHost,
  ) -> (
    MutationQueue<SqliteStorage>,
    Arc<FakeNetwork>,
    Arc<FakeHost>,
  ) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let host = Arc::new(host);
    let queue = MutationQueue::new(storage, network.clone(), host.clone(), TAG);
    (queue, network, host)
  }

  fn setup(
    sync: bool,
  ) -> (
    MutationQueue<SqliteStorage>,
    Arc<FakeNetwork>,
    Arc<FakeHost>,
  ) {
    setup_with(host(sync))
  }

  /// Network that defers one more mutation while the first resend is in
  /// flight.
  struct LateMutationNetwork {
    inner: FakeNetwork,
    storage: Arc<SqliteStorage>,
    late: StdMutex<Option<QueuedMutation>>,
  }

  #[async_trait]
  impl Network for LateMutationNetwork {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetworkError> {
      let late = self.late.lock().unwrap().take();
      if let Some(record) = late {
        self.storage.enqueue(&record).unwrap();
      }
      self.inner.fetch(request).await
    }
  }

  #[tokio::test]
  async fn test_online_mutation_passes_through() {
    let (queue, network, _host) = setup(true);
    network.respond("http://localhost:5000/api/invoices", Response::new(201, "{}"));

    let response = queue.send(&post("/api/invoices", "{}")).await;
    assert_eq!(response.status, 201);
    assert!(queue.pending().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued() {
    let (queue, network, host) = setup(true);
    network.set_offline(true);

    let response = queue.send(&post("/api/invoices", r#"{"n":1}"#)).await;

    assert_eq!(response.status, 202);
    let body = response.body_json().unwrap();
    assert_eq!(body["queued"], true);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].method, "POST");
    assert_eq!(pending[0].body, br#"{"n":1}"#);
    assert_eq!(*host.sync_tags.lock().unwrap(), vec![TAG.to_string()]);
  }

  #[tokio::test]
  async fn test_without_sync_nothing_is_queued() {
    let (queue, network, host) = setup(false);
    network.set_offline(true);

    let response = queue.send(&post("/api/invoices", "{}")).await;

    assert_eq!(response.status, 503);
    assert_eq!(response.body_json().unwrap()["offline"], true);
    assert!(queue.pending().await.unwrap().is_empty());
    assert!(host.sync_tags.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_registration_stores_nothing() {
    let (queue, network, host) = setup_with(host(true).with_failing_sync());
    network.set_offline(true);

    let response = queue.send(&post("/api/invoices", r#"{"n":1}"#)).await;

    assert_eq!(response.status, 503);
    let body = response.body_json().unwrap();
    assert_eq!(body["offline"], true);
    assert!(body.get("queued").is_none());
    assert!(queue.pending().await.unwrap().is_empty());
    assert!(host.sync_tags.lock().unwrap().is_empty());

    // Nothing was stored, so a sync trigger has nothing to resend
    network.set_offline(false);
    let outcome = queue.replay().await.unwrap();
    assert_eq!(outcome.replayed, 0);
    assert!(network
      .requests()
      .iter()
      .all(|r| r.header(REPLAY_ID_HEADER).is_none()));
  }

  #[tokio::test]
  async fn test_replay_drops_unreadable_record_and_continues() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let host = Arc::new(host(true));
    let queue = MutationQueue::new(Arc::clone(&storage), network.clone(), host.clone(), TAG);

    let mut broken = QueuedMutation::from_request(TAG, &post("/api/invoices", "x"));
    broken.url = "not a url".to_string();
    storage.enqueue(&broken).unwrap();
    storage
      .enqueue(&QueuedMutation::from_request(TAG, &post("/api/invoices", "ok")))
      .unwrap();
    network.respond("http://localhost:5000/api/invoices", Response::new(201, ""));

    let outcome = queue.replay().await.unwrap();

    assert_eq!(outcome, ReplayOutcome { replayed: 1, remaining: 0 });
    assert!(queue.pending().await.unwrap().is_empty());
    assert_eq!(network.requests().len(), 1);
    assert_eq!(network.requests()[0].body, b"ok");
    assert_eq!(host.messages().len(), 2);
  }

  #[tokio::test]
  async fn test_mutation_deferred_during_replay_is_drained_before_broadcast() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let inner = FakeNetwork::new();
    inner.respond("http://localhost:5000/api/a", Response::new(200, ""));
    inner.respond("http://localhost:5000/api/b", Response::new(200, ""));
    let network = Arc::new(LateMutationNetwork {
      inner,
      storage: Arc::clone(&storage),
      late: StdMutex::new(Some(QueuedMutation::from_request(TAG, &post("/api/b", "b")))),
    });
    let host = Arc::new(host(true));
    let queue = MutationQueue::new(Arc::clone(&storage), network.clone(), host.clone(), TAG);

    storage
      .enqueue(&QueuedMutation::from_request(TAG, &post("/api/a", "a")))
      .unwrap();

    let outcome = queue.replay().await.unwrap();

    assert_eq!(outcome, ReplayOutcome { replayed: 2, remaining: 0 });
    assert!(queue.pending().await.unwrap().is_empty());
    let paths: Vec<String> = network
      .inner
      .requests()
      .iter()
      .map(|r| r.url.path().to_string())
      .collect();
    assert_eq!(paths, vec!["/api/a", "/api/b"]);
    assert_eq!(host.messages().len(), 2);
  }

  #[tokio::test]
  async fn test_replay_drains_and_broadcasts_once_per_window() {
    let (queue, network, host) = setup(true);
    network.set_offline(true);
    queue.send(&post("/api/invoices", "1")).await;
    queue.send(&post("/api/customers", "2")).await;

    network.set_offline(false);
    network.respond("http://localhost:5000/api/invoices", Response::new(201, ""));
    network.respond("http://localhost:5000/api/customers", Response::new(200, ""));

    let outcome = queue.replay().await.unwrap();
    assert_eq!(outcome, ReplayOutcome { replayed: 2, remaining: 0 });
    assert!(outcome.is_complete());
    assert!(queue.pending().await.unwrap().is_empty());

    let messages = host.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, "w1");
    assert_eq!(messages[1].0, "w2");
    assert!(matches!(messages[0].1, ClientMessage::SyncComplete { .. }));

    // Resends carry the replay id, in FIFO order
    let resent: Vec<Request> = network
      .requests()
      .into_iter()
      .filter(|r| r.header(REPLAY_ID_HEADER).is_some())
      .collect();
    assert_eq!(resent.len(), 2);
    assert_eq!(resent[0].url.path(), "/api/invoices");
    assert_eq!(resent[1].url.path(), "/api/customers");
    assert_eq!(resent[0].body, b"1");
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_rest_queued() {
    let (queue, network, host) = setup(true);
    network.set_offline(true);
    queue.send(&post("/api/a", "a")).await;
    queue.send(&post("/api/b", "b")).await;
    queue.send(&post("/api/c", "c")).await;

    network.set_offline(false);
    network.respond("http://localhost:5000/api/a", Response::new(200, ""));
    network.respond("http://localhost:5000/api/b", Response::new(500, ""));
    network.respond("http://localhost:5000/api/c", Response::new(200, ""));

    let outcome = queue.replay().await.unwrap();
    assert_eq!(outcome, ReplayOutcome { replayed: 1, remaining: 2 });

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending[0].url.ends_with("/api/b"));
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(pending[0].last_error.as_deref(), Some("status 500"));
    assert!(pending[1].url.ends_with("/api/c"));
    assert!(host.messages().is_empty());

    // A later trigger finishes the job, and the same replay id is reused
    let first_id = pending[0].replay_id.clone();
    network.respond("http://localhost:5000/api/b", Response::new(200, ""));
    let outcome = queue.replay().await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(host.messages().len(), 2);
    let b_ids: Vec<String> = network
      .requests()
      .iter()
      .filter(|r| r.url.path() == "/api/b")
      .filter_map(|r| r.header(REPLAY_ID_HEADER).map(String::from))
      .collect();
    assert_eq!(b_ids, vec![first_id.clone(), first_id]);
  }

  #[tokio::test]
  async fn test_to_request_preserves_method() {
    let request = Request::new(
      Method::DELETE,
      Url::parse("http://localhost:5000/api/invoices/3").unwrap(),
    );
    let record = QueuedMutation::from_request(TAG, &request);
    let rebuilt = record.to_request().unwrap();
    assert_eq!(rebuilt.method, Method::DELETE);
    assert_eq!(rebuilt.url, request.url);
  }
}
