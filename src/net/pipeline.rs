//! Request interception pipeline.
//!
//! Every request to the backend goes through `handle`, which applies the
//! offline policy as ordered stages:
//!
//! - reads: fresh-cache short-circuit → bounded network attempt → cache
//!   fill on success → stale-cache fallback (`offline`) → unavailable
//! - writes: bounded network attempt → invalidate on success → durable
//!   queue + synthesized accepted-for-sync result on transport failure
//!
//! An HTTP error status from a reachable server is a successful transport
//! with an application failure: it is surfaced as-is and never queued.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{request_key, ReadCache};
use crate::clock::Clock;
use crate::error::{DataError, Result};
use crate::net::{HttpResponse, RequestDescriptor, Transport, TransportFailure};
use crate::queue::RequestQueue;

/// Where a read result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// Fresh from the server
  Network,
  /// Fresh cached copy, network not attempted
  Cache,
  /// Stale cached copy served after a transport failure
  Offline,
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
  pub body: Vec<u8>,
  pub source: ReadSource,
}

impl ReadOutcome {
  pub fn offline(&self) -> bool {
    self.source == ReadSource::Offline
  }
}

/// Result of one intercepted request.
#[derive(Debug, Clone)]
pub enum Outcome {
  /// A read was served, from network or cache.
  Read(ReadOutcome),
  /// The server applied a write (2xx); response passed through unmodified.
  Applied { status: u16, body: Vec<u8> },
  /// The network was unreachable; the write is durably queued. The
  /// caller's optimistic path proceeds as if accepted (202-equivalent).
  Queued { queue_id: i64 },
}

/// Summary of one queue drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries confirmed by the server and removed.
  pub replayed: usize,
  /// Entries the server rejected; removed and logged, never retried.
  pub rejected: usize,
  /// Entries still pending (drain halts at the first transport failure
  /// to preserve replay order).
  pub remaining: usize,
}

pub struct RequestPipeline<T: Transport> {
  transport: Arc<T>,
  cache: ReadCache,
  queue: RequestQueue,
  clock: Arc<dyn Clock>,
  /// How long a cached read short-circuits the network.
  fresh_for: chrono::Duration,
  /// Bounded wait for any single network attempt.
  net_timeout: Duration,
}

impl<T: Transport + 'static> RequestPipeline<T> {
  pub fn new(
    transport: Arc<T>,
    cache: ReadCache,
    queue: RequestQueue,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      transport,
      cache,
      queue,
      clock,
      fresh_for: chrono::Duration::minutes(5),
      net_timeout: Duration::from_secs(10),
    }
  }

  pub fn with_fresh_for(mut self, fresh_for: chrono::Duration) -> Self {
    self.fresh_for = fresh_for;
    self
  }

  pub fn with_net_timeout(mut self, net_timeout: Duration) -> Self {
    self.net_timeout = net_timeout;
    self
  }

  /// Intercept one request and apply the offline policy.
  pub async fn handle(&self, req: &RequestDescriptor) -> Result<Outcome> {
    if req.method.is_read() {
      self.handle_read(req).await.map(Outcome::Read)
    } else {
      self.handle_write(req).await
    }
  }

  async fn handle_read(&self, req: &RequestDescriptor) -> Result<ReadOutcome> {
    let key = request_key(req.method.as_str(), &req.url);

    // Fresh cache short-circuits the network entirely; two back-to-back
    // reads with no mutation between them hit the network once.
    if let Some(entry) = self.cache.get(&key, &req.user_id)? {
      if !entry.stale && self.clock.now() - entry.cached_at <= self.fresh_for {
        debug!(url = %req.url, "read served from fresh cache");
        return Ok(ReadOutcome {
          body: entry.body,
          source: ReadSource::Cache,
        });
      }
    }

    match self.attempt(req.clone()).await {
      Ok(response) if response.is_success() => {
        self.cache.put(
          &key,
          &req.user_id,
          &req.collection,
          &response.body,
          self.clock.now(),
          false,
        )?;
        Ok(ReadOutcome {
          body: response.body,
          source: ReadSource::Network,
        })
      }
      Ok(response) => Err(DataError::Application {
        status: response.status,
        body: response.body,
      }),
      Err(failure) => {
        // Transport failure: serve the last-known-good copy, stale or
        // not. No copy at all means the caller gets a typed
        // "unavailable offline" signal, never a panic.
        debug!(url = %req.url, error = %failure.0, "read fell back to cache");
        match self.cache.get(&key, &req.user_id)? {
          Some(entry) => Ok(ReadOutcome {
            body: entry.body,
            source: ReadSource::Offline,
          }),
          None => Err(DataError::Unavailable),
        }
      }
    }
  }

  async fn handle_write(&self, req: &RequestDescriptor) -> Result<Outcome> {
    match self.attempt(req.clone()).await {
      Ok(response) if response.is_success() => {
        self.cache.invalidate(&req.user_id, &req.collection)?;
        Ok(Outcome::Applied {
          status: response.status,
          body: response.body,
        })
      }
      // Reachable server, rejected request: not safe to retry, surface
      // as-is.
      Ok(response) => Err(DataError::Application {
        status: response.status,
        body: response.body,
      }),
      Err(failure) => {
        let queue_id = self.queue.enqueue(req, self.clock.now())?;
        info!(
          url = %req.url,
          queue_id,
          error = %failure.0,
          "network unreachable, write queued for sync"
        );
        Ok(Outcome::Queued { queue_id })
      }
    }
  }

  /// Replay pending mutations oldest-first.
  ///
  /// Each confirmed entry is durably removed before the next is attempted.
  /// The pass halts at the first transport failure so a later mutation
  /// never applies before an earlier one that is still failing. Entries
  /// the server rejects outright are removed and logged; retrying a
  /// rejected request is not safe, and keeping it would wedge the queue.
  pub async fn drain_pending(&self, user_id: &str) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for entry in self.queue.oldest_first(user_id)? {
      match self.attempt(entry.request.clone()).await {
        Ok(response) if response.is_success() => {
          self.queue.remove(entry.id)?;
          self.cache.invalidate(user_id, &entry.request.collection)?;
          report.replayed += 1;
          info!(
            url = %entry.request.url,
            queue_id = entry.id,
            "queued write replayed"
          );
        }
        Ok(response) => {
          self.queue.remove(entry.id)?;
          report.rejected += 1;
          warn!(
            url = %entry.request.url,
            queue_id = entry.id,
            status = response.status,
            "server rejected queued write, dropping it"
          );
        }
        Err(failure) => {
          info!(
            url = %entry.request.url,
            queue_id = entry.id,
            error = %failure.0,
            "still offline, halting drain to preserve order"
          );
          break;
        }
      }
    }

    report.remaining = self.queue.len(user_id)?;
    Ok(report)
  }

  /// One network attempt with a bounded wait. An unbounded hang would
  /// break the promise that writes always return promptly.
  async fn attempt(&self, req: RequestDescriptor) -> std::result::Result<HttpResponse, TransportFailure> {
    match tokio::time::timeout(self.net_timeout, self.transport.send(req)).await {
      Ok(result) => result,
      Err(_) => Err(TransportFailure(format!(
        "request timed out after {:?}",
        self.net_timeout
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::FixedClock;
  use crate::db::Database;
  use crate::net::testing::ScriptedTransport;
  use crate::net::Method;

  struct Fixture {
    transport: Arc<ScriptedTransport>,
    pipeline: RequestPipeline<ScriptedTransport>,
    queue: RequestQueue,
    cache: ReadCache,
  }

  fn fixture() -> Fixture {
    let db = Database::open_in_memory().unwrap();
    let transport = ScriptedTransport::new();
    let cache = ReadCache::new(db.clone());
    let queue = RequestQueue::new(db);
    let pipeline = RequestPipeline::new(
      transport.clone(),
      cache.clone(),
      queue.clone(),
      Arc::new(FixedClock::new()),
    )
    .with_net_timeout(Duration::from_millis(100));
    Fixture {
      transport,
      pipeline,
      queue,
      cache,
    }
  }

  fn get(url: &str) -> RequestDescriptor {
    RequestDescriptor {
      method: Method::Get,
      url: url.to_string(),
      collection: "sales".to_string(),
      user_id: "u1".to_string(),
      headers: Vec::new(),
      body: None,
    }
  }

  fn post(url: &str) -> RequestDescriptor {
    RequestDescriptor {
      method: Method::Post,
      url: url.to_string(),
      collection: "sales".to_string(),
      user_id: "u1".to_string(),
      headers: Vec::new(),
      body: Some(b"{}".to_vec()),
    }
  }

  #[tokio::test]
  async fn read_fills_cache_then_serves_from_it() {
    let f = fixture();
    f.transport.push_ok(b"[1,2]");

    let first = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();
    let Outcome::Read(first) = first else { panic!() };
    assert_eq!(first.source, ReadSource::Network);

    // Second read with no mutation in between: cache hit, no network call
    let second = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();
    let Outcome::Read(second) = second else { panic!() };
    assert_eq!(second.source, ReadSource::Cache);
    assert_eq!(second.body, first.body);
    assert_eq!(f.transport.seen_urls().len(), 1);
  }

  #[tokio::test]
  async fn transport_failure_serves_cached_body_offline() {
    let f = fixture();
    f.transport.push_ok(b"[1,2]");
    f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();

    // Invalidate so the next read goes past the fresh-cache stage
    f.cache.invalidate("u1", "sales").unwrap();
    f.transport.push_fail();

    let out = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();
    let Outcome::Read(out) = out else { panic!() };
    assert_eq!(out.source, ReadSource::Offline);
    assert!(out.offline());
    assert_eq!(out.body, b"[1,2]");
  }

  #[tokio::test]
  async fn transport_failure_without_cache_is_unavailable() {
    let f = fixture();
    f.transport.push_fail();

    let err = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap_err();
    assert!(matches!(err, DataError::Unavailable));
  }

  #[tokio::test]
  async fn application_error_on_read_propagates() {
    let f = fixture();
    f.transport.push_status(403);

    let err = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap_err();
    assert!(matches!(err, DataError::Application { status: 403, .. }));
  }

  #[tokio::test]
  async fn write_success_invalidates_the_collection() {
    let f = fixture();
    f.transport.push_ok(b"[1]");
    f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();

    f.transport.push_ok(b"{\"id\":\"s9\"}");
    let out = f.pipeline.handle(&post("https://api/sales")).await.unwrap();
    assert!(matches!(out, Outcome::Applied { status: 200, .. }));

    // The cached list is stale now, so the next read refetches
    f.transport.push_ok(b"[1,9]");
    let read = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();
    let Outcome::Read(read) = read else { panic!() };
    assert_eq!(read.source, ReadSource::Network);
    assert_eq!(f.transport.seen_urls().len(), 3);
  }

  #[tokio::test]
  async fn write_transport_failure_queues_and_does_not_block() {
    let f = fixture();
    f.transport.push_fail();

    let out = f.pipeline.handle(&post("https://api/sales")).await.unwrap();
    assert!(matches!(out, Outcome::Queued { .. }));
    assert_eq!(f.queue.len("u1").unwrap(), 1);
  }

  #[tokio::test]
  async fn write_application_error_is_not_queued() {
    let f = fixture();
    f.transport.push_status(422);

    let err = f.pipeline.handle(&post("https://api/sales")).await.unwrap_err();
    assert!(matches!(err, DataError::Application { status: 422, .. }));
    assert_eq!(f.queue.len("u1").unwrap(), 0);
  }

  #[tokio::test]
  async fn hung_transport_is_bounded_by_the_timeout() {
    let f = fixture();
    f.transport.push_hang();

    let started = std::time::Instant::now();
    let out = f.pipeline.handle(&post("https://api/sales")).await.unwrap();
    assert!(matches!(out, Outcome::Queued { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
  }

  #[tokio::test]
  async fn drain_replays_oldest_first() {
    let f = fixture();
    for url in ["https://api/sales/1", "https://api/sales/2", "https://api/sales/3"] {
      f.transport.push_fail();
      f.pipeline.handle(&post(url)).await.unwrap();
    }

    f.transport.push_ok(b"{}");
    f.transport.push_ok(b"{}");
    f.transport.push_ok(b"{}");
    let report = f.pipeline.drain_pending("u1").await.unwrap();

    assert_eq!(report, DrainReport { replayed: 3, rejected: 0, remaining: 0 });
    // Three failed attempts, then three replays in enqueue order
    assert_eq!(
      f.transport.seen_urls()[3..],
      [
        "https://api/sales/1".to_string(),
        "https://api/sales/2".to_string(),
        "https://api/sales/3".to_string()
      ]
    );
  }

  #[tokio::test]
  async fn drain_halts_at_the_first_transport_failure() {
    let f = fixture();
    for url in ["https://api/sales/1", "https://api/sales/2", "https://api/sales/3"] {
      f.transport.push_fail();
      f.pipeline.handle(&post(url)).await.unwrap();
    }

    f.transport.push_ok(b"{}");
    f.transport.push_fail();
    let report = f.pipeline.drain_pending("u1").await.unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 2);
    // Order preserved: the still-failing entry is attempted again first
    // on the next pass
    let pending = f.queue.oldest_first("u1").unwrap();
    assert_eq!(pending[0].request.url, "https://api/sales/2");
  }

  #[tokio::test]
  async fn drain_drops_entries_the_server_rejects() {
    let f = fixture();
    f.transport.push_fail();
    f.pipeline.handle(&post("https://api/sales/1")).await.unwrap();
    f.transport.push_fail();
    f.pipeline.handle(&post("https://api/sales/2")).await.unwrap();

    f.transport.push_status(400);
    f.transport.push_ok(b"{}");
    let report = f.pipeline.drain_pending("u1").await.unwrap();

    assert_eq!(report, DrainReport { replayed: 1, rejected: 1, remaining: 0 });
  }

  #[tokio::test]
  async fn replay_success_invalidates_like_a_mutation() {
    let f = fixture();
    f.transport.push_ok(b"[]");
    f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();

    f.transport.push_fail();
    f.pipeline.handle(&post("https://api/sales")).await.unwrap();

    f.transport.push_ok(b"{}");
    f.pipeline.drain_pending("u1").await.unwrap();

    // The cached list was invalidated by the replay, so the next read
    // goes to the network
    f.transport.push_ok(b"[9]");
    let read = f.pipeline.handle(&get("https://api/sales?user_id=u1")).await.unwrap();
    let Outcome::Read(read) = read else { panic!() };
    assert_eq!(read.source, ReadSource::Network);
  }
}
