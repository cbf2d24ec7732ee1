//! Connectivity watching and the background sync engine.
//!
//! The watcher probes the backend on an interval and turns reachability
//! changes into events on a channel; the engine consumes them. An
//! offline→online transition drains the pending queue and refreshes; the
//! periodic tick is the fallback for missed transitions and drives the
//! background refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DataError;
use crate::net::{Method, RequestDescriptor, Transport};
use crate::service::DataService;

/// Network status events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
  /// Connectivity came back
  Online,
  /// Connectivity was lost
  Offline,
  /// Periodic fallback tick
  Tick,
}

/// Produces `NetEvent`s by probing the backend.
pub struct ConnectivityWatcher {
  rx: mpsc::UnboundedReceiver<NetEvent>,
}

impl ConnectivityWatcher {
  /// Spawn the probe loop. A probe that answers with any HTTP status
  /// counts as online; only transport failure means offline.
  pub fn spawn<T: Transport + 'static>(
    transport: Arc<T>,
    probe_url: String,
    probe_interval: Duration,
    refresh_interval: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut online: Option<bool> = None;
      let mut since_refresh = Duration::ZERO;

      loop {
        tokio::time::sleep(probe_interval).await;

        let probe = RequestDescriptor {
          method: Method::Get,
          url: probe_url.clone(),
          collection: "health".to_string(),
          user_id: String::new(),
          headers: Vec::new(),
          body: None,
        };
        let reachable =
          match tokio::time::timeout(probe_interval, transport.send(probe)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
          };

        if online != Some(reachable) {
          online = Some(reachable);
          let event = if reachable {
            NetEvent::Online
          } else {
            NetEvent::Offline
          };
          if tx.send(event).is_err() {
            break;
          }
        }

        since_refresh += probe_interval;
        if since_refresh >= refresh_interval {
          since_refresh = Duration::ZERO;
          if tx.send(NetEvent::Tick).is_err() {
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Watcher fed from an external channel (platform connectivity events).
  pub fn from_channel(rx: mpsc::UnboundedReceiver<NetEvent>) -> Self {
    Self { rx }
  }

  pub async fn next(&mut self) -> Option<NetEvent> {
    self.rx.recv().await
  }
}

/// Drives queue replay and background refresh off connectivity events.
pub struct SyncEngine<T: Transport> {
  service: DataService<T>,
}

impl<T: Transport + 'static> SyncEngine<T> {
  pub fn new(service: DataService<T>) -> Self {
    Self { service }
  }

  pub async fn run(self, mut watcher: ConnectivityWatcher) {
    info!("sync engine started");
    while let Some(event) = watcher.next().await {
      self.handle(event).await;
    }
    info!("sync engine stopped");
  }

  /// React to one event. Failures are logged, never fatal; queue
  /// entries persist for the next trigger.
  pub async fn handle(&self, event: NetEvent) {
    match event {
      NetEvent::Online => {
        info!("connectivity restored, draining pending queue");
        self.drain().await;
        self.refresh().await;
      }
      NetEvent::Offline => {
        info!("connectivity lost, working offline");
      }
      NetEvent::Tick => {
        self.drain().await;
        self.refresh().await;
      }
    }
  }

  async fn drain(&self) {
    match self.service.drain_pending().await {
      Ok(report) => {
        if report.replayed > 0 || report.rejected > 0 {
          info!(
            replayed = report.replayed,
            rejected = report.rejected,
            remaining = report.remaining,
            "queue drain finished"
          );
        }
      }
      Err(DataError::NoSession) => debug!("no active identity, nothing to drain"),
      Err(e) => warn!(error = %e, "queue drain failed"),
    }
  }

  async fn refresh(&self) {
    match self.service.refresh_all().await {
      Ok(()) => {}
      Err(DataError::NoSession) => {}
      Err(e) => warn!(error = %e, "background refresh failed"),
    }
  }
}
