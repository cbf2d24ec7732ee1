//! Injectable time and id-generation capabilities.
//!
//! Mutation code never calls `Utc::now()` or generates ids directly; it goes
//! through these seams so replay ordering and reconciliation are
//! deterministic under test.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Source of fresh record ids.
pub trait IdGen: Send + Sync {
  fn new_id(&self) -> String;
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Random v4 UUIDs, the same scheme the backend accepts for
/// client-generated ids.
pub struct UuidGen;

impl IdGen for UuidGen {
  fn new_id(&self) -> String {
    uuid::Uuid::new_v4().to_string()
  }
}

pub fn system_clock() -> Arc<dyn Clock> {
  Arc::new(SystemClock)
}

pub fn uuid_gen() -> Arc<dyn IdGen> {
  Arc::new(UuidGen)
}

/// Fixed-epoch clock that advances only when told to. Test-only, but lives
/// here so every module's tests share one implementation.
pub struct FixedClock {
  offset_ms: AtomicI64,
}

impl FixedClock {
  pub fn new() -> Self {
    Self {
      offset_ms: AtomicI64::new(0),
    }
  }

  /// Advance the clock by the given number of milliseconds.
  pub fn advance_ms(&self, ms: i64) {
    self.offset_ms.fetch_add(ms, Ordering::SeqCst);
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    base + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
  }
}

/// Sequential ids ("id-1", "id-2", ...) for deterministic tests.
pub struct SeqIdGen {
  next: AtomicI64,
}

impl SeqIdGen {
  pub fn new() -> Self {
    Self {
      next: AtomicI64::new(1),
    }
  }
}

impl IdGen for SeqIdGen {
  fn new_id(&self) -> String {
    format!("id-{}", self.next.fetch_add(1, Ordering::SeqCst))
  }
}
