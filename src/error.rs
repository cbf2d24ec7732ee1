//! Error taxonomy for the data layer.
//!
//! Transport failures (network unreachable at all) are recovered internally
//! by cache fallback or queueing and never escape as panics. Everything else
//! propagates to the caller for display.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
  /// Network layer could not be reached: timeout, DNS failure, refused
  /// connection. Reads fall back to cache, writes are queued.
  #[error("network unreachable: {0}")]
  Transport(String),

  /// A reachable server answered with a non-success HTTP status.
  /// Surfaced as-is and never retried automatically.
  #[error("server rejected request with status {status}")]
  Application { status: u16, body: Vec<u8> },

  /// Local update or delete aimed at an id that is not stored.
  #[error("no {kind} record with id {id}")]
  NotFound { kind: &'static str, id: String },

  /// Record rejected at the store boundary (missing id or owner,
  /// malformed partial update).
  #[error("invalid record: {0}")]
  Validation(String),

  /// Read requested with no network and nothing cached locally.
  #[error("data not available offline")]
  Unavailable,

  /// No identity is active on this device.
  #[error("no active session")]
  NoSession,

  /// Durable storage failed. Fatal to the calling mutation; data is
  /// never silently dropped.
  #[error("storage failure: {0}")]
  Storage(String),
}

impl DataError {
  /// True for HTTP conflict responses (duplicate key on create).
  pub fn is_conflict(&self) -> bool {
    matches!(self, DataError::Application { status: 409, .. })
  }
}

impl From<rusqlite::Error> for DataError {
  fn from(e: rusqlite::Error) -> Self {
    DataError::Storage(e.to_string())
  }
}

impl From<serde_json::Error> for DataError {
  fn from(e: serde_json::Error) -> Self {
    DataError::Storage(format!("serialization: {}", e))
  }
}
