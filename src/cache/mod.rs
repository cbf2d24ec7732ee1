//! Read-result cache for offline support.
//!
//! Every successful GET is persisted keyed by its exact request identity
//! (method + URL). Mutations invalidate at collection granularity: one
//! write to `/sales/123` marks every cached read under the user's `sales`
//! collection stale. Stale entries are not deleted; they are what offline
//! reads fall back to when the network is gone.

mod storage;

pub use storage::ReadCache;

use sha2::{Digest, Sha256};

/// Stable fixed-length cache key for a request identity.
///
/// SHA256 over `METHOD:url` so arbitrary query strings never leak into
/// SQL or filesystem contexts.
pub fn request_key(method: &str, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_bytes());
  hasher.update(b":");
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// A cached GET response.
#[derive(Debug, Clone)]
pub struct CachedRead {
  pub body: Vec<u8>,
  pub cached_at: chrono::DateTime<chrono::Utc>,
  /// Set by invalidation. Stale entries no longer short-circuit the
  /// network but still serve offline fallback.
  pub stale: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_key_is_stable_and_method_sensitive() {
    let a = request_key("GET", "https://api.example.com/sales?user_id=u1");
    let b = request_key("GET", "https://api.example.com/sales?user_id=u1");
    let c = request_key("DELETE", "https://api.example.com/sales?user_id=u1");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
  }
}
