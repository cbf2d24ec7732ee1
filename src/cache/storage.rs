//! SQLite-backed storage for cached read results.

use chrono::{DateTime, Utc};

use super::CachedRead;
use crate::db::Database;
use crate::error::{DataError, Result};

/// Persistent store of last-known-good GET responses, plus the
/// invalidation broadcaster that marks them stale after mutations.
#[derive(Clone)]
pub struct ReadCache {
  db: Database,
}

impl ReadCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Store a response body under the request identity key. `stale=false`
  /// for fresh network fills; `stale=true` when an offline mutation
  /// patches a cached body that should be refetched once online.
  pub fn put(
    &self,
    key: &str,
    user_id: &str,
    collection: &str,
    body: &[u8],
    now: DateTime<Utc>,
    stale: bool,
  ) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO read_cache (cache_key, user_id, collection, body, cached_at, stale)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![key, user_id, collection, body, now.to_rfc3339(), stale as i64],
    )?;
    Ok(())
  }

  /// Look up a cached response. Scoped by owner: another user's entry
  /// under the same request identity is invisible.
  pub fn get(&self, key: &str, user_id: &str) -> Result<Option<CachedRead>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT body, cached_at, stale FROM read_cache WHERE cache_key = ?1 AND user_id = ?2",
    )?;

    let row: Option<(Vec<u8>, String, i64)> = stmt
      .query_row(rusqlite::params![key, user_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((body, cached_at, stale)) => Ok(Some(CachedRead {
        body,
        cached_at: parse_timestamp(&cached_at)?,
        stale: stale != 0,
      })),
      None => Ok(None),
    }
  }

  /// Mark every cached read under the user's collection stale. Called
  /// exactly once per successful mutation, including queue replays.
  /// A collection with nothing cached is a no-op, never an error.
  pub fn invalidate(&self, user_id: &str, collection: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let n = conn.execute(
      "UPDATE read_cache SET stale = 1 WHERE user_id = ?1 AND collection = ?2",
      rusqlite::params![user_id, collection],
    )?;
    Ok(n)
  }

  /// Drop all cached reads for a user. Part of logout erasure.
  pub fn clear_user(&self, user_id: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "DELETE FROM read_cache WHERE user_id = ?1",
      rusqlite::params![user_id],
    )?;
    Ok(())
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| DataError::Storage(format!("failed to parse cached_at '{}': {}", s, e)))
}
