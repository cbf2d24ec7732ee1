//! Durable queue of mutations that could not reach the network.
//!
//! Entries are appended with an auto-incrementing id and replayed in
//! ascending id order, so replay is FIFO by enqueue time. An entry leaves
//! the queue only after a confirmed replay (or an explicit server
//! rejection); the delete is durable before the next entry is attempted.

use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::{DataError, Result};
use crate::net::{Method, RequestDescriptor};

/// One mutation waiting for the network.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
  /// Replay order key, assigned by the database on enqueue.
  pub id: i64,
  pub request: RequestDescriptor,
  pub queued_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RequestQueue {
  db: Database,
}

impl RequestQueue {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append a failed mutation. Durable before return; the id is the
  /// replay order key.
  pub fn enqueue(&self, req: &RequestDescriptor, now: DateTime<Utc>) -> Result<i64> {
    let headers = serde_json::to_string(&req.headers)?;
    let conn = self.db.lock()?;
    conn.execute(
      "INSERT INTO pending_requests (user_id, method, url, collection, headers, body, queued_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      rusqlite::params![
        req.user_id,
        req.method.as_str(),
        req.url,
        req.collection,
        headers,
        req.body,
        now.to_rfc3339()
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }

  /// All pending entries for a user, ascending by replay order.
  pub fn oldest_first(&self, user_id: &str) -> Result<Vec<QueuedRequest>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, method, url, collection, headers, body, queued_at
       FROM pending_requests WHERE user_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(rusqlite::params![user_id], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, Option<Vec<u8>>>(5)?,
        row.get::<_, String>(6)?,
      ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
      let (id, method, url, collection, headers, body, queued_at) = row?;
      entries.push(QueuedRequest {
        id,
        request: RequestDescriptor {
          method: Method::parse(&method)?,
          url,
          collection,
          user_id: user_id.to_string(),
          headers: serde_json::from_str(&headers)?,
          body,
        },
        queued_at: parse_timestamp(&queued_at)?,
      });
    }
    Ok(entries)
  }

  /// Remove a confirmed entry. Durable before return.
  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "DELETE FROM pending_requests WHERE id = ?1",
      rusqlite::params![id],
    )?;
    Ok(())
  }

  pub fn len(&self, user_id: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let n: i64 = conn.query_row(
      "SELECT COUNT(*) FROM pending_requests WHERE user_id = ?1",
      rusqlite::params![user_id],
      |row| row.get(0),
    )?;
    Ok(n as usize)
  }

  /// Drop a user's pending entries. Part of logout erasure; another
  /// identity must never see or replay them.
  pub fn clear_user(&self, user_id: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "DELETE FROM pending_requests WHERE user_id = ?1",
      rusqlite::params![user_id],
    )?;
    Ok(())
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| DataError::Storage(format!("failed to parse queued_at '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn queue() -> RequestQueue {
    RequestQueue::new(Database::open_in_memory().unwrap())
  }

  fn write(user_id: &str, url: &str) -> RequestDescriptor {
    RequestDescriptor {
      method: Method::Post,
      url: url.to_string(),
      collection: "customers".to_string(),
      user_id: user_id.to_string(),
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some("{\"name\":\"\u{0995}\u{09b0}\u{09bf}\u{09ae}\"}".as_bytes().to_vec()),
    }
  }

  fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
  }

  #[test]
  fn replay_order_is_fifo_by_enqueue() {
    let queue = queue();
    queue.enqueue(&write("u1", "https://api/customers/1"), t0()).unwrap();
    queue.enqueue(&write("u1", "https://api/customers/2"), t0()).unwrap();
    queue.enqueue(&write("u1", "https://api/customers/3"), t0()).unwrap();

    let entries = queue.oldest_first("u1").unwrap();
    let urls: Vec<&str> = entries.iter().map(|e| e.request.url.as_str()).collect();
    assert_eq!(
      urls,
      [
        "https://api/customers/1",
        "https://api/customers/2",
        "https://api/customers/3"
      ]
    );
    assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
  }

  #[test]
  fn entries_roundtrip_headers_and_body() {
    let queue = queue();
    let req = write("u1", "https://api/customers");
    queue.enqueue(&req, t0()).unwrap();

    let entries = queue.oldest_first("u1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request.method, Method::Post);
    assert_eq!(entries[0].request.headers, req.headers);
    assert_eq!(entries[0].request.body, req.body);
    assert_eq!(entries[0].queued_at, t0());
  }

  #[test]
  fn remove_deletes_one_entry() {
    let queue = queue();
    let first = queue.enqueue(&write("u1", "https://api/customers/1"), t0()).unwrap();
    queue.enqueue(&write("u1", "https://api/customers/2"), t0()).unwrap();

    queue.remove(first).unwrap();
    let entries = queue.oldest_first("u1").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request.url, "https://api/customers/2");
  }

  #[test]
  fn queues_are_namespaced_by_user() {
    let queue = queue();
    queue.enqueue(&write("u1", "https://api/customers/1"), t0()).unwrap();
    queue.enqueue(&write("u2", "https://api/customers/2"), t0()).unwrap();

    assert_eq!(queue.len("u1").unwrap(), 1);
    assert_eq!(queue.len("u2").unwrap(), 1);
    assert_eq!(queue.oldest_first("u1").unwrap()[0].request.user_id, "u1");

    queue.clear_user("u1").unwrap();
    assert_eq!(queue.len("u1").unwrap(), 0);
    assert_eq!(queue.len("u2").unwrap(), 1);
  }
}
