//! Local record store: the per-user, per-entity offline source of truth.
//!
//! Partitions are keyed by `(entity, user_id)` and hold one JSON-serialized
//! record per id. Every mutating call is durable before it returns; a failed
//! write propagates instead of dropping data. Reads for one user can never
//! see another user's partition because every statement is scoped by
//! `user_id`.

use serde_json::Value;

use crate::db::Database;
use crate::entities::{Entity, EntityKind};
use crate::error::{DataError, Result};

#[derive(Clone)]
pub struct RecordStore {
  db: Database,
}

impl RecordStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// All records in the `(T::kind(), user_id)` partition. Unordered set
  /// semantics; callers own the returned copies.
  pub fn get_all<T: Entity>(&self, user_id: &str) -> Result<Vec<T>> {
    let conn = self.db.lock()?;
    let mut stmt =
      conn.prepare("SELECT data FROM records WHERE entity = ?1 AND user_id = ?2")?;

    let rows = stmt.query_map(
      rusqlite::params![T::kind().collection(), user_id],
      |row| row.get::<_, Vec<u8>>(0),
    )?;

    let mut records = Vec::new();
    for row in rows {
      records.push(serde_json::from_slice(&row?)?);
    }
    Ok(records)
  }

  pub fn get_by_id<T: Entity>(&self, user_id: &str, id: &str) -> Result<Option<T>> {
    match self.get_raw(T::kind(), user_id, id)? {
      Some(value) => Ok(Some(serde_json::from_value(value)?)),
      None => Ok(None),
    }
  }

  /// Insert or overwrite by id. Rejects records with a missing id or
  /// owner before anything touches disk.
  pub fn store<T: Entity>(&self, record: &T) -> Result<()> {
    record.validate()?;

    let data = serde_json::to_vec(record)?;
    let created_at = created_at_of(record)?;

    let conn = self.db.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO records (entity, user_id, record_id, data, created_at)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![
        T::kind().collection(),
        record.owner_id(),
        record.record_id(),
        data,
        created_at
      ],
    )?;
    Ok(())
  }

  /// Merge a partial field set into the stored record. Fails with
  /// `NotFound` if the id is absent from the user's partition.
  pub fn update(
    &self,
    kind: EntityKind,
    user_id: &str,
    id: &str,
    partial: &Value,
  ) -> Result<Value> {
    let fields = partial
      .as_object()
      .ok_or_else(|| DataError::Validation("partial update must be a JSON object".to_string()))?;
    if fields.contains_key("id") || fields.contains_key("user_id") {
      return Err(DataError::Validation(
        "partial update may not change id or user_id".to_string(),
      ));
    }

    let mut value = self
      .get_raw(kind, user_id, id)?
      .ok_or_else(|| DataError::NotFound {
        kind: kind.collection(),
        id: id.to_string(),
      })?;

    let target = value
      .as_object_mut()
      .ok_or_else(|| DataError::Storage("stored record is not a JSON object".to_string()))?;
    for (key, field) in fields {
      target.insert(key.clone(), field.clone());
    }

    let data = serde_json::to_vec(&value)?;
    let conn = self.db.lock()?;
    conn.execute(
      "UPDATE records SET data = ?1 WHERE entity = ?2 AND user_id = ?3 AND record_id = ?4",
      rusqlite::params![data, kind.collection(), user_id, id],
    )?;
    Ok(value)
  }

  /// Idempotent delete; removing an absent id is not an error.
  pub fn delete(&self, kind: EntityKind, user_id: &str, id: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "DELETE FROM records WHERE entity = ?1 AND user_id = ?2 AND record_id = ?3",
      rusqlite::params![kind.collection(), user_id, id],
    )?;
    Ok(())
  }

  /// Replace the whole partition with an authoritative server result.
  /// Refresh replaces, never merges: a temporary record the server
  /// re-keyed disappears here.
  pub fn replace_partition<T: Entity>(&self, user_id: &str, records: &[T]) -> Result<()> {
    for record in records {
      record.validate()?;
    }

    let conn = self.db.lock()?;
    conn.execute("BEGIN TRANSACTION", [])?;

    let result = (|| -> Result<()> {
      conn.execute(
        "DELETE FROM records WHERE entity = ?1 AND user_id = ?2",
        rusqlite::params![T::kind().collection(), user_id],
      )?;
      for record in records {
        let data = serde_json::to_vec(record)?;
        let created_at = created_at_of(record)?;
        conn.execute(
          "INSERT OR REPLACE INTO records (entity, user_id, record_id, data, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![
            T::kind().collection(),
            user_id,
            record.record_id(),
            data,
            created_at
          ],
        )?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  /// Count of records in one partition.
  pub fn count(&self, kind: EntityKind, user_id: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let n: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE entity = ?1 AND user_id = ?2",
      rusqlite::params![kind.collection(), user_id],
      |row| row.get(0),
    )?;
    Ok(n as usize)
  }

  /// Drop every partition belonging to a user. Part of logout erasure.
  pub fn clear_user(&self, user_id: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn.execute(
      "DELETE FROM records WHERE user_id = ?1",
      rusqlite::params![user_id],
    )?;
    Ok(())
  }

  fn get_raw(&self, kind: EntityKind, user_id: &str, id: &str) -> Result<Option<Value>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT data FROM records WHERE entity = ?1 AND user_id = ?2 AND record_id = ?3",
    )?;

    let data: Option<Vec<u8>> = stmt
      .query_row(rusqlite::params![kind.collection(), user_id, id], |row| {
        row.get(0)
      })
      .ok();

    match data {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }
}

/// Pull the record's own creation timestamp for the indexed column.
fn created_at_of<T: Entity>(record: &T) -> Result<String> {
  let value = serde_json::to_value(record)?;
  Ok(
    value
      .get("created_at")
      .and_then(|v| v.as_str())
      .unwrap_or_default()
      .to_string(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entities::Customer;
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  fn store() -> RecordStore {
    RecordStore::new(Database::open_in_memory().unwrap())
  }

  fn customer(id: &str, user_id: &str, name: &str) -> Customer {
    Customer {
      id: id.to_string(),
      user_id: user_id.to_string(),
      name: name.to_string(),
      phone: None,
      address: None,
      due_amount: 0.0,
      created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
  }

  #[test]
  fn partitions_are_scoped_by_user() {
    let store = store();
    store.store(&customer("c1", "alice", "করিম")).unwrap();
    store.store(&customer("c2", "bob", "রহিম")).unwrap();

    let alice: Vec<Customer> = store.get_all("alice").unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].id, "c1");

    // By-id lookups are scoped too
    assert!(store.get_by_id::<Customer>("alice", "c2").unwrap().is_none());
    assert!(store.get_by_id::<Customer>("bob", "c2").unwrap().is_some());
  }

  #[test]
  fn store_rejects_records_without_id_or_owner() {
    let store = store();
    assert!(matches!(
      store.store(&customer("", "alice", "x")),
      Err(DataError::Validation(_))
    ));
    assert!(matches!(
      store.store(&customer("c1", "", "x")),
      Err(DataError::Validation(_))
    ));
  }

  #[test]
  fn store_overwrites_by_id() {
    let store = store();
    store.store(&customer("c1", "alice", "old")).unwrap();
    store.store(&customer("c1", "alice", "new")).unwrap();

    let all: Vec<Customer> = store.get_all("alice").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "new");
  }

  #[test]
  fn update_merges_partial_fields() {
    let store = store();
    store.store(&customer("c1", "alice", "করিম")).unwrap();

    let merged = store
      .update(
        EntityKind::Customers,
        "alice",
        "c1",
        &json!({"due_amount": 150.0}),
      )
      .unwrap();
    assert_eq!(merged["due_amount"], json!(150.0));
    assert_eq!(merged["name"], json!("করিম"));

    let loaded: Customer = store.get_by_id("alice", "c1").unwrap().unwrap();
    assert_eq!(loaded.due_amount, 150.0);
  }

  #[test]
  fn update_missing_id_is_not_found() {
    let store = store();
    let err = store
      .update(EntityKind::Customers, "alice", "ghost", &json!({"name": "x"}))
      .unwrap_err();
    assert!(matches!(err, DataError::NotFound { .. }));
  }

  #[test]
  fn update_may_not_change_identity_fields() {
    let store = store();
    store.store(&customer("c1", "alice", "করিম")).unwrap();
    let err = store
      .update(EntityKind::Customers, "alice", "c1", &json!({"user_id": "bob"}))
      .unwrap_err();
    assert!(matches!(err, DataError::Validation(_)));
  }

  #[test]
  fn delete_is_idempotent() {
    let store = store();
    store.store(&customer("c1", "alice", "করিম")).unwrap();
    store.delete(EntityKind::Customers, "alice", "c1").unwrap();
    store.delete(EntityKind::Customers, "alice", "c1").unwrap();
    assert_eq!(store.count(EntityKind::Customers, "alice").unwrap(), 0);
  }

  #[test]
  fn replace_partition_discards_absent_records() {
    let store = store();
    store.store(&customer("tmp-1", "alice", "temp")).unwrap();

    store
      .replace_partition("alice", &[customer("srv-1", "alice", "temp")])
      .unwrap();

    let all: Vec<Customer> = store.get_all("alice").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "srv-1");
  }

  #[test]
  fn stored_records_survive_a_second_handle() {
    let db = Database::open_in_memory().unwrap();
    let first = RecordStore::new(db.clone());
    first.store(&customer("c1", "alice", "করিম")).unwrap();

    let second = RecordStore::new(db);
    let all: Vec<Customer> = second.get_all("alice").unwrap();
    assert_eq!(all.len(), 1);
  }

  #[test]
  fn clear_user_erases_only_that_user() {
    let store = store();
    store.store(&customer("c1", "alice", "করিম")).unwrap();
    store.store(&customer("c2", "bob", "রহিম")).unwrap();

    store.clear_user("alice").unwrap();
    assert_eq!(store.count(EntityKind::Customers, "alice").unwrap(), 0);
    assert_eq!(store.count(EntityKind::Customers, "bob").unwrap(), 1);
  }
}
