//! In-memory read projection with optimistic updates.
//!
//! This is the display-layer view the UI polls between a mutation and its
//! reconciliation. A predicted record is injected here ahead of any durable
//! write; a short, fixed delay later the coordinator refreshes the
//! authoritative data and *replaces* the projection wholesale. Nothing in
//! this module is durable. If the process dies before reconciliation, the
//! store and server remain the only truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::entities::EntityKind;

/// Per-`(entity, user)` projection of the latest known list result.
#[derive(Clone, Default)]
pub struct LiveView {
  inner: Arc<Mutex<HashMap<(EntityKind, String), Vec<Value>>>>,
}

impl LiveView {
  pub fn new() -> Self {
    Self::default()
  }

  /// Current projection, if one was ever populated.
  pub fn snapshot(&self, kind: EntityKind, user_id: &str) -> Option<Vec<Value>> {
    self
      .inner
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .get(&(kind, user_id.to_string()))
      .cloned()
  }

  /// Authoritative refresh. Always replaces, never merges, so a failed
  /// mutation's prediction cannot survive reconciliation.
  pub fn replace(&self, kind: EntityKind, user_id: &str, records: Vec<Value>) {
    self
      .inner
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .insert((kind, user_id.to_string()), records);
  }

  /// Inject a predicted record: upsert by `id` into the projection.
  pub fn apply_optimistic(&self, kind: EntityKind, user_id: &str, predicted: Value) {
    let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let list = inner.entry((kind, user_id.to_string())).or_default();

    let id = predicted.get("id").and_then(|v| v.as_str()).map(String::from);
    if let Some(id) = id {
      if let Some(existing) = list
        .iter_mut()
        .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
      {
        *existing = predicted;
        return;
      }
    }
    list.push(predicted);
  }

  /// Predicted effect of an update: merge partial fields into the
  /// matching record, if the projection holds one.
  pub fn patch_optimistic(&self, kind: EntityKind, user_id: &str, id: &str, partial: &Value) {
    let Some(fields) = partial.as_object() else {
      return;
    };
    let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let Some(list) = inner.get_mut(&(kind, user_id.to_string())) else {
      return;
    };
    if let Some(record) = list
      .iter_mut()
      .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id))
    {
      if let Some(target) = record.as_object_mut() {
        for (key, value) in fields {
          target.insert(key.clone(), value.clone());
        }
      }
    }
  }

  /// Predicted effect of a delete.
  pub fn remove_optimistic(&self, kind: EntityKind, user_id: &str, id: &str) {
    let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(list) = inner.get_mut(&(kind, user_id.to_string())) {
      list.retain(|r| r.get("id").and_then(|v| v.as_str()) != Some(id));
    }
  }

  /// Drop every projection for a user. Part of logout erasure.
  pub fn clear_user(&self, user_id: &str) {
    self
      .inner
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .retain(|(_, owner), _| owner != user_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn optimistic_insert_appears_in_snapshot() {
    let view = LiveView::new();
    view.replace(EntityKind::Customers, "u1", vec![json!({"id": "c1"})]);
    view.apply_optimistic(EntityKind::Customers, "u1", json!({"id": "tmp-1", "name": "করিম"}));

    let snapshot = view.snapshot(EntityKind::Customers, "u1").unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[1]["name"], json!("করিম"));
  }

  #[test]
  fn optimistic_upsert_replaces_matching_id() {
    let view = LiveView::new();
    view.replace(EntityKind::Customers, "u1", vec![json!({"id": "c1", "name": "old"})]);
    view.apply_optimistic(EntityKind::Customers, "u1", json!({"id": "c1", "name": "new"}));

    let snapshot = view.snapshot(EntityKind::Customers, "u1").unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["name"], json!("new"));
  }

  #[test]
  fn replace_supersedes_predictions_entirely() {
    let view = LiveView::new();
    view.apply_optimistic(EntityKind::Customers, "u1", json!({"id": "tmp-1", "name": "predicted"}));

    // Authoritative refresh: the server assigned a different id
    view.replace(EntityKind::Customers, "u1", vec![json!({"id": "srv-1", "name": "করিম"})]);

    let snapshot = view.snapshot(EntityKind::Customers, "u1").unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["id"], json!("srv-1"));
  }

  #[test]
  fn patch_and_remove_only_touch_matching_records() {
    let view = LiveView::new();
    view.replace(
      EntityKind::Customers,
      "u1",
      vec![json!({"id": "c1", "due_amount": 100.0}), json!({"id": "c2", "due_amount": 50.0})],
    );

    view.patch_optimistic(EntityKind::Customers, "u1", "c1", &json!({"due_amount": 80.0}));
    view.remove_optimistic(EntityKind::Customers, "u1", "c2");

    let snapshot = view.snapshot(EntityKind::Customers, "u1").unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["due_amount"], json!(80.0));
  }

  #[test]
  fn projections_are_scoped_by_user() {
    let view = LiveView::new();
    view.replace(EntityKind::Customers, "u1", vec![json!({"id": "c1"})]);
    view.replace(EntityKind::Customers, "u2", vec![json!({"id": "c2"})]);

    view.clear_user("u1");
    assert!(view.snapshot(EntityKind::Customers, "u1").is_none());
    assert!(view.snapshot(EntityKind::Customers, "u2").is_some());
  }
}
