//! Device identity: who every record, queue entry and cached read belongs to.
//!
//! An identity is either created purely locally (name + optional phone and
//! business name, id generated on the device) or verified remotely through
//! the one-time-code flow; the remote verification itself is an external
//! collaborator, this module only persists its result. Exactly one identity
//! is active per device; switching requires an explicit logout, and logout
//! erasure is handled a layer up so the store, queue, cache and view are
//! all wiped together.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::{Clock, IdGen};
use crate::db::Database;
use crate::error::{DataError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
  pub user_id: String,
  pub name: String,
  pub phone: Option<String>,
  pub business_name: Option<String>,
  /// True when the identity came through remote phone verification.
  pub verified: bool,
  pub created_at: DateTime<Utc>,
}

/// Resolves and switches the device's active identity.
pub trait IdentityProvider: Send + Sync {
  fn current_user(&self) -> Result<Option<Identity>>;

  /// Offline account creation: a locally generated id, no network needed.
  fn create_local_account(
    &self,
    name: &str,
    phone: Option<&str>,
    business_name: Option<&str>,
  ) -> Result<Identity>;

  /// Persist an identity the remote one-time-code flow verified.
  fn store_verified(&self, identity: Identity) -> Result<Identity>;

  /// Remove the active identity, returning it so the caller can erase
  /// its data.
  fn logout(&self) -> Result<Option<Identity>>;
}

/// The on-device identity row.
pub struct LocalSession {
  db: Database,
  clock: Arc<dyn Clock>,
  ids: Arc<dyn IdGen>,
}

impl LocalSession {
  pub fn new(db: Database, clock: Arc<dyn Clock>, ids: Arc<dyn IdGen>) -> Self {
    Self { db, clock, ids }
  }

  fn insert(&self, identity: &Identity) -> Result<()> {
    if self.current_user()?.is_some() {
      return Err(DataError::Validation(
        "an identity is already active on this device; log out first".to_string(),
      ));
    }
    let conn = self.db.lock()?;
    conn.execute(
      "INSERT INTO identity (user_id, name, phone, business_name, verified, created_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![
        identity.user_id,
        identity.name,
        identity.phone,
        identity.business_name,
        identity.verified as i64,
        identity.created_at.to_rfc3339()
      ],
    )?;
    Ok(())
  }
}

impl IdentityProvider for LocalSession {
  fn current_user(&self) -> Result<Option<Identity>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(
      "SELECT user_id, name, phone, business_name, verified, created_at FROM identity LIMIT 1",
    )?;

    let row: Option<(String, String, Option<String>, Option<String>, i64, String)> = stmt
      .query_row([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .ok();

    match row {
      Some((user_id, name, phone, business_name, verified, created_at)) => Ok(Some(Identity {
        user_id,
        name,
        phone,
        business_name,
        verified: verified != 0,
        created_at: DateTime::parse_from_rfc3339(&created_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| DataError::Storage(format!("failed to parse identity timestamp: {}", e)))?,
      })),
      None => Ok(None),
    }
  }

  fn create_local_account(
    &self,
    name: &str,
    phone: Option<&str>,
    business_name: Option<&str>,
  ) -> Result<Identity> {
    if name.trim().is_empty() {
      return Err(DataError::Validation("account name must not be empty".to_string()));
    }

    let identity = Identity {
      user_id: self.ids.new_id(),
      name: name.to_string(),
      phone: phone.map(String::from),
      business_name: business_name.map(String::from),
      verified: false,
      created_at: self.clock.now(),
    };
    self.insert(&identity)?;
    Ok(identity)
  }

  fn store_verified(&self, identity: Identity) -> Result<Identity> {
    if identity.user_id.is_empty() {
      return Err(DataError::Validation("verified identity missing user_id".to_string()));
    }
    let identity = Identity {
      verified: true,
      ..identity
    };
    self.insert(&identity)?;
    Ok(identity)
  }

  fn logout(&self) -> Result<Option<Identity>> {
    let current = self.current_user()?;
    if current.is_some() {
      let conn = self.db.lock()?;
      conn.execute("DELETE FROM identity", [])?;
    }
    Ok(current)
  }
}
