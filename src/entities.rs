//! Typed business records and the trait the store/cache layers work over.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{DataError, Result};

/// The record categories the backend exposes as REST collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Customers,
  Products,
  Sales,
  Expenses,
  Collections,
  Users,
}

impl EntityKind {
  /// REST collection segment, also the invalidation scope key.
  pub fn collection(self) -> &'static str {
    match self {
      EntityKind::Customers => "customers",
      EntityKind::Products => "products",
      EntityKind::Sales => "sales",
      EntityKind::Expenses => "expenses",
      EntityKind::Collections => "collections",
      EntityKind::Users => "users",
    }
  }

  /// The per-user list collections, in the order `refresh_all` walks them.
  pub fn data_kinds() -> [EntityKind; 5] {
    [
      EntityKind::Customers,
      EntityKind::Products,
      EntityKind::Sales,
      EntityKind::Expenses,
      EntityKind::Collections,
    ]
  }
}

impl std::fmt::Display for EntityKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.collection())
  }
}

/// Trait for records the offline store can hold.
///
/// Every record carries a globally unique id (client-generated when created
/// offline) and the id of the owning user; all store operations are scoped
/// by the latter.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  fn record_id(&self) -> &str;

  fn owner_id(&self) -> &str;

  fn kind() -> EntityKind;

  /// Overwrite the record id (used when assigning a client-side id at
  /// creation time).
  fn set_record_id(&mut self, id: String);

  /// Reject records the store must not accept: missing id or owner.
  fn validate(&self) -> Result<()> {
    if self.record_id().is_empty() {
      return Err(DataError::Validation(format!(
        "{} record missing id",
        Self::kind()
      )));
    }
    if self.owner_id().is_empty() {
      return Err(DataError::Validation(format!(
        "{} record missing user_id",
        Self::kind()
      )));
    }
    Ok(())
  }
}

macro_rules! impl_entity {
  ($ty:ty, $kind:expr) => {
    impl Entity for $ty {
      fn record_id(&self) -> &str {
        &self.id
      }

      fn owner_id(&self) -> &str {
        &self.user_id
      }

      fn kind() -> EntityKind {
        $kind
      }

      fn set_record_id(&mut self, id: String) {
        self.id = id;
      }
    }
  };
}

/// A shop customer, with the running credit (due) the shop has extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
  pub id: String,
  pub user_id: String,
  pub name: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub address: Option<String>,
  /// Outstanding credit in taka. Decremented by collections.
  #[serde(default)]
  pub due_amount: f64,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
  pub id: String,
  pub user_id: String,
  pub name: String,
  #[serde(default)]
  pub unit_price: f64,
  #[serde(default)]
  pub stock_quantity: f64,
  pub created_at: DateTime<Utc>,
}

/// A sale. `sale_date` is the business date the shopkeeper picked, distinct
/// from `created_at` which is when the record entered the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
  pub id: String,
  pub user_id: String,
  #[serde(default)]
  pub customer_id: Option<String>,
  #[serde(default)]
  pub note: Option<String>,
  pub amount: f64,
  /// Portion paid immediately; the rest becomes customer due.
  #[serde(default)]
  pub paid_amount: f64,
  pub sale_date: NaiveDate,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
  pub id: String,
  pub user_id: String,
  pub category: String,
  #[serde(default)]
  pub note: Option<String>,
  pub amount: f64,
  pub expense_date: NaiveDate,
  pub created_at: DateTime<Utc>,
}

/// A payment collected against a customer's outstanding due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
  pub id: String,
  pub user_id: String,
  pub customer_id: String,
  pub amount: f64,
  #[serde(default)]
  pub note: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// The remote profile row behind an identity. `id` doubles as the
/// `user_id` every other record is scoped by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub business_name: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl_entity!(Customer, EntityKind::Customers);
impl_entity!(Product, EntityKind::Products);
impl_entity!(Sale, EntityKind::Sales);
impl_entity!(Expense, EntityKind::Expenses);
impl_entity!(Collection, EntityKind::Collections);

impl Entity for UserProfile {
  fn record_id(&self) -> &str {
    &self.id
  }

  fn owner_id(&self) -> &str {
    // A profile owns itself.
    &self.id
  }

  fn kind() -> EntityKind {
    EntityKind::Users
  }

  fn set_record_id(&mut self, id: String) {
    self.id = id;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn customer(id: &str, user_id: &str) -> Customer {
    Customer {
      id: id.to_string(),
      user_id: user_id.to_string(),
      name: "করিম".to_string(),
      phone: None,
      address: None,
      due_amount: 0.0,
      created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
  }

  #[test]
  fn validate_rejects_missing_id_and_owner() {
    assert!(customer("c1", "u1").validate().is_ok());
    assert!(matches!(
      customer("", "u1").validate(),
      Err(DataError::Validation(_))
    ));
    assert!(matches!(
      customer("c1", "").validate(),
      Err(DataError::Validation(_))
    ));
  }

  #[test]
  fn kind_collection_names_match_rest_segments() {
    assert_eq!(EntityKind::Customers.collection(), "customers");
    assert_eq!(EntityKind::Sales.to_string(), "sales");
    assert_eq!(EntityKind::data_kinds().len(), 5);
  }
}
