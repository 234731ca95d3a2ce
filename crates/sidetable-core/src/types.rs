//! Attribute record types shared by hosts, storage backends, and queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Polymorphic reference to the record that owns an attribute row
///
/// `kind` is the owner's type discriminator (usually its table name) and
/// `id` its primary key. Together they identify one host instance without
/// the side table knowing anything about host schemas.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: i64,
}

impl OwnerRef {
    /// Create an owner reference from a type discriminator and id
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One persisted (owner, key) -> value row of the side table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    /// Surrogate id, engine-assigned and immutable
    pub id: i64,
    pub owner: OwnerRef,
    /// Attribute name, unique per owner
    pub key: String,
    /// Arbitrary JSON payload; round-trips through the storage layer intact
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sort direction for value-ordered queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// SQL keyword for this direction
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_ref_display() {
        let owner = OwnerRef::new("contacts", 42);
        assert_eq!(owner.to_string(), "contacts:42");
    }

    #[test]
    fn test_owner_ref_equality() {
        assert_eq!(OwnerRef::new("contacts", 1), OwnerRef::new("contacts", 1));
        assert_ne!(OwnerRef::new("contacts", 1), OwnerRef::new("orders", 1));
        assert_ne!(OwnerRef::new("contacts", 1), OwnerRef::new("contacts", 2));
    }

    #[test]
    fn test_sort_direction_sql() {
        assert_eq!(SortDirection::Ascending.as_sql(), "ASC");
        assert_eq!(SortDirection::Descending.as_sql(), "DESC");
    }

    #[test]
    fn test_record_serde_round_trip() {
        let record = AttributeRecord {
            id: 7,
            owner: OwnerRef::new("contacts", 42),
            key: "meta".to_string(),
            value: serde_json::json!({"tags": ["a", "b"], "rating": 5}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: AttributeRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }
}
