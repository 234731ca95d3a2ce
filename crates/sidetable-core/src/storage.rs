//! Storage trait for the attribute side table
//!
//! The trait is the seam between host-side mechanics and a concrete
//! backend. It is intentionally small: load everything for one owner,
//! upsert by key, flush a change set, delete an owner's rows. Backends own
//! the uniqueness constraint on (owner id, owner type, key); the upsert
//! contract below assumes it.

use crate::error::AttributeResult;
use crate::types::{AttributeRecord, OwnerRef};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Persistence operations over the attribute side table
///
/// # Contract
///
/// - `upsert_attribute` and `synchronize` match on key exactly: an existing
///   (owner, key) row is overwritten in place, never duplicated.
/// - `synchronize` applies its whole change set inside one transaction; a
///   failure leaves no partial state.
/// - Concurrent writers targeting the same (owner, key) serialize through
///   the backend's uniqueness constraint; violations surface as
///   [`AttributeError::Constraint`](crate::AttributeError::Constraint).
#[async_trait]
pub trait AttributeStorage: Send + Sync {
    /// Load all attributes for an owner as a key -> value map
    ///
    /// Values are deserialized from their stored JSON encoding. Owners with
    /// no rows yield an empty map, not an error.
    async fn load_attributes(&self, owner: &OwnerRef) -> AttributeResult<BTreeMap<String, Value>>;

    /// Fetch the full typed rows for an owner
    ///
    /// The one-to-many polymorphic link from a host instance to its side
    /// table rows, with ids and timestamps intact.
    async fn attribute_records(&self, owner: &OwnerRef) -> AttributeResult<Vec<AttributeRecord>>;

    /// Create or overwrite a single (owner, key) row
    async fn upsert_attribute(
        &self,
        owner: &OwnerRef,
        key: &str,
        value: &Value,
    ) -> AttributeResult<()>;

    /// Upsert every entry of `changes` for this owner in one transaction
    ///
    /// Returns the number of entries written.
    async fn synchronize(
        &self,
        owner: &OwnerRef,
        changes: &BTreeMap<String, Value>,
    ) -> AttributeResult<usize>;

    /// Delete all rows for an owner, returning the number removed
    ///
    /// Host delete routines call this to cascade; the polymorphic reference
    /// cannot carry a SQL foreign key.
    async fn delete_attributes(&self, owner: &OwnerRef) -> AttributeResult<usize>;
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory [`AttributeStorage`] used by host tests

    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// HashMap-backed storage with a load counter for cache assertions
    #[derive(Default)]
    pub struct MockAttributeStorage {
        rows: Mutex<BTreeMap<(OwnerRef, String), Value>>,
        pub loads: AtomicUsize,
    }

    impl MockAttributeStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn row_count(&self, owner: &OwnerRef) -> usize {
            self.rows
                .lock()
                .unwrap()
                .keys()
                .filter(|(o, _)| o == owner)
                .count()
        }

        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AttributeStorage for MockAttributeStorage {
        async fn load_attributes(
            &self,
            owner: &OwnerRef,
        ) -> AttributeResult<BTreeMap<String, Value>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|((o, _), _)| o == owner)
                .map(|((_, key), value)| (key.clone(), value.clone()))
                .collect())
        }

        async fn attribute_records(
            &self,
            owner: &OwnerRef,
        ) -> AttributeResult<Vec<AttributeRecord>> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|((o, _), _)| o == owner)
                .enumerate()
                .map(|(i, ((o, key), value))| AttributeRecord {
                    id: i as i64 + 1,
                    owner: o.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
                .collect())
        }

        async fn upsert_attribute(
            &self,
            owner: &OwnerRef,
            key: &str,
            value: &Value,
        ) -> AttributeResult<()> {
            self.rows
                .lock()
                .unwrap()
                .insert((owner.clone(), key.to_string()), value.clone());
            Ok(())
        }

        async fn synchronize(
            &self,
            owner: &OwnerRef,
            changes: &BTreeMap<String, Value>,
        ) -> AttributeResult<usize> {
            let mut rows = self.rows.lock().unwrap();
            for (key, value) in changes {
                rows.insert((owner.clone(), key.clone()), value.clone());
            }
            Ok(changes.len())
        }

        async fn delete_attributes(&self, owner: &OwnerRef) -> AttributeResult<usize> {
            let mut rows = self.rows.lock().unwrap();
            let doomed: Vec<_> = rows
                .keys()
                .filter(|(o, _)| o == owner)
                .cloned()
                .collect();
            for key in &doomed {
                rows.remove(key);
            }
            Ok(doomed.len())
        }
    }
}
