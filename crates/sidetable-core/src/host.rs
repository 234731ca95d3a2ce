//! Host-side soft-attribute mechanics
//!
//! A host record participates by implementing [`SoftAttributeHost`]: it
//! declares which keys are soft, exposes its owner reference, owns one
//! [`SoftAttributes`] cache, and surfaces the generic field accessors its
//! persistence framework already has (get/set, dirty set). The
//! [`SoftAttributeExt`] blanket implementation then provides the actual
//! read/write/synchronize operations, so soft/native dispatch is explicit
//! and statically checkable rather than intercepted at runtime.
//!
//! ## Cache contract
//!
//! The cache is populated once, lazily, on the first soft read or write,
//! and is the single source of truth for the rest of the instance's
//! lifetime. There is no implicit refresh: callers holding long-lived
//! instances that need fresh data must call [`SoftAttributes::invalidate`]
//! (or discard the instance). The cache is never shared across instances.

use crate::error::AttributeResult;
use crate::storage::AttributeStorage;
use crate::types::OwnerRef;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Per-instance lazy cache of an owner's soft attributes
///
/// States: empty -> loaded. Loading happens through
/// [`ensure_loaded`](Self::ensure_loaded); once loaded, reads and writes go
/// through the in-memory map only.
#[derive(Debug, Clone, Default)]
pub struct SoftAttributes {
    cache: Option<BTreeMap<String, Value>>,
}

impl SoftAttributes {
    /// Create an empty (not yet loaded) cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the cache has been populated from storage
    pub fn is_loaded(&self) -> bool {
        self.cache.is_some()
    }

    /// Drop the cached map so the next access reloads from storage
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Populate the cache from storage if it is still empty
    ///
    /// Subsequent calls within the instance lifetime do not re-query.
    pub async fn ensure_loaded<S>(&mut self, owner: &OwnerRef, storage: &S) -> AttributeResult<()>
    where
        S: AttributeStorage + ?Sized,
    {
        if self.cache.is_none() {
            self.cache = Some(storage.load_attributes(owner).await?);
        }
        Ok(())
    }

    /// Read a cached value; `None` when absent or not yet loaded
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cache.as_ref()?.get(key)
    }

    /// Set a cache entry
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.cache
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
    }

    /// The full cached map, if loaded
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        self.cache.as_ref()
    }
}

/// What a host record type exposes to participate in soft attributes
///
/// `soft_keys` is the sole switch controlling which keys are redirected to
/// the side table; it defaults to the empty slice, so a type that declares
/// nothing degrades silently to all-native behavior rather than failing.
///
/// The remaining methods are the seam onto the host framework's generic
/// field machinery: a plain get/set pair, the set of fields changed since
/// load, and a way to remove a staged field before the row is written.
pub trait SoftAttributeHost: Send {
    /// Keys stored in the side table instead of host columns
    fn soft_keys(&self) -> &[&str] {
        &[]
    }

    /// Polymorphic reference identifying this instance in the side table
    fn owner_ref(&self) -> OwnerRef;

    /// The instance's soft-attribute cache
    fn attributes(&mut self) -> &mut SoftAttributes;

    /// Read a native field from the host's staged attribute set
    fn native_get(&self, field: &str) -> Option<Value>;

    /// Stage a native field write; must mark the field dirty
    fn native_set(&mut self, field: &str, value: Value);

    /// Fields changed since the instance was loaded, with their new values
    fn changed_fields(&self) -> BTreeMap<String, Value>;

    /// Remove a field from the staged attribute set
    fn clear_field(&mut self, field: &str);

    /// Whether a key is declared soft
    fn is_soft(&self, key: &str) -> bool {
        self.soft_keys().contains(&key)
    }

    /// Take the pending soft changes and strip soft keys from the host
    ///
    /// Computes the intersection of [`changed_fields`](Self::changed_fields)
    /// with the declared soft keys, then removes every declared key (dirty
    /// or not) from the staged fields so the underlying save never writes
    /// a matching column. Save routines pass the returned map to the
    /// backend in the same transaction as the host row write;
    /// [`SoftAttributeExt::synchronize`] covers the uncoupled case.
    fn take_soft_changes(&mut self) -> BTreeMap<String, Value> {
        let soft: Vec<String> = self.soft_keys().iter().map(|k| k.to_string()).collect();
        let changes = self
            .changed_fields()
            .into_iter()
            .filter(|(key, _)| soft.iter().any(|s| s == key))
            .collect();
        for key in &soft {
            self.clear_field(key);
        }
        changes
    }
}

/// Soft-attribute operations, provided for every [`SoftAttributeHost`]
#[async_trait]
pub trait SoftAttributeExt: SoftAttributeHost {
    /// Read an attribute, redirecting declared soft keys to the cache
    ///
    /// Soft keys populate the cache on first access and return `None` when
    /// never written; other keys delegate to the host's native read.
    async fn read_attribute<S>(&mut self, storage: &S, key: &str) -> AttributeResult<Option<Value>>
    where
        S: AttributeStorage + ?Sized;

    /// Write an attribute, redirecting declared soft keys to the cache
    ///
    /// Soft writes also stage the value through
    /// [`SoftAttributeHost::native_set`] so the host's change tracking sees
    /// the field as dirty; [`synchronize`](Self::synchronize) strips it
    /// again before the host row is persisted.
    async fn write_attribute<S>(
        &mut self,
        storage: &S,
        key: &str,
        value: Value,
    ) -> AttributeResult<()>
    where
        S: AttributeStorage + ?Sized;

    /// The full key -> value map as currently cached, local writes included
    async fn all_attributes<S>(&mut self, storage: &S) -> AttributeResult<BTreeMap<String, Value>>
    where
        S: AttributeStorage + ?Sized;

    /// Flush changed soft attributes to storage and strip them from the host
    ///
    /// Takes the pending soft changes
    /// ([`take_soft_changes`](SoftAttributeHost::take_soft_changes)) and
    /// upserts them through [`AttributeStorage::synchronize`] in one
    /// storage transaction. When the host row write must commit or roll
    /// back together with the flush, use the backend's coupled variant
    /// instead (`SqliteAttributeStore::synchronize_within` in
    /// `sidetable-sqlite`). Returns the number of attributes flushed.
    async fn synchronize<S>(&mut self, storage: &S) -> AttributeResult<usize>
    where
        S: AttributeStorage + ?Sized;
}

#[async_trait]
impl<H: SoftAttributeHost> SoftAttributeExt for H {
    async fn read_attribute<S>(&mut self, storage: &S, key: &str) -> AttributeResult<Option<Value>>
    where
        S: AttributeStorage + ?Sized,
    {
        if !self.is_soft(key) {
            return Ok(self.native_get(key));
        }

        let owner = self.owner_ref();
        self.attributes().ensure_loaded(&owner, storage).await?;
        Ok(self.attributes().get(key).cloned())
    }

    async fn write_attribute<S>(
        &mut self,
        storage: &S,
        key: &str,
        value: Value,
    ) -> AttributeResult<()>
    where
        S: AttributeStorage + ?Sized,
    {
        if !self.is_soft(key) {
            self.native_set(key, value);
            return Ok(());
        }

        let owner = self.owner_ref();
        self.attributes().ensure_loaded(&owner, storage).await?;
        self.attributes().insert(key, value.clone());
        // Dual-write: change detection lives on the host, so the staged set
        // must see the field even though persistence is redirected.
        self.native_set(key, value);
        Ok(())
    }

    async fn all_attributes<S>(&mut self, storage: &S) -> AttributeResult<BTreeMap<String, Value>>
    where
        S: AttributeStorage + ?Sized,
    {
        let owner = self.owner_ref();
        self.attributes().ensure_loaded(&owner, storage).await?;
        Ok(self.attributes().as_map().cloned().unwrap_or_default())
    }

    async fn synchronize<S>(&mut self, storage: &S) -> AttributeResult<usize>
    where
        S: AttributeStorage + ?Sized,
    {
        let changes = self.take_soft_changes();
        if changes.is_empty() {
            return Ok(0);
        }

        let owner = self.owner_ref();
        let written = storage.synchronize(&owner, &changes).await?;
        debug!(owner = %owner, count = written, "flushed soft attributes");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockAttributeStorage;
    use serde_json::json;
    use std::collections::BTreeSet;

    /// Minimal host record with generic field staging and dirty tracking
    struct Contact {
        id: i64,
        fields: BTreeMap<String, Value>,
        dirty: BTreeSet<String>,
        attrs: SoftAttributes,
    }

    impl Contact {
        fn new(id: i64) -> Self {
            Self {
                id,
                fields: BTreeMap::new(),
                dirty: BTreeSet::new(),
                attrs: SoftAttributes::new(),
            }
        }
    }

    impl SoftAttributeHost for Contact {
        fn soft_keys(&self) -> &[&str] {
            &["status", "priority", "meta"]
        }

        fn owner_ref(&self) -> OwnerRef {
            OwnerRef::new("contacts", self.id)
        }

        fn attributes(&mut self) -> &mut SoftAttributes {
            &mut self.attrs
        }

        fn native_get(&self, field: &str) -> Option<Value> {
            self.fields.get(field).cloned()
        }

        fn native_set(&mut self, field: &str, value: Value) {
            self.fields.insert(field.to_string(), value);
            self.dirty.insert(field.to_string());
        }

        fn changed_fields(&self) -> BTreeMap<String, Value> {
            self.dirty
                .iter()
                .filter_map(|f| self.fields.get(f).map(|v| (f.clone(), v.clone())))
                .collect()
        }

        fn clear_field(&mut self, field: &str) {
            self.fields.remove(field);
            self.dirty.remove(field);
        }
    }

    /// Host that never declares soft keys (default empty set)
    struct Plain {
        fields: BTreeMap<String, Value>,
        attrs: SoftAttributes,
    }

    impl SoftAttributeHost for Plain {
        fn owner_ref(&self) -> OwnerRef {
            OwnerRef::new("plain", 1)
        }

        fn attributes(&mut self) -> &mut SoftAttributes {
            &mut self.attrs
        }

        fn native_get(&self, field: &str) -> Option<Value> {
            self.fields.get(field).cloned()
        }

        fn native_set(&mut self, field: &str, value: Value) {
            self.fields.insert(field.to_string(), value);
        }

        fn changed_fields(&self) -> BTreeMap<String, Value> {
            self.fields.clone()
        }

        fn clear_field(&mut self, field: &str) {
            self.fields.remove(field);
        }
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips() {
        let storage = MockAttributeStorage::new();
        let mut contact = Contact::new(1);

        let value = json!({"tags": ["a", "b"], "nested": {"depth": 2}});
        contact
            .write_attribute(&storage, "meta", value.clone())
            .await
            .unwrap();

        let read = contact.read_attribute(&storage, "meta").await.unwrap();
        assert_eq!(read, Some(value));
    }

    #[tokio::test]
    async fn test_missing_key_reads_none() {
        let storage = MockAttributeStorage::new();
        let mut contact = Contact::new(1);

        let read = contact.read_attribute(&storage, "status").await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_undeclared_key_delegates_to_native() {
        let storage = MockAttributeStorage::new();
        let mut contact = Contact::new(1);

        contact
            .write_attribute(&storage, "name", json!("Ada"))
            .await
            .unwrap();

        assert_eq!(contact.native_get("name"), Some(json!("Ada")));
        assert_eq!(
            contact.read_attribute(&storage, "name").await.unwrap(),
            Some(json!("Ada"))
        );
        // Nothing was loaded or stored on the soft path.
        assert_eq!(storage.load_count(), 0);
        assert_eq!(storage.row_count(&contact.owner_ref()), 0);
    }

    #[tokio::test]
    async fn test_cache_loads_once_per_instance() {
        let storage = MockAttributeStorage::new();
        let owner = OwnerRef::new("contacts", 1);
        storage
            .upsert_attribute(&owner, "status", &json!("active"))
            .await
            .unwrap();

        let mut contact = Contact::new(1);
        contact.read_attribute(&storage, "status").await.unwrap();
        contact.read_attribute(&storage, "priority").await.unwrap();
        contact
            .write_attribute(&storage, "priority", json!(5))
            .await
            .unwrap();

        assert_eq!(storage.load_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_is_source_of_truth_after_write() {
        let storage = MockAttributeStorage::new();
        let owner = OwnerRef::new("contacts", 1);
        storage
            .upsert_attribute(&owner, "status", &json!("active"))
            .await
            .unwrap();

        let mut contact = Contact::new(1);
        contact
            .write_attribute(&storage, "status", json!("archived"))
            .await
            .unwrap();

        // The uncommitted local write wins over the stored value.
        assert_eq!(
            contact.read_attribute(&storage, "status").await.unwrap(),
            Some(json!("archived"))
        );
        let all = contact.all_attributes(&storage).await.unwrap();
        assert_eq!(all["status"], json!("archived"));
    }

    #[tokio::test]
    async fn test_synchronize_flushes_intersection_and_strips_keys() {
        let storage = MockAttributeStorage::new();
        let mut contact = Contact::new(1);

        contact
            .write_attribute(&storage, "status", json!("active"))
            .await
            .unwrap();
        contact
            .write_attribute(&storage, "name", json!("Ada"))
            .await
            .unwrap();

        let written = contact.synchronize(&storage).await.unwrap();
        assert_eq!(written, 1);

        // The soft key went to the side table, the native field did not.
        let owner = contact.owner_ref();
        assert_eq!(storage.row_count(&owner), 1);
        let stored = storage.load_attributes(&owner).await.unwrap();
        assert_eq!(stored["status"], json!("active"));

        // The soft key was stripped from the staged fields; the native
        // field is still there for the host row write.
        assert_eq!(contact.native_get("status"), None);
        assert_eq!(contact.native_get("name"), Some(json!("Ada")));
        assert!(contact.changed_fields().contains_key("name"));
        assert!(!contact.changed_fields().contains_key("status"));
    }

    #[test]
    fn test_take_soft_changes_strips_undirtied_declared_keys() {
        let mut contact = Contact::new(1);
        // Staged but never marked dirty, e.g. populated at load time.
        contact.fields.insert("status".to_string(), json!("stale"));
        contact.native_set("priority", json!(2));

        let changes = contact.take_soft_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes["priority"], json!(2));

        // Every declared key is stripped, dirty or not.
        assert_eq!(contact.native_get("status"), None);
        assert_eq!(contact.native_get("priority"), None);
    }

    #[tokio::test]
    async fn test_synchronize_without_changes_is_noop() {
        let storage = MockAttributeStorage::new();
        let mut contact = Contact::new(1);

        let written = contact.synchronize(&storage).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(storage.row_count(&contact.owner_ref()), 0);
    }

    #[tokio::test]
    async fn test_undeclared_host_degrades_to_native() {
        let storage = MockAttributeStorage::new();
        let mut plain = Plain {
            fields: BTreeMap::new(),
            attrs: SoftAttributes::new(),
        };

        plain
            .write_attribute(&storage, "status", json!("active"))
            .await
            .unwrap();

        // No declared keys: everything is native, nothing is flushed.
        assert_eq!(plain.native_get("status"), Some(json!("active")));
        let written = plain.synchronize(&storage).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(storage.row_count(&plain.owner_ref()), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let storage = MockAttributeStorage::new();
        let owner = OwnerRef::new("contacts", 1);
        storage
            .upsert_attribute(&owner, "status", &json!("active"))
            .await
            .unwrap();

        let mut contact = Contact::new(1);
        assert_eq!(
            contact.read_attribute(&storage, "status").await.unwrap(),
            Some(json!("active"))
        );

        // Out-of-band update is invisible until the cache is invalidated.
        storage
            .upsert_attribute(&owner, "status", &json!("archived"))
            .await
            .unwrap();
        assert_eq!(
            contact.read_attribute(&storage, "status").await.unwrap(),
            Some(json!("active"))
        );

        contact.attributes().invalidate();
        assert_eq!(
            contact.read_attribute(&storage, "status").await.unwrap(),
            Some(json!("archived"))
        );
        assert_eq!(storage.load_count(), 2);
    }
}
