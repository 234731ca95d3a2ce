//! SQLite storage backend for sidetable
//!
//! Persists soft attributes in a single `attributes` side table and
//! implements the `sidetable-core` storage trait on top of it, plus a query
//! builder for filtering and sorting owners by attribute values.
//!
//! ## Features
//!
//! - **SqliteAttributeStore**: upsert-by-key persistence with transactional
//!   coupling to the host row write
//! - **AttributeQuery**: filter/sort owners by values, including JSON
//!   sub-path predicates via SQLite's JSON functions
//! - **WAL Mode**: optimized for concurrent read access
//! - **Thread Safety**: Arc<Mutex<Connection>> pattern for concurrent access
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sidetable_sqlite::{AttributeQuery, SqliteAttributeStore, SqliteConfig, SqlitePool};
//! use sidetable_core::{AttributeStorage, OwnerRef, SortDirection};
//!
//! let pool = SqlitePool::new(SqliteConfig::new("./app.db"))?;
//! let store = SqliteAttributeStore::new(pool.clone());
//!
//! let owner = OwnerRef::new("contacts", 42);
//! store.upsert_attribute(&owner, "status", &serde_json::json!("active")).await?;
//!
//! let ids = AttributeQuery::new("contacts")
//!     .filter_eq("status", serde_json::json!("active"))
//!     .sort_by("priority", SortDirection::Ascending)
//!     .fetch_ids(&pool)
//!     .await?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;

// Re-exports
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use error::{SqliteError, SqliteResult};
pub use query::AttributeQuery;
pub use store::SqliteAttributeStore;
