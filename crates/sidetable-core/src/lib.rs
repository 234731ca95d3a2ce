//! Core types and traits for sidetable
//!
//! A host record type declares a set of "soft" attributes that are not
//! columns on its own table; their values live as rows in a shared side
//! table, one row per (owner, key), with a JSON-encoded value. This crate
//! defines the storage-agnostic pieces:
//!
//! - **[`AttributeStorage`]**: the trait seam a backend implements
//! - **[`SoftAttributeHost`]**: what a host record exposes to participate
//! - **[`SoftAttributes`]**: the per-instance lazy cache a host owns
//! - **[`SoftAttributeExt`]**: read/write/synchronize operations, provided
//!   for every host via a blanket implementation
//!
//! Backends (see `sidetable-sqlite`) implement [`AttributeStorage`] and add
//! query helpers on top of the same side table.

pub mod error;
pub mod host;
pub mod storage;
pub mod types;

// Re-exports
pub use error::{AttributeError, AttributeResult};
pub use host::{SoftAttributeExt, SoftAttributeHost, SoftAttributes};
pub use storage::AttributeStorage;
pub use types::{AttributeRecord, OwnerRef, SortDirection};
