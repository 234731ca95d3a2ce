//! SQLite backend configuration

use std::path::PathBuf;

/// Configuration for the SQLite connection
///
/// Defaults favor a local application database: WAL journaling, foreign key
/// enforcement, and a busy timeout so short write contention does not
/// surface as an error.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file path; `:memory:` opens an in-memory database
    pub path: PathBuf,
    /// Enable WAL journaling (readers do not block the writer)
    pub wal_mode: bool,
    /// Enforce foreign key constraints
    pub foreign_keys: bool,
    /// How long a blocked statement waits before returning SQLITE_BUSY
    pub busy_timeout_ms: u32,
    /// Page cache size, in pages (negative values mean KiB)
    pub cache_size: i32,
}

impl SqliteConfig {
    /// Create a configuration for a file database at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_ms: 5_000,
            cache_size: -64_000,
        }
    }

    /// Create a configuration for an in-memory database (tests)
    pub fn memory() -> Self {
        Self {
            // WAL is meaningless without a file; keep the journal default.
            wal_mode: false,
            ..Self::new(":memory:")
        }
    }
}
