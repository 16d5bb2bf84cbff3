// Record store persistence and snapshot fetchers

pub mod csv;
pub mod json;
pub mod snapshot;
pub mod sqlite;

pub use snapshot::SnapshotFetcher;
pub use sqlite::SqliteStore;

/// SQLite store schema version
/// Increment when the `records` layout changes in a way old versions can't read
pub const STORE_FORMAT_VERSION: u32 = 1;
