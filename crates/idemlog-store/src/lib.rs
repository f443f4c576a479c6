//! idemlog Store — durable deduplication index on SQLite.

pub mod schema;
pub mod sqlite_dedup_store;

pub use sqlite_dedup_store::{SqliteDedupStore, StoreOptions};
