//! Local SQLite persistence for books, highlights, tags, and run history.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStore, Store};
pub use error::StoreError;
pub use types::{SyncCounts, SyncRun, SyncRunKind};
