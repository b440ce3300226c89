use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema migration failed: {0}")]
    Migration(#[source] rusqlite::Error),

    #[error("database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i64, expected: i64 },

    #[error("highlight {highlight_id} references book {book_id} which is not stored")]
    MissingParent { highlight_id: i64, book_id: i64 },

    #[error("highlight {0} carries no book reference")]
    MissingBookReference(i64),

    #[error(transparent)]
    Query(#[from] rusqlite::Error),
}
