//! Schema definition and versioned migration.
//!
//! The current version is tracked in SQLite's `user_version` pragma. A
//! database written by a newer release is refused rather than migrated
//! downward.

use rusqlite::Connection;

use super::error::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS books (
    id                INTEGER PRIMARY KEY,
    title             TEXT NOT NULL,
    author            TEXT,
    category          TEXT,
    source            TEXT,
    num_highlights    INTEGER NOT NULL DEFAULT 0,
    cover_image_url   TEXT,
    highlights_url    TEXT,
    source_url        TEXT,
    asin              TEXT,
    last_highlight_at INTEGER,
    updated           INTEGER
);

CREATE TABLE IF NOT EXISTS highlights (
    id             INTEGER PRIMARY KEY,
    book_id        INTEGER NOT NULL REFERENCES books(id),
    text           TEXT NOT NULL,
    note           TEXT,
    location       INTEGER,
    location_type  TEXT,
    color          TEXT,
    url            TEXT,
    highlighted_at INTEGER,
    updated        INTEGER
);

CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS book_tags (
    book_id INTEGER NOT NULL REFERENCES books(id),
    tag_id  INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (book_id, tag_id)
);

CREATE TABLE IF NOT EXISTS highlight_tags (
    highlight_id INTEGER NOT NULL REFERENCES highlights(id),
    tag_id       INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (highlight_id, tag_id)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    kind                TEXT NOT NULL,
    status              TEXT NOT NULL,
    started_at          INTEGER NOT NULL,
    completed_at        INTEGER,
    books_synced        INTEGER NOT NULL DEFAULT 0,
    highlights_synced   INTEGER NOT NULL DEFAULT 0,
    tags_synced         INTEGER NOT NULL DEFAULT 0,
    errors              TEXT NOT NULL DEFAULT '[]',
    last_sync_timestamp INTEGER
);

CREATE INDEX IF NOT EXISTS idx_books_author_title ON books(author, title);
CREATE INDEX IF NOT EXISTS idx_books_source_category ON books(source, category);
CREATE INDEX IF NOT EXISTS idx_highlights_book_date ON highlights(book_id, highlighted_at);
CREATE INDEX IF NOT EXISTS idx_highlights_date ON highlights(highlighted_at);
CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs(status, started_at);
";

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StoreError::Migration)?;

    if version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }

    if version < 1 {
        conn.execute_batch(SCHEMA_V1).map_err(StoreError::Migration)?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(StoreError::Migration)?;
    Ok(())
}
