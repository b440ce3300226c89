//! SQLite-backed local store.
//!
//! A single connection guarded by a mutex is enough here: writes arrive
//! from one sync task at a time, and WAL keeps readers from blocking it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::readwise::models::{Book, Highlight, HighlightLocation, Tag};

use super::error::StoreError;
use super::schema;
use super::types::{StoreStats, SyncCounts, SyncRun, SyncRunKind, SyncRunStatus};

/// Persistence operations the sync engine depends on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or fully overwrite a book and its tag associations.
    async fn upsert_book(&self, book: &Book) -> Result<(), StoreError>;

    /// Insert or fully overwrite a highlight and its tag associations.
    ///
    /// The parent book row must already exist; a dangling reference is
    /// rejected with [`StoreError::MissingParent`].
    async fn upsert_highlight(&self, highlight: &Highlight) -> Result<(), StoreError>;

    /// Insert or rename a tag.
    async fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError>;

    async fn book_exists(&self, id: i64) -> Result<bool, StoreError>;
    async fn get_book(&self, id: i64) -> Result<Option<Book>, StoreError>;
    async fn get_highlight(&self, id: i64) -> Result<Option<Highlight>, StoreError>;

    /// Record the start of a run and return its id.
    async fn start_sync_run(&self, kind: SyncRunKind) -> Result<i64, StoreError>;

    /// Mark a run completed and return the watermark written for it.
    async fn complete_sync_run(
        &self,
        id: i64,
        counts: SyncCounts,
        errors: &[String],
    ) -> Result<DateTime<Utc>, StoreError>;

    async fn fail_sync_run(&self, id: i64, errors: &[String]) -> Result<(), StoreError>;

    /// Most recent completed run, optionally restricted to one kind.
    async fn latest_completed_run(
        &self,
        kind: Option<SyncRunKind>,
    ) -> Result<Option<SyncRun>, StoreError>;

    /// Runs in reverse start order, newest first.
    async fn sync_history(&self, limit: u32) -> Result<Vec<SyncRun>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn to_unix(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp())
}

fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Run `f` inside an explicit transaction on a shared connection.
fn with_tx<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    E: From<rusqlite::Error>,
    F: FnOnce(&Connection) -> Result<T, E>,
{
    conn.execute_batch("BEGIN")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(err)
        }
    }
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                    path: path.to_path_buf(),
                    source: rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(e.to_string()),
                    ),
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::init(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .and_then(|_| conn.pragma_update(None, "synchronous", "NORMAL"))
            .and_then(|_| conn.pragma_update(None, "foreign_keys", "ON"))
            .map_err(|e| StoreError::Open { path, source: e })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn replace_tag_links(
    conn: &Connection,
    link_table: &str,
    owner_column: &str,
    owner_id: i64,
    tags: &[Tag],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!("DELETE FROM {link_table} WHERE {owner_column} = ?1"),
        params![owner_id],
    )?;
    for tag in tags {
        conn.execute(
            "INSERT INTO tags (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![tag.id, tag.name],
        )?;
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {link_table} ({owner_column}, tag_id) VALUES (?1, ?2)"
            ),
            params![owner_id, tag.id],
        )?;
    }
    Ok(())
}

fn load_tags(
    conn: &Connection,
    link_table: &str,
    owner_column: &str,
    owner_id: i64,
) -> Result<Vec<Tag>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT t.id, t.name FROM tags t
         JOIN {link_table} l ON l.tag_id = t.id
         WHERE l.{owner_column} = ?1
         ORDER BY t.name"
    ))?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

fn run_from_row(row: &rusqlite::Row<'_>) -> Result<SyncRun, rusqlite::Error> {
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let errors_json: String = row.get(8)?;
    Ok(SyncRun {
        id: row.get(0)?,
        kind: SyncRunKind::from_str(&kind).unwrap_or(SyncRunKind::Full),
        status: SyncRunStatus::from_str(&status).unwrap_or(SyncRunStatus::Failed),
        started_at: from_unix(Some(row.get(3)?)).unwrap_or_default(),
        completed_at: from_unix(row.get(4)?),
        books_synced: row.get::<_, i64>(5)? as u64,
        highlights_synced: row.get::<_, i64>(6)? as u64,
        tags_synced: row.get::<_, i64>(7)? as u64,
        errors: serde_json::from_str(&errors_json).unwrap_or_default(),
        last_sync_timestamp: from_unix(row.get(9)?),
    })
}

const RUN_COLUMNS: &str = "id, kind, status, started_at, completed_at, \
     books_synced, highlights_synced, tags_synced, errors, last_sync_timestamp";

fn errors_to_json(errors: &[String]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_book(&self, book: &Book) -> Result<(), StoreError> {
        let conn = self.lock();
        with_tx(&conn, |conn| {
            conn.execute(
                "INSERT INTO books (id, title, author, category, source, num_highlights,
                                    cover_image_url, highlights_url, source_url, asin,
                                    last_highlight_at, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     author = excluded.author,
                     category = excluded.category,
                     source = excluded.source,
                     num_highlights = excluded.num_highlights,
                     cover_image_url = excluded.cover_image_url,
                     highlights_url = excluded.highlights_url,
                     source_url = excluded.source_url,
                     asin = excluded.asin,
                     last_highlight_at = excluded.last_highlight_at,
                     updated = excluded.updated",
                params![
                    book.id,
                    book.title,
                    book.author,
                    book.category,
                    book.source,
                    book.num_highlights,
                    book.cover_image_url,
                    book.highlights_url,
                    book.source_url,
                    book.asin,
                    to_unix(book.last_highlight_at),
                    to_unix(book.updated),
                ],
            )?;
            replace_tag_links(conn, "book_tags", "book_id", book.id, &book.tags)?;
            Ok(())
        })
    }

    async fn upsert_highlight(&self, highlight: &Highlight) -> Result<(), StoreError> {
        let book_id = highlight
            .book_id
            .or_else(|| highlight.book.as_ref().map(|b| b.id))
            .ok_or(StoreError::MissingBookReference(highlight.id))?;

        let conn = self.lock();
        with_tx(&conn, |conn| {
            let parent_exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM books WHERE id = ?1)",
                params![book_id],
                |row| row.get(0),
            )?;
            if !parent_exists {
                return Err(StoreError::MissingParent {
                    highlight_id: highlight.id,
                    book_id,
                });
            }

            conn.execute(
                "INSERT INTO highlights (id, book_id, text, note, location, location_type,
                                         color, url, highlighted_at, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     book_id = excluded.book_id,
                     text = excluded.text,
                     note = excluded.note,
                     location = excluded.location,
                     location_type = excluded.location_type,
                     color = excluded.color,
                     url = excluded.url,
                     highlighted_at = excluded.highlighted_at,
                     updated = excluded.updated",
                params![
                    highlight.id,
                    book_id,
                    highlight.text,
                    highlight.note,
                    highlight.location,
                    highlight.location_type.map(|l| l.as_str()),
                    highlight.color,
                    highlight.url,
                    to_unix(highlight.highlighted_at),
                    to_unix(highlight.updated),
                ],
            )?;
            replace_tag_links(
                conn,
                "highlight_tags",
                "highlight_id",
                highlight.id,
                &highlight.tags,
            )?;
            Ok(())
        })
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO tags (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![tag.id, tag.name],
        )?;
        Ok(())
    }

    async fn book_exists(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM books WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn get_book(&self, id: i64) -> Result<Option<Book>, StoreError> {
        let conn = self.lock();
        let book = conn
            .query_row(
                "SELECT id, title, author, category, source, num_highlights,
                        cover_image_url, highlights_url, source_url, asin,
                        last_highlight_at, updated
                 FROM books WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Book {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        author: row.get(2)?,
                        category: row.get(3)?,
                        source: row.get(4)?,
                        num_highlights: row.get(5)?,
                        cover_image_url: row.get(6)?,
                        highlights_url: row.get(7)?,
                        source_url: row.get(8)?,
                        asin: row.get(9)?,
                        last_highlight_at: from_unix(row.get(10)?),
                        updated: from_unix(row.get(11)?),
                        tags: Vec::new(),
                    })
                },
            )
            .optional()?;

        match book {
            Some(mut book) => {
                book.tags = load_tags(&conn, "book_tags", "book_id", book.id)?;
                Ok(Some(book))
            }
            None => Ok(None),
        }
    }

    async fn get_highlight(&self, id: i64) -> Result<Option<Highlight>, StoreError> {
        let conn = self.lock();
        let highlight = conn
            .query_row(
                "SELECT id, book_id, text, note, location, location_type,
                        color, url, highlighted_at, updated
                 FROM highlights WHERE id = ?1",
                params![id],
                |row| {
                    let location_type: Option<String> = row.get(5)?;
                    Ok(Highlight {
                        id: row.get(0)?,
                        book_id: Some(row.get(1)?),
                        text: row.get(2)?,
                        note: row.get(3)?,
                        location: row.get(4)?,
                        location_type: location_type
                            .as_deref()
                            .and_then(HighlightLocation::from_str),
                        color: row.get(6)?,
                        url: row.get(7)?,
                        highlighted_at: from_unix(row.get(8)?),
                        updated: from_unix(row.get(9)?),
                        tags: Vec::new(),
                        book: None,
                    })
                },
            )
            .optional()?;

        match highlight {
            Some(mut highlight) => {
                highlight.tags = load_tags(&conn, "highlight_tags", "highlight_id", highlight.id)?;
                Ok(Some(highlight))
            }
            None => Ok(None),
        }
    }

    async fn start_sync_run(&self, kind: SyncRunKind) -> Result<i64, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_runs (kind, status, started_at) VALUES (?1, ?2, ?3)",
            params![
                kind.as_str(),
                SyncRunStatus::Running.as_str(),
                Utc::now().timestamp()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        id: i64,
        counts: SyncCounts,
        errors: &[String],
    ) -> Result<DateTime<Utc>, StoreError> {
        // The watermark is the completion time, not the start time, so the
        // next full sync re-covers anything updated while this one ran.
        let now = Utc::now();
        let conn = self.lock();
        conn.execute(
            "UPDATE sync_runs SET
                 status = ?2, completed_at = ?3,
                 books_synced = ?4, highlights_synced = ?5, tags_synced = ?6,
                 errors = ?7, last_sync_timestamp = ?3
             WHERE id = ?1",
            params![
                id,
                SyncRunStatus::Completed.as_str(),
                now.timestamp(),
                counts.books as i64,
                counts.highlights as i64,
                counts.tags as i64,
                errors_to_json(errors),
            ],
        )?;
        Ok(now)
    }

    async fn fail_sync_run(&self, id: i64, errors: &[String]) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sync_runs SET status = ?2, completed_at = ?3, errors = ?4 WHERE id = ?1",
            params![
                id,
                SyncRunStatus::Failed.as_str(),
                Utc::now().timestamp(),
                errors_to_json(errors),
            ],
        )?;
        Ok(())
    }

    async fn latest_completed_run(
        &self,
        kind: Option<SyncRunKind>,
    ) -> Result<Option<SyncRun>, StoreError> {
        let conn = self.lock();
        let run = conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM sync_runs
                     WHERE status = 'completed' AND (?1 IS NULL OR kind = ?1)
                     ORDER BY completed_at DESC, id DESC LIMIT 1"
                ),
                params![kind.map(|k| k.as_str())],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    async fn sync_history(&self, limit: u32) -> Result<Vec<SyncRun>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1"
        ))?;
        let runs = stmt.query_map(params![limit], run_from_row)?;
        Ok(runs.collect::<Result<Vec<_>, _>>()?)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let (books, highlights, tags) = {
            let conn = self.lock();
            let books: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?;
            let highlights: i64 =
                conn.query_row("SELECT COUNT(*) FROM highlights", [], |r| r.get(0))?;
            let tags: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
            (books, highlights, tags)
        };
        let last_completed_run = self.latest_completed_run(None).await?;
        Ok(StoreStats {
            books: books as u64,
            highlights: highlights as u64,
            tags: tags as u64,
            last_completed_run,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{sample_book, sample_highlight};
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn book_round_trip_with_tags() {
        let store = store();
        let mut book = sample_book(1, "The Dispossessed");
        book.tags = vec![
            Tag { id: 10, name: "fiction".to_string() },
            Tag { id: 11, name: "sf".to_string() },
        ];
        store.upsert_book(&book).await.unwrap();

        let loaded = store.get_book(1).await.unwrap().unwrap();
        assert_eq!(loaded.title, "The Dispossessed");
        assert_eq!(loaded.tags.len(), 2);
        assert_eq!(loaded.updated, book.updated);
    }

    #[tokio::test]
    async fn reupsert_overwrites_and_replaces_tags() {
        let store = store();
        let mut book = sample_book(1, "Draft Title");
        book.tags = vec![Tag { id: 10, name: "old".to_string() }];
        store.upsert_book(&book).await.unwrap();

        book.title = "Final Title".to_string();
        book.tags = vec![Tag { id: 11, name: "new".to_string() }];
        store.upsert_book(&book).await.unwrap();

        let loaded = store.get_book(1).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Final Title");
        assert_eq!(loaded.tags.len(), 1);
        assert_eq!(loaded.tags[0].name, "new");
    }

    #[tokio::test]
    async fn highlight_requires_stored_parent() {
        let store = store();
        let highlight = sample_highlight(100, 1, "orphan");
        let err = store.upsert_highlight(&highlight).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::MissingParent { highlight_id: 100, book_id: 1 }
        ));
        // Nothing was written.
        assert!(store.get_highlight(100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn highlight_without_any_book_reference_is_rejected() {
        let store = store();
        let mut highlight = sample_highlight(100, 1, "floating");
        highlight.book_id = None;
        let err = store.upsert_highlight(&highlight).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBookReference(100)));
    }

    #[tokio::test]
    async fn highlight_round_trip() {
        let store = store();
        store.upsert_book(&sample_book(1, "Book")).await.unwrap();

        let mut highlight = sample_highlight(100, 1, "a sentence worth keeping");
        highlight.tags = vec![Tag { id: 20, name: "quotes".to_string() }];
        store.upsert_highlight(&highlight).await.unwrap();

        let loaded = store.get_highlight(100).await.unwrap().unwrap();
        assert_eq!(loaded.text, "a sentence worth keeping");
        assert_eq!(loaded.book_id, Some(1));
        assert_eq!(loaded.location_type, Some(HighlightLocation::Kindle));
        assert_eq!(loaded.tags.len(), 1);
    }

    #[tokio::test]
    async fn highlight_book_id_falls_back_to_embedded_book() {
        let store = store();
        store.upsert_book(&sample_book(7, "Embedded")).await.unwrap();

        let mut highlight = sample_highlight(100, 7, "text");
        highlight.book_id = None;
        highlight.book = Some(sample_book(7, "Embedded"));
        store.upsert_highlight(&highlight).await.unwrap();

        let loaded = store.get_highlight(100).await.unwrap().unwrap();
        assert_eq!(loaded.book_id, Some(7));
    }

    #[tokio::test]
    async fn upsert_tag_renames_in_place() {
        let store = store();
        store
            .upsert_tag(&Tag { id: 5, name: "draft".to_string() })
            .await
            .unwrap();
        store
            .upsert_tag(&Tag { id: 5, name: "final".to_string() })
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.tags, 1);
    }

    #[tokio::test]
    async fn duplicate_tag_name_under_a_different_id_is_rejected() {
        let store = store();
        store
            .upsert_tag(&Tag { id: 5, name: "pkm".to_string() })
            .await
            .unwrap();

        // Names are unique; a second id claiming the same name surfaces as
        // a store error for the caller to record against that item.
        let err = store
            .upsert_tag(&Tag { id: 6, name: "pkm".to_string() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));

        // Once the original row gives the name up, the new id can take it.
        store
            .upsert_tag(&Tag { id: 5, name: "zettel".to_string() })
            .await
            .unwrap();
        store
            .upsert_tag(&Tag { id: 6, name: "pkm".to_string() })
            .await
            .unwrap();
        assert_eq!(store.stats().await.unwrap().tags, 2);
    }

    #[tokio::test]
    async fn sync_run_lifecycle() {
        let store = store();
        let id = store.start_sync_run(SyncRunKind::Full).await.unwrap();

        let history = store.sync_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, SyncRunStatus::Running);
        assert!(store.latest_completed_run(None).await.unwrap().is_none());

        let counts = SyncCounts { books: 2, highlights: 5, tags: 1 };
        let watermark = store
            .complete_sync_run(id, counts, &["one failure".to_string()])
            .await
            .unwrap();

        let run = store.latest_completed_run(None).await.unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.books_synced, 2);
        assert_eq!(run.highlights_synced, 5);
        assert_eq!(run.errors, vec!["one failure".to_string()]);
        assert_eq!(run.last_sync_timestamp.unwrap().timestamp(), watermark.timestamp());
    }

    #[tokio::test]
    async fn failed_runs_do_not_advance_watermark() {
        let store = store();
        let id = store.start_sync_run(SyncRunKind::Full).await.unwrap();
        store
            .fail_sync_run(id, &["boom".to_string()])
            .await
            .unwrap();

        assert!(store.latest_completed_run(None).await.unwrap().is_none());
        let history = store.sync_history(10).await.unwrap();
        assert_eq!(history[0].status, SyncRunStatus::Failed);
        assert_eq!(history[0].errors, vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn latest_completed_run_filters_by_kind() {
        let store = store();
        let full = store.start_sync_run(SyncRunKind::Full).await.unwrap();
        store
            .complete_sync_run(full, SyncCounts::default(), &[])
            .await
            .unwrap();
        let inc = store.start_sync_run(SyncRunKind::Incremental).await.unwrap();
        store
            .complete_sync_run(inc, SyncCounts::default(), &[])
            .await
            .unwrap();

        let latest_full = store
            .latest_completed_run(Some(SyncRunKind::Full))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest_full.id, full);
        assert_eq!(latest_full.kind, SyncRunKind::Full);

        // Unfiltered returns the newest of any kind.
        let latest = store.latest_completed_run(None).await.unwrap().unwrap();
        assert_eq!(latest.id, inc);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let store = store();
        for _ in 0..5 {
            store.start_sync_run(SyncRunKind::Incremental).await.unwrap();
        }
        let history = store.sync_history(3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].id > history[1].id);
        assert!(history[1].id > history[2].id);
    }

    #[tokio::test]
    async fn stats_reports_totals() {
        let store = store();
        store.upsert_book(&sample_book(1, "A")).await.unwrap();
        store.upsert_book(&sample_book(2, "B")).await.unwrap();
        store
            .upsert_highlight(&sample_highlight(100, 1, "text"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.books, 2);
        assert_eq!(stats.highlights, 1);
        assert_eq!(stats.tags, 0);
        assert!(stats.last_completed_run.is_none());
    }
}
