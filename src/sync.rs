//! Sync engine: pulls books and highlights from the remote source and
//! reconciles them into the local store.
//!
//! A run never aborts because one item failed. Item-level errors are
//! accumulated on the run record and the run still completes; only
//! authentication failures and store errors outside the item loop fail
//! the run outright.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::readwise::models::{Book, BookFilter, Highlight, HighlightFilter, Tag};
use crate::readwise::{ApiError, RemoteSource};
use crate::store::{Store, StoreError, SyncCounts, SyncRun, SyncRunKind};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub kind: SyncRunKind,
    pub books_synced: u64,
    pub highlights_synced: u64,
    pub tags_synced: u64,
    pub errors: Vec<String>,
    /// Watermark recorded for this run.
    pub last_sync_timestamp: DateTime<Utc>,
}

/// Result of an incremental run, carrying the new highlights for callers
/// that want to act on them (the poller's callback, digest output).
#[derive(Debug)]
pub struct IncrementalSync {
    pub summary: RunSummary,
    pub highlights: Vec<Highlight>,
}

pub struct SyncEngine {
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn Store>,
}

/// Per-run bookkeeping for item counts and accumulated failures.
#[derive(Default)]
struct RunProgress {
    counts: SyncCounts,
    tags: HashMap<i64, Tag>,
    errors: Vec<String>,
}

impl RunProgress {
    fn record_book(&mut self, book: &Book) {
        self.counts.books += 1;
        self.tags
            .extend(book.tags.iter().map(|t| (t.id, t.clone())));
    }

    fn record_highlight(&mut self, highlight: &Highlight) {
        self.counts.highlights += 1;
        self.tags
            .extend(highlight.tags.iter().map(|t| (t.id, t.clone())));
    }

    fn record_error(&mut self, err: impl std::fmt::Display) {
        let msg = err.to_string();
        warn!(error = %msg, "Sync item failed");
        self.errors.push(msg);
    }

    fn finish(&mut self) -> SyncCounts {
        self.counts.tags = self.tags.len() as u64;
        self.counts
    }
}

impl SyncEngine {
    pub fn new(source: Arc<dyn RemoteSource>, store: Arc<dyn Store>) -> Self {
        Self { source, store }
    }

    /// Full sync of every book and highlight updated since the last
    /// completed full run. `force` ignores the stored watermark and
    /// re-fetches everything.
    pub async fn sync_all(&self, force: bool) -> Result<RunSummary, SyncError> {
        let run_id = self.store.start_sync_run(SyncRunKind::Full).await?;
        let watermark = if force {
            None
        } else {
            self.store
                .latest_completed_run(Some(SyncRunKind::Full))
                .await?
                .and_then(|run| run.last_sync_timestamp)
        };
        info!(run_id, ?watermark, force, "Starting full sync");

        let mut progress = RunProgress::default();
        let mut books_seen: HashSet<i64> = HashSet::new();

        if let Err(fatal) = self
            .sync_books(watermark, &mut books_seen, &mut progress)
            .await
        {
            return self.abort_run(run_id, progress, fatal).await;
        }
        if let Err(fatal) = self
            .sync_highlights(watermark, &mut books_seen, &mut progress)
            .await
        {
            return self.abort_run(run_id, progress, fatal).await;
        }
        self.sync_tags(&mut progress).await;

        let counts = progress.finish();
        let watermark = self
            .store
            .complete_sync_run(run_id, counts, &progress.errors)
            .await?;
        info!(
            run_id,
            books = counts.books,
            highlights = counts.highlights,
            tags = counts.tags,
            errors = progress.errors.len(),
            "Full sync completed"
        );
        Ok(RunSummary {
            run_id,
            kind: SyncRunKind::Full,
            books_synced: counts.books,
            highlights_synced: counts.highlights,
            tags_synced: counts.tags,
            errors: progress.errors,
            last_sync_timestamp: watermark,
        })
    }

    /// Incremental sync of highlights made since `since`, with their books.
    ///
    /// Unlike a full sync, a failed listing fails the whole run: the caller
    /// (the poller) needs to see rate limits and transport failures to
    /// schedule the retry.
    pub async fn sync_window(
        &self,
        since: DateTime<Utc>,
    ) -> Result<IncrementalSync, SyncError> {
        let run_id = self.store.start_sync_run(SyncRunKind::Incremental).await?;
        info!(run_id, %since, "Starting incremental sync");

        let filter = HighlightFilter {
            highlighted_after: Some(since),
            ..HighlightFilter::default()
        };
        let mut incoming = Vec::new();
        {
            let mut stream = self.source.highlights(filter);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(highlight) => incoming.push(highlight),
                    Err(err) => {
                        self.store
                            .fail_sync_run(run_id, &[err.to_string()])
                            .await?;
                        return Err(err.into());
                    }
                }
            }
        }

        let mut progress = RunProgress::default();
        let mut books_seen: HashSet<i64> = HashSet::new();
        let mut synced = Vec::with_capacity(incoming.len());

        for highlight in incoming {
            match self
                .store_highlight_with_book(&highlight, &mut books_seen, &mut progress)
                .await
            {
                Ok(true) => synced.push(highlight),
                Ok(false) => {}
                Err(fatal) => return self.abort_run(run_id, progress, fatal).await,
            }
        }

        let counts = progress.finish();
        let watermark = self
            .store
            .complete_sync_run(run_id, counts, &progress.errors)
            .await?;
        info!(
            run_id,
            highlights = counts.highlights,
            errors = progress.errors.len(),
            "Incremental sync completed"
        );
        Ok(IncrementalSync {
            summary: RunSummary {
                run_id,
                kind: SyncRunKind::Incremental,
                books_synced: counts.books,
                highlights_synced: counts.highlights,
                tags_synced: counts.tags,
                errors: progress.errors,
                last_sync_timestamp: watermark,
            },
            highlights: synced,
        })
    }

    /// Incremental sync over a trailing window of whole hours.
    pub async fn sync_incremental(&self, hours: u32) -> Result<IncrementalSync, SyncError> {
        self.sync_window(Utc::now() - Duration::hours(i64::from(hours)))
            .await
    }

    pub async fn history(&self, limit: u32) -> Result<Vec<SyncRun>, SyncError> {
        Ok(self.store.sync_history(limit).await?)
    }

    async fn abort_run<T>(
        &self,
        run_id: i64,
        mut progress: RunProgress,
        fatal: SyncError,
    ) -> Result<T, SyncError> {
        progress.errors.push(fatal.to_string());
        self.store.fail_sync_run(run_id, &progress.errors).await?;
        Err(fatal)
    }

    /// Book phase of a full sync. Returns `Err` only on failures that must
    /// fail the run; listing failures short of that are recorded and the
    /// phase ends early.
    async fn sync_books(
        &self,
        watermark: Option<DateTime<Utc>>,
        books_seen: &mut HashSet<i64>,
        progress: &mut RunProgress,
    ) -> Result<(), SyncError> {
        let filter = BookFilter {
            updated_after: watermark,
        };
        let mut stream = self.source.books(filter);
        while let Some(item) = stream.next().await {
            match item {
                Ok(book) => match self.store.upsert_book(&book).await {
                    Ok(()) => {
                        progress.record_book(&book);
                        books_seen.insert(book.id);
                    }
                    Err(err) => progress.record_error(format!("book {}: {err}", book.id)),
                },
                Err(err @ ApiError::Auth(_)) => return Err(err.into()),
                Err(err) => {
                    progress.record_error(format!("book listing failed: {err}"));
                    break;
                }
            }
        }
        Ok(())
    }

    /// Highlight phase of a full sync.
    async fn sync_highlights(
        &self,
        watermark: Option<DateTime<Utc>>,
        books_seen: &mut HashSet<i64>,
        progress: &mut RunProgress,
    ) -> Result<(), SyncError> {
        let filter = HighlightFilter {
            updated_after: watermark,
            ..HighlightFilter::default()
        };
        let mut stream = self.source.highlights(filter);
        while let Some(item) = stream.next().await {
            match item {
                Ok(highlight) => {
                    self.store_highlight_with_book(&highlight, books_seen, progress)
                        .await?;
                }
                Err(err @ ApiError::Auth(_)) => return Err(err.into()),
                Err(err) => {
                    progress.record_error(format!("highlight listing failed: {err}"));
                    break;
                }
            }
        }
        Ok(())
    }

    /// Upsert one highlight, resolving its parent book first if the store
    /// does not have it. `books_seen` memoizes book ids already handled this
    /// run so a book is fetched and written at most once per run.
    ///
    /// Returns `Ok(true)` if the highlight was stored, `Ok(false)` if it was
    /// skipped with a recorded error, and `Err` only for store failures
    /// that must fail the run.
    async fn store_highlight_with_book(
        &self,
        highlight: &Highlight,
        books_seen: &mut HashSet<i64>,
        progress: &mut RunProgress,
    ) -> Result<bool, SyncError> {
        let book_id = highlight
            .book_id
            .or_else(|| highlight.book.as_ref().map(|b| b.id));

        if let Some(book_id) = book_id {
            if !books_seen.contains(&book_id) {
                match self.ensure_book(book_id, highlight.book.as_ref()).await {
                    Ok(Some(book)) => {
                        progress.record_book(&book);
                        books_seen.insert(book_id);
                    }
                    Ok(None) => {
                        // Already stored, nothing fetched.
                        books_seen.insert(book_id);
                    }
                    Err(err) => {
                        progress.record_error(format!(
                            "highlight {}: could not resolve book {book_id}: {err}",
                            highlight.id
                        ));
                        return Ok(false);
                    }
                }
            }
        }

        match self.store.upsert_highlight(highlight).await {
            Ok(()) => {
                progress.record_highlight(highlight);
                Ok(true)
            }
            Err(err @ (StoreError::MissingParent { .. } | StoreError::MissingBookReference(_))) => {
                progress.record_error(err);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Tag phase of a full sync: write the tag set gathered from this run's
    /// books and highlights, so renamed tags converge even when their owning
    /// entities were unchanged.
    async fn sync_tags(&self, progress: &mut RunProgress) {
        let tags: Vec<Tag> = progress.tags.values().cloned().collect();
        for tag in tags {
            if let Err(err) = self.store.upsert_tag(&tag).await {
                progress.record_error(format!("tag {}: {err}", tag.id));
            }
        }
    }

    /// Make sure `book_id` is current in the store. An embedded payload is
    /// written as-is (remote wins); without one, a fetch happens only when
    /// the row is absent. Returns the book that was written, or `None` if
    /// nothing needed writing.
    async fn ensure_book(
        &self,
        book_id: i64,
        embedded: Option<&Book>,
    ) -> Result<Option<Book>, SyncError> {
        let book = match embedded {
            Some(book) => book.clone(),
            None => {
                if self.store.book_exists(book_id).await? {
                    return Ok(None);
                }
                self.source.book(book_id).await?
            }
        };
        self.store.upsert_book(&book).await?;
        Ok(Some(book))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readwise::testing::MockSource;
    use crate::store::db::testing::{sample_book, sample_highlight};
    use crate::store::types::SyncRunStatus;
    use crate::store::SqliteStore;

    fn engine() -> (Arc<MockSource>, Arc<SqliteStore>, SyncEngine) {
        let source = Arc::new(MockSource::default());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(source.clone(), store.clone());
        (source, store, engine)
    }

    #[tokio::test]
    async fn full_sync_stores_books_and_highlights() {
        let (source, store, engine) = engine();
        let mut book = sample_book(1, "Book");
        book.tags = vec![Tag { id: 9, name: "read".to_string() }];
        source.push_books(vec![book]);
        source.push_highlights(vec![
            sample_highlight(100, 1, "first"),
            sample_highlight(101, 1, "second"),
        ]);

        let summary = engine.sync_all(false).await.unwrap();
        assert_eq!(summary.books_synced, 1);
        assert_eq!(summary.highlights_synced, 2);
        assert_eq!(summary.tags_synced, 1);
        assert!(summary.errors.is_empty());

        assert!(store.get_book(1).await.unwrap().is_some());
        assert!(store.get_highlight(100).await.unwrap().is_some());
        assert!(store.get_highlight(101).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn first_full_sync_has_no_watermark() {
        let (source, _store, engine) = engine();
        engine.sync_all(false).await.unwrap();

        let filters = source.seen_book_filters.lock().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].updated_after, None);
    }

    #[tokio::test]
    async fn second_full_sync_uses_previous_watermark() {
        let (source, _store, engine) = engine();
        let first = engine.sync_all(false).await.unwrap();
        engine.sync_all(false).await.unwrap();

        let filters = source.seen_book_filters.lock().unwrap();
        assert_eq!(filters.len(), 2);
        let watermark = filters[1].updated_after.unwrap();
        assert_eq!(watermark.timestamp(), first.last_sync_timestamp.timestamp());
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let (_source, store, engine) = engine();

        let mut previous: Option<chrono::DateTime<Utc>> = None;
        for _ in 0..3 {
            engine.sync_all(false).await.unwrap();
            let run = store
                .latest_completed_run(Some(SyncRunKind::Full))
                .await
                .unwrap()
                .unwrap();
            let watermark = run.last_sync_timestamp.unwrap();
            if let Some(prev) = previous {
                assert!(watermark >= prev, "watermark regressed: {watermark} < {prev}");
            }
            previous = Some(watermark);
        }
    }

    #[tokio::test]
    async fn force_ignores_watermark() {
        let (source, _store, engine) = engine();
        engine.sync_all(false).await.unwrap();
        engine.sync_all(true).await.unwrap();

        let filters = source.seen_book_filters.lock().unwrap();
        assert_eq!(filters[1].updated_after, None);
    }

    #[tokio::test]
    async fn item_failures_do_not_abort_the_run() {
        let (source, store, engine) = engine();
        source.push_books(vec![sample_book(1, "Book")]);
        // Highlight 101 references a book nobody can resolve.
        source.push_highlights(vec![
            sample_highlight(100, 1, "kept"),
            sample_highlight(101, 404, "dropped"),
            sample_highlight(102, 1, "also kept"),
        ]);

        let summary = engine.sync_all(false).await.unwrap();
        assert_eq!(summary.highlights_synced, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("404"));

        assert!(store.get_highlight(100).await.unwrap().is_some());
        assert!(store.get_highlight(101).await.unwrap().is_none());
        assert!(store.get_highlight(102).await.unwrap().is_some());

        let run = store.latest_completed_run(None).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.errors.len(), 1);
    }

    #[tokio::test]
    async fn missing_parent_is_fetched_on_demand() {
        let (source, store, engine) = engine();
        source.insert_book(sample_book(5, "Fetched"));
        source.push_highlights(vec![
            sample_highlight(100, 5, "first"),
            sample_highlight(101, 5, "second"),
        ]);

        let summary = engine.sync_all(false).await.unwrap();
        assert_eq!(summary.books_synced, 1);
        assert_eq!(summary.highlights_synced, 2);

        // The book is fetched exactly once even with two highlights on it.
        assert_eq!(*source.fetched_book_ids.lock().unwrap(), vec![5]);
        assert!(store.get_book(5).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn embedded_book_avoids_a_fetch() {
        let (source, store, engine) = engine();
        let mut highlight = sample_highlight(100, 7, "text");
        highlight.book = Some(sample_book(7, "Embedded"));
        source.push_highlights(vec![highlight]);

        engine.sync_all(false).await.unwrap();

        assert!(source.fetched_book_ids.lock().unwrap().is_empty());
        assert!(store.get_book(7).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auth_failure_fails_the_run() {
        let (source, store, engine) = engine();
        source
            .book_batches
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Auth("bad token".to_string())));

        let err = engine.sync_all(false).await.unwrap_err();
        assert!(matches!(err, SyncError::Api(ApiError::Auth(_))));

        let history = store.sync_history(1).await.unwrap();
        assert_eq!(history[0].status, SyncRunStatus::Failed);
    }

    #[tokio::test]
    async fn listing_failure_mid_run_is_recorded_not_fatal() {
        let (source, store, engine) = engine();
        source
            .book_batches
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Server { status: 502 }));
        source.push_highlights(vec![]);

        let summary = engine.sync_all(false).await.unwrap();
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("book listing failed"));

        let run = store.latest_completed_run(None).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
    }

    #[tokio::test]
    async fn sync_window_passes_exact_timestamp() {
        let (source, _store, engine) = engine();
        let since = Utc::now() - Duration::minutes(17);
        engine.sync_window(since).await.unwrap();

        let filters = source.seen_highlight_filters.lock().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].highlighted_after, Some(since));
        assert_eq!(filters[0].updated_after, None);
    }

    #[tokio::test]
    async fn sync_window_returns_new_highlights() {
        let (source, store, engine) = engine();
        source.insert_book(sample_book(3, "Book"));
        source.push_highlights(vec![
            sample_highlight(100, 3, "one"),
            sample_highlight(101, 3, "two"),
        ]);

        let result = engine.sync_window(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(result.highlights.len(), 2);
        assert_eq!(result.summary.kind, SyncRunKind::Incremental);
        assert_eq!(result.summary.highlights_synced, 2);
        assert!(store.get_highlight(101).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rate_limit_during_incremental_fails_the_run() {
        let (source, store, engine) = engine();
        source.push_highlight_error(ApiError::RateLimited { retry_after: 60 });

        let err = engine
            .sync_window(Utc::now() - Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Api(ApiError::RateLimited { retry_after: 60 })
        ));

        let history = store.sync_history(1).await.unwrap();
        assert_eq!(history[0].status, SyncRunStatus::Failed);
        assert_eq!(history[0].kind, SyncRunKind::Incremental);
    }

    #[tokio::test]
    async fn repeated_sync_is_idempotent() {
        let (source, store, engine) = engine();
        for _ in 0..2 {
            source.push_books(vec![sample_book(1, "Book")]);
            source.push_highlights(vec![sample_highlight(100, 1, "text")]);
        }

        engine.sync_all(true).await.unwrap();
        engine.sync_all(true).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.books, 1);
        assert_eq!(stats.highlights, 1);
    }
}
