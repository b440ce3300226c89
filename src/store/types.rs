use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunKind {
    Full,
    Incremental,
}

impl SyncRunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunKind::Full => "full",
            SyncRunKind::Incremental => "incremental",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SyncRunKind::Full),
            "incremental" => Some(SyncRunKind::Incremental),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncRunStatus::Running),
            "completed" => Some(SyncRunStatus::Completed),
            "failed" => Some(SyncRunStatus::Failed),
            _ => None,
        }
    }
}

/// One recorded sync run, as persisted in `sync_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub kind: SyncRunKind,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub books_synced: u64,
    pub highlights_synced: u64,
    pub tags_synced: u64,
    pub errors: Vec<String>,
    /// Watermark for the next full sync. Set to completion time, so items
    /// updated while the run was in flight are re-fetched next time.
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

/// Entity counts accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub books: u64,
    pub highlights: u64,
    pub tags: u64,
}

/// Totals across the whole database, for `status` reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub books: u64,
    pub highlights: u64,
    pub tags: u64,
    pub last_completed_run: Option<SyncRun>,
}
