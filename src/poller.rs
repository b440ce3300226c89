//! Background poller: periodically asks the sync engine for highlights
//! made since the last poll and hands new ones to an optional callback.
//!
//! The poll loop never exits on its own. Rate limits sleep for the
//! server-requested interval, other failures back off exponentially, and
//! once retries are exhausted the loop resets and resumes the normal
//! cadence.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::readwise::models::Highlight;
use crate::readwise::ApiError;
use crate::sync::{RunSummary, SyncEngine, SyncError};

/// Ceiling on the failure backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Sleep between successful polls.
    pub interval: Duration,
    /// Failure backoffs before resetting to the normal interval.
    pub max_retries: u32,
    pub backoff_factor: f64,
    /// Window behind the first poll when no checkpoint exists.
    pub lookback_hours: u32,
    /// Cap on highlights handed to the callback per poll.
    pub max_highlights_per_poll: usize,
    /// Checkpoint file; `None` disables persistence.
    pub state_file: Option<PathBuf>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_retries: 3,
            backoff_factor: 2.0,
            lookback_hours: 1,
            max_highlights_per_poll: 1000,
            state_file: Some(PathBuf::from("poller_state.json")),
        }
    }
}

/// Checkpoint persisted between polls (and across restarts).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollerState {
    pub last_poll_time: Option<DateTime<Utc>>,
    pub total_polls: u64,
    pub total_highlights_found: u64,
    pub error_count: u64,
}

impl PollerState {
    /// Load a checkpoint, falling back to a fresh state when the file is
    /// missing or unreadable. A stale window is recoverable; refusing to
    /// start is not.
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(state) => state,
                Err(err) => {
                    warn!(path = %path.display(), %err, "Ignoring corrupt poller state");
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "Could not read poller state");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &std::path::Path) {
        let json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "Could not serialize poller state");
                return;
            }
        };
        if let Err(err) = std::fs::write(path, json) {
            warn!(path = %path.display(), %err, "Could not write poller state");
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug)]
pub enum PollOutcome {
    Completed {
        highlights_count: u64,
        execution_time: Duration,
        lookback_time: DateTime<Utc>,
        summary: RunSummary,
    },
    RateLimited {
        retry_after: u64,
    },
    Failed {
        message: String,
    },
}

pub type HighlightCallback = Box<dyn Fn(&[Highlight], &RunSummary) + Send + Sync>;

struct PollerInner {
    engine: Arc<SyncEngine>,
    config: PollerConfig,
    state: Mutex<PollerState>,
    callback: Option<HighlightCallback>,
}

pub struct Poller {
    inner: Arc<PollerInner>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// `interval * factor^retries`, capped.
fn backoff_delay(interval: Duration, factor: f64, retries: u32) -> Duration {
    let secs = interval.as_secs_f64() * factor.powi(retries as i32);
    Duration::from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64()))
}

impl PollerInner {
    fn state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self) {
        if let Some(path) = &self.config.state_file {
            self.state().save(path);
        }
    }

    async fn poll_once(&self) -> PollOutcome {
        let started = std::time::Instant::now();
        let poll_start = Utc::now();
        let lookback = self.state().last_poll_time.unwrap_or_else(|| {
            poll_start - chrono::Duration::hours(i64::from(self.config.lookback_hours))
        });
        debug!(%lookback, "Polling for new highlights");

        match self.engine.sync_window(lookback).await {
            Ok(result) => {
                let mut highlights = result.highlights;
                if highlights.len() > self.config.max_highlights_per_poll {
                    warn!(
                        found = highlights.len(),
                        cap = self.config.max_highlights_per_poll,
                        "Truncating highlights delivered this poll"
                    );
                    highlights.truncate(self.config.max_highlights_per_poll);
                }

                {
                    let mut state = self.state();
                    // Checkpoint at the poll's start time. A highlight created
                    // while the fetch was in flight still falls inside the next
                    // window, and the upserts keep re-delivery idempotent.
                    state.last_poll_time = Some(poll_start);
                    state.total_polls += 1;
                    state.total_highlights_found += highlights.len() as u64;
                }
                self.persist();

                if !highlights.is_empty() {
                    info!(count = highlights.len(), "Found new highlights");
                    self.deliver(&highlights, &result.summary);
                }

                PollOutcome::Completed {
                    highlights_count: highlights.len() as u64,
                    execution_time: started.elapsed(),
                    lookback_time: lookback,
                    summary: result.summary,
                }
            }
            Err(SyncError::Api(ApiError::RateLimited { retry_after })) => {
                self.state().error_count += 1;
                self.persist();
                warn!(retry_after, "Rate limited");
                PollOutcome::RateLimited { retry_after }
            }
            Err(err) => {
                self.state().error_count += 1;
                self.persist();
                let message = err.to_string();
                error!(error = %message, "Poll failed");
                PollOutcome::Failed { message }
            }
        }
    }

    /// A panicking callback must not take the poll loop down with it.
    fn deliver(&self, highlights: &[Highlight], summary: &RunSummary) {
        if let Some(callback) = &self.callback {
            let result = catch_unwind(AssertUnwindSafe(|| callback(highlights, summary)));
            if result.is_err() {
                error!("Highlight callback panicked; continuing");
            }
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut retries: u32 = 0;
        loop {
            if token.is_cancelled() {
                break;
            }
            let delay = match self.poll_once().await {
                PollOutcome::Completed { highlights_count, .. } => {
                    debug!(highlights_count, "Poll completed");
                    retries = 0;
                    self.config.interval
                }
                PollOutcome::RateLimited { retry_after } => {
                    // Server-directed wait; not counted against retries.
                    Duration::from_secs(retry_after)
                }
                PollOutcome::Failed { .. } => {
                    retries += 1;
                    if retries >= self.config.max_retries {
                        error!(
                            retries,
                            "Retries exhausted, resuming normal poll interval"
                        );
                        retries = 0;
                        self.config.interval
                    } else {
                        backoff_delay(self.config.interval, self.config.backoff_factor, retries)
                    }
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.persist();
        info!("Poller stopped");
    }
}

impl Poller {
    pub fn new(engine: Arc<SyncEngine>, config: PollerConfig) -> Self {
        let state = match &config.state_file {
            Some(path) => PollerState::load(path),
            None => PollerState::default(),
        };
        Self {
            inner: Arc::new(PollerInner {
                engine,
                config,
                state: Mutex::new(state),
                callback: None,
            }),
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Install a callback invoked with each poll's new highlights. Must be
    /// called before [`start`](Self::start).
    pub fn with_callback(mut self, callback: HighlightCallback) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.callback = Some(callback),
            None => warn!("Cannot install callback while the poller is running"),
        }
        self
    }

    /// Spawn the poll loop. A second call while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Poller is already running");
            return;
        }
        info!(interval = ?self.inner.config.interval, "Starting poller");
        self.token = CancellationToken::new();
        let inner = self.inner.clone();
        let token = self.token.clone();
        self.handle = Some(tokio::spawn(inner.run(token)));
    }

    /// Cancel the loop and wait for it to flush its checkpoint.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(%err, "Poll loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn state(&self) -> PollerState {
        self.inner.state().clone()
    }

    /// One poll cycle, outside the background loop.
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }
}
