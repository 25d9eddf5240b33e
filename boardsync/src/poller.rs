//! Polling sync channel: periodic "changed since" catch-up pulls.
//!
//! The cursor is stamped at request issue time, not response time, so a
//! mutation that commits while a pull is in flight is picked up by the
//! next pull. A failed pull leaves the cursor where it was; nothing is
//! ever skipped, at the cost of occasionally re-fetching a snapshot the
//! replica already has (reconciliation makes that harmless).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::api::{ApiClient, ApiError, SyncFilter};
use crate::reconcile::{CommentCollection, TaskCollection};

/// A source of entity changes the poller can pull from.
///
/// Implementations fetch everything changed since the cursor and apply
/// it to the local replica, returning how many snapshots were applied.
pub trait ChangeFeed: Send + Sync + 'static {
    /// Pulls changes matching the filter into the replica.
    fn pull(
        &self,
        filter: SyncFilter,
    ) -> impl std::future::Future<Output = Result<usize, ApiError>> + Send;
}

/// The standard feed: board tasks and comments over the REST API.
#[derive(Clone)]
pub struct BoardFeed {
    api: ApiClient,
    tasks: TaskCollection,
    comments: CommentCollection,
}

impl BoardFeed {
    /// Creates a feed applying into the given replicas.
    #[must_use]
    pub const fn new(api: ApiClient, tasks: TaskCollection, comments: CommentCollection) -> Self {
        Self {
            api,
            tasks,
            comments,
        }
    }
}

impl ChangeFeed for BoardFeed {
    async fn pull(&self, filter: SyncFilter) -> Result<usize, ApiError> {
        // Rows are reconciled one at a time from the raw JSON so a single
        // malformed row is skipped instead of failing the whole batch.
        let tasks = self.api.tasks_raw(filter).await?;
        let comments = self.api.comments_raw(filter).await?;
        let mut applied = 0;
        {
            let mut replica = self.tasks.lock();
            for row in &tasks {
                if replica.apply_value(row) {
                    applied += 1;
                }
            }
        }
        {
            let mut replica = self.comments.lock();
            for row in &comments {
                if replica.apply_value(row) {
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }
}

/// Handle for a running polling loop.
pub struct Poller {
    cursor: Arc<Mutex<Option<DateTime<Utc>>>>,
    paused: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Poller {
    /// Spawns the polling loop.
    ///
    /// The first pull has no cursor and fetches the full live snapshot;
    /// every later pull is a tombstone-inclusive catch-up from the
    /// cursor.
    #[must_use]
    pub fn spawn<F: ChangeFeed>(feed: F, interval: Duration) -> Self {
        let cursor = Arc::new(Mutex::new(None));
        let paused = Arc::new(AtomicBool::new(false));

        let loop_cursor = Arc::clone(&cursor);
        let loop_paused = Arc::clone(&paused);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if loop_paused.load(Ordering::Relaxed) {
                    continue;
                }
                let issued_at = Utc::now();
                let filter = (*loop_cursor.lock()).map_or_else(SyncFilter::default, SyncFilter::since);
                match feed.pull(filter).await {
                    Ok(applied) => {
                        *loop_cursor.lock() = Some(issued_at);
                        if applied > 0 {
                            tracing::debug!(applied, "poll applied changes");
                        }
                    }
                    Err(e) => {
                        // Cursor stays put; the next tick retries the
                        // same window.
                        tracing::warn!(error = %e, "poll failed");
                    }
                }
            }
        });

        Self {
            cursor,
            paused,
            handle,
        }
    }

    /// Current cursor, if at least one pull has succeeded.
    #[must_use]
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor.lock()
    }

    /// Suspends polling without tearing the loop down.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Resumes a paused loop; the next tick pulls from the old cursor.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Whether the loop is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Stops the polling loop.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One-shot full refresh outside the polling cadence, for example right
/// after the user switches identity.
///
/// Pulls the complete snapshot with tombstones, so a delete that every
/// enabled channel missed still reaches the replica.
///
/// # Errors
///
/// Returns [`ApiError`] when the pull fails.
pub async fn refresh<F: ChangeFeed>(feed: &F) -> Result<usize, ApiError> {
    feed.pull(SyncFilter::full()).await
}
