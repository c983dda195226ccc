//! Publish worker
//!
//! Picks schedule rows whose time has come and publishes them. Each job first
//! passes the per-workspace [`ConcurrencyLimiter`]; a throttled job stays
//! `pending` and is pushed back by the release delay instead of failing.
//! Admitted jobs claim their row (`pending -> publishing`) before calling the
//! [`Publisher`], so a row is never published twice and the reconciler, which
//! only touches `pending` rows, leaves in-flight work alone.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::config::PublishingConfig;
use crate::error::{PostdeckError, PublishError, Result};
use crate::publisher::Publisher;
use crate::scheduling::ACTION_STATUS_CHANGED;
use crate::service::events::{Event, EventBus};
use crate::throttle::{workspace_key, Admission, ConcurrencyLimiter};
use crate::types::{ActivityEntry, PublicationStatus, ScheduleStatus, ScheduledPost};
use crate::Database;

/// How a single job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Published,
    /// Throttled; will be picked up again after the release delay
    Deferred,
    /// Publish failed but attempts remain
    Retrying,
    Failed,
    /// Row was claimed or removed by someone else first
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub published: usize,
    pub deferred: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Jobs that hit a database error
    pub errors: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.published + self.deferred + self.retrying + self.failed + self.skipped + self.errors
    }

    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Published => self.published += 1,
            JobOutcome::Deferred => self.deferred += 1,
            JobOutcome::Retrying => self.retrying += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct PublishWorker {
    db: Arc<Database>,
    publisher: Arc<dyn Publisher>,
    limiter: ConcurrencyLimiter,
    config: PublishingConfig,
    events: EventBus,
}

impl PublishWorker {
    pub fn new(
        db: Arc<Database>,
        publisher: Arc<dyn Publisher>,
        config: PublishingConfig,
        events: EventBus,
    ) -> Self {
        let limiter =
            ConcurrencyLimiter::new(config.max_concurrent_per_workspace, config.throttle_window);
        Self {
            db,
            publisher,
            limiter,
            config,
            events,
        }
    }

    /// Dispatch every row due at `now`, concurrently
    pub async fn run_due(&self, now: i64) -> Result<DispatchSummary> {
        let expired = self.limiter.cleanup_expired(&self.db, now).await?;
        if expired > 0 {
            debug!("Dropped {} expired throttle slot(s)", expired);
        }

        let stale = self.db.release_stale_claims(now).await?;
        if stale > 0 {
            warn!("Returned {} abandoned publishing row(s) to the queue", stale);
        }

        let due = self
            .db
            .get_due_scheduled_posts(now, self.config.batch_size)
            .await?;
        let mut summary = DispatchSummary::default();
        if due.is_empty() {
            return Ok(summary);
        }

        info!(
            "Dispatching {} due post(s) via {}",
            due.len(),
            self.publisher.name()
        );

        let results = join_all(due.iter().map(|row| self.process(row, now))).await;
        for (row, result) in due.iter().zip(results) {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(scheduled_post_id = %row.id, "Publish job failed: {}", e);
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Run one job through the throttle
    pub async fn process(&self, row: &ScheduledPost, now: i64) -> Result<JobOutcome> {
        let key = workspace_key(&row.workspace_id);

        let permit = match self.limiter.try_acquire(&self.db, &key, now).await? {
            Admission::Granted(permit) => permit,
            Admission::Denied => {
                let available_at = now + self.config.release_delay;
                self.db.defer_scheduled_post(&row.id, available_at).await?;
                info!(
                    scheduled_post_id = %row.id,
                    workspace_id = %row.workspace_id,
                    "Workspace at {} concurrent jobs, retrying in {}s",
                    self.limiter.limit(),
                    self.config.release_delay
                );
                self.events.emit(Event::JobDeferred {
                    scheduled_post_id: row.id.clone(),
                    workspace_id: row.workspace_id.clone(),
                    available_at,
                });
                return Ok(JobOutcome::Deferred);
            }
        };

        let outcome = self.run_admitted(row, now).await;

        if let Err(e) = self.limiter.release(&self.db, &permit).await {
            // The slot expires on its own after the throttle window
            warn!(permit_id = %permit.id, "Failed to release throttle slot: {}", e);
        }

        outcome
    }

    async fn run_admitted(&self, row: &ScheduledPost, now: i64) -> Result<JobOutcome> {
        let lease_until = now + self.config.throttle_window;
        if !self.db.claim_scheduled_post(&row.id, now, lease_until).await? {
            debug!(scheduled_post_id = %row.id, "Row no longer pending, skipping");
            return Ok(JobOutcome::Skipped);
        }

        let mut claimed = row.clone();
        claimed.status = ScheduleStatus::Publishing;
        claimed.attempts += 1;

        let Some(publication) = self.db.get_publication(&row.publication_id).await? else {
            self.db
                .record_scheduled_post_failure(&row.id, "Publication no longer exists", None, now)
                .await?;
            return Ok(JobOutcome::Failed);
        };

        match self.publisher.publish(&publication, &claimed).await {
            Ok(platform_post_id) => {
                self.db
                    .mark_scheduled_post_posted(&row.id, &platform_post_id, now)
                    .await?;
                info!(
                    scheduled_post_id = %row.id,
                    platform = %row.platform,
                    platform_post_id = %platform_post_id,
                    "Published"
                );
                self.events.emit(Event::PostPublished {
                    scheduled_post_id: row.id.clone(),
                    publication_id: row.publication_id.clone(),
                    platform: row.platform.clone(),
                    platform_post_id,
                });
                self.refresh_publication(&row.publication_id, now).await?;
                Ok(JobOutcome::Published)
            }
            Err(e) => {
                let will_retry = is_retryable(&e) && claimed.attempts < self.config.max_attempts;
                let retry_at = will_retry.then(|| now + self.config.retry_delay);
                let message = e.to_string();

                self.db
                    .record_scheduled_post_failure(&row.id, &message, retry_at, now)
                    .await?;
                warn!(
                    scheduled_post_id = %row.id,
                    attempt = claimed.attempts,
                    will_retry,
                    "Publish failed: {}",
                    message
                );
                self.events.emit(Event::PublishFailed {
                    scheduled_post_id: row.id.clone(),
                    publication_id: row.publication_id.clone(),
                    error: message,
                    will_retry,
                });

                if will_retry {
                    Ok(JobOutcome::Retrying)
                } else {
                    self.refresh_publication(&row.publication_id, now).await?;
                    Ok(JobOutcome::Failed)
                }
            }
        }
    }

    /// Settle the publication once none of its rows is pending or in flight
    ///
    /// Any posted row makes it `published`; all rows failed makes it `failed`.
    async fn refresh_publication(&self, publication_id: &str, now: i64) -> Result<()> {
        let counts = self.db.schedule_status_counts(publication_id).await?;
        let count = |status: ScheduleStatus| counts.get(&status).copied().unwrap_or(0);

        if count(ScheduleStatus::Pending) + count(ScheduleStatus::Publishing) > 0 {
            return Ok(());
        }

        let next = if count(ScheduleStatus::Posted) > 0 {
            PublicationStatus::Published
        } else if count(ScheduleStatus::Failed) > 0 {
            PublicationStatus::Failed
        } else {
            return Ok(());
        };

        let Some(publication) = self.db.get_publication(publication_id).await? else {
            return Ok(());
        };

        if !matches!(
            publication.status,
            PublicationStatus::Scheduled | PublicationStatus::Approved
        ) {
            return Ok(());
        }

        self.db.update_publication_status(publication_id, next).await?;
        self.db
            .record_activity(&ActivityEntry {
                id: None,
                publication_id: publication_id.to_string(),
                user_id: None,
                action: ACTION_STATUS_CHANGED.to_string(),
                from_status: Some(publication.status.as_str().to_string()),
                to_status: Some(next.as_str().to_string()),
                created_at: now,
            })
            .await?;

        info!(publication_id = %publication_id, "Publication {}", next);
        self.events.emit(Event::StatusChanged {
            publication_id: publication_id.to_string(),
            from: publication.status,
            to: next,
        });

        Ok(())
    }
}

/// Credentials and content rejections will not fix themselves
fn is_retryable(error: &PostdeckError) -> bool {
    !matches!(
        error,
        PostdeckError::Publish(PublishError::Authentication(_))
            | PostdeckError::Publish(PublishError::Rejected(_))
            | PostdeckError::InvalidInput(_)
    )
}
