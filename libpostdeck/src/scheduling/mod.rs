//! Schedule reconciliation and publication status projection
//!
//! [`reconcile`] makes the pending schedule rows of a publication match the
//! accounts a user currently selected; [`project_status`] then moves the
//! publication between `draft` and `scheduled`. Both run on a caller-supplied
//! connection so the caller can wrap them in one transaction, which is what
//! [`SchedulingService`](crate::service::scheduling::SchedulingService) does.

pub mod parse;

pub use parse::parse_schedule;

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

use crate::db;
use crate::error::Result;
use crate::types::{
    ActivityEntry, Actor, Publication, PublicationStatus, ScheduleStatus, ScheduledPost,
    UNKNOWN_ACCOUNT_NAME, UNKNOWN_PLATFORM,
};

/// Activity action recorded when the projector schedules a draft
pub const ACTION_STATUS_CHANGED: &str = "status_changed";

/// Desired schedule for a publication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Complete set of accounts the publication should be scheduled on.
    /// Empty means "no accounts".
    pub account_ids: BTreeSet<String>,
    /// Per-account times that take precedence over the publication's global time
    pub overrides: HashMap<String, i64>,
}

impl ScheduleRequest {
    pub fn new<I, S>(account_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            account_ids: account_ids.into_iter().map(Into::into).collect(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, account_id: impl Into<String>, scheduled_at: i64) -> Self {
        self.overrides.insert(account_id.into(), scheduled_at);
        self
    }

    /// Override time if present, else the publication's global time
    pub fn effective_time(&self, account_id: &str, publication: &Publication) -> Option<i64> {
        self.overrides
            .get(account_id)
            .copied()
            .or(publication.scheduled_at)
    }
}

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Desired accounts with neither an override nor a global time
    pub skipped: Vec<String>,
    /// Desired accounts missing from the account directory
    pub unknown_accounts: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Synchronize the pending schedule rows of `publication` with `request`
///
/// After the call the pending rows are exactly one per desired account that
/// has a resolvable time. Rows in any other status are left alone. Unknown
/// accounts still get a row, snapshotted as `Unknown` / `unknown`.
pub async fn reconcile(
    conn: &mut SqliteConnection,
    publication: &Publication,
    request: &ScheduleRequest,
    actor: &Actor,
    now: i64,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let desired: Vec<String> = request.account_ids.iter().cloned().collect();
    let accounts = db::fetch_social_accounts(conn, &actor.workspace_id, &desired).await?;
    let existing = db::fetch_pending_scheduled_posts(conn, &publication.id).await?;

    // First pending row per account wins; any duplicate falls to the removal pass.
    let mut existing_by_account: HashMap<&str, &ScheduledPost> = HashMap::new();
    for row in &existing {
        existing_by_account
            .entry(row.social_account_id.as_str())
            .or_insert(row);
    }

    let mut kept: HashSet<String> = HashSet::new();

    for account_id in &request.account_ids {
        let Some(scheduled_at) = request.effective_time(account_id, publication) else {
            debug!(
                publication_id = %publication.id,
                account_id = %account_id,
                "No schedule time for account, skipping"
            );
            report.skipped.push(account_id.clone());
            continue;
        };

        let (account_name, platform) = match accounts.get(account_id) {
            Some(account) => (account.name.as_str(), account.platform.as_str()),
            None => {
                warn!(
                    publication_id = %publication.id,
                    account_id = %account_id,
                    "Scheduling for unknown social account"
                );
                report.unknown_accounts.push(account_id.clone());
                (UNKNOWN_ACCOUNT_NAME, UNKNOWN_PLATFORM)
            }
        };

        match existing_by_account.get(account_id.as_str()) {
            Some(row) => {
                db::update_pending_scheduled_post(
                    conn,
                    &row.id,
                    scheduled_at,
                    account_name,
                    platform,
                    now,
                )
                .await?;
                kept.insert(row.id.clone());
                report.updated.push(row.id.clone());
            }
            None => {
                let row = ScheduledPost {
                    id: uuid::Uuid::new_v4().to_string(),
                    publication_id: publication.id.clone(),
                    social_account_id: account_id.clone(),
                    account_name: account_name.to_string(),
                    platform: platform.to_string(),
                    scheduled_at,
                    status: ScheduleStatus::Pending,
                    user_id: actor.user_id.clone(),
                    workspace_id: actor.workspace_id.clone(),
                    available_at: 0,
                    attempts: 0,
                    platform_post_id: None,
                    error_message: None,
                    posted_at: None,
                    created_at: now,
                    updated_at: now,
                };
                db::insert_scheduled_post(conn, &row).await?;
                kept.insert(row.id.clone());
                report.created.push(row.id);
            }
        }
    }

    for row in &existing {
        if !kept.contains(&row.id) {
            db::delete_pending_scheduled_post(conn, &row.id).await?;
            report.deleted.push(row.id.clone());
        }
    }

    Ok(report)
}

/// Move the publication between `draft` and `scheduled`
///
/// Returns the new status when it changed. Other statuses (`approved`,
/// `published`, `failed`) are never touched.
pub async fn project_status(
    conn: &mut SqliteConnection,
    publication: &Publication,
    actor: &Actor,
    now: i64,
) -> Result<Option<PublicationStatus>> {
    let has_pending = db::count_pending_scheduled_posts(conn, &publication.id).await? > 0;
    let has_global_time = publication.scheduled_at.is_some();

    let next = match publication.status {
        PublicationStatus::Scheduled if !has_pending && !has_global_time => PublicationStatus::Draft,
        PublicationStatus::Draft if has_pending || has_global_time => PublicationStatus::Scheduled,
        _ => return Ok(None),
    };

    db::set_publication_status(conn, &publication.id, next, now).await?;

    if next == PublicationStatus::Scheduled {
        db::insert_activity(
            conn,
            &ActivityEntry {
                id: None,
                publication_id: publication.id.clone(),
                user_id: Some(actor.user_id.clone()),
                action: ACTION_STATUS_CHANGED.to_string(),
                from_status: Some(publication.status.as_str().to_string()),
                to_status: Some(next.as_str().to_string()),
                created_at: now,
            },
        )
        .await?;
    }

    debug!(
        publication_id = %publication.id,
        from = %publication.status,
        to = %next,
        "Publication status projected"
    );

    Ok(Some(next))
}
