//! Scheduling service
//!
//! Entry point for changing where and when a publication goes out. Every call
//! runs reconciliation and status projection inside one SQLite transaction,
//! serialized per publication so a double-submit from the UI cannot interleave
//! two read-then-write passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use super::events::{Event, EventBus};
use crate::db;
use crate::error::{DbError, PostdeckError, Result};
use crate::scheduling::{self, ReconcileReport, ScheduleRequest};
use crate::types::{Actor, PublicationStatus};
use crate::Database;

/// One async mutex per publication ID
///
/// Entries nobody holds are pruned on the next lock call.
#[derive(Clone, Default)]
pub struct PublicationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl PublicationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, publication_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(publication_id.to_string())
                .or_default()
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Publications with a live lock entry
    pub fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Result of a scheduling call
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub report: ReconcileReport,
    /// Publication status after the call
    pub status: PublicationStatus,
    pub status_changed: bool,
}

#[derive(Clone)]
pub struct SchedulingService {
    db: Arc<Database>,
    events: EventBus,
    locks: PublicationLocks,
}

impl SchedulingService {
    pub fn new(db: Arc<Database>, events: EventBus) -> Self {
        Self {
            db,
            events,
            locks: PublicationLocks::new(),
        }
    }

    /// Reconcile the schedule rows of a publication and project its status
    ///
    /// # Errors
    ///
    /// `NotFound` when the publication does not exist in the actor's
    /// workspace; database errors propagate and roll the whole call back.
    pub async fn schedule(
        &self,
        publication_id: &str,
        request: &ScheduleRequest,
        actor: &Actor,
    ) -> Result<ScheduleOutcome> {
        self.apply(publication_id, None, request, actor).await
    }

    /// Change the global schedule time, then reconcile against `request`
    pub async fn set_publication_time(
        &self,
        publication_id: &str,
        scheduled_at: Option<i64>,
        request: &ScheduleRequest,
        actor: &Actor,
    ) -> Result<ScheduleOutcome> {
        self.apply(publication_id, Some(scheduled_at), request, actor)
            .await
    }

    /// Run only the status projection
    pub async fn project(
        &self,
        publication_id: &str,
        actor: &Actor,
    ) -> Result<Option<PublicationStatus>> {
        let _guard = self.locks.lock(publication_id).await;
        let now = db::now();

        let mut tx = self.db.begin().await?;
        let publication = db::fetch_publication(&mut tx, publication_id)
            .await?
            .filter(|p| p.workspace_id == actor.workspace_id)
            .ok_or_else(|| not_found(publication_id))?;

        let changed = scheduling::project_status(&mut tx, &publication, actor, now).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        if let Some(to) = changed {
            self.events.emit(Event::StatusChanged {
                publication_id: publication.id.clone(),
                from: publication.status,
                to,
            });
        }

        Ok(changed)
    }

    async fn apply(
        &self,
        publication_id: &str,
        new_time: Option<Option<i64>>,
        request: &ScheduleRequest,
        actor: &Actor,
    ) -> Result<ScheduleOutcome> {
        let _guard = self.locks.lock(publication_id).await;
        let now = db::now();

        let mut tx = self.db.begin().await?;

        if !db::touch_publication(&mut tx, publication_id, now).await? {
            return Err(not_found(publication_id));
        }

        if let Some(scheduled_at) = new_time {
            db::set_publication_scheduled_at(&mut tx, publication_id, scheduled_at, now).await?;
        }

        let publication = db::fetch_publication(&mut tx, publication_id)
            .await?
            .filter(|p| p.workspace_id == actor.workspace_id)
            .ok_or_else(|| not_found(publication_id))?;

        let report = scheduling::reconcile(&mut tx, &publication, request, actor, now).await?;
        let changed = scheduling::project_status(&mut tx, &publication, actor, now).await?;

        tx.commit().await.map_err(DbError::SqlxError)?;

        info!(
            publication_id = %publication.id,
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            skipped = report.skipped.len(),
            "Schedule reconciled"
        );

        self.events.emit(Event::ScheduleReconciled {
            publication_id: publication.id.clone(),
            created: report.created.len(),
            updated: report.updated.len(),
            deleted: report.deleted.len(),
            skipped: report.skipped.len(),
        });

        for account_id in &report.unknown_accounts {
            self.events.emit(Event::UnknownAccount {
                publication_id: publication.id.clone(),
                account_id: account_id.clone(),
            });
        }

        if let Some(to) = changed {
            info!(
                publication_id = %publication.id,
                from = %publication.status,
                to = %to,
                "Publication status changed"
            );
            self.events.emit(Event::StatusChanged {
                publication_id: publication.id.clone(),
                from: publication.status,
                to,
            });
        }

        Ok(ScheduleOutcome {
            report,
            status: changed.unwrap_or(publication.status),
            status_changed: changed.is_some(),
        })
    }
}

fn not_found(publication_id: &str) -> PostdeckError {
    PostdeckError::NotFound(format!("publication {}", publication_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::setup_test_db;
    use crate::types::Publication;
    use std::time::Duration;

    async fn setup() -> (tempfile::TempDir, Arc<Database>, SchedulingService, EventBus) {
        let (temp, db) = setup_test_db().await;
        let db = Arc::new(db);
        let events = EventBus::new(100);
        let service = SchedulingService::new(Arc::clone(&db), events.clone());
        (temp, db, service, events)
    }

    #[tokio::test]
    async fn test_missing_publication_is_not_found() {
        let (_temp, _db, service, _events) = setup().await;
        let result = service
            .schedule("missing", &ScheduleRequest::new(["a1"]), &Actor::new("u", "ws-1"))
            .await;
        assert!(matches!(result, Err(PostdeckError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_foreign_workspace_is_not_found_and_rolled_back() {
        let (_temp, db, service, _events) = setup().await;
        let mut publication = Publication::new("ws-1".into(), "Launch".into(), String::new());
        publication.scheduled_at = Some(5_000);
        db.create_publication(&publication).await.unwrap();

        let result = service
            .set_publication_time(
                &publication.id,
                None,
                &ScheduleRequest::new(["a1"]),
                &Actor::new("intruder", "ws-2"),
            )
            .await;
        assert!(matches!(result, Err(PostdeckError::NotFound(_))));

        let stored = db.get_publication(&publication.id).await.unwrap().unwrap();
        assert_eq!(stored.scheduled_at, Some(5_000), "time change must roll back");
        assert!(db.list_scheduled_posts(&publication.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emits_events() {
        let (_temp, db, service, events) = setup().await;
        let mut receiver = events.subscribe();
        let mut publication = Publication::new("ws-1".into(), "Launch".into(), String::new());
        publication.scheduled_at = Some(5_000);
        db.create_publication(&publication).await.unwrap();

        let outcome = service
            .schedule(&publication.id, &ScheduleRequest::new(["ghost"]), &Actor::new("u", "ws-1"))
            .await
            .unwrap();
        assert!(outcome.status_changed);
        assert_eq!(outcome.status, PublicationStatus::Scheduled);

        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::ScheduleReconciled { created: 1, .. }
        ));
        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::UnknownAccount { ref account_id, .. } if account_id == "ghost"
        ));
        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::StatusChanged {
                from: PublicationStatus::Draft,
                to: PublicationStatus::Scheduled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_double_submit_keeps_one_row() {
        let (_temp, db, service, _events) = setup().await;
        let mut publication = Publication::new("ws-1".into(), "Launch".into(), String::new());
        publication.scheduled_at = Some(5_000);
        db.create_publication(&publication).await.unwrap();

        let actor = Actor::new("u", "ws-1");
        let request = ScheduleRequest::new(["a1", "a2"]);
        let calls = (0..5).map(|_| service.schedule(&publication.id, &request, &actor));
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        let rows = db.list_scheduled_posts(&publication.id).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_locks_serialize_same_publication() {
        let locks = PublicationLocks::new();
        let guard = locks.lock("pub-1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("pub-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished(), "second lock must wait");

        // A different publication is not blocked
        let _other = locks.lock("pub-2").await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_prune_idle_entries() {
        let locks = PublicationLocks::new();
        drop(locks.lock("pub-1").await);
        drop(locks.lock("pub-2").await);
        let _held = locks.lock("pub-3").await;
        assert_eq!(locks.tracked(), 1);
    }
}
