//! Database operations for Postdeck
//!
//! [`Database`] wraps the SQLite pool. Statements that must run inside a
//! caller's transaction (the reconciler and the status projector) live as free
//! functions taking a `&mut SqliteConnection`, so they work the same on a
//! pooled connection and on a `Transaction`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};

use crate::error::{DbError, Result};
use crate::types::{
    ActivityEntry, Publication, PublicationStatus, ScheduleStatus, ScheduledPost, SocialAccount,
};

const PUBLICATION_COLUMNS: &str =
    "id, workspace_id, title, content, status, scheduled_at, created_at, updated_at";

const SCHEDULED_POST_COLUMNS: &str = "id, publication_id, social_account_id, account_name, \
     platform, scheduled_at, status, user_id, workspace_id, available_at, attempts, \
     platform_post_id, error_message, posted_at, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work for SQLite URLs on both Windows and Unix
        let db_url = format!("sqlite://{}", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction on the pool
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await.map_err(DbError::SqlxError)?)
    }

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    pub async fn create_publication(&self, publication: &Publication) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publications (id, workspace_id, title, content, status, scheduled_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&publication.id)
        .bind(&publication.workspace_id)
        .bind(&publication.title)
        .bind(&publication.content)
        .bind(publication.status.as_str())
        .bind(publication.scheduled_at)
        .bind(publication.created_at)
        .bind(publication.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_publication(&self, publication_id: &str) -> Result<Option<Publication>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        fetch_publication(&mut conn, publication_id).await
    }

    pub async fn list_publications(&self, workspace_id: &str) -> Result<Vec<Publication>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM publications WHERE workspace_id = ? ORDER BY created_at DESC",
            PUBLICATION_COLUMNS
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(publication_from_row).collect()
    }

    /// Set a publication's status unconditionally
    ///
    /// Used by flows outside scheduling (approval, publishing).
    pub async fn update_publication_status(
        &self,
        publication_id: &str,
        status: PublicationStatus,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        set_publication_status(&mut conn, publication_id, status, now()).await
    }

    // ------------------------------------------------------------------
    // Social accounts
    // ------------------------------------------------------------------

    pub async fn create_social_account(&self, account: &SocialAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO social_accounts (id, workspace_id, name, platform, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.workspace_id)
        .bind(&account.name)
        .bind(&account.platform)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn list_social_accounts(&self, workspace_id: &str) -> Result<Vec<SocialAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workspace_id, name, platform, created_at
            FROM social_accounts WHERE workspace_id = ?
            ORDER BY name
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(social_account_from_row).collect())
    }

    /// Bulk lookup by ID within a workspace
    ///
    /// Unknown IDs and accounts of other workspaces are absent from the map.
    pub async fn get_social_accounts(
        &self,
        workspace_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, SocialAccount>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        fetch_social_accounts(&mut conn, workspace_id, ids).await
    }

    // ------------------------------------------------------------------
    // Schedule rows
    // ------------------------------------------------------------------

    /// Insert a schedule row as-is, whatever its status
    pub async fn create_scheduled_post(&self, post: &ScheduledPost) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        insert_scheduled_post(&mut conn, post).await
    }

    pub async fn get_scheduled_post(&self, id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_posts WHERE id = ?",
            SCHEDULED_POST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(scheduled_post_from_row).transpose()
    }

    /// All schedule rows of a publication, any status
    pub async fn list_scheduled_posts(&self, publication_id: &str) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduled_posts WHERE publication_id = ? ORDER BY scheduled_at, account_name",
            SCHEDULED_POST_COLUMNS
        ))
        .bind(publication_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(scheduled_post_from_row).collect()
    }

    /// Pending rows whose time has come and that are not deferred
    pub async fn get_due_scheduled_posts(&self, now: i64, limit: usize) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'pending' AND scheduled_at <= ? AND available_at <= ?
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
            SCHEDULED_POST_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(scheduled_post_from_row).collect()
    }

    /// Atomically move a row from `pending` to `publishing`
    ///
    /// The claim is a lease: `available_at` is set to `lease_until`, after
    /// which [`Database::release_stale_claims`] hands the row back to the
    /// queue. Returns false when the row is gone or no longer pending.
    pub async fn claim_scheduled_post(&self, id: &str, now: i64, lease_until: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', attempts = attempts + 1, available_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(lease_until)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Return `publishing` rows whose claim lease ran out to `pending`
    ///
    /// A worker that died between claim and result leaves such rows behind.
    /// They become due again immediately; their attempt count is kept.
    pub async fn release_stale_claims(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = 'pending', updated_at = ?
            WHERE status = 'publishing' AND available_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    /// Push a pending row back so workers skip it until `available_at`
    pub async fn defer_scheduled_post(&self, id: &str, available_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts SET available_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(available_at)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn mark_scheduled_post_posted(
        &self,
        id: &str,
        platform_post_id: &str,
        posted_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'posted', platform_post_id = ?, posted_at = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(platform_post_id)
        .bind(posted_at)
        .bind(posted_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record a failed publish attempt
    ///
    /// With `retry_at` the row goes back to `pending` and becomes available
    /// again at that time; without it the row is marked `failed` for good.
    pub async fn record_scheduled_post_failure(
        &self,
        id: &str,
        error_message: &str,
        retry_at: Option<i64>,
        now: i64,
    ) -> Result<()> {
        let query = match retry_at {
            Some(_) => {
                r#"
                UPDATE scheduled_posts
                SET status = 'pending', error_message = ?, available_at = ?, updated_at = ?
                WHERE id = ?
                "#
            }
            None => {
                r#"
                UPDATE scheduled_posts
                SET status = 'failed', error_message = ?, available_at = COALESCE(?, available_at), updated_at = ?
                WHERE id = ?
                "#
            }
        };

        sqlx::query(query)
            .bind(error_message)
            .bind(retry_at)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Counts of a publication's rows per schedule status
    pub async fn schedule_status_counts(
        &self,
        publication_id: &str,
    ) -> Result<HashMap<ScheduleStatus, u32>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total FROM scheduled_posts
            WHERE publication_id = ?
            GROUP BY status
            "#,
        )
        .bind(publication_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: ScheduleStatus = row.get::<String, _>("status").parse()?;
            counts.insert(status, row.get::<i64, _>("total") as u32);
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    pub async fn record_activity(&self, entry: &ActivityEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        insert_activity(&mut conn, entry).await
    }

    pub async fn get_activities(&self, publication_id: &str) -> Result<Vec<ActivityEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, publication_id, user_id, action, from_status, to_status, created_at
            FROM publication_activities
            WHERE publication_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(publication_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ActivityEntry {
                id: r.get("id"),
                publication_id: r.get("publication_id"),
                user_id: r.get("user_id"),
                action: r.get("action"),
                from_status: r.get("from_status"),
                to_status: r.get("to_status"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ----------------------------------------------------------------------
// Connection-level statements, usable inside a transaction
// ----------------------------------------------------------------------

pub(crate) async fn fetch_publication(
    conn: &mut SqliteConnection,
    publication_id: &str,
) -> Result<Option<Publication>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM publications WHERE id = ?",
        PUBLICATION_COLUMNS
    ))
    .bind(publication_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    row.as_ref().map(publication_from_row).transpose()
}

/// Bump `updated_at`; false when the publication does not exist
///
/// Issued first in a scheduling transaction so SQLite takes the write lock
/// up front instead of upgrading a read lock later.
pub(crate) async fn touch_publication(
    conn: &mut SqliteConnection,
    publication_id: &str,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query("UPDATE publications SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(publication_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_publication_status(
    conn: &mut SqliteConnection,
    publication_id: &str,
    status: PublicationStatus,
    now: i64,
) -> Result<()> {
    sqlx::query("UPDATE publications SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(publication_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

pub(crate) async fn set_publication_scheduled_at(
    conn: &mut SqliteConnection,
    publication_id: &str,
    scheduled_at: Option<i64>,
    now: i64,
) -> Result<()> {
    sqlx::query("UPDATE publications SET scheduled_at = ?, updated_at = ? WHERE id = ?")
        .bind(scheduled_at)
        .bind(now)
        .bind(publication_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

pub(crate) async fn fetch_social_accounts(
    conn: &mut SqliteConnection,
    workspace_id: &str,
    ids: &[String],
) -> Result<HashMap<String, SocialAccount>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let query_str = format!(
        "SELECT id, workspace_id, name, platform, created_at FROM social_accounts \
         WHERE workspace_id = ? AND id IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&query_str).bind(workspace_id);
    for id in ids {
        query = query.bind(id);
    }

    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(rows
        .iter()
        .map(social_account_from_row)
        .map(|account| (account.id.clone(), account))
        .collect())
}

pub(crate) async fn fetch_pending_scheduled_posts(
    conn: &mut SqliteConnection,
    publication_id: &str,
) -> Result<Vec<ScheduledPost>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM scheduled_posts WHERE publication_id = ? AND status = 'pending' ORDER BY created_at",
        SCHEDULED_POST_COLUMNS
    ))
    .bind(publication_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    rows.iter().map(scheduled_post_from_row).collect()
}

pub(crate) async fn count_pending_scheduled_posts(
    conn: &mut SqliteConnection,
    publication_id: &str,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM scheduled_posts WHERE publication_id = ? AND status = 'pending'",
    )
    .bind(publication_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(count)
}

pub(crate) async fn insert_scheduled_post(
    conn: &mut SqliteConnection,
    post: &ScheduledPost,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scheduled_posts (
            id, publication_id, social_account_id, account_name, platform, scheduled_at,
            status, user_id, workspace_id, available_at, attempts, platform_post_id,
            error_message, posted_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&post.id)
    .bind(&post.publication_id)
    .bind(&post.social_account_id)
    .bind(&post.account_name)
    .bind(&post.platform)
    .bind(post.scheduled_at)
    .bind(post.status.as_str())
    .bind(&post.user_id)
    .bind(&post.workspace_id)
    .bind(post.available_at)
    .bind(post.attempts as i64)
    .bind(&post.platform_post_id)
    .bind(&post.error_message)
    .bind(post.posted_at)
    .bind(post.created_at)
    .bind(post.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(())
}

/// Update time and account snapshot of a row, only while it is pending
pub(crate) async fn update_pending_scheduled_post(
    conn: &mut SqliteConnection,
    id: &str,
    scheduled_at: i64,
    account_name: &str,
    platform: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scheduled_posts
        SET scheduled_at = ?, account_name = ?, platform = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(scheduled_at)
    .bind(account_name)
    .bind(platform)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(())
}

pub(crate) async fn delete_pending_scheduled_post(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM scheduled_posts WHERE id = ? AND status = 'pending'")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

pub(crate) async fn insert_activity(conn: &mut SqliteConnection, entry: &ActivityEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO publication_activities (publication_id, user_id, action, from_status, to_status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.publication_id)
    .bind(&entry.user_id)
    .bind(&entry.action)
    .bind(&entry.from_status)
    .bind(&entry.to_status)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(())
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn publication_from_row(r: &SqliteRow) -> Result<Publication> {
    Ok(Publication {
        id: r.get("id"),
        workspace_id: r.get("workspace_id"),
        title: r.get("title"),
        content: r.get("content"),
        status: r.get::<String, _>("status").parse()?,
        scheduled_at: r.get("scheduled_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn scheduled_post_from_row(r: &SqliteRow) -> Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: r.get("id"),
        publication_id: r.get("publication_id"),
        social_account_id: r.get("social_account_id"),
        account_name: r.get("account_name"),
        platform: r.get("platform"),
        scheduled_at: r.get("scheduled_at"),
        status: r.get::<String, _>("status").parse()?,
        user_id: r.get("user_id"),
        workspace_id: r.get("workspace_id"),
        available_at: r.get("available_at"),
        attempts: r.get::<i64, _>("attempts") as u32,
        platform_post_id: r.get("platform_post_id"),
        error_message: r.get("error_message"),
        posted_at: r.get("posted_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

fn social_account_from_row(r: &SqliteRow) -> SocialAccount {
    SocialAccount {
        id: r.get("id"),
        workspace_id: r.get("workspace_id"),
        name: r.get("name"),
        platform: r.get("platform"),
        created_at: r.get("created_at"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PostdeckError;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        (temp_dir, db)
    }

    pub(crate) fn test_row(publication_id: &str, account_id: &str, status: ScheduleStatus) -> ScheduledPost {
        let now = now();
        ScheduledPost {
            id: uuid::Uuid::new_v4().to_string(),
            publication_id: publication_id.to_string(),
            social_account_id: account_id.to_string(),
            account_name: format!("Account {}", account_id),
            platform: "facebook".to_string(),
            scheduled_at: now - 60,
            status,
            user_id: "user-1".to_string(),
            workspace_id: "ws-1".to_string(),
            available_at: 0,
            attempts: 0,
            platform_post_id: None,
            error_message: None,
            posted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn create_test_publication(db: &Database) -> Publication {
        let publication = Publication::new("ws-1".into(), "Spring launch".into(), "Body".into());
        db.create_publication(&publication).await.unwrap();
        publication
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(PostdeckError::Database(_))));
    }

    #[tokio::test]
    async fn test_create_and_get_publication() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;

        let loaded = db.get_publication(&publication.id).await.unwrap().unwrap();
        assert_eq!(loaded, publication);

        assert!(db.get_publication("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_publication_status_rejected_by_schema() {
        let (_temp, db) = setup_test_db().await;

        let result = sqlx::query(
            "INSERT INTO publications (id, workspace_id, title, status, created_at, updated_at) VALUES ('p', 'w', 't', 'archived', 0, 0)",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "CHECK constraint should reject unknown status");
    }

    #[tokio::test]
    async fn test_schedule_row_requires_existing_publication() {
        let (_temp, db) = setup_test_db().await;
        let row = test_row("nonexistent", "acc-1", ScheduleStatus::Pending);

        let result = db.create_scheduled_post(&row).await;
        match result {
            Err(PostdeckError::Database(DbError::SqlxError(sqlx::Error::Database(db_err)))) => {
                let message = db_err.message();
                assert!(
                    message.contains("FOREIGN KEY") || message.contains("foreign key"),
                    "Expected foreign key error, got: {}",
                    message
                );
            }
            other => panic!("Expected foreign key violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bulk_account_lookup_skips_unknown() {
        let (_temp, db) = setup_test_db().await;
        let page = SocialAccount::new("ws-1".into(), "Acme Page".into(), "facebook".into());
        let channel = SocialAccount::new("ws-1".into(), "Acme TV".into(), "youtube".into());
        db.create_social_account(&page).await.unwrap();
        db.create_social_account(&channel).await.unwrap();

        let ids = vec![page.id.clone(), "ghost".to_string(), channel.id.clone()];
        let found = db.get_social_accounts("ws-1", &ids).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[&page.id].platform, "facebook");
        assert_eq!(found[&channel.id].name, "Acme TV");
        assert!(!found.contains_key("ghost"));

        assert!(db.get_social_accounts("ws-1", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_account_lookup_is_workspace_scoped() {
        let (_temp, db) = setup_test_db().await;
        let rival = SocialAccount::new("ws-2".into(), "Rival Page".into(), "facebook".into());
        db.create_social_account(&rival).await.unwrap();

        let ids = vec![rival.id.clone()];
        assert!(db.get_social_accounts("ws-1", &ids).await.unwrap().is_empty());
        assert_eq!(db.get_social_accounts("ws-2", &ids).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_posts_respect_time_and_deferral() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        let now = now();

        let due = test_row(&publication.id, "acc-1", ScheduleStatus::Pending);
        let mut future = test_row(&publication.id, "acc-2", ScheduleStatus::Pending);
        future.scheduled_at = now + 3600;
        let mut deferred = test_row(&publication.id, "acc-3", ScheduleStatus::Pending);
        deferred.available_at = now + 30;
        let posted = test_row(&publication.id, "acc-4", ScheduleStatus::Posted);

        for row in [&due, &future, &deferred, &posted] {
            db.create_scheduled_post(row).await.unwrap();
        }

        let found = db.get_due_scheduled_posts(now, 100).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);

        let later = db.get_due_scheduled_posts(now + 31, 100).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        let row = test_row(&publication.id, "acc-1", ScheduleStatus::Pending);
        db.create_scheduled_post(&row).await.unwrap();

        let (first, second) = tokio::join!(
            db.claim_scheduled_post(&row.id, now(), now() + 60),
            db.claim_scheduled_post(&row.id, now(), now() + 60)
        );
        let claims = [first.unwrap(), second.unwrap()];
        assert_eq!(claims.iter().filter(|c| **c).count(), 1);

        let stored = db.get_scheduled_post(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduleStatus::Publishing);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_stale_claims_return_to_queue() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        let now = now();
        let row = test_row(&publication.id, "acc-1", ScheduleStatus::Pending);
        db.create_scheduled_post(&row).await.unwrap();
        assert!(db.claim_scheduled_post(&row.id, now, now + 60).await.unwrap());

        // Lease still running: the row stays claimed and is not due
        assert_eq!(db.release_stale_claims(now + 59).await.unwrap(), 0);
        assert!(db.get_due_scheduled_posts(now + 59, 100).await.unwrap().is_empty());

        assert_eq!(db.release_stale_claims(now + 60).await.unwrap(), 1);
        let stored = db.get_scheduled_post(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduleStatus::Pending);
        assert_eq!(stored.attempts, 1);

        let due = db.get_due_scheduled_posts(now + 60, 100).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, row.id);
    }

    #[tokio::test]
    async fn test_failure_with_and_without_retry() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        let row = test_row(&publication.id, "acc-1", ScheduleStatus::Publishing);
        db.create_scheduled_post(&row).await.unwrap();
        let now = now();

        db.record_scheduled_post_failure(&row.id, "timeout", Some(now + 300), now)
            .await
            .unwrap();
        let stored = db.get_scheduled_post(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduleStatus::Pending);
        assert_eq!(stored.available_at, now + 300);
        assert_eq!(stored.error_message.as_deref(), Some("timeout"));

        db.record_scheduled_post_failure(&row.id, "rejected", None, now)
            .await
            .unwrap();
        let stored = db.get_scheduled_post(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScheduleStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn test_pending_only_statements_leave_terminal_rows() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        let posted = test_row(&publication.id, "acc-1", ScheduleStatus::Posted);
        db.create_scheduled_post(&posted).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        update_pending_scheduled_post(&mut conn, &posted.id, 1, "Renamed", "youtube", now())
            .await
            .unwrap();
        delete_pending_scheduled_post(&mut conn, &posted.id).await.unwrap();
        drop(conn);

        let stored = db.get_scheduled_post(&posted.id).await.unwrap().unwrap();
        assert_eq!(stored, posted);
    }

    #[tokio::test]
    async fn test_schedule_status_counts() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;
        for (account, status) in [
            ("a", ScheduleStatus::Pending),
            ("b", ScheduleStatus::Pending),
            ("c", ScheduleStatus::Posted),
        ] {
            db.create_scheduled_post(&test_row(&publication.id, account, status))
                .await
                .unwrap();
        }

        let counts = db.schedule_status_counts(&publication.id).await.unwrap();
        assert_eq!(counts.get(&ScheduleStatus::Pending), Some(&2));
        assert_eq!(counts.get(&ScheduleStatus::Posted), Some(&1));
        assert_eq!(counts.get(&ScheduleStatus::Failed), None);
    }

    #[tokio::test]
    async fn test_activity_log_is_ordered() {
        let (_temp, db) = setup_test_db().await;
        let publication = create_test_publication(&db).await;

        for to in ["scheduled", "published"] {
            db.record_activity(&ActivityEntry {
                id: None,
                publication_id: publication.id.clone(),
                user_id: Some("user-1".into()),
                action: "status_changed".into(),
                from_status: None,
                to_status: Some(to.into()),
                created_at: now(),
            })
            .await
            .unwrap();
        }

        let log = db.get_activities(&publication.id).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].to_status.as_deref(), Some("scheduled"));
        assert_eq!(log[1].to_status.as_deref(), Some("published"));
        assert!(log[0].id.unwrap() < log[1].id.unwrap());
    }
}
