//! Concurrency throttle for publish jobs
//!
//! Caps how many publish jobs may run at once for a key (a workspace). Each
//! admitted job holds a slot row in `throttle_slots` until it releases it or
//! the slot's window runs out, so a worker that dies mid-job cannot block a
//! workspace forever.
//!
//! A denied job is not an error: the worker defers it and tries again after
//! the configured release delay.

use crate::error::{DbError, Result};
use crate::Database;

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted(Permit),
    Denied,
}

/// A held throttle slot; hand it back with [`ConcurrencyLimiter::release`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub id: String,
    pub key: String,
    pub expires_at: i64,
}

/// Throttle key for publish jobs of a workspace
pub fn workspace_key(workspace_id: &str) -> String {
    format!("publish:{}", workspace_id)
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    limit: u32,
    window_secs: i64,
}

impl ConcurrencyLimiter {
    pub fn new(limit: u32, window_secs: i64) -> Self {
        Self { limit, window_secs }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Take a slot for `key` if fewer than `limit` unexpired slots are held
    ///
    /// Count and insert happen in one statement, so two workers racing for
    /// the last slot cannot both win.
    pub async fn try_acquire(&self, db: &Database, key: &str, now: i64) -> Result<Admission> {
        let id = uuid::Uuid::new_v4().to_string();
        let expires_at = now + self.window_secs;

        let result = sqlx::query(
            r#"
            INSERT INTO throttle_slots (id, throttle_key, acquired_at, expires_at)
            SELECT ?, ?, ?, ?
            WHERE (
                SELECT COUNT(*) FROM throttle_slots
                WHERE throttle_key = ? AND expires_at > ?
            ) < ?
            "#,
        )
        .bind(&id)
        .bind(key)
        .bind(now)
        .bind(expires_at)
        .bind(key)
        .bind(now)
        .bind(self.limit as i64)
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 1 {
            Ok(Admission::Granted(Permit {
                id,
                key: key.to_string(),
                expires_at,
            }))
        } else {
            Ok(Admission::Denied)
        }
    }

    /// Free a slot once its job is done
    pub async fn release(&self, db: &Database, permit: &Permit) -> Result<()> {
        sqlx::query("DELETE FROM throttle_slots WHERE id = ?")
            .bind(&permit.id)
            .execute(db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Number of unexpired slots held for `key`
    pub async fn in_use(&self, db: &Database, key: &str, now: i64) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM throttle_slots WHERE throttle_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_one(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count as u32)
    }

    /// Drop slots whose window has passed
    pub async fn cleanup_expired(&self, db: &Database, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM throttle_slots WHERE expires_at <= ?")
            .bind(now)
            .execute(db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }
}
