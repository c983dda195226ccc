//! Core types for Postdeck

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PostdeckError;

/// Account name snapshotted onto a schedule row when the account is unknown
pub const UNKNOWN_ACCOUNT_NAME: &str = "Unknown";
/// Platform snapshotted onto a schedule row when the account is unknown
pub const UNKNOWN_PLATFORM: &str = "unknown";

/// A user-authored content item targeted at one or more social accounts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    pub id: String,
    pub workspace_id: String,
    pub title: String,
    pub content: String,
    pub status: PublicationStatus,
    /// Global schedule time, used for every account without an override
    pub scheduled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Publication {
    pub fn new(workspace_id: String, title: String, content: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            title,
            content,
            status: PublicationStatus::Draft,
            scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Draft,
    Scheduled,
    Approved,
    Published,
    Failed,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PublicationStatus {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "approved" => Ok(Self::Approved),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            other => Err(PostdeckError::InvalidInput(format!(
                "Unknown publication status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a schedule row
///
/// Only `Pending` rows are ever touched by reconciliation. `Publishing` marks a
/// row a worker has claimed; `Posted` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Publishing,
    Posted,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Publishing => "publishing",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Posted | Self::Failed)
    }
}

impl FromStr for ScheduleStatus {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "publishing" => Ok(Self::Publishing),
            "posted" => Ok(Self::Posted),
            "failed" => Ok(Self::Failed),
            other => Err(PostdeckError::InvalidInput(format!(
                "Unknown schedule status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-account schedule row for a publication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledPost {
    pub id: String,
    pub publication_id: String,
    pub social_account_id: String,
    /// Account name at schedule time, not live-joined
    pub account_name: String,
    /// Account platform at schedule time, not live-joined
    pub platform: String,
    pub scheduled_at: i64,
    pub status: ScheduleStatus,
    pub user_id: String,
    pub workspace_id: String,
    /// Earliest time a worker may pick the row up (throttle deferrals, retries)
    pub available_at: i64,
    pub attempts: u32,
    pub platform_post_id: Option<String>,
    pub error_message: Option<String>,
    pub posted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A connected social account (Facebook page, YouTube channel, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialAccount {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub platform: String,
    pub created_at: i64,
}

impl SocialAccount {
    pub fn new(workspace_id: String, name: String, platform: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_id,
            name,
            platform,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Who is acting: stamped onto new schedule rows and activity entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub workspace_id: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
        }
    }
}

/// One entry of the append-only publication activity log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub id: Option<i64>,
    pub publication_id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_status_round_trip() {
        for status in [
            PublicationStatus::Draft,
            PublicationStatus::Scheduled,
            PublicationStatus::Approved,
            PublicationStatus::Published,
            PublicationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PublicationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_invalid_input() {
        assert!(matches!(
            "archived".parse::<PublicationStatus>(),
            Err(PostdeckError::InvalidInput(_))
        ));
        assert!(matches!(
            "queued".parse::<ScheduleStatus>(),
            Err(PostdeckError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_schedule_status_terminal() {
        assert!(!ScheduleStatus::Pending.is_terminal());
        assert!(!ScheduleStatus::Publishing.is_terminal());
        assert!(ScheduleStatus::Posted.is_terminal());
        assert!(ScheduleStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ScheduleStatus::Posted).unwrap();
        assert_eq!(json, "\"posted\"");
        let json = serde_json::to_string(&PublicationStatus::Scheduled).unwrap();
        assert_eq!(json, "\"scheduled\"");
    }

    #[test]
    fn test_new_publication_is_draft() {
        let publication = Publication::new("ws-1".into(), "Launch".into(), String::new());
        assert_eq!(publication.status, PublicationStatus::Draft);
        assert!(publication.scheduled_at.is_none());
        assert!(Uuid::parse_str(&publication.id).is_ok());
    }
}
