//! Publishing seam between the worker and the social platforms
//!
//! The worker only knows the [`Publisher`] trait. Platform API clients
//! plug in behind it; this crate ships a dry-run publisher for the daemon and
//! a configurable mock for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::error::{PublishError, Result};
use crate::types::{Publication, ScheduledPost};

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `publication` to the account of `post`
    ///
    /// Returns the platform-specific post ID.
    ///
    /// # Errors
    ///
    /// Returns `PostdeckError::Publish` when the platform refuses the post or
    /// cannot be reached.
    async fn publish(&self, publication: &Publication, post: &ScheduledPost) -> Result<String>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Logs what would be posted and reports success
#[derive(Debug, Default, Clone)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, publication: &Publication, post: &ScheduledPost) -> Result<String> {
        info!(
            publication_id = %publication.id,
            scheduled_post_id = %post.id,
            platform = %post.platform,
            account = %post.account_name,
            "Dry run: would publish '{}'",
            publication.title
        );
        Ok(format!("dry-run:{}", post.id))
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

/// Behavior of a [`MockPublisher`]
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Error returned by every call; `None` means success
    pub error: Option<PublishError>,
    /// Simulated network latency
    pub delay: Duration,
    /// Calls made so far
    pub call_count: Arc<Mutex<usize>>,
    /// Scheduled post IDs published successfully
    pub published: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            error: None,
            delay: Duration::from_millis(0),
            call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    pub fn success() -> Self {
        Self::new(MockConfig::default())
    }

    pub fn failure(error: PublishError) -> Self {
        Self::new(MockConfig {
            error: Some(error),
            ..Default::default()
        })
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        *self.config.call_count.lock().unwrap()
    }

    pub fn published(&self) -> Vec<String> {
        self.config.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, _publication: &Publication, post: &ScheduledPost) -> Result<String> {
        *self.config.call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if let Some(error) = &self.config.error {
            return Err(error.clone().into());
        }

        self.config.published.lock().unwrap().push(post.id.clone());
        Ok(format!("mock-{}", post.id))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleStatus;
    use crate::PostdeckError;

    fn sample() -> (Publication, ScheduledPost) {
        let publication = Publication::new("ws-1".into(), "Hello".into(), String::new());
        let post = ScheduledPost {
            id: "sp-1".into(),
            publication_id: publication.id.clone(),
            social_account_id: "acc-1".into(),
            account_name: "Acme".into(),
            platform: "youtube".into(),
            scheduled_at: 0,
            status: ScheduleStatus::Publishing,
            user_id: "user-1".into(),
            workspace_id: "ws-1".into(),
            available_at: 0,
            attempts: 1,
            platform_post_id: None,
            error_message: None,
            posted_at: None,
            created_at: 0,
            updated_at: 0,
        };
        (publication, post)
    }

    #[tokio::test]
    async fn test_dry_run_returns_synthetic_id() {
        let (publication, post) = sample();
        let id = DryRunPublisher.publish(&publication, &post).await.unwrap();
        assert_eq!(id, "dry-run:sp-1");
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let (publication, post) = sample();
        let publisher = MockPublisher::success();

        let id = publisher.publish(&publication, &post).await.unwrap();
        assert_eq!(id, "mock-sp-1");
        assert_eq!(publisher.call_count(), 1);
        assert_eq!(publisher.published(), vec!["sp-1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let (publication, post) = sample();
        let publisher = MockPublisher::failure(PublishError::Network("down".into()));

        let result = publisher.publish(&publication, &post).await;
        assert!(matches!(
            result,
            Err(PostdeckError::Publish(PublishError::Network(_)))
        ));
        assert_eq!(publisher.call_count(), 1);
        assert!(publisher.published().is_empty());
    }
}
