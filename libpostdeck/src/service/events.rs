//! In-process event bus
//!
//! Scheduling and publishing report what they did through a
//! `tokio::sync::broadcast` channel. Emitting never blocks: with no
//! subscribers the event is dropped, and lagging subscribers lose the oldest
//! events first.
//!
//! ```no_run
//! use libpostdeck::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::JobDeferred {
//!     scheduled_post_id: "sp-1".to_string(),
//!     workspace_id: "ws-1".to_string(),
//!     available_at: 1_767_225_630,
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::PublicationStatus;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging kicks in
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Schedule rows of a publication were synchronized
    ScheduleReconciled {
        publication_id: String,
        created: usize,
        updated: usize,
        deleted: usize,
        skipped: usize,
    },

    /// A row was written for an account missing from the directory
    UnknownAccount {
        publication_id: String,
        account_id: String,
    },

    /// The publication moved to a new lifecycle status
    StatusChanged {
        publication_id: String,
        from: PublicationStatus,
        to: PublicationStatus,
    },

    /// A publish job hit the workspace throttle and was pushed back
    JobDeferred {
        scheduled_post_id: String,
        workspace_id: String,
        available_at: i64,
    },

    /// A schedule row was published
    PostPublished {
        scheduled_post_id: String,
        publication_id: String,
        platform: String,
        platform_post_id: String,
    },

    /// A publish attempt failed
    PublishFailed {
        scheduled_post_id: String,
        publication_id: String,
        error: String,
        will_retry: bool,
    },
}
