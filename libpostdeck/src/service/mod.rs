//! Service layer for Postdeck
//!
//! `PostdeckService` is the facade the binaries talk to. It owns the shared
//! `Arc<Database>`, the configuration and the event bus, and hands out the
//! specialized services:
//!
//! - `SchedulingService`: reconcile schedule rows and project publication status
//! - `PublishWorker`: publish due rows through a [`Publisher`]
//! - `EventBus`: progress and diagnostic events
//!
//! # Example
//!
//! ```no_run
//! use libpostdeck::scheduling::ScheduleRequest;
//! use libpostdeck::service::PostdeckService;
//! use libpostdeck::Actor;
//!
//! # async fn example() -> libpostdeck::Result<()> {
//! let service = PostdeckService::new().await?;
//! let actor = Actor::new("user-1", "ws-1");
//!
//! let request = ScheduleRequest::new(["acc-page", "acc-channel"])
//!     .with_override("acc-channel", 1_767_225_600);
//! let outcome = service.scheduling().schedule("pub-1", &request, &actor).await?;
//! println!("publication is now {}", outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod scheduling;

use std::sync::Arc;

use self::events::EventBus;
use self::scheduling::SchedulingService;
use crate::publisher::Publisher;
use crate::worker::PublishWorker;
use crate::{Config, Database, PostdeckError, Result};

pub struct PostdeckService {
    db: Arc<Database>,
    config: Arc<Config>,
    scheduling: SchedulingService,
    event_bus: EventBus,
}

impl PostdeckService {
    /// Create a service from the configuration file, or defaults if none exists
    pub async fn new() -> Result<Self> {
        let config = Config::load_or_default()?;
        Self::from_config(config).await
    }

    /// Create a service with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        let db_path_str = db_path.to_str().ok_or_else(|| {
            PostdeckError::Config(crate::error::ConfigError::MissingField(
                "Invalid database path".to_string(),
            ))
        })?;
        let db = Arc::new(Database::new(db_path_str).await?);
        let event_bus = EventBus::new(100);
        let scheduling = SchedulingService::new(Arc::clone(&db), event_bus.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            scheduling,
            event_bus,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduling(&self) -> &SchedulingService {
        &self.scheduling
    }

    /// Build a publish worker sharing this service's database and events
    pub fn worker(&self, publisher: Arc<dyn Publisher>) -> PublishWorker {
        PublishWorker::new(
            Arc::clone(&self.db),
            publisher,
            self.config.publishing.clone(),
            self.event_bus.clone(),
        )
    }

    pub fn subscribe(&self) -> events::EventReceiver {
        self.event_bus.subscribe()
    }
}
