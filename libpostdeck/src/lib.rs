//! Postdeck - publication scheduling for social accounts
//!
//! A publication is one piece of content sent to several social accounts.
//! This library keeps its per-account schedule rows in step with what the
//! user asked for, derives the publication's lifecycle status from those
//! rows, and publishes due rows under a per-workspace concurrency limit.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod scheduling;
pub mod service;
pub mod throttle;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{PostdeckError, Result};
pub use scheduling::{ReconcileReport, ScheduleRequest};
pub use types::{
    ActivityEntry, Actor, Publication, PublicationStatus, ScheduleStatus, ScheduledPost,
    SocialAccount,
};
