//! Error types for Postdeck

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostdeckError>;

#[derive(Error, Debug)]
pub enum PostdeckError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl PostdeckError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostdeckError::InvalidInput(_) => 3,
            PostdeckError::NotFound(_) => 3,
            PostdeckError::Publish(PublishError::Authentication(_)) => 2,
            PostdeckError::Publish(_) => 1,
            PostdeckError::Config(_) => 1,
            PostdeckError::Database(_) => 1,
        }
    }
}

// Lets query helpers use `?` on sqlx results directly.
impl From<sqlx::Error> for PostdeckError {
    fn from(err: sqlx::Error) -> Self {
        PostdeckError::Database(DbError::SqlxError(err))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures reported by a [`Publisher`](crate::publisher::Publisher)
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rejected by platform: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}
