use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// All errors produced by the restock statistics pipeline.
#[derive(Error, Debug)]
pub enum RestockError {
    /// Credentials were rejected by an external API. Requires operator action.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The timeline API refused the request because the rate limit is spent.
    /// The run should be abandoned; the next scheduled run will retry.
    #[error("Rate limited{}", reset_suffix(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// A single message matched a product but could not become an event.
    #[error("Message {message_id} could not be parsed: {reason}")]
    ParseMismatch { message_id: String, reason: String },

    /// Writing the report to its destination failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A non-success response that is neither auth nor rate limiting.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The event store exists but cannot be trusted.
    #[error("Event store {path} is unreadable: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A timestamp string did not match any recognised format.
    #[error("Invalid timestamp format: {0}")]
    TimestampParse(String),

    /// The product registry is empty or contains conflicting entries.
    #[error("Invalid product registry: {0}")]
    InvalidRegistry(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(ts) => format!(" until {}", ts.to_rfc3339()),
        None => String::new(),
    }
}

impl RestockError {
    /// Process exit code for a run that ended with this error.
    ///
    /// Codes follow `sysexits.h`: 75 temporary failure, 77 permission,
    /// 69 unavailable, 78 configuration.
    pub fn exit_code(&self) -> u8 {
        match self {
            RestockError::RateLimited { .. } | RestockError::Network(_) => 75,
            RestockError::Auth(_) => 77,
            RestockError::Publish(_) => 69,
            RestockError::Config(_) | RestockError::InvalidRegistry(_) => 78,
            _ => 1,
        }
    }

    /// `true` when a later run is expected to succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RestockError::RateLimited { .. } | RestockError::Network(_)
        )
    }
}

/// Convenience alias used throughout the restock crates.
pub type Result<T> = std::result::Result<T, RestockError>;
