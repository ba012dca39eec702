//! Error types for move dispatch
//!
//! Provides the error taxonomy shared by the dispatch client, the workers
//! and the HTTP boundary that sits in front of them.

use std::time::Duration;

use polybook::BookError;
use thiserror::Error;

/// Errors that can occur while resolving a move
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Request failed validation before it was published
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// No personality is registered under this name
    #[error("{name} is not a valid personality")]
    PersonalityNotFound { name: String },

    /// No worker answered within the deadline
    #[error("No response for game {game_id} within {}", human(.after))]
    Timeout { game_id: String, after: Duration },

    /// Publish, subscribe or acknowledge failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine adapter failed to produce a move
    #[error("Engine error: {message}")]
    Engine { message: String },

    /// Opening book lookup failed
    #[error(transparent)]
    Book(#[from] BookError),

    /// Configuration is missing or inconsistent
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

impl DispatchError {
    pub fn transport(message: impl Into<String>) -> Self {
        DispatchError::Transport {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        DispatchError::Engine {
            message: message.into(),
        }
    }

    /// HTTP status the web layer answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::InvalidRequest { .. } | DispatchError::PersonalityNotFound { .. } => 400,
            DispatchError::Book(BookError::InvalidMove { .. } | BookError::InvalidFen { .. }) => 400,
            DispatchError::Timeout { .. } => 504,
            DispatchError::Transport { .. } => 502,
            _ => 500,
        }
    }
}

/// Result type alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
