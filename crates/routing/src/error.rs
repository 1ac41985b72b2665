//! Routing error types

use thiserror::Error;

/// Routing-specific errors
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Engine already disposed
    #[error("routing engine has been disposed")]
    Disposed,

    /// Cancelled before any delivery happened
    #[error("routing cancelled")]
    Cancelled,

    /// Destination name already registered
    #[error("destination '{name}' is already registered")]
    DuplicateDestination { name: String },

    /// Destination name not registered
    #[error("destination '{name}' not found")]
    DestinationNotFound { name: String },

    /// Rule creation error
    #[error("failed to create rule '{name}': {message}")]
    RuleCreation { name: String, message: String },

    /// Destination creation error
    #[error("failed to create destination '{name}': {message}")]
    DestinationCreation { name: String, message: String },

    /// Contract error (from rules or destinations)
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Routing task panicked or was aborted
    #[error("routing task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl RoutingError {
    /// Create a rule creation error
    pub fn rule_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a destination creation error
    pub fn destination_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DestinationCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
