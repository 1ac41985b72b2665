//! Error types for CLI operations.

use std::path::Path;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Input file not found
    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    /// Malformed change record line
    #[error("Invalid change record at line {line}: {message}")]
    InvalidChange { line: usize, message: String },

    /// Change line without a table and no `--table` fallback
    #[error("No table for change record at line {line} (add a `table` field or pass --table)")]
    MissingTable { line: usize },

    /// Routing engine error
    #[error("Routing error: {0}")]
    Routing(#[from] routing::RoutingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: &Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn input_not_found(path: &Path) -> Self {
        Self::InputNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn invalid_change(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidChange {
            line,
            message: message.into(),
        }
    }
}
