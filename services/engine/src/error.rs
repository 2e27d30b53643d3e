//! services/engine/src/error.rs
//!
//! Defines the primary error types for the engine service.

use crate::config::ConfigError;
use dose_reminder_core::ports::PortError;

/// The primary error type for the `engine` service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., reading the local state file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Errors returned by explicit user actions on a dose.
#[derive(Debug, thiserror::Error)]
pub enum DoseActionError {
    /// The action is not allowed right now. `reason` is shown to the user as-is.
    #[error("{reason}")]
    Rejected { reason: String },

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}
