//! Error types for `forgeboard`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` passthrough for callers layering their own context
//! - Store-layer failures surface as the `Database` variant; there is no
//!   wider error taxonomy because the core has none to express

use thiserror::Error;

/// Primary error type for `forgeboard` operations.
#[derive(Error, Debug)]
pub enum ForgeboardError {
    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Milestone with the specified id was not found.
    #[error("Milestone not found: {id}")]
    MilestoneNotFound { id: i64 },

    /// Issue with the specified id was not found.
    #[error("Issue not found: {id}")]
    IssueNotFound { id: i64 },

    /// Project with the specified id was not found.
    #[error("Project not found: {id}")]
    ProjectNotFound { id: i64 },

    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Sort direction token was neither `asc` nor `desc`.
    #[error("Invalid sort direction: {value}")]
    InvalidDirection { value: String },

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForgeboardError {
    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type using `ForgeboardError`.
pub type Result<T> = std::result::Result<T, ForgeboardError>;
