//! Tuile error types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single field-level validation failure reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Tuile error types.
///
/// `Clone` because one in-flight fetch may be awaited by several callers
/// and every one of them receives the same outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    // Transport errors (transient)
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    // Terminal backend errors
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation failed: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("row not found: {table}/{id}")]
    NotFound { table: String, id: String },

    // Realtime errors
    #[error("realtime channel disconnected: {0}")]
    ChannelDisconnected(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The background task driving a fetch panicked or was cancelled.
    #[error("fetch aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// Shorthand for a validation error without field detail.
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Short variant name, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Http(_) => "http",
            SyncError::Api { .. } => "api",
            SyncError::RateLimited { .. } => "rate_limited",
            SyncError::PermissionDenied(_) => "permission_denied",
            SyncError::Validation { .. } => "validation",
            SyncError::NotFound { .. } => "not_found",
            SyncError::ChannelDisconnected(_) => "channel_disconnected",
            SyncError::Json(_) => "json",
            SyncError::Configuration(_) => "configuration",
            SyncError::Aborted(_) => "aborted",
        }
    }

    /// Network failures: the device is offline or the connection dropped.
    /// Not worth reporting, they resolve on their own.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Http(_) | SyncError::ChannelDisconnected(_))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(_) | SyncError::RateLimited { .. } => true,
            SyncError::ChannelDisconnected(_) => true,
            SyncError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors a view should show as a dismissible notification rather than
    /// a retry indicator.
    pub fn is_terminal(&self) -> bool {
        !self.is_transient()
    }

    /// Server-provided back-off hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Field-level detail for the form layer (empty for non-validation errors).
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            SyncError::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Json(err.to_string())
    }
}

#[cfg(feature = "rest")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Json(err.to_string())
        } else {
            SyncError::Http(err.to_string())
        }
    }
}

/// Result type alias for Tuile operations
pub type Result<T> = std::result::Result<T, SyncError>;
