//! Sync error types with retry classification.

use mirror_db::DbError;
use mirror_ids::EntityKind;
use thiserror::Error;

/// Failure talking to an upstream catalog.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure, timeout, 429 or 5xx. A later pass may succeed.
    #[error("Transient upstream error: {message}")]
    Transient { message: String },

    /// The response could not be decoded or carried GraphQL errors.
    #[error("Malformed upstream response: {message}")]
    Malformed { message: String },

    /// Upstream refused the request (bad credential, unknown endpoint).
    #[error("Upstream rejected request ({status}): {message}")]
    Upstream { status: u16, message: String },
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Sync of {kind} for source {source_id} was cancelled")]
    Cancelled { source_id: String, kind: EntityKind },

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source is disabled: {0}")]
    SourceDisabled(String),

    #[error("Replica error: {0}")]
    Database(#[from] DbError),
}

impl SyncError {
    /// Check if retrying the pass later may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Source(err) if err.is_transient())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
