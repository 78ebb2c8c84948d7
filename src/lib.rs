//! # Complink - Compliance Link Backend
//!
//! Tracks software features against the legal provisions that govern them.
//!
//! Complink provides:
//! - Feature and provision records behind one generic entity store
//! - A link table with a storage-enforced unique `(feature_id, provision_id)` pair
//! - A link manager that turns uniqueness violations into a conflict outcome
//!   and owns cascading link cleanup when an entity is deleted
//! - An axum HTTP surface and a small operator CLI

pub mod feature;
pub mod provision;
pub mod link;
pub mod storage;
pub mod manager;
pub mod server;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use feature::Feature;
pub use provision::Provision;
pub use link::{Link, LinkKey, LinkOutcome, LinkPatch};
pub use manager::{LinkManager, ManagerOptions, Stats};
pub use storage::{Database, Entity, EntityStore, LinkStore, StorageOptions};

/// Result type alias for Complink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Complink operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    EntityExists(String),

    #[error("Link already exists: feature {feature_id} -> provision {provision_id}")]
    DuplicateLink { feature_id: i64, provision_id: i64 },

    /// Retryable: busy/locked database, deadline exceeded, closed connection
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Storage error: {0}")]
    UnexpectedStorage(String),
}

impl Error {
    /// Whether a caller may retry the failed operation unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStorage(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked)
            | Some(ErrorCode::OperationInterrupted) => {
                Error::TransientStorage(err.to_string())
            }
            _ => Error::UnexpectedStorage(err.to_string()),
        }
    }
}
