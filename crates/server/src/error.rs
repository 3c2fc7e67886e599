//! Server-side error types (SPEC_FULL §4.12).

use keyboardia_core::RejectReason;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("session not found")]
    SessionNotFound,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("mutation rejected: {0}")]
    InvalidMutation(RejectReason),
}
