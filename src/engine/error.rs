use thiserror::Error;

use crate::model::{BookingId, Span};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid booking: {0}")]
    Validation(String),
    #[error("{facility} is already booked during {span} (booking {conflicting_id})")]
    Conflict {
        facility: String,
        span: Span,
        conflicting_id: BookingId,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not authorized: {0}")]
    Unauthorized(&'static str),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Storage(StoreError),
}

impl EngineError {
    /// True when the caller can fix the request (4xx); false for storage faults (5xx).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Storage(StoreError::Timeout) => "timeout",
            EngineError::Storage(_) => "storage",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingRow(id) => EngineError::NotFound(format!("booking {id}")),
            StoreError::UniqueViolation(what) => EngineError::AlreadyExists(what),
            other => EngineError::Storage(other),
        }
    }
}
