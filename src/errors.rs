//! Typed error hierarchy for the ombudsman core.
//!
//! Every core operation returns `OmbudsmanError` on failure. Callers that only
//! need to decide how to react (render, retry, give up) use [`ErrorKind`], the
//! closed set of outcomes the presentation layer distinguishes.

use serde::Serialize;
use thiserror::Error;

use crate::ombudsman::lifecycle::Status;

pub type Result<T, E = OmbudsmanError> = std::result::Result<T, E>;

/// Coarse classification of a failure, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Errors from the manifestation store, lifecycle engine and gateways.
#[derive(Debug, Error)]
pub enum OmbudsmanError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Transition from {from} to {to} is not allowed")]
    InvalidTransition { from: Status, to: Status },

    /// A concurrent writer won the race; retrying against fresh state may succeed.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    /// The caller acted on a status that is no longer current.
    #[error("Manifestation status is {actual}, expected {expected}")]
    StaleStatus { expected: Status, actual: Status },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl OmbudsmanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict(_) | Self::StaleStatus { .. } => ErrorKind::Conflict,
            Self::Database(_) => ErrorKind::Internal,
        }
    }

    /// Only storage races are worth retrying; a stale expectation stays stale.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<rusqlite::Error> for OmbudsmanError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Self::Conflict(err.to_string());
                }
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return Self::Conflict(err.to_string());
                }
                _ => {}
            }
        }
        Self::Database(anyhow::Error::new(err))
    }
}
