//! Error Module
//!
//! Failure values delivered through completion callbacks. Nothing in this
//! crate returns these synchronously.

use serde::{Deserialize, Serialize};

/// Diagnostic detail attached to backend failures and unexpected states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{domain} ({code}): {message}")]
pub struct ErrorDetail {
    pub domain: String,
    pub code: i32,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

/// Outcome of an authorization escalation that did not end in the requested tier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorizationError {
    /// Access refused at the coarse tier (denied or restricted).
    #[error("location access denied")]
    LocationDenied,

    /// Coarse tier granted, but the elevated tier was refused or its single
    /// prompt opportunity is already spent.
    #[error("elevated location access denied")]
    ElevatedAccessDenied,

    /// The backend reported an authorization value this crate does not know.
    #[error("unexpected authorization state: {0}")]
    Unexpected(ErrorDetail),
}

// Unexpected errors compare by origin, not by message text.
impl PartialEq for AuthorizationError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::LocationDenied, Self::LocationDenied) => true,
            (Self::ElevatedAccessDenied, Self::ElevatedAccessDenied) => true,
            (Self::Unexpected(a), Self::Unexpected(b)) => a.domain == b.domain && a.code == b.code,
            _ => false,
        }
    }
}

impl Eq for AuthorizationError {}

/// Failure channel of a one-shot location request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The backend reported a failure while the request was outstanding.
    #[error("location backend error: {0}")]
    Backend(ErrorDetail),

    /// Continuous monitoring started, which drops pending one-shot requests.
    #[error("one-shot request superseded by continuous monitoring")]
    ContinuousMonitoring,
}

/// Flag storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid flag key: {0:?}")]
    InvalidKey(String),
}
