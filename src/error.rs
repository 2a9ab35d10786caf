//! Error types returned by session, channel and media operations.

use thiserror::Error;

/// Recoverable failures.
///
/// Lifetime bugs (an unknown handle crossing the engine boundary, a PCM
/// buffer in an unsupported sample format) are not represented here: they
/// panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Session description rejected: {0}")]
    DescriptionRejected(String),

    #[error("ICE candidate rejected: {0}")]
    CandidateRejected(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Engine failure: {0}")]
    Engine(String),
}

impl BridgeError {
    /// Re-tag any failure of a description call as a rejection.
    pub(crate) fn into_description_rejected(self) -> Self {
        match self {
            BridgeError::DescriptionRejected(_) | BridgeError::InvalidArgument(_) => self,
            other => BridgeError::DescriptionRejected(other.to_string()),
        }
    }

    /// Re-tag any failure of a candidate call as a rejection.
    pub(crate) fn into_candidate_rejected(self) -> Self {
        match self {
            BridgeError::CandidateRejected(_) => self,
            other => BridgeError::CandidateRejected(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
