use crate::photo::PhotoId;
use crate::state_machine::TransitionError;
use std::time::Duration;
use thiserror::Error;

/// What went wrong inside an enhancement provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhancementFailureKind {
    /// No API credential is configured
    MissingCredentials,
    /// Connection, TLS or body transfer failure
    Network,
    /// Provider (or output download) answered with a non-2xx status
    HttpStatus(u16),
    /// Response body did not have the expected shape
    MalformedResponse,
    /// The call did not complete within the configured deadline
    Timeout,
}

/// Uniform failure returned by every enhancement provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("enhancement failed: {cause}")]
pub struct EnhancementError {
    pub kind: EnhancementFailureKind,
    pub cause: String,
}

impl EnhancementError {
    pub fn new(kind: EnhancementFailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn missing_credentials() -> Self {
        Self::new(
            EnhancementFailureKind::MissingCredentials,
            "no API key configured for the enhancement provider",
        )
    }

    pub fn network(cause: impl Into<String>) -> Self {
        Self::new(EnhancementFailureKind::Network, cause)
    }

    pub fn http_status(status: u16, cause: impl Into<String>) -> Self {
        Self::new(EnhancementFailureKind::HttpStatus(status), cause)
    }

    pub fn malformed(cause: impl Into<String>) -> Self {
        Self::new(EnhancementFailureKind::MalformedResponse, cause)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            EnhancementFailureKind::Timeout,
            format!("no response within {}s", after.as_secs_f64()),
        )
    }
}

/// Errors surfaced by the triage pipeline
#[derive(Debug, Clone, Error)]
pub enum TriageError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    #[error("transient provider error: {0}")]
    TransientProvider(EnhancementError),

    #[error("malformed provider response: {0}")]
    MalformedProviderResponse(EnhancementError),

    #[error("timeout: {0}")]
    Timeout(EnhancementError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("policy violation: {0}")]
    PolicyViolation(#[from] TransitionError),

    #[error("photo {0} is already being processed")]
    Busy(PhotoId),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TriageError {
    pub fn photo_not_found(id: PhotoId) -> Self {
        TriageError::ResourceNotFound {
            kind: "photo",
            id: id.to_string(),
        }
    }

    pub fn blob_not_found(blob_ref: impl ToString) -> Self {
        TriageError::ResourceNotFound {
            kind: "blob",
            id: blob_ref.to_string(),
        }
    }

    /// Wrap a storage adapter failure, keeping the whole context chain
    pub fn persistence(error: anyhow::Error) -> Self {
        TriageError::Persistence(format!("{error:#}"))
    }

    /// Stable machine-readable code for API responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            TriageError::Configuration(_) => "CONFIGURATION_ERROR",
            TriageError::ResourceNotFound { .. } => "NOT_FOUND",
            TriageError::TransientProvider(_) => "PROVIDER_ERROR",
            TriageError::MalformedProviderResponse(_) => "MALFORMED_PROVIDER_RESPONSE",
            TriageError::Timeout(_) => "TIMEOUT",
            TriageError::Persistence(_) => "PERSISTENCE_ERROR",
            TriageError::PolicyViolation(_) => "POLICY_VIOLATION",
            TriageError::Busy(_) => "BUSY",
            TriageError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

impl From<EnhancementError> for TriageError {
    fn from(error: EnhancementError) -> Self {
        match error.kind {
            EnhancementFailureKind::MissingCredentials => {
                TriageError::Configuration(error.cause)
            }
            EnhancementFailureKind::Network | EnhancementFailureKind::HttpStatus(_) => {
                TriageError::TransientProvider(error)
            }
            EnhancementFailureKind::MalformedResponse => {
                TriageError::MalformedProviderResponse(error)
            }
            EnhancementFailureKind::Timeout => TriageError::Timeout(error),
        }
    }
}
