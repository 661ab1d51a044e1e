use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("DUPLICATE_NON_REPEATABLE: {0}")]
    DuplicateNonRepeatable(String),
    #[error("ALREADY_APPROVED: {0}")]
    AlreadyApproved(String),
    #[error("SELF_APPROVAL_FORBIDDEN: {0}")]
    SelfApprovalForbidden(String),
    #[error("CHALLENGE_UNAVAILABLE: {0}")]
    ChallengeUnavailable(String),
    #[error("STORE_UNAVAILABLE: {0}")]
    TransientStore(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

/// Coarse classification used by callers that only care about fault and retry semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    TransientStore,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateNonRepeatable(_)
            | Self::AlreadyApproved(_)
            | Self::SelfApprovalForbidden(_)
            | Self::ChallengeUnavailable(_) => ErrorKind::Conflict,
            Self::TransientStore(_) => ErrorKind::TransientStore,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DuplicateNonRepeatable(_) => "DUPLICATE_NON_REPEATABLE",
            Self::AlreadyApproved(_) => "ALREADY_APPROVED",
            Self::SelfApprovalForbidden(_) => "SELF_APPROVAL_FORBIDDEN",
            Self::ChallengeUnavailable(_) => "CHALLENGE_UNAVAILABLE",
            Self::TransientStore(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
                ) =>
            {
                Self::TransientStore(value.to_string())
            }
            _ => Self::Internal(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
