use bridge_traits::BridgeError;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Provider(String),

    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse classification used by the retry loop and by callers deciding how
/// to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientProvider,
    Persistence,
    Validation,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::TransientProvider => "transient_provider",
            Self::Persistence => "persistence",
            Self::Validation => "validation",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Transform(_) => ErrorKind::Configuration,
            Self::Provider(_) | Self::LocalStore(_) => ErrorKind::TransientProvider,
            Self::Database(_) => ErrorKind::Persistence,
            Self::Validation(_) | Self::InvalidStatus(_) => ErrorKind::Validation,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Only transient remote or local store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientProvider
    }

    pub(crate) fn local_store(error: BridgeError) -> Self {
        match error {
            BridgeError::OperationFailed(message) | BridgeError::Storage(message) => {
                Self::LocalStore(message)
            }
            other => Self::LocalStore(other.to_string()),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::OperationFailed(message) => Self::Provider(message),
            other => Self::Provider(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
