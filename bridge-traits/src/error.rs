//! Errors raised by host-provided bridges.

use thiserror::Error;

/// Failure reported by a local store, remote provider or transformer.
///
/// The sync engine treats `OperationFailed` as a transient remote failure
/// and retries it; the other variants surface as-is.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The local key-value store could not be read or written.
    #[error("Local store error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
