//! Error types for the record store and its background tasks.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reading or writing the backing file.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The file (or its directory) could not be read, written or renamed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a JSON object of strings
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode store: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by the core crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No credential has been issued yet, or every refresh so far failed
    #[error("no credential available")]
    CredentialUnavailable,

    /// Network fault, timeout or unexpected response from a remote endpoint
    #[error("{service} call failed: {reason}")]
    ExternalCallFailed {
        service: &'static str,
        reason: String,
    },

    #[error("UID not found: {0}")]
    RecordNotFound(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// The record is past its expiration but has not been swept yet
    #[error("UID has expired: {0}")]
    Expired(String),

    /// The stored value is neither `permanent` nor a valid timestamp
    #[error("UID {uid} holds an unreadable policy {value:?}")]
    MalformedRecord { uid: String, value: String },
}

impl Error {
    pub(crate) fn external(service: &'static str, reason: impl ToString) -> Self {
        Error::ExternalCallFailed {
            service,
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for errors caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::RecordNotFound(_) | Error::InvalidPolicy(_) | Error::Expired(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
