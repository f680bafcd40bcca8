use std::path::PathBuf;

use thiserror::Error;

use crate::namespace::NamespaceError;

/// Failure while provisioning the namespace or schema. Fatal at startup.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    InvalidNamespace(#[from] NamespaceError),

    #[error("create namespace dir {}: {source}", path.display())]
    CreateNamespace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{operation}: {source}")]
    Schema {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("unsupported intake.db schema version {found} (expected {expected})")]
    UnsupportedVersion { found: i32, expected: i32 },

    #[error("provisioning task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of a single record operation. The message is surfaced verbatim to
/// the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{operation}: {source}")]
    Query {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("decode {column}: {reason}")]
    Decode { column: &'static str, reason: String },

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Query { operation, source }
    }

    pub(crate) fn decode(column: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            column,
            reason: reason.to_string(),
        }
    }
}
