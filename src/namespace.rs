//! Storage namespaces.
//!
//! A namespace plays the part of a database name: each one is a directory
//! under `storage.path` holding its own `intake.db`. Names follow the usual
//! unquoted SQL identifier rules, so they are also safe as path components.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "admission_db";
pub const DATABASE_FILENAME: &str = "intake.db";
pub const MAX_NAMESPACE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("namespace cannot be empty")]
    Empty,

    #[error("namespace is {len} characters long; the limit is {max}", max = MAX_NAMESPACE_LEN)]
    TooLong { len: usize },

    #[error(
        "namespace contains {found:?} at position {position}; only ASCII letters, digits and `_` are allowed"
    )]
    InvalidCharacter { found: char, position: usize },
}

pub fn validate_namespace(name: &str) -> Result<(), NamespaceError> {
    if name.is_empty() {
        return Err(NamespaceError::Empty);
    }
    if let Some((position, found)) = name
        .chars()
        .enumerate()
        .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '_'))
    {
        return Err(NamespaceError::InvalidCharacter { found, position });
    }
    // Only ASCII remains, so bytes and characters agree.
    if name.len() > MAX_NAMESPACE_LEN {
        return Err(NamespaceError::TooLong { len: name.len() });
    }
    Ok(())
}

/// `<base>/<namespace>/intake.db`
pub fn database_path(base_path: &Path, namespace: &str) -> Result<PathBuf, NamespaceError> {
    validate_namespace(namespace)?;
    Ok(base_path.join(namespace).join(DATABASE_FILENAME))
}
