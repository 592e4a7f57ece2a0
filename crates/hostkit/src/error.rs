//! Error types for host transport operations.
//!
//! Every transport reports a missing path, user, group or password through
//! [`Error::NotFound`], so callers can branch on create-vs-modify without
//! knowing which transport they talk to.

use std::io;
use thiserror::Error;

/// Errors that can occur while talking to a host.
#[derive(Debug, Error)]
pub enum Error {
    /// A file, user, group or password entry does not exist
    #[error("{op} {target}: not found")]
    NotFound {
        /// Operation that was attempted (stat, open, user, ...)
        op: String,
        /// Path or account name
        target: String,
    },

    /// Operation expected a regular file but found a directory
    #[error("{0}: is a directory")]
    IsDirectory(String),

    /// A path component is not a directory
    #[error("{0}: not a directory")]
    NotDirectory(String),

    /// Account or path already exists
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// "user", "group" or "path"
        kind: &'static str,
        /// Name of the existing entry
        name: String,
    },

    /// Command ran but exited unsuccessfully
    #[error("command failed ({status}): {command}: {stderr}")]
    Command {
        /// Rendered command line
        command: String,
        /// Exit status, -1 when killed by a signal
        status: i32,
        /// Trimmed standard error
        stderr: String,
    },

    /// The remote session could not be established or broke down
    #[error("session error: {0}")]
    Session(String),

    /// Output from the host could not be understood
    #[error("parse error: {0}")]
    Parse(String),

    /// Operation is not available on this host
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Any other I/O error
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(op: impl Into<String>, target: impl Into<String>) -> Self {
        Self::NotFound {
            op: op.into(),
            target: target.into(),
        }
    }

    /// Convert an I/O error, mapping the OS not-found kinds onto
    /// [`Error::NotFound`].
    pub fn from_io(op: &str, target: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(op, target),
            io::ErrorKind::IsADirectory => Self::IsDirectory(target.to_string()),
            io::ErrorKind::NotADirectory => Self::NotDirectory(target.to_string()),
            _ => Self::Io(err),
        }
    }

    /// Whether this is the distinguished not-found condition.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Checks whether any error in an error chain is a host not-found.
///
/// Resource code usually holds an `anyhow::Error` or a `&dyn Error`; this
/// walks the source chain so wrapping with context does not hide the kind.
pub fn is_not_found(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(host_err) = e.downcast_ref::<Error>()
            && host_err.is_not_found()
        {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_not_found() {
        let err = Error::from_io(
            "stat",
            "/nope",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "stat /nope: not found");
    }

    #[test]
    fn test_from_io_keeps_other_errors() {
        let err = Error::from_io(
            "open",
            "/root",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(!err.is_not_found());
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_is_not_found_walks_chain() {
        #[derive(Debug, Error)]
        #[error("wrapped")]
        struct Wrapped(#[source] Error);

        let wrapped = Wrapped(Error::not_found("user", "alice"));
        assert!(is_not_found(&wrapped));

        let other = Wrapped(Error::Parse("bad".into()));
        assert!(!is_not_found(&other));
    }
}
