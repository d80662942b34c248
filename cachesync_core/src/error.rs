//! Error types for cachesync_core.

use crate::handle::{Handle, ObjectType};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using cachesync_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling or prefetching the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Listing objects of a type in the repository failed.
    #[error("Listing {object_type} objects failed: {reason}")]
    Enumeration {
        object_type: ObjectType,
        reason: String,
    },

    /// Loading or reading an object's content failed.
    #[error("Fetching {handle} failed: {source}")]
    Fetch {
        handle: Handle,
        source: std::io::Error,
    },

    /// The cache rejected a save or retain.
    #[error("Cache write for {target} failed: {reason}")]
    CacheWrite { target: String, reason: String },

    /// Closing a fetch stream failed.
    #[error("Releasing stream for {handle} failed: {source}")]
    StreamRelease {
        handle: Handle,
        source: std::io::Error,
    },

    /// The run was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid object id format or encoding.
    #[error("Invalid id: {reason}")]
    InvalidId { reason: String },

    /// Unknown object type name.
    #[error("Unknown object type: {name}")]
    UnknownObjectType { name: String },

    /// Cache directory is invalid or incompatible.
    #[error("Invalid cache at {path}: {reason}")]
    InvalidCache { path: PathBuf, reason: String },

    /// Repository is invalid or not initialized.
    #[error("Invalid repository at {path}: {reason}")]
    InvalidRepository { path: PathBuf, reason: String },

    /// Object not found.
    #[error("Object not found: {handle}")]
    ObjectNotFound { handle: Handle },

    /// An index file could not be decoded.
    #[error("Invalid index {name}: {reason}")]
    InvalidIndex { name: String, reason: String },
}

impl Error {
    /// Create an Enumeration error.
    pub fn enumeration(object_type: ObjectType, reason: impl Into<String>) -> Self {
        Error::Enumeration {
            object_type,
            reason: reason.into(),
        }
    }

    /// Create a Fetch error.
    pub fn fetch(handle: Handle, source: std::io::Error) -> Self {
        Error::Fetch { handle, source }
    }

    /// Create a CacheWrite error for a single handle.
    pub fn cache_write(handle: &Handle, reason: impl Into<String>) -> Self {
        Error::CacheWrite {
            target: handle.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a CacheWrite error covering a whole object type.
    pub fn cache_write_type(object_type: ObjectType, reason: impl Into<String>) -> Self {
        Error::CacheWrite {
            target: format!("all {} entries", object_type),
            reason: reason.into(),
        }
    }

    /// Create a StreamRelease error.
    pub fn stream_release(handle: Handle, source: std::io::Error) -> Self {
        Error::StreamRelease { handle, source }
    }

    /// Create an InvalidId error.
    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Error::InvalidId {
            reason: reason.into(),
        }
    }

    /// Create an UnknownObjectType error.
    pub fn unknown_object_type(name: impl Into<String>) -> Self {
        Error::UnknownObjectType { name: name.into() }
    }

    /// Create an InvalidCache error.
    pub fn invalid_cache(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidCache {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidRepository error.
    pub fn invalid_repository(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidRepository {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an ObjectNotFound error.
    pub fn object_not_found(handle: Handle) -> Self {
        Error::ObjectNotFound { handle }
    }

    /// Create an InvalidIndex error.
    pub fn invalid_index(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidIndex {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObjectId;

    #[test]
    fn test_error_messages_name_the_handle() {
        let handle = Handle::new(ObjectType::Snapshot, ObjectId::hash_bytes(b"snap"));
        let err = Error::fetch(handle, std::io::Error::other("connection reset"));
        let msg = err.to_string();
        assert!(msg.contains("snapshot/"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_cache_write_type_target() {
        let err = Error::cache_write_type(ObjectType::Index, "disk full");
        assert_eq!(
            err.to_string(),
            "Cache write for all index entries failed: disk full"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::invalid_id("x").is_cancelled());
    }
}
