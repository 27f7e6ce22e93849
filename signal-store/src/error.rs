// Store error taxonomy
// Storage failures propagate; data-quality problems are reported per record

use crate::storage::Collection;
use std::path::PathBuf;

/// Errors produced by the signal store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying collection could not be read or written
    #[error("{collection} collection unavailable: {source}")]
    StorageUnavailable {
        collection: Collection,
        #[source]
        source: std::io::Error,
    },

    /// The collection exists but its contents cannot be decoded or encoded
    #[error("{collection} collection is corrupt: {source}")]
    Corrupt {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    /// The data directory could not be prepared
    #[error("data directory {path:?} unavailable: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A candidate signal or feedback entry is missing required fields
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        StoreError::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// True for failures of the storage layer itself (disk, permissions, corrupt files)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::StorageUnavailable { .. } | StoreError::Corrupt { .. } | StoreError::DataDir { .. }
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
