// ⚠️ Error Taxonomy - what can go wrong during a sync batch
//
// Row-level problems (MalformedInput) are recovered inside the batch.
// Store-level problems (LookupFailure, PersistenceFailure) abort it.
// NoMatch is not an error at all: it is an absent identifier.

use std::path::PathBuf;
use thiserror::Error;

use crate::reference::ReferenceSet;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A row is missing the value used to target its update
    #[error("row {row}: required column '{column}' is empty")]
    MalformedInput { row: usize, column: String },

    /// A reference set could not be loaded from the store
    #[error("failed to load reference set '{set}'")]
    LookupFailure {
        set: ReferenceSet,
        #[source]
        source: anyhow::Error,
    },

    /// The final commit could not be applied
    #[error("failed to commit update batch")]
    PersistenceFailure {
        #[source]
        source: anyhow::Error,
    },

    /// The tabular source could not be opened or read
    #[error("failed to read source '{}'", path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True for errors that terminate the whole batch
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::MalformedInput { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
