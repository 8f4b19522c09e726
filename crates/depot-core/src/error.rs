//! Error types for depot-core.

use depot_utils::error::HashError;
use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the content store, the index store and snapshots.
#[derive(Error, Diagnostic, Debug)]
pub enum StoreError {
    #[error("Error while {action}: {source}")]
    #[diagnostic(code(depot_core::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(depot_core::sqlite))]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    #[diagnostic(code(depot_core::json))]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(depot_core::hash))]
    HashError(#[from] HashError),

    #[error("Content `{digest}` is corrupted: stored bytes hash to `{actual}`")]
    #[diagnostic(
        code(depot_core::integrity),
        help("The blob on disk no longer matches its address; restore it from a replica")
    )]
    Integrity { digest: String, actual: String },

    #[error("Content `{0}` not found")]
    #[diagnostic(code(depot_core::not_found))]
    NotFound(String),

    #[error("`{0}` is not a valid content digest")]
    #[diagnostic(code(depot_core::invalid_digest))]
    InvalidDigest(String),

    #[error("Conflicting write to `{key}` in section `{section}`")]
    #[diagnostic(
        code(depot_core::conflict),
        help("Another transaction committed this key first; re-propose against the latest snapshot")
    )]
    Conflict { section: String, key: String },

    #[error("Snapshot {requested} does not exist yet (head is {head})")]
    #[diagnostic(code(depot_core::unknown_snapshot))]
    UnknownSnapshot { requested: u64, head: u64 },

    #[error("Snapshot {0} has been reclaimed")]
    #[diagnostic(
        code(depot_core::snapshot_reclaimed),
        help("Acquire the latest snapshot instead of a superseded one")
    )]
    SnapshotReclaimed(u64),

    #[error("Thread lock poison error")]
    #[diagnostic(code(depot_core::poison))]
    PoisonError,
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for adding context to IO errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            StoreError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
