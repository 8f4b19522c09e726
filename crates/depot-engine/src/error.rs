//! The engine's error taxonomy.
//!
//! Every failure a task or an API caller can observe maps onto one
//! [`ErrorKind`]; the kind decides whether the scheduler retries
//! ([`EngineError::is_retryable`]) and is what a failed task reports to
//! its initiator alongside the detail message.

use std::fmt;

use depot_archive::ValidationError;
use depot_config::ConfigError;
use depot_core::StoreError;
use miette::Diagnostic;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Diagnostic, Debug)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown section `{0}`")]
    #[diagnostic(
        code(depot_engine::unknown_section),
        help("Sections must be declared in the service configuration")
    )]
    UnknownSection(String),

    #[error("A transaction must declare at least one section")]
    #[diagnostic(code(depot_engine::no_sections))]
    NoDeclaredSections,

    #[error("Transaction did not declare section `{0}`")]
    #[diagnostic(
        code(depot_engine::section_not_declared),
        help("Declare every section a transaction touches when opening it")
    )]
    SectionNotDeclared(String),

    #[error("Package `{id}` already exists in section `{section}`")]
    #[diagnostic(code(depot_engine::duplicate_package))]
    DuplicatePackage { section: String, id: String },

    #[error("Package `{id}` is not in section `{section}`")]
    #[diagnostic(code(depot_engine::missing_package))]
    MissingPackage { section: String, id: String },

    #[error("Content `{digest}` for package `{id}` is not in the content store")]
    #[diagnostic(
        code(depot_engine::missing_content),
        help("Store the archive blob before committing its record")
    )]
    MissingContent { id: String, digest: String },

    #[error("Removing `{id}` from `{section}` would orphan: {}", .dependents.join(", "))]
    #[diagnostic(
        code(depot_engine::dependency_conflict),
        help("Remove the dependents first, or configure `removal_policy = \"warn\"`")
    )]
    DependencyConflict {
        section: String,
        id: String,
        dependents: Vec<String>,
    },

    #[error("Transaction exceeded its deadline and was aborted")]
    #[diagnostic(code(depot_engine::transaction_timeout))]
    TransactionTimeout,

    #[error("Ingestion queue is full")]
    #[diagnostic(
        code(depot_engine::overloaded),
        help("Retry once in-flight tasks have drained")
    )]
    Overloaded,

    #[error("No task with id {0}")]
    #[diagnostic(code(depot_engine::unknown_task))]
    UnknownTask(u64),

    #[error("{0}")]
    #[diagnostic(code(depot_engine::custom))]
    Custom(String),
}

impl<T> From<std::sync::PoisonError<T>> for EngineError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Store(StoreError::PoisonError)
    }
}

/// The coarse failure classes surfaced to task initiators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Integrity,
    Conflict,
    Dependency,
    Auth,
    Storage,
    Overloaded,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Auth => "auth",
            ErrorKind::Storage => "storage",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::Config(_) => ErrorKind::Validation,
            EngineError::Store(err) => match err {
                // a published record pointing at a missing blob is
                // dangling metadata, not a lookup miss
                StoreError::Integrity { .. } | StoreError::NotFound(_) => ErrorKind::Integrity,
                StoreError::Conflict { .. } => ErrorKind::Conflict,
                StoreError::InvalidDigest(_)
                | StoreError::UnknownSnapshot { .. }
                | StoreError::SnapshotReclaimed(_) => ErrorKind::Validation,
                _ => ErrorKind::Storage,
            },
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::UnknownSection(_)
            | EngineError::NoDeclaredSections
            | EngineError::SectionNotDeclared(_)
            | EngineError::DuplicatePackage { .. }
            | EngineError::MissingPackage { .. }
            | EngineError::MissingContent { .. }
            | EngineError::UnknownTask(_) => ErrorKind::Validation,
            EngineError::DependencyConflict { .. } => ErrorKind::Dependency,
            EngineError::TransactionTimeout => ErrorKind::Timeout,
            EngineError::Overloaded => ErrorKind::Overloaded,
            EngineError::Custom(_) => ErrorKind::Storage,
        }
    }

    /// Whether the scheduler may re-propose after this failure.
    ///
    /// Commit conflicts and transient store I/O qualify; everything else
    /// is terminal for the task.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Store(
                StoreError::Conflict { .. } | StoreError::IoError { .. } | StoreError::SqliteError(_)
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let conflict = EngineError::Store(StoreError::Conflict {
            section: "stable".into(),
            key: "curl-8.0.1-1-x86_64".into(),
        });
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_retryable());

        let integrity = EngineError::Store(StoreError::Integrity {
            digest: "ab".repeat(32),
            actual: "cd".repeat(32),
        });
        assert_eq!(integrity.kind(), ErrorKind::Integrity);
        assert!(!integrity.is_retryable());

        assert_eq!(EngineError::Overloaded.kind(), ErrorKind::Overloaded);
        assert_eq!(EngineError::TransactionTimeout.kind(), ErrorKind::Timeout);
        assert!(!EngineError::TransactionTimeout.is_retryable());
    }

    #[test]
    fn test_dependency_conflict_lists_dependents() {
        let err = EngineError::DependencyConflict {
            section: "stable".into(),
            id: "libfoo-2.1-1-x86_64".into(),
            dependents: vec!["app-1.0-1-x86_64".into(), "tool-0.2-1-x86_64".into()],
        };
        assert_eq!(err.kind(), ErrorKind::Dependency);
        let message = err.to_string();
        assert!(message.contains("app-1.0-1-x86_64"));
        assert!(message.contains("tool-0.2-1-x86_64"));
    }
}
