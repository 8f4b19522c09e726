//! The repository transaction engine.
//!
//! Everything that turns an authorized archive submission into a new
//! committed snapshot lives here: the [`auth::AuthGate`] that verifies
//! signed tokens against the policy table, the
//! [`coordinator::TransactionCoordinator`] that validates and atomically
//! commits proposal batches, the [`scheduler::TaskScheduler`] that runs
//! ingestion work on a bounded worker pool with backpressure, and the
//! [`pipeline::Pipeline`] connecting them. [`Depot`] assembles the whole
//! tree from a configuration value and is the surface an API gateway
//! consumes.

pub mod auth;
pub mod coordinator;
pub mod depot;
pub mod error;
pub mod pipeline;
pub mod scheduler;

pub use auth::{AuthError, AuthGate, Claims, Principal, SignedToken};
pub use coordinator::{Transaction, TransactionCoordinator};
pub use depot::Depot;
pub use error::{EngineError, ErrorKind, Result};
pub use pipeline::Pipeline;
pub use scheduler::{
    CancelToken, Job, JobFuture, JobOutcome, TaskId, TaskKind, TaskScheduler, TaskSignals,
    TaskState,
};

/// Sequence number identifying a committed snapshot.
pub type SnapshotId = u64;
