//! Core storage engine for the depot repository service.
//!
//! Three layers live here, leaves first: the content-addressed blob
//! store ([`content::ContentStore`]), the transactional MVCC package
//! index ([`index::IndexStore`]) and the refcounted snapshot layer
//! ([`snapshot::SnapshotManager`]) that readers consume. The domain
//! value types and the package version ordering they all share are in
//! [`types`] and [`version`].

pub mod content;
pub mod error;
pub mod index;
pub mod snapshot;
pub mod types;
pub mod version;

pub use content::ContentStore;
pub use error::{ErrorContext, Result, StoreError};
pub use index::IndexStore;
pub use snapshot::{Resolution, Snapshot, SnapshotManager};
pub use types::{Operation, PackageId, PackageRecord, Proposal};
pub use version::{compare_versions, vercmp, Dependency, DependencyError};
