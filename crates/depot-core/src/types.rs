//! Domain types shared across the repository engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Dependency;

/// Immutable package identity. A new version is a new package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl PackageId {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.arch)
    }
}

/// One package entry in a section's index.
///
/// Owned by the index store; snapshots hand out copies of it but the
/// index rows are never mutated, only superseded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: PackageId,

    /// Content-store address of the package archive.
    pub digest: String,

    /// Digest over the archive's file manifest.
    pub manifest_digest: String,

    /// Declared dependencies, in manifest order.
    pub dependencies: Vec<Dependency>,

    /// Unix timestamp of the commit that published this record.
    pub published_at: i64,

    /// Principal that published this record.
    pub published_by: String,
}

/// A proposed mutation against one section.
#[derive(Clone, Debug)]
pub enum Operation {
    /// Publish a new record.
    Add(PackageRecord),
    /// Atomically retire one record and publish another in its place.
    Replace(PackageId, PackageRecord),
    /// Retire a record.
    Remove(PackageId),
}

impl Operation {
    /// Section keys this operation touches, for conflict detection.
    pub fn keys(&self) -> Vec<&PackageId> {
        match self {
            Operation::Add(record) => vec![&record.id],
            Operation::Remove(id) => vec![id],
            Operation::Replace(old, record) => {
                if *old == record.id {
                    vec![old]
                } else {
                    vec![old, &record.id]
                }
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Operation::Add(_) => "add",
            Operation::Replace(..) => "replace",
            Operation::Remove(_) => "remove",
        }
    }
}

/// An [`Operation`] bound to the section it targets.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub section: String,
    pub operation: Operation,
}

impl Proposal {
    pub fn new(section: impl Into<String>, operation: Operation) -> Self {
        Self {
            section: section.into(),
            operation,
        }
    }
}
