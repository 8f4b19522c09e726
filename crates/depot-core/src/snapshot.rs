//! Versioned, refcounted repository snapshots.
//!
//! A [`Snapshot`] is a pinned, immutable view of the index at one commit
//! sequence. Pins are reference counts per sequence; dropping the last
//! handle for the oldest pinned sequence lets the manager reclaim row
//! versions nothing can see anymore. Acquire and release are strictly
//! paired through the handle's `Drop`, so the counts stay correct on
//! every exit path.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use tracing::{trace, warn};

use crate::{
    error::{Result, StoreError},
    index::IndexStore,
    types::{PackageId, PackageRecord},
    version::{compare_versions, Dependency},
};

pub struct SnapshotManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    index: Arc<IndexStore>,
    state: Mutex<PinState>,
}

#[derive(Default)]
struct PinState {
    pins: BTreeMap<u64, usize>,
    /// Lowest sequence still acquirable; raised by reclamation.
    floor: u64,
}

impl SnapshotManager {
    pub fn new(index: Arc<IndexStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                index,
                state: Mutex::new(PinState::default()),
            }),
        }
    }

    /// The latest committed sequence number.
    pub fn current(&self) -> Result<u64> {
        self.inner.index.head()
    }

    /// Pins and returns the latest snapshot.
    pub fn acquire(&self) -> Result<Snapshot> {
        let mut state = self.inner.state.lock()?;
        let seq = self.inner.index.head()?;
        *state.pins.entry(seq).or_insert(0) += 1;
        trace!(seq, "acquired snapshot");
        Ok(Snapshot {
            seq,
            manager: Arc::clone(&self.inner),
        })
    }

    /// Pins a specific historical sequence.
    ///
    /// Fails with [`StoreError::UnknownSnapshot`] for sequences past the
    /// head and [`StoreError::SnapshotReclaimed`] for sequences whose
    /// superseded rows have already been garbage-collected.
    pub fn acquire_at(&self, seq: u64) -> Result<Snapshot> {
        let mut state = self.inner.state.lock()?;
        let head = self.inner.index.head()?;
        if seq > head {
            return Err(StoreError::UnknownSnapshot {
                requested: seq,
                head,
            });
        }
        if seq < state.floor {
            return Err(StoreError::SnapshotReclaimed(seq));
        }
        *state.pins.entry(seq).or_insert(0) += 1;
        trace!(seq, "acquired historical snapshot");
        Ok(Snapshot {
            seq,
            manager: Arc::clone(&self.inner),
        })
    }
}

impl Clone for SnapshotManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ManagerInner {
    fn release(&self, seq: u64) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };

        let last_pin = match state.pins.get_mut(&seq) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => true,
            None => return,
        };
        if !last_pin {
            return;
        }
        state.pins.remove(&seq);

        // with the oldest pin possibly gone, see how far GC may advance
        let bound = match state.pins.keys().next() {
            Some(&oldest_pinned) => oldest_pinned,
            None => match self.index.head() {
                Ok(head) => head,
                Err(err) => {
                    warn!(%err, "skipping snapshot reclamation");
                    return;
                }
            },
        };

        if bound > state.floor {
            state.floor = bound;
            if let Err(err) = self.index.reclaim_below(bound) {
                warn!(%err, below = bound, "index reclamation failed");
            }
        }
    }
}

/// A pinned, point-in-time view of the repository index.
///
/// All query operations answer exactly as of this snapshot's sequence,
/// regardless of writer progress. Dropping the handle releases the pin.
pub struct Snapshot {
    seq: u64,
    manager: Arc<ManagerInner>,
}

/// Result of a dependency-closure resolution.
#[derive(Debug)]
pub struct Resolution {
    /// Records in the closure, in discovery (breadth-first) order.
    pub packages: Vec<PackageRecord>,
    /// Dependencies no live record satisfies.
    pub missing: Vec<Dependency>,
}

impl Snapshot {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Lists all packages live in `section`.
    pub fn packages(&self, section: &str) -> Result<Vec<PackageRecord>> {
        self.manager.index.list(self.seq, section)
    }

    /// Fetches one exact package record.
    pub fn get(&self, section: &str, id: &PackageId) -> Result<Option<PackageRecord>> {
        self.manager.index.get(self.seq, section, id)
    }

    /// All live versions of `name` in `section`.
    pub fn by_name(&self, section: &str, name: &str) -> Result<Vec<PackageRecord>> {
        self.manager.index.by_name(self.seq, section, name)
    }

    /// Resolves the dependency closure of `name` within `section`.
    ///
    /// Walks breadth-first from the newest live version of `name`; each
    /// dependency resolves to the newest live version satisfying its
    /// constraint. Unsatisfiable dependencies are collected rather than
    /// failing the whole resolution.
    pub fn resolve(&self, section: &str, name: &str) -> Result<Resolution> {
        let mut packages = Vec::new();
        let mut missing = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Dependency> = VecDeque::new();
        queue.push_back(Dependency::unversioned(name));

        while let Some(dep) = queue.pop_front() {
            if !seen.insert(dep.name.clone()) {
                continue;
            }

            let best = self
                .by_name(section, &dep.name)?
                .into_iter()
                .filter(|record| dep.matches(&record.id.version))
                .max_by(|a, b| compare_versions(&a.id.version, &b.id.version));

            match best {
                Some(record) => {
                    queue.extend(record.dependencies.iter().cloned());
                    packages.push(record);
                }
                None => missing.push(dep),
            }
        }

        Ok(Resolution { packages, missing })
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.manager.release(self.seq);
    }
}
