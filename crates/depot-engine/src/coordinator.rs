//! The transaction coordinator: the only write path into the index.
//!
//! A [`Transaction`] pins the snapshot it was opened against as its
//! base; validation reads that fixed view and commit hands the proposal
//! batch to the index with the base sequence for commit-time conflict
//! detection. No lock is held across the validation window, so
//! concurrent transactions proceed freely and a lost race surfaces as a
//! retryable conflict rather than blocking.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use depot_config::{Config, RemovalPolicy};
use depot_core::{
    ContentStore, IndexStore, Operation, PackageId, PackageRecord, Proposal, Snapshot,
    SnapshotManager,
};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

/// An in-flight set of proposed mutations over declared sections.
///
/// Holds its base snapshot pinned for its whole lifetime; dropping the
/// transaction (commit, abort or any error path) releases the pin.
pub struct Transaction {
    base: Snapshot,
    sections: Vec<String>,
    proposals: Vec<Proposal>,
    deadline: Instant,
}

impl Transaction {
    /// The committed sequence this transaction builds on.
    pub fn base_seq(&self) -> u64 {
        self.base.seq()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Serializes and validates publish/remove/replace operations and
/// commits them atomically.
pub struct TransactionCoordinator {
    content: Arc<ContentStore>,
    index: Arc<IndexStore>,
    snapshots: SnapshotManager,
    sections: Vec<String>,
    timeout: Duration,
    removal_policy: RemovalPolicy,
}

impl TransactionCoordinator {
    pub fn new(
        config: &Config,
        content: Arc<ContentStore>,
        index: Arc<IndexStore>,
        snapshots: SnapshotManager,
    ) -> Self {
        Self {
            content,
            index,
            snapshots,
            sections: config.section_names(),
            timeout: config.transaction.timeout(),
            removal_policy: config.transaction.removal_policy,
        }
    }

    /// Opens a transaction over the given sections.
    ///
    /// Pins the current snapshot as the transaction's base and stamps
    /// its deadline from the configured timeout.
    pub fn begin(&self, sections: &[&str]) -> Result<Transaction> {
        if sections.is_empty() {
            return Err(EngineError::NoDeclaredSections);
        }

        let mut declared = Vec::new();
        for &section in sections {
            if !self.sections.iter().any(|s| s == section) {
                return Err(EngineError::UnknownSection(section.to_string()));
            }
            if !declared.iter().any(|s| s == section) {
                declared.push(section.to_string());
            }
        }

        let base = self.snapshots.acquire()?;
        debug!(base = base.seq(), sections = ?declared, "opened transaction");
        Ok(Transaction {
            base,
            sections: declared,
            proposals: Vec::new(),
            deadline: Instant::now() + self.timeout,
        })
    }

    /// Adds an operation to the transaction's proposal set.
    pub fn propose(
        &self,
        txn: &mut Transaction,
        section: &str,
        operation: Operation,
    ) -> Result<()> {
        if !txn.sections.iter().any(|s| s == section) {
            return Err(EngineError::SectionNotDeclared(section.to_string()));
        }
        debug!(section, op = operation.describe(), "proposed operation");
        txn.proposals.push(Proposal::new(section, operation));
        Ok(())
    }

    /// Validates and atomically commits the transaction.
    ///
    /// Returns the new snapshot sequence. A transaction past its
    /// deadline is aborted with [`EngineError::TransactionTimeout`]; a
    /// batch that lost a commit race surfaces the store's conflict
    /// error, and the caller re-proposes against the latest snapshot.
    /// An empty transaction commits to its base sequence without
    /// creating a new snapshot.
    pub fn commit(&self, txn: Transaction) -> Result<u64> {
        if txn.expired() {
            warn!(base = txn.base_seq(), "transaction exceeded its deadline");
            return Err(EngineError::TransactionTimeout);
        }
        if txn.proposals.is_empty() {
            return Ok(txn.base_seq());
        }

        self.validate(&txn)?;

        let seq = self.index.apply(txn.base_seq(), &txn.proposals)?;
        info!(seq, ops = txn.proposals.len(), "committed transaction");
        Ok(seq)
    }

    /// Discards the transaction with no visible effect.
    pub fn abort(&self, txn: Transaction) {
        debug!(
            base = txn.base_seq(),
            proposals = txn.proposals.len(),
            "aborted transaction"
        );
    }

    /// Pre-commit validation against the transaction's base snapshot.
    ///
    /// Simulates the batch per section to enforce key uniqueness, target
    /// existence and the referential content check, then applies the
    /// removal dependency policy to the resulting state.
    fn validate(&self, txn: &Transaction) -> Result<()> {
        for section in &txn.sections {
            let mut state: HashMap<PackageId, PackageRecord> = txn
                .base
                .packages(section)?
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect();
            let mut removed: Vec<PackageId> = Vec::new();

            for proposal in txn.proposals.iter().filter(|p| &p.section == section) {
                match &proposal.operation {
                    Operation::Add(record) => {
                        self.check_content(record)?;
                        self.check_unique(section, &state, record)?;
                        state.insert(record.id.clone(), record.clone());
                    }
                    Operation::Remove(id) => {
                        self.take_live(section, &mut state, id)?;
                        removed.push(id.clone());
                    }
                    Operation::Replace(old, record) => {
                        self.take_live(section, &mut state, old)?;
                        self.check_content(record)?;
                        self.check_unique(section, &state, record)?;
                        state.insert(record.id.clone(), record.clone());
                        removed.push(old.clone());
                    }
                }
            }

            for id in &removed {
                self.check_dependents(section, &state, id)?;
            }
        }
        Ok(())
    }

    fn check_content(&self, record: &PackageRecord) -> Result<()> {
        if !self.content.exists(&record.digest) {
            return Err(EngineError::MissingContent {
                id: record.id.to_string(),
                digest: record.digest.clone(),
            });
        }
        Ok(())
    }

    fn check_unique(
        &self,
        section: &str,
        state: &HashMap<PackageId, PackageRecord>,
        record: &PackageRecord,
    ) -> Result<()> {
        if state.contains_key(&record.id) {
            return Err(EngineError::DuplicatePackage {
                section: section.to_string(),
                id: record.id.to_string(),
            });
        }
        Ok(())
    }

    fn take_live(
        &self,
        section: &str,
        state: &mut HashMap<PackageId, PackageRecord>,
        id: &PackageId,
    ) -> Result<()> {
        state.remove(id).ok_or_else(|| EngineError::MissingPackage {
            section: section.to_string(),
            id: id.to_string(),
        })?;
        Ok(())
    }

    /// Flags records the batch leaves without a satisfying provider for
    /// a dependency on the removed name.
    fn check_dependents(
        &self,
        section: &str,
        state: &HashMap<PackageId, PackageRecord>,
        removed: &PackageId,
    ) -> Result<()> {
        let satisfied = |dep: &depot_core::Dependency| {
            state
                .values()
                .any(|provider| provider.id.name == dep.name && dep.matches(&provider.id.version))
        };

        let mut dependents: Vec<String> = state
            .values()
            .filter(|record| {
                record
                    .dependencies
                    .iter()
                    .any(|dep| dep.name == removed.name && !satisfied(dep))
            })
            .map(|record| record.id.to_string())
            .collect();

        if dependents.is_empty() {
            return Ok(());
        }
        dependents.sort();
        dependents.dedup();

        match self.removal_policy {
            RemovalPolicy::Reject => Err(EngineError::DependencyConflict {
                section: section.to_string(),
                id: removed.to_string(),
                dependents,
            }),
            RemovalPolicy::Warn => {
                warn!(
                    section,
                    removed = %removed,
                    dependents = ?dependents,
                    "removal leaves dependents without a provider"
                );
                Ok(())
            }
        }
    }
}
