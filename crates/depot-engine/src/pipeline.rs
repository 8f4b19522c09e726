//! The ingestion pipeline: the production [`Job`] implementation.
//!
//! Each task kind runs as a cooperative sequence of stages. Archive
//! inspection and content-store I/O run on the blocking pool, commits
//! go through the coordinator, and retryable commit failures re-propose
//! against the latest snapshot with exponential backoff up to the
//! configured bound. Cancellation is checked between stages; a
//! cancelled publish leaves at most an orphaned blob behind, which the
//! append-only content store tolerates.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use depot_archive::inspect;
use depot_core::{ContentStore, Operation, PackageId, PackageRecord, SnapshotManager};
use tracing::{debug, info, warn};

use crate::{
    coordinator::{Transaction, TransactionCoordinator},
    error::{EngineError, Result},
    scheduler::{Job, JobFuture, JobOutcome, TaskKind, TaskSignals},
};

#[derive(Clone)]
pub struct Pipeline {
    content: Arc<ContentStore>,
    coordinator: Arc<TransactionCoordinator>,
    snapshots: SnapshotManager,
    commit_retries: u32,
    retry_backoff: Duration,
}

impl Pipeline {
    pub fn new(
        content: Arc<ContentStore>,
        coordinator: Arc<TransactionCoordinator>,
        snapshots: SnapshotManager,
        commit_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            content,
            coordinator,
            snapshots,
            commit_retries,
            retry_backoff,
        }
    }

    async fn publish(
        &self,
        section: &str,
        archive: Arc<Vec<u8>>,
        principal: &str,
        signals: &TaskSignals,
    ) -> Result<JobOutcome> {
        if signals.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let bytes = Arc::clone(&archive);
        signals.suspend();
        let info = run_blocking(move || inspect(&bytes).map_err(EngineError::from)).await?;
        signals.resume();
        debug!(id = %info.id, section, "archive inspected");

        if signals.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let content = Arc::clone(&self.content);
        let bytes = Arc::clone(&archive);
        signals.suspend();
        let digest = run_blocking(move || content.put(&bytes).map_err(EngineError::from)).await?;
        signals.resume();

        let section = section.to_string();
        let outcome = self
            .commit_with_retry(signals, || {
                let record = PackageRecord {
                    id: info.id.clone(),
                    digest: digest.clone(),
                    manifest_digest: info.manifest_digest.clone(),
                    dependencies: info.dependencies.clone(),
                    published_at: Utc::now().timestamp(),
                    published_by: principal.to_string(),
                };
                let mut txn = self.coordinator.begin(&[&section])?;
                self.coordinator
                    .propose(&mut txn, &section, Operation::Add(record))?;
                Ok(txn)
            })
            .await?;

        if let JobOutcome::Completed(seq) = outcome {
            info!(id = %info.id, section, seq, principal, "published package");
        }
        Ok(outcome)
    }

    async fn remove(
        &self,
        section: &str,
        id: &PackageId,
        principal: &str,
        signals: &TaskSignals,
    ) -> Result<JobOutcome> {
        let outcome = self
            .commit_with_retry(signals, || {
                let mut txn = self.coordinator.begin(&[section])?;
                self.coordinator
                    .propose(&mut txn, section, Operation::Remove(id.clone()))?;
                Ok(txn)
            })
            .await?;

        if let JobOutcome::Completed(seq) = outcome {
            info!(%id, section, seq, principal, "removed package");
        }
        Ok(outcome)
    }

    /// Re-hashes a published package's stored blob against its address.
    ///
    /// Completes at the sequence the record was read at; a missing or
    /// corrupted blob fails the task with an integrity error.
    async fn verify(
        &self,
        section: &str,
        id: &PackageId,
        signals: &TaskSignals,
    ) -> Result<JobOutcome> {
        let snapshot = self.snapshots.acquire()?;
        let record = snapshot
            .get(section, id)?
            .ok_or_else(|| EngineError::MissingPackage {
                section: section.to_string(),
                id: id.to_string(),
            })?;

        if signals.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let content = Arc::clone(&self.content);
        let digest = record.digest;
        signals.suspend();
        run_blocking(move || content.get(&digest).map(drop).map_err(EngineError::from)).await?;
        signals.resume();

        debug!(%id, section, seq = snapshot.seq(), "verified package content");
        Ok(JobOutcome::Completed(snapshot.seq()))
    }

    /// Builds and commits a transaction, re-proposing against the
    /// latest snapshot on retryable failures.
    async fn commit_with_retry(
        &self,
        signals: &TaskSignals,
        build: impl Fn() -> Result<Transaction>,
    ) -> Result<JobOutcome> {
        let mut attempt = 0;
        loop {
            if signals.is_cancelled() {
                return Ok(JobOutcome::Cancelled);
            }

            let txn = build()?;
            let coordinator = Arc::clone(&self.coordinator);
            signals.suspend();
            let committed = run_blocking(move || coordinator.commit(txn)).await;
            signals.resume();
            match committed {
                Ok(seq) => return Ok(JobOutcome::Completed(seq)),
                Err(err) if err.is_retryable() && attempt < self.commit_retries => {
                    attempt += 1;
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(%err, attempt, ?backoff, "commit failed, re-proposing");
                    signals.suspend();
                    tokio::time::sleep(backoff).await;
                    signals.resume();
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| EngineError::Custom(format!("blocking stage failed: {err}")))?
}

impl Job for Pipeline {
    fn run(&self, kind: TaskKind, signals: TaskSignals) -> JobFuture {
        let pipeline = self.clone();
        Box::pin(async move {
            match kind {
                TaskKind::Publish {
                    section,
                    archive,
                    principal,
                } => {
                    pipeline
                        .publish(&section, archive, &principal, &signals)
                        .await
                }
                TaskKind::Remove {
                    section,
                    id,
                    principal,
                } => pipeline.remove(&section, &id, &principal, &signals).await,
                TaskKind::Verify { section, id } => {
                    pipeline.verify(&section, &id, &signals).await
                }
            }
        })
    }
}
