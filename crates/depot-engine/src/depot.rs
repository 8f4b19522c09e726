//! The composition root: the engine as one assembled service.
//!
//! [`Depot::open`] builds the component tree in dependency order from a
//! validated configuration, with every collaborator passed explicitly.
//! The resulting value carries the full public surface an API gateway
//! consumes: snapshot-bound queries, and write operations that pass the
//! auth gate before a task is enqueued.

use std::sync::Arc;

use depot_config::Config;
use depot_core::{ContentStore, IndexStore, PackageId, Snapshot, SnapshotManager};
use tracing::info;

use crate::{
    auth::{AuthGate, SignedToken},
    coordinator::TransactionCoordinator,
    error::{EngineError, Result},
    pipeline::Pipeline,
    scheduler::{TaskId, TaskKind, TaskScheduler, TaskState},
    SnapshotId,
};

pub struct Depot {
    config: Config,
    auth: AuthGate,
    snapshots: SnapshotManager,
    scheduler: TaskScheduler,
}

impl Depot {
    /// Assembles the engine from its configuration.
    ///
    /// Opens the content and index stores at the configured paths and
    /// wires coordinator, pipeline and scheduler on top. Must be called
    /// within a tokio runtime; the scheduler spawns its dispatcher.
    pub fn open(config: Config) -> Result<Self> {
        let content = Arc::new(ContentStore::open(&config.storage.content_path)?);
        let index = Arc::new(IndexStore::open(&config.storage.index_path)?);
        let snapshots = SnapshotManager::new(Arc::clone(&index));
        let auth = AuthGate::new(&config.auth)?;
        let coordinator = Arc::new(TransactionCoordinator::new(
            &config,
            Arc::clone(&content),
            index,
            snapshots.clone(),
        ));
        let pipeline = Pipeline::new(
            content,
            coordinator,
            snapshots.clone(),
            config.scheduler.commit_retries(),
            config.scheduler.retry_backoff(),
        );
        let scheduler = TaskScheduler::new(
            Arc::new(pipeline),
            config.scheduler.worker_count(),
            config.scheduler.queue_depth(),
        );

        info!(
            sections = config.sections.len(),
            workers = config.scheduler.worker_count(),
            "depot assembled"
        );
        Ok(Self {
            config,
            auth,
            snapshots,
            scheduler,
        })
    }

    /// Declared section names, in configuration order.
    pub fn sections(&self) -> Vec<String> {
        self.config.section_names()
    }

    /// The latest committed snapshot sequence.
    pub fn current(&self) -> Result<SnapshotId> {
        Ok(self.snapshots.current()?)
    }

    /// Acquires the latest snapshot for querying.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.snapshots.acquire()?)
    }

    /// Acquires a specific historical snapshot, if still retained.
    pub fn snapshot_at(&self, seq: SnapshotId) -> Result<Snapshot> {
        Ok(self.snapshots.acquire_at(seq)?)
    }

    /// Mints a token for operator tooling.
    pub fn issue_token(&self, principal: &str) -> Result<SignedToken> {
        Ok(self.auth.issue(principal)?)
    }

    /// Submits an archive for publication into `section`.
    pub fn publish(
        &self,
        token: &SignedToken,
        section: &str,
        archive: Vec<u8>,
    ) -> Result<TaskId> {
        let principal = self.auth.authorize(token, section, "publish")?;
        self.check_section(section)?;
        self.scheduler.submit(TaskKind::Publish {
            section: section.to_string(),
            archive: Arc::new(archive),
            principal: principal.into(),
        })
    }

    /// Submits removal of a package from `section`.
    pub fn remove(&self, token: &SignedToken, section: &str, id: PackageId) -> Result<TaskId> {
        let principal = self.auth.authorize(token, section, "remove")?;
        self.check_section(section)?;
        self.scheduler.submit(TaskKind::Remove {
            section: section.to_string(),
            id,
            principal: principal.into(),
        })
    }

    /// Submits an integrity check of a published package's content.
    pub fn verify(&self, token: &SignedToken, section: &str, id: PackageId) -> Result<TaskId> {
        self.auth.authorize(token, section, "verify")?;
        self.check_section(section)?;
        self.scheduler.submit(TaskKind::Verify {
            section: section.to_string(),
            id,
        })
    }

    pub fn task_status(&self, id: TaskId) -> Result<TaskState> {
        self.scheduler.status(id)
    }

    /// Waits for the task to reach a terminal state.
    pub async fn wait(&self, id: TaskId) -> Result<TaskState> {
        self.scheduler.wait(id).await
    }

    /// Requests cooperative cancellation of a task.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        self.scheduler.cancel(id)
    }

    fn check_section(&self, section: &str) -> Result<()> {
        if !self.config.has_section(section) {
            return Err(EngineError::UnknownSection(section.to_string()));
        }
        Ok(())
    }
}
