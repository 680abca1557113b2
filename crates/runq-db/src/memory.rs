//! In-memory store implementing the same traits as the PostgreSQL backend.
//!
//! The builds table and the pending-builds projection are kept as separate
//! maps. Every write that changes a build's status goes through
//! [`State::sync_projection`], mirroring the database triggers, so the two
//! strategies observe the same queue at any instant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use runq_core::ordering::sort_queue;
use runq_core::{
    Assignment, BuildClaimer, BuildStatus, Error, JobId, NamespaceId, ProjectDirectory, ProjectId,
    ProjectRecord, ProjectScope, QueueSnapshotStrategy, QueuedBuild, Result, RunnerId,
    StrategyKind, TagSet,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A row of the in-memory builds table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRow {
    pub id: JobId,
    pub project_id: ProjectId,
    pub namespace_id: NamespaceId,
    pub status: BuildStatus,
    pub tags: TagSet,
    pub ref_protected: bool,
    pub queued_at: Option<DateTime<Utc>>,
    pub runner_id: Option<RunnerId>,
    pub started_at: Option<DateTime<Utc>>,
}

impl BuildRow {
    fn queued(&self) -> Option<QueuedBuild> {
        let queued_at = self.queued_at?;
        (self.status == BuildStatus::Pending).then(|| QueuedBuild {
            job_id: self.id,
            project_id: self.project_id,
            namespace_id: self.namespace_id,
            tags: self.tags.clone(),
            ref_protected: self.ref_protected,
            queued_at,
        })
    }
}

/// A build to enqueue, as the pipeline layer would create it.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub project_id: ProjectId,
    pub tags: TagSet,
    pub ref_protected: bool,
    pub queued_at: DateTime<Utc>,
}

impl NewBuild {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            tags: TagSet::new(),
            ref_protected: false,
            queued_at: Utc::now(),
        }
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn protected(mut self) -> Self {
        self.ref_protected = true;
        self
    }

    pub fn queued_at(mut self, queued_at: DateTime<Utc>) -> Self {
        self.queued_at = queued_at;
        self
    }
}

#[derive(Debug, Clone)]
struct PendingRow {
    build: QueuedBuild,
    instance_runners_enabled: bool,
}

#[derive(Debug, Default)]
struct State {
    namespaces: HashMap<NamespaceId, Option<NamespaceId>>,
    projects: BTreeMap<ProjectId, ProjectRecord>,
    builds: BTreeMap<JobId, BuildRow>,
    pending: BTreeMap<JobId, PendingRow>,
    next_job_id: i64,
    projection_available: bool,
}

impl State {
    fn sync_projection(&mut self, job_id: JobId) {
        let queued = self.builds.get(&job_id).and_then(BuildRow::queued);
        match queued {
            Some(build) => {
                let instance_runners_enabled = self
                    .projects
                    .get(&build.project_id)
                    .is_some_and(ProjectRecord::accepts_instance_runners);
                self.pending.insert(
                    job_id,
                    PendingRow {
                        build,
                        instance_runners_enabled,
                    },
                );
            }
            None => {
                self.pending.remove(&job_id);
            }
        }
    }

    fn instance_enabled(&self, project_id: ProjectId) -> bool {
        self.projects
            .get(&project_id)
            .is_some_and(ProjectRecord::accepts_instance_runners)
    }

    fn descendants(&self, root: NamespaceId) -> BTreeSet<NamespaceId> {
        let mut tree = BTreeSet::new();
        if !self.namespaces.contains_key(&root) {
            return tree;
        }
        tree.insert(root);
        // Parents are stored on the child, so expand until no new members appear.
        loop {
            let before = tree.len();
            for (id, parent) in &self.namespaces {
                if parent.is_some_and(|p| tree.contains(&p)) {
                    tree.insert(*id);
                }
            }
            if tree.len() == before {
                return tree;
            }
        }
    }
}

/// Shared in-memory store. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                next_job_id: 1,
                projection_available: true,
                ..State::default()
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_namespace(&self, id: NamespaceId, parent: Option<NamespaceId>) {
        self.write().namespaces.insert(id, parent);
    }

    /// Insert or replace a project; pending builds pick up the new flags.
    pub fn put_project(&self, project: ProjectRecord) {
        let mut state = self.write();
        let project_id = project.id;
        state.projects.insert(project_id, project);
        let affected: Vec<JobId> = state
            .pending
            .values()
            .filter(|row| row.build.project_id == project_id)
            .map(|row| row.build.job_id)
            .collect();
        for job_id in affected {
            state.sync_projection(job_id);
        }
    }

    /// Create a pending build. Fails if the project is unknown.
    pub fn enqueue(&self, build: NewBuild) -> Result<JobId> {
        let mut state = self.write();
        let namespace_id = state
            .projects
            .get(&build.project_id)
            .map(|p| p.namespace_id)
            .ok_or_else(|| Error::NotFound(format!("project {}", build.project_id)))?;

        let id = JobId::new(state.next_job_id);
        state.next_job_id += 1;
        state.builds.insert(
            id,
            BuildRow {
                id,
                project_id: build.project_id,
                namespace_id,
                status: BuildStatus::Pending,
                tags: build.tags,
                ref_protected: build.ref_protected,
                queued_at: Some(build.queued_at),
                runner_id: None,
                started_at: None,
            },
        );
        state.sync_projection(id);
        Ok(id)
    }

    /// Move a build to another status, as cancellation or result reporting would.
    pub fn set_status(&self, job_id: JobId, status: BuildStatus) -> Result<()> {
        let mut state = self.write();
        let row = state
            .builds
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("build {}", job_id)))?;
        row.status = status;
        state.sync_projection(job_id);
        Ok(())
    }

    pub fn build(&self, job_id: JobId) -> Option<BuildRow> {
        self.read().builds.get(&job_id).cloned()
    }

    /// Simulate the projection table becoming unreachable.
    pub fn set_projection_available(&self, available: bool) {
        self.write().projection_available = available;
    }

    /// Direct-scan strategy over this store.
    pub fn builds_table(&self) -> MemoryBuildsTable {
        MemoryBuildsTable {
            store: self.clone(),
        }
    }

    /// Projection strategy over this store.
    pub fn pending_builds(&self) -> MemoryPendingBuilds {
        MemoryPendingBuilds {
            store: self.clone(),
        }
    }

    fn scan_builds(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Vec<QueuedBuild> {
        let state = self.read();
        let mut queued: Vec<QueuedBuild> = state
            .builds
            .values()
            .filter_map(BuildRow::queued)
            .filter(|b| b.queued_at <= cutoff)
            .filter(|b| scope.admits(b.project_id, state.instance_enabled(b.project_id)))
            .collect();
        sort_queue(&mut queued);
        queued
    }

    fn scan_pending(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Result<Vec<QueuedBuild>> {
        let state = self.read();
        if !state.projection_available {
            return Err(Error::Backend("pending builds projection is unavailable".to_string()));
        }
        let mut queued: Vec<QueuedBuild> = state
            .pending
            .values()
            .filter(|row| row.build.queued_at <= cutoff)
            .filter(|row| scope.admits(row.build.project_id, row.instance_runners_enabled))
            .map(|row| row.build.clone())
            .collect();
        sort_queue(&mut queued);
        Ok(queued)
    }
}

#[async_trait]
impl BuildClaimer for MemoryStore {
    /// Compare-and-swap on the status under one short write lock.
    async fn try_claim(&self, job_id: JobId, runner_id: RunnerId) -> Result<Option<Assignment>> {
        let mut state = self.write();
        let Some(row) = state.builds.get_mut(&job_id) else {
            return Ok(None);
        };
        if row.status != BuildStatus::Pending {
            return Ok(None);
        }

        let claimed_at = Utc::now();
        row.status = BuildStatus::Running;
        row.runner_id = Some(runner_id);
        row.started_at = Some(claimed_at);
        state.sync_projection(job_id);

        Ok(Some(Assignment {
            job_id,
            runner_id,
            claimed_at,
        }))
    }
}

#[async_trait]
impl ProjectDirectory for MemoryStore {
    async fn descendant_project_ids(&self, namespace_id: NamespaceId) -> Result<Vec<ProjectId>> {
        let state = self.read();
        let tree = state.descendants(namespace_id);
        Ok(state
            .projects
            .values()
            .filter(|p| tree.contains(&p.namespace_id))
            .map(|p| p.id)
            .collect())
    }

    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRecord>> {
        let state = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.projects.get(id).cloned())
            .collect())
    }
}

/// Direct-scan strategy over a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryBuildsTable {
    store: MemoryStore,
}

#[async_trait]
impl QueueSnapshotStrategy for MemoryBuildsTable {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectScan
    }

    fn fetch<'a>(
        &'a self,
        scope: &ProjectScope,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'a, Result<QueuedBuild>> {
        stream::iter(self.store.scan_builds(scope, cutoff).into_iter().map(Ok)).boxed()
    }

    async fn depth(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self.store.scan_builds(scope, cutoff).len() as u64)
    }
}

/// Projection strategy over a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryPendingBuilds {
    store: MemoryStore,
}

#[async_trait]
impl QueueSnapshotStrategy for MemoryPendingBuilds {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Projection
    }

    fn fetch<'a>(
        &'a self,
        scope: &ProjectScope,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'a, Result<QueuedBuild>> {
        match self.store.scan_pending(scope, cutoff) {
            Ok(queued) => stream::iter(queued.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn depth(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self.store.scan_pending(scope, cutoff)?.len() as u64)
    }
}
