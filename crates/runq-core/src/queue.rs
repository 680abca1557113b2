//! Store traits used by the matching engine.
//!
//! Backends (PostgreSQL, in-memory) implement these; the scheduler only ever
//! talks to the traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    Assignment, Error, JobId, NamespaceId, ProjectId, ProjectRecord, ProjectScope, QueuedBuild,
    Result, RunnerId,
};

/// Which queue snapshot strategy serves polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Scan the authoritative builds table.
    DirectScan,
    /// Read the denormalised pending-builds table.
    Projection,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::DirectScan => "direct-scan",
            StrategyKind::Projection => "projection",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "direct-scan" | "builds-table" => Ok(StrategyKind::DirectScan),
            "projection" | "pending-builds" => Ok(StrategyKind::Projection),
            other => Err(Error::InvalidInput(format!(
                "unknown queue strategy: {}",
                other
            ))),
        }
    }
}

/// A source of pending builds for a resolved scope.
///
/// Implementations must yield only `pending` builds in `scope` with
/// `queued_at <= cutoff`, in queue order (see [`crate::ordering`]). The
/// stream is consumed lazily and may be dropped after the first successful
/// claim.
#[async_trait]
pub trait QueueSnapshotStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn fetch<'a>(
        &'a self,
        scope: &ProjectScope,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'a, Result<QueuedBuild>>;

    /// Number of builds `fetch` would yield for the same arguments.
    async fn depth(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Conditional `pending -> running` transition of a single build.
#[async_trait]
pub trait BuildClaimer: Send + Sync {
    /// Claim `job_id` for `runner_id` if it is still pending and not locked
    /// by a concurrent claim. `Ok(None)` means another runner got there
    /// first; it is not an error.
    async fn try_claim(&self, job_id: JobId, runner_id: RunnerId) -> Result<Option<Assignment>>;
}

/// Read-only view of namespaces and projects.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    /// Projects in `namespace_id` and all of its descendant namespaces.
    async fn descendant_project_ids(&self, namespace_id: NamespaceId) -> Result<Vec<ProjectId>>;

    /// Records for the given projects; unknown ids are omitted.
    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRecord>>;
}
