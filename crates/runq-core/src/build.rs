//! Build (CI job) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, JobId, NamespaceId, ProjectId, RunnerId, TagSet};

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
}

impl BuildStatus {
    /// The representation stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Created => "created",
            BuildStatus::WaitingForResource => "waiting_for_resource",
            BuildStatus::Preparing => "preparing",
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Canceled => "canceled",
            BuildStatus::Skipped => "skipped",
            BuildStatus::Manual => "manual",
            BuildStatus::Scheduled => "scheduled",
        }
    }

    /// Counts against a namespace's concurrently active job quota.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BuildStatus::Created
                | BuildStatus::WaitingForResource
                | BuildStatus::Preparing
                | BuildStatus::Pending
                | BuildStatus::Running
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Canceled | BuildStatus::Skipped
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "created" => BuildStatus::Created,
            "waiting_for_resource" => BuildStatus::WaitingForResource,
            "preparing" => BuildStatus::Preparing,
            "pending" => BuildStatus::Pending,
            "running" => BuildStatus::Running,
            "success" => BuildStatus::Success,
            "failed" => BuildStatus::Failed,
            "canceled" => BuildStatus::Canceled,
            "skipped" => BuildStatus::Skipped,
            "manual" => BuildStatus::Manual,
            "scheduled" => BuildStatus::Scheduled,
            other => {
                return Err(Error::InvalidInput(format!("unknown build status: {}", other)));
            }
        })
    }
}

/// A pending build as emitted by a queue snapshot strategy.
///
/// Both strategies produce exactly this shape so that filtering and claiming
/// never need to know where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueuedBuild {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub namespace_id: NamespaceId,
    pub tags: TagSet,
    pub ref_protected: bool,
    pub queued_at: DateTime<Utc>,
}

/// The outcome of a successful claim. At most one ever exists per build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: JobId,
    pub runner_id: RunnerId,
    pub claimed_at: DateTime<Utc>,
}

/// Why the pipeline layer refused to enqueue a build.
///
/// Rejected builds never reach `pending`, so the matching engine never sees
/// them; the variants exist so callers can explain an empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRejection {
    /// The namespace already has its plan's maximum of active jobs.
    QuotaExceeded,
}

impl JobRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            JobRejection::QuotaExceeded => "quota_exceeded",
        }
    }
}
