//! Direct scan of the authoritative `ci_builds` table, and the build claimer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use runq_core::{
    Assignment, BuildClaimer, JobId, ProjectScope, QueueSnapshotStrategy, QueuedBuild, Result,
    RunnerId, StrategyKind,
};
use sqlx::PgPool;
use tracing::debug;

use super::queue_page::{DEFAULT_PAGE_SIZE, QueueQueries, paged_queue};
use crate::DbError;

pub(crate) const INSTANCE_QUEUE: &str = r#"
    SELECT b.id AS job_id, b.project_id, b.namespace_id, b.tag_list, b.ref_protected, b.queued_at
    FROM ci_builds b
    JOIN projects p ON p.id = b.project_id
    WHERE b.status = 'pending'
      AND b.queued_at <= $1
      AND ($2::timestamptz IS NULL OR (b.queued_at, b.id) > ($2::timestamptz, $3::bigint))
      AND p.shared_runners_enabled
      AND p.builds_enabled
      AND NOT p.pending_delete
    ORDER BY b.queued_at ASC, b.id ASC
    LIMIT $4
"#;

pub(crate) const PROJECTS_QUEUE: &str = r#"
    SELECT b.id AS job_id, b.project_id, b.namespace_id, b.tag_list, b.ref_protected, b.queued_at
    FROM ci_builds b
    WHERE b.status = 'pending'
      AND b.queued_at <= $1
      AND ($2::timestamptz IS NULL OR (b.queued_at, b.id) > ($2::timestamptz, $3::bigint))
      AND b.project_id = ANY($5)
    ORDER BY b.queued_at ASC, b.id ASC
    LIMIT $4
"#;

const INSTANCE_DEPTH: &str = r#"
    SELECT COUNT(*)
    FROM ci_builds b
    JOIN projects p ON p.id = b.project_id
    WHERE b.status = 'pending'
      AND b.queued_at <= $1
      AND p.shared_runners_enabled
      AND p.builds_enabled
      AND NOT p.pending_delete
"#;

const PROJECTS_DEPTH: &str = r#"
    SELECT COUNT(*)
    FROM ci_builds b
    WHERE b.status = 'pending'
      AND b.queued_at <= $1
      AND b.project_id = ANY($2)
"#;

/// Row lock is taken with SKIP LOCKED: a build another poll is claiming right
/// now is treated exactly like one that is no longer pending.
const CLAIM: &str = r#"
    UPDATE ci_builds
    SET status = 'running', runner_id = $2, started_at = NOW(), updated_at = NOW()
    WHERE id = (
        SELECT id FROM ci_builds
        WHERE id = $1 AND status = 'pending'
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, runner_id, started_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct ClaimedRow {
    id: i64,
    runner_id: i64,
    started_at: DateTime<Utc>,
}

/// Direct-scan strategy and claimer over `ci_builds`.
#[derive(Clone)]
pub struct PgBuildsTable {
    pool: PgPool,
    page_size: i64,
}

impl PgBuildsTable {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Number of builds read per round trip while walking the queue.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl QueueSnapshotStrategy for PgBuildsTable {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectScan
    }

    fn fetch<'a>(
        &'a self,
        scope: &ProjectScope,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'a, Result<QueuedBuild>> {
        let queries = QueueQueries {
            instance: INSTANCE_QUEUE,
            projects: PROJECTS_QUEUE,
        };
        paged_queue(&self.pool, queries, scope, cutoff, self.page_size)
    }

    async fn depth(&self, scope: &ProjectScope, cutoff: DateTime<Utc>) -> Result<u64> {
        let count: i64 = match scope.project_ids() {
            None => {
                sqlx::query_scalar::<_, i64>(INSTANCE_DEPTH)
                    .bind(cutoff)
                    .fetch_one(&self.pool)
                    .await
            }
            Some(ids) if ids.is_empty() => return Ok(0),
            Some(ids) => {
                sqlx::query_scalar::<_, i64>(PROJECTS_DEPTH)
                    .bind(cutoff)
                    .bind(ids)
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(DbError::from)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl BuildClaimer for PgBuildsTable {
    async fn try_claim(&self, job_id: JobId, runner_id: RunnerId) -> Result<Option<Assignment>> {
        let claimed = sqlx::query_as::<_, ClaimedRow>(CLAIM)
            .bind(job_id.get())
            .bind(runner_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        let Some(row) = claimed else {
            debug!(job_id = %job_id, runner_id = %runner_id, "Build already taken or locked");
            return Ok(None);
        };

        Ok(Some(Assignment {
            job_id: row.id.into(),
            runner_id: row.runner_id.into(),
            claimed_at: row.started_at,
        }))
    }
}
