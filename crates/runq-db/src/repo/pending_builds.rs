//! Projection strategy over the denormalised `ci_pending_builds` table.
//!
//! The table is written only by the triggers installed in the migrations; this
//! module never modifies it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use runq_core::{ProjectScope, QueueSnapshotStrategy, QueuedBuild, Result, StrategyKind};
use sqlx::PgPool;

use super::queue_page::{DEFAULT_PAGE_SIZE, QueueQueries, paged_queue};
use crate::DbError;

const INSTANCE_QUEUE: &str = r#"
    SELECT build_id AS job_id, project_id, namespace_id, tag_list, protected AS ref_protected, queued_at
    FROM ci_pending_builds
    WHERE queued_at <= $1
      AND ($2::timestamptz IS NULL OR (queued_at, build_id) > ($2::timestamptz, $3::bigint))
      AND instance_runners_enabled
    ORDER BY queued_at ASC, build_id ASC
    LIMIT $4
"#;

const PROJECTS_QUEUE: &str = r#"
    SELECT build_id AS job_id, project_id, namespace_id, tag_list, protected AS ref_protected, queued_at
    FROM ci_pending_builds
    WHERE queued_at <= $1
      AND ($2::timestamptz IS NULL OR (queued_at, build_id) > ($2::timestamptz, $3::bigint))
      AND project_id = ANY($5)
    ORDER BY queued_at ASC, build_id ASC
    LIMIT $4
"#;

const INSTANCE_DEPTH: &str = r#"
    SELECT COUNT(*) FROM ci_pending_builds
    WHERE queued_at <= $1 AND instance_runners_enabled
"#;

const PROJECTS_DEPTH: &str = r#"
    SELECT COUNT(*) FROM ci_pending_builds
    WHERE queued_at <= $1 AND project_id = ANY($2)
"#;

/// Projection strategy reading `ci_pending_builds`.
#[derive(Clone)]
pub struct PgPendingBuilds {
    pool: PgPool,
    page_size: i64,
}

impl PgPendingBuilds {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl QueueSnapshotStrategy for PgPendingBuilds {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Projection
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
        let count = match scope.project_ids() {
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
