//! Keyset-paged reads of a pending queue.
//!
//! Each page is loaded with `fetch_all`, so the pool connection goes back
//! before the caller sees the first build. A poll therefore never holds a
//! connection while it claims, and pages after the first are only read if
//! the caller keeps pulling.

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use runq_core::{ProjectScope, QueuedBuild, Result};
use sqlx::PgPool;

use crate::DbError;

/// Builds read per round trip unless a strategy is configured otherwise.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// A pending build row, shared by both PostgreSQL strategies.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QueuedBuildRow {
    pub job_id: i64,
    pub project_id: i64,
    pub namespace_id: i64,
    pub tag_list: Vec<String>,
    pub ref_protected: bool,
    pub queued_at: DateTime<Utc>,
}

impl From<QueuedBuildRow> for QueuedBuild {
    fn from(row: QueuedBuildRow) -> Self {
        QueuedBuild {
            job_id: row.job_id.into(),
            project_id: row.project_id.into(),
            namespace_id: row.namespace_id.into(),
            tags: row.tag_list.into(),
            ref_protected: row.ref_protected,
            queued_at: row.queued_at,
        }
    }
}

/// Queue statements for one table.
///
/// Parameters: `$1` cutoff, `$2`/`$3` the `(queued_at, id)` of the last build
/// already returned (both NULL for the first page), `$4` page size and, for
/// `projects`, `$5` the project ids.
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueQueries {
    pub instance: &'static str,
    pub projects: &'static str,
}

/// Where the next page starts.
#[derive(Debug, Clone, Copy)]
enum Page {
    First,
    After(DateTime<Utc>, i64),
    Done,
}

pub(crate) fn paged_queue<'a>(
    pool: &'a PgPool,
    queries: QueueQueries,
    scope: &ProjectScope,
    cutoff: DateTime<Utc>,
    page_size: i64,
) -> BoxStream<'a, Result<QueuedBuild>> {
    let project_ids = scope.project_ids();
    if project_ids.as_ref().is_some_and(Vec::is_empty) {
        return stream::empty().boxed();
    }
    let page_size = page_size.max(1);

    stream::try_unfold(Page::First, move |page| {
        next_page(pool, queries, project_ids.clone(), cutoff, page_size, page)
    })
    .map_ok(|rows| stream::iter(rows.into_iter().map(|row| Ok(QueuedBuild::from(row)))))
    .try_flatten()
    .boxed()
}

async fn next_page(
    pool: &PgPool,
    queries: QueueQueries,
    project_ids: Option<Vec<i64>>,
    cutoff: DateTime<Utc>,
    page_size: i64,
    page: Page,
) -> Result<Option<(Vec<QueuedBuildRow>, Page)>> {
    let after = match page {
        Page::Done => return Ok(None),
        Page::First => None,
        Page::After(queued_at, id) => Some((queued_at, id)),
    };

    let sql = if project_ids.is_some() {
        queries.projects
    } else {
        queries.instance
    };
    let mut query = sqlx::query_as::<_, QueuedBuildRow>(sql)
        .bind(cutoff)
        .bind(after.map(|(queued_at, _)| queued_at))
        .bind(after.map(|(_, id)| id))
        .bind(page_size);
    if let Some(ids) = project_ids {
        query = query.bind(ids);
    }
    let rows = query.fetch_all(pool).await.map_err(DbError::from)?;

    let next = match rows.last() {
        Some(last) if rows.len() as i64 >= page_size => Page::After(last.queued_at, last.job_id),
        _ => Page::Done,
    };
    Ok(Some((rows, next)))
}
