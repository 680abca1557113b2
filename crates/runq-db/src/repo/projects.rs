//! Namespace hierarchy and project lookups.

use async_trait::async_trait;
use runq_core::{NamespaceId, ProjectDirectory, ProjectId, ProjectRecord, Result};
use sqlx::PgPool;

use crate::DbError;

const DESCENDANT_PROJECTS: &str = r#"
    WITH RECURSIVE tree AS (
        SELECT id FROM namespaces WHERE id = $1
        UNION
        SELECT n.id FROM namespaces n JOIN tree t ON n.parent_id = t.id
    )
    SELECT p.id
    FROM projects p
    JOIN tree t ON p.namespace_id = t.id
    ORDER BY p.id
"#;

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    namespace_id: i64,
    builds_enabled: bool,
    shared_runners_enabled: bool,
    group_runners_enabled: bool,
    pending_delete: bool,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(row: ProjectRow) -> Self {
        ProjectRecord {
            id: row.id.into(),
            namespace_id: row.namespace_id.into(),
            builds_enabled: row.builds_enabled,
            shared_runners_enabled: row.shared_runners_enabled,
            group_runners_enabled: row.group_runners_enabled,
            pending_delete: row.pending_delete,
        }
    }
}

/// PostgreSQL implementation of ProjectDirectory.
#[derive(Clone)]
pub struct PgProjectDirectory {
    pool: PgPool,
}

impl PgProjectDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectDirectory for PgProjectDirectory {
    async fn descendant_project_ids(&self, namespace_id: NamespaceId) -> Result<Vec<ProjectId>> {
        let ids = sqlx::query_scalar::<_, i64>(DESCENDANT_PROJECTS)
            .bind(namespace_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(ids.into_iter().map(ProjectId::from).collect())
    }

    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<ProjectRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, namespace_id, builds_enabled, shared_runners_enabled,
                   group_runners_enabled, pending_delete
            FROM projects
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(raw)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(rows.into_iter().map(ProjectRecord::from).collect())
    }
}
