//! Resolves a runner's scope to the projects it may take builds from.

use runq_core::{Error, ProjectDirectory, ProjectScope, Result, Runner, RunnerScope};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns a [`RunnerScope`] into a [`ProjectScope`].
#[derive(Clone)]
pub struct ScopeResolver {
    directory: Arc<dyn ProjectDirectory>,
}

impl ScopeResolver {
    pub fn new(directory: Arc<dyn ProjectDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the scope, failing closed: any lookup error yields an empty
    /// scope, never the instance sentinel.
    pub async fn resolve(&self, runner: &Runner) -> ProjectScope {
        match self.try_resolve(runner).await {
            Ok(scope) => scope,
            Err(e) => {
                warn!(runner_id = %runner.id, error = %e, "Scope resolution failed, using empty scope");
                ProjectScope::empty()
            }
        }
    }

    /// Resolve the scope, reporting lookup failures as [`Error::Hierarchy`].
    pub async fn try_resolve(&self, runner: &Runner) -> Result<ProjectScope> {
        let scope = match &runner.scope {
            RunnerScope::Instance => ProjectScope::Instance,
            RunnerScope::Group { namespace_id } => {
                let ids = self
                    .directory
                    .descendant_project_ids(*namespace_id)
                    .await
                    .map_err(|e| Error::Hierarchy(e.to_string()))?;
                let projects = self
                    .directory
                    .projects(&ids)
                    .await
                    .map_err(|e| Error::Hierarchy(e.to_string()))?;
                projects
                    .iter()
                    .filter(|p| p.accepts_group_runners())
                    .map(|p| p.id)
                    .collect()
            }
            RunnerScope::Project { project_ids } => {
                let projects = self
                    .directory
                    .projects(project_ids)
                    .await
                    .map_err(|e| Error::Hierarchy(e.to_string()))?;
                projects
                    .iter()
                    .filter(|p| p.accepts_project_runners())
                    .map(|p| p.id)
                    .collect()
            }
        };

        if let ProjectScope::Projects(ids) = &scope {
            debug!(runner_id = %runner.id, scope = runner.scope.kind(), projects = ids.len(), "Resolved runner scope");
        }
        Ok(scope)
    }
}
