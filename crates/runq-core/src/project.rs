//! Projects and resolved runner scopes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{NamespaceId, ProjectId};

/// Project attributes that decide whether it may supply builds to runners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub namespace_id: NamespaceId,
    pub builds_enabled: bool,
    pub shared_runners_enabled: bool,
    pub group_runners_enabled: bool,
    /// Scheduled for deletion; treated as already gone.
    pub pending_delete: bool,
}

impl ProjectRecord {
    pub fn new(id: ProjectId, namespace_id: NamespaceId) -> Self {
        Self {
            id,
            namespace_id,
            builds_enabled: true,
            shared_runners_enabled: true,
            group_runners_enabled: true,
            pending_delete: false,
        }
    }

    /// May supply builds to runners registered directly on the project.
    pub fn accepts_project_runners(&self) -> bool {
        self.builds_enabled && !self.pending_delete
    }

    /// May supply builds to runners registered on an ancestor group.
    pub fn accepts_group_runners(&self) -> bool {
        self.accepts_project_runners() && self.group_runners_enabled
    }

    /// May supply builds to instance-wide runners.
    pub fn accepts_instance_runners(&self) -> bool {
        self.accepts_project_runners() && self.shared_runners_enabled
    }
}

/// The set of projects a runner may pull from, as resolved for one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectScope {
    /// Every project with instance runners enabled. Never materialised;
    /// strategies test the per-row flag instead of set membership.
    Instance,
    /// An explicit, possibly empty, set of project ids.
    Projects(BTreeSet<ProjectId>),
}

impl ProjectScope {
    pub fn empty() -> Self {
        ProjectScope::Projects(BTreeSet::new())
    }

    /// True when no project can possibly match.
    pub fn is_empty(&self) -> bool {
        matches!(self, ProjectScope::Projects(ids) if ids.is_empty())
    }

    /// Whether a build in `project_id` falls in this scope. For the instance
    /// sentinel the caller supplies the row's instance-runners flag.
    pub fn admits(&self, project_id: ProjectId, instance_runners_enabled: bool) -> bool {
        match self {
            ProjectScope::Instance => instance_runners_enabled,
            ProjectScope::Projects(ids) => ids.contains(&project_id),
        }
    }

    /// Project ids as raw database ids, for `= ANY($n)` binds.
    pub fn project_ids(&self) -> Option<Vec<i64>> {
        match self {
            ProjectScope::Instance => None,
            ProjectScope::Projects(ids) => Some(ids.iter().map(|id| id.get()).collect()),
        }
    }
}

impl FromIterator<ProjectId> for ProjectScope {
    fn from_iter<I: IntoIterator<Item = ProjectId>>(iter: I) -> Self {
        ProjectScope::Projects(iter.into_iter().collect())
    }
}
