//! Runner definitions.

use serde::{Deserialize, Serialize};

use crate::{Error, NamespaceId, ProjectId, Result, RunnerId, TagSet};

/// Which projects a runner may take builds from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerScope {
    /// Every project that has instance runners enabled.
    Instance,
    /// A group and all of its descendant namespaces.
    Group { namespace_id: NamespaceId },
    /// An explicit list of projects.
    Project { project_ids: Vec<ProjectId> },
}

impl RunnerScope {
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerScope::Instance => "instance",
            RunnerScope::Group { .. } => "group",
            RunnerScope::Project { .. } => "project",
        }
    }
}

/// A runner as seen by a single poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,
    pub scope: RunnerScope,
    pub tags: TagSet,
    /// May pick up builds that carry no tags.
    pub run_untagged: bool,
    /// May pick up builds whose ref is protected.
    pub protected_ref_access: bool,
    /// Paused runners never receive work.
    pub active: bool,
}

impl Runner {
    pub fn new(id: RunnerId, scope: RunnerScope) -> Self {
        Self {
            id,
            scope,
            tags: TagSet::new(),
            run_untagged: true,
            protected_ref_access: false,
            active: true,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn run_untagged(mut self, run_untagged: bool) -> Self {
        self.run_untagged = run_untagged;
        self
    }

    pub fn protected_ref_access(mut self, allowed: bool) -> Self {
        self.protected_ref_access = allowed;
        self
    }

    pub fn paused(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Runner attributes as they arrive from the transport, before the scope is
/// validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRegistration {
    pub id: RunnerId,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub run_untagged: bool,
    #[serde(default)]
    pub protected_ref_access: bool,
    #[serde(default)]
    pub instance: bool,
    #[serde(default)]
    pub group: Option<NamespaceId>,
    #[serde(default)]
    pub projects: Vec<ProjectId>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl TryFrom<RunnerRegistration> for Runner {
    type Error = Error;

    /// Exactly one of `instance`, `group` or `projects` must be set; a
    /// registration that names more than one is rejected instead of picking
    /// one by precedence.
    fn try_from(reg: RunnerRegistration) -> Result<Self> {
        let scope = match (reg.instance, reg.group, reg.projects.is_empty()) {
            (true, None, true) => RunnerScope::Instance,
            (false, Some(namespace_id), true) => RunnerScope::Group { namespace_id },
            (false, None, false) => RunnerScope::Project {
                project_ids: reg.projects,
            },
            (false, None, true) => {
                return Err(Error::InvalidScope(format!(
                    "runner {} has no instance, group or project scope",
                    reg.id
                )));
            }
            _ => {
                return Err(Error::InvalidScope(format!(
                    "runner {} declares more than one of instance, group and project scope",
                    reg.id
                )));
            }
        };

        Ok(Runner {
            id: reg.id,
            scope,
            tags: reg.tags.into_iter().collect(),
            run_untagged: reg.run_untagged,
            protected_ref_access: reg.protected_ref_access,
            active: reg.active,
        })
    }
}
