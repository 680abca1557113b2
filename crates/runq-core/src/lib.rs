//! Core domain types and traits for the runq build matching engine.
//!
//! This crate contains:
//! - Identifiers for runners, builds, projects and namespaces
//! - Runner, build and project records
//! - Tag sets and the queue ordering policy
//! - Store traits implemented by the database and in-memory backends

pub mod build;
pub mod error;
pub mod id;
pub mod ordering;
pub mod project;
pub mod queue;
pub mod runner;
pub mod tags;

pub use build::{Assignment, BuildStatus, JobRejection, QueuedBuild};
pub use error::{Error, Result};
pub use id::{JobId, NamespaceId, ProjectId, RunnerId};
pub use project::{ProjectRecord, ProjectScope};
pub use queue::{BuildClaimer, ProjectDirectory, QueueSnapshotStrategy, StrategyKind};
pub use runner::{Runner, RunnerRegistration, RunnerScope};
pub use tags::TagSet;
