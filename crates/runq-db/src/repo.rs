//! PostgreSQL implementations of the store traits.

pub mod builds;
pub mod pending_builds;
pub mod projects;
mod queue_page;

pub use builds::PgBuildsTable;
pub use pending_builds::PgPendingBuilds;
pub use projects::PgProjectDirectory;
pub use queue_page::DEFAULT_PAGE_SIZE;
