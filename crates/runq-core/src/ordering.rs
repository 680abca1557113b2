//! Queue ordering policy.
//!
//! Oldest `queued_at` first, ties broken by the lower build id. Backends
//! that sort in the store must use the same key (`ORDER BY queued_at, id`).

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{JobId, QueuedBuild};

/// The sort key of a queued build.
pub fn queue_key(build: &QueuedBuild) -> (DateTime<Utc>, JobId) {
    (build.queued_at, build.job_id)
}

/// Compare two candidates in queue order.
pub fn queue_order(a: &QueuedBuild, b: &QueuedBuild) -> Ordering {
    queue_key(a).cmp(&queue_key(b))
}

/// Sort a materialised snapshot in queue order.
pub fn sort_queue(builds: &mut [QueuedBuild]) {
    builds.sort_by(queue_order);
}
