//! Claims the first eligible build from an ordered candidate stream.

use futures::stream::{BoxStream, TryStreamExt};
use runq_core::ordering::queue_key;
use runq_core::{Assignment, BuildClaimer, Error, QueuedBuild, Result, Runner};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

/// How a claim pass over a candidate stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// A build was claimed for the runner.
    Assigned {
        assignment: Assignment,
        /// Candidates lost to concurrent claims before this one succeeded.
        skipped: u64,
    },
    /// The stream ran dry without a successful claim.
    Exhausted { skipped: u64 },
    /// The deadline passed before a claim was attempted.
    TimedOut { skipped: u64 },
}

/// Which side of the pass failed.
#[derive(Debug)]
pub(crate) enum ClaimFailure {
    /// Reading candidates from the snapshot strategy.
    Snapshot(Error),
    /// The conditional transition itself.
    Claim(Error),
}

impl ClaimFailure {
    pub(crate) fn into_error(self) -> Error {
        match self {
            ClaimFailure::Snapshot(e) | ClaimFailure::Claim(e) => e,
        }
    }
}

/// Walk `candidates` in order and claim the first one the store lets us have.
///
/// A candidate that another poll claimed (or is claiming) is skipped, never
/// retried. The deadline is only checked between claim attempts; a claim that
/// has started always runs to completion so it cannot be left half-applied.
pub(crate) async fn claim_first(
    mut candidates: BoxStream<'_, Result<QueuedBuild>>,
    runner: &Runner,
    claimer: &dyn BuildClaimer,
    deadline: Instant,
) -> std::result::Result<ClaimResult, ClaimFailure> {
    let mut skipped = 0;
    let mut last_key = None;

    loop {
        let next = match timeout_at(deadline, candidates.try_next()).await {
            Ok(next) => next.map_err(ClaimFailure::Snapshot)?,
            Err(_) => return Ok(ClaimResult::TimedOut { skipped }),
        };
        let Some(build) = next else {
            return Ok(ClaimResult::Exhausted { skipped });
        };

        let key = queue_key(&build);
        if last_key.is_some_and(|last| last > key) {
            warn!(job_id = %build.job_id, "Queue snapshot yielded builds out of order");
        }
        last_key = Some(key);

        if Instant::now() >= deadline {
            return Ok(ClaimResult::TimedOut { skipped });
        }

        match claimer
            .try_claim(build.job_id, runner.id)
            .await
            .map_err(ClaimFailure::Claim)?
        {
            Some(assignment) => return Ok(ClaimResult::Assigned { assignment, skipped }),
            None => {
                debug!(job_id = %build.job_id, runner_id = %runner.id, "Lost claim race, trying next build");
                skipped += 1;
            }
        }
    }
}
