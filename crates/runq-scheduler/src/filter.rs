//! Eligibility of a queued build for a runner.
//!
//! All checks are pure; applying the filter twice gives the same result as
//! applying it once.

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use runq_core::{QueuedBuild, Result, Runner, TagSet};

/// Whether a runner's tags satisfy a build's tags.
///
/// A tagged build needs every one of its tags on the runner. An untagged
/// build runs only on runners that accept untagged builds.
pub fn tags_match(build_tags: &TagSet, runner: &Runner) -> bool {
    if build_tags.is_empty() {
        runner.run_untagged
    } else {
        build_tags.is_subset(&runner.tags)
    }
}

/// Builds on protected refs need a runner with protected ref access.
pub fn protection_allows(build: &QueuedBuild, runner: &Runner) -> bool {
    !build.ref_protected || runner.protected_ref_access
}

pub fn queued_before(build: &QueuedBuild, cutoff: DateTime<Utc>) -> bool {
    build.queued_at <= cutoff
}

/// Eligibility filter for one runner and one cutoff.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityFilter<'a> {
    runner: &'a Runner,
    cutoff: DateTime<Utc>,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(runner: &'a Runner, cutoff: DateTime<Utc>) -> Self {
        Self { runner, cutoff }
    }

    pub fn admits(&self, build: &QueuedBuild) -> bool {
        queued_before(build, self.cutoff)
            && protection_allows(build, self.runner)
            && tags_match(&build.tags, self.runner)
    }

    /// Filter a materialised candidate list, preserving order.
    pub fn apply<I>(&self, candidates: I) -> Vec<QueuedBuild>
    where
        I: IntoIterator<Item = QueuedBuild>,
    {
        candidates.into_iter().filter(|b| self.admits(b)).collect()
    }

    /// Filter a lazily fetched candidate stream, preserving order. Errors
    /// pass through untouched.
    pub fn apply_stream(
        self,
        candidates: BoxStream<'a, Result<QueuedBuild>>,
    ) -> BoxStream<'a, Result<QueuedBuild>> {
        candidates
            .try_filter(move |build| future::ready(self.admits(build)))
            .boxed()
    }
}
