//! The matching engine: one poll in, at most one assignment out.

use chrono::{DateTime, Utc};
use runq_config::QueueConfig;
use runq_core::{
    Assignment, BuildClaimer, Error, ProjectScope, QueueSnapshotStrategy, Result, Runner,
    RunnerRegistration, StrategyKind,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::claim::{ClaimFailure, ClaimResult, claim_first};
use crate::filter::EligibilityFilter;
use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::scope::ScopeResolver;
use crate::selector::StrategySelector;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Retry against the direct-scan strategy when another strategy fails.
    pub failover: bool,
    pub poll_timeout: Duration,
    /// Builds queued within this window are not offered yet.
    pub backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        QueueConfig::default().into()
    }
}

impl From<QueueConfig> for EngineOptions {
    fn from(config: QueueConfig) -> Self {
        Self {
            failover: config.failover,
            poll_timeout: config.poll_timeout,
            backoff: config.backoff,
        }
    }
}

/// Per-poll overrides.
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    /// Overrides [`EngineOptions::poll_timeout`].
    pub timeout: Option<Duration>,
    /// Overrides the backoff-derived cutoff.
    pub queued_before: Option<DateTime<Utc>>,
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PollOutcome {
    Assigned(Assignment),
    Empty,
}

impl PollOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            PollOutcome::Assigned(assignment) => Some(assignment),
            PollOutcome::Empty => None,
        }
    }
}

/// Matches polling runners to pending builds.
pub struct MatchingEngine {
    resolver: ScopeResolver,
    selector: Arc<StrategySelector>,
    claimer: Arc<dyn BuildClaimer>,
    options: EngineOptions,
    metrics: QueueMetrics,
}

impl MatchingEngine {
    pub fn new(
        resolver: ScopeResolver,
        selector: Arc<StrategySelector>,
        claimer: Arc<dyn BuildClaimer>,
        options: EngineOptions,
    ) -> Self {
        Self {
            resolver,
            selector,
            claimer,
            options,
            metrics: QueueMetrics::new(),
        }
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Poll on behalf of a runner as registered on the transport.
    ///
    /// A registration with a malformed scope is a caller error and is
    /// returned as [`runq_core::Error::InvalidScope`].
    pub async fn poll_registration(
        &self,
        registration: RunnerRegistration,
        options: PollOptions,
    ) -> Result<PollOutcome> {
        let runner = Runner::try_from(registration)?;
        self.poll_with(&runner, options).await
    }

    pub async fn poll(&self, runner: &Runner) -> Result<PollOutcome> {
        self.poll_with(runner, PollOptions::default()).await
    }

    pub async fn poll_with(&self, runner: &Runner, options: PollOptions) -> Result<PollOutcome> {
        self.metrics.poll();

        if !runner.active {
            debug!(runner_id = %runner.id, "Runner is paused");
            self.metrics.paused();
            return Ok(self.empty());
        }

        let deadline = Instant::now() + options.timeout.unwrap_or(self.options.poll_timeout);
        let cutoff = options.queued_before.unwrap_or_else(|| self.default_cutoff());

        let scope = match timeout_at(deadline, self.resolver.try_resolve(runner)).await {
            Ok(Ok(scope)) => scope,
            Ok(Err(e)) => {
                warn!(runner_id = %runner.id, error = %e, "Scope resolution failed");
                self.metrics.scope_failure();
                return Ok(self.empty());
            }
            Err(_) => {
                warn!(runner_id = %runner.id, "Scope resolution timed out");
                self.metrics.timeout();
                return Ok(self.empty());
            }
        };
        if scope.is_empty() {
            debug!(runner_id = %runner.id, "Runner scope has no projects");
            return Ok(self.empty());
        }

        // Pin one strategy for the whole poll.
        let strategy = self.selector.current();
        let result = match self
            .claim_from(strategy.as_ref(), &scope, runner, cutoff, deadline)
            .await
        {
            Ok(result) => result,
            Err(ClaimFailure::Snapshot(e)) if self.can_fail_over(strategy.as_ref()) => {
                let fallback = self.fail_over(runner, strategy.as_ref(), &e);
                self.claim_from(fallback.as_ref(), &scope, runner, cutoff, deadline)
                    .await
                    .map_err(ClaimFailure::into_error)?
            }
            Err(failure) => return Err(failure.into_error()),
        };

        Ok(self.finish(runner, result))
    }

    /// Number of pending builds the runner's scope currently sees, before tag
    /// and protection filtering.
    pub async fn queue_depth(&self, runner: &Runner) -> Result<u64> {
        let scope = self.resolver.resolve(runner).await;
        if scope.is_empty() {
            return Ok(0);
        }
        let cutoff = self.default_cutoff();
        let strategy = self.selector.current();
        match strategy.depth(&scope, cutoff).await {
            Err(e) if self.can_fail_over(strategy.as_ref()) => {
                let fallback = self.fail_over(runner, strategy.as_ref(), &e);
                fallback.depth(&scope, cutoff).await
            }
            result => result,
        }
    }

    fn can_fail_over(&self, strategy: &dyn QueueSnapshotStrategy) -> bool {
        self.options.failover && strategy.kind() != StrategyKind::DirectScan
    }

    fn fail_over(
        &self,
        runner: &Runner,
        failed: &dyn QueueSnapshotStrategy,
        error: &Error,
    ) -> Arc<dyn QueueSnapshotStrategy> {
        warn!(
            runner_id = %runner.id,
            strategy = %failed.kind(),
            error = %error,
            "Queue strategy failed, falling back to direct scan"
        );
        self.metrics.failover();
        self.selector.strategy(StrategyKind::DirectScan)
    }

    async fn claim_from(
        &self,
        strategy: &dyn QueueSnapshotStrategy,
        scope: &ProjectScope,
        runner: &Runner,
        cutoff: DateTime<Utc>,
        deadline: Instant,
    ) -> std::result::Result<ClaimResult, ClaimFailure> {
        let candidates =
            EligibilityFilter::new(runner, cutoff).apply_stream(strategy.fetch(scope, cutoff));
        claim_first(candidates, runner, self.claimer.as_ref(), deadline).await
    }

    fn finish(&self, runner: &Runner, result: ClaimResult) -> PollOutcome {
        match result {
            ClaimResult::Assigned {
                assignment,
                skipped,
            } => {
                self.metrics.conflicts(skipped);
                self.metrics.assigned();
                info!(
                    runner_id = %runner.id,
                    job_id = %assignment.job_id,
                    skipped,
                    "Assigned build to runner"
                );
                PollOutcome::Assigned(assignment)
            }
            ClaimResult::Exhausted { skipped } => {
                self.metrics.conflicts(skipped);
                debug!(runner_id = %runner.id, skipped, "No build available");
                self.empty()
            }
            ClaimResult::TimedOut { skipped } => {
                self.metrics.conflicts(skipped);
                self.metrics.timeout();
                warn!(runner_id = %runner.id, skipped, "Poll timed out before claiming a build");
                self.empty()
            }
        }
    }

    fn empty(&self) -> PollOutcome {
        self.metrics.empty();
        PollOutcome::Empty
    }

    fn default_cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.options.backoff)
            .ok()
            .and_then(|backoff| Utc::now().checked_sub_signed(backoff))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use futures::stream::{self, BoxStream, StreamExt};
    use runq_core::{
        Error, JobId, NamespaceId, ProjectDirectory, ProjectId, ProjectRecord, QueuedBuild,
        RunnerId, RunnerScope,
    };
    use runq_db::{MemoryStore, NewBuild};
    use std::collections::HashSet;

    const NS: NamespaceId = NamespaceId::new(1);
    const P1: ProjectId = ProjectId::new(1);
    const P2: ProjectId = ProjectId::new(2);

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_namespace(NS, None);
        store.put_project(ProjectRecord::new(P1, NS));
        store.put_project(ProjectRecord::new(P2, NS));
        store
    }

    fn ago(secs: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(secs)
    }

    fn engine_with(store: &MemoryStore, kind: StrategyKind, options: EngineOptions) -> MatchingEngine {
        let selector = StrategySelector::new(
            Arc::new(store.builds_table()),
            Arc::new(store.pending_builds()),
            kind,
        )
        .unwrap();
        MatchingEngine::new(
            ScopeResolver::new(Arc::new(store.clone())),
            Arc::new(selector),
            Arc::new(store.clone()),
            options,
        )
    }

    fn engine(store: &MemoryStore, kind: StrategyKind) -> MatchingEngine {
        engine_with(store, kind, EngineOptions::default())
    }

    fn project_runner(id: i64, projects: &[ProjectId]) -> Runner {
        Runner::new(
            RunnerId::new(id),
            RunnerScope::Project {
                project_ids: projects.to_vec(),
            },
        )
    }

    fn assigned_job(outcome: &PollOutcome) -> Option<JobId> {
        outcome.assignment().map(|a| a.job_id)
    }

    #[tokio::test]
    async fn test_untagged_build_skipped_for_runner_without_run_untagged() {
        let store = store();
        let _untagged = store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();
        let tagged = store
            .enqueue(NewBuild::new(P1).tags(["go"]).queued_at(ago(10)))
            .unwrap();

        let runner = project_runner(1, &[P1]).with_tags(["go"]).run_untagged(false);
        let outcome = engine(&store, StrategyKind::DirectScan)
            .poll(&runner)
            .await
            .unwrap();

        assert_eq!(assigned_job(&outcome), Some(tagged));
        assert_eq!(store.build(tagged).unwrap().runner_id, Some(RunnerId::new(1)));
    }

    #[tokio::test]
    async fn test_protected_build_needs_protected_runner() {
        let store = store();
        let job = store
            .enqueue(NewBuild::new(P1).protected().queued_at(ago(5)))
            .unwrap();
        let engine = engine(&store, StrategyKind::DirectScan);

        let untrusted = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        assert_eq!(engine.poll(&untrusted).await.unwrap(), PollOutcome::Empty);

        let trusted = untrusted.clone().protected_ref_access(true);
        assert_eq!(assigned_job(&engine.poll(&trusted).await.unwrap()), Some(job));
    }

    #[tokio::test]
    async fn test_simultaneous_pollers_share_one_build() {
        let store = store();
        let job = store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        let engine = engine(&store, StrategyKind::Projection);

        let a = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        let b = Runner::new(RunnerId::new(2), RunnerScope::Instance);
        let (ra, rb) = tokio::join!(engine.poll(&a), engine.poll(&b));
        let outcomes = [ra.unwrap(), rb.unwrap()];

        let assigned: Vec<JobId> = outcomes.iter().filter_map(assigned_job).collect();
        assert_eq!(assigned, vec![job]);
        assert!(outcomes.contains(&PollOutcome::Empty));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pollers_claim_each_build_once() {
        let store = store();
        let jobs: HashSet<JobId> = (0..40)
            .map(|i| {
                let project = if i % 2 == 0 { P1 } else { P2 };
                store
                    .enqueue(NewBuild::new(project).queued_at(ago(100 - i)))
                    .unwrap()
            })
            .collect();
        let engine = Arc::new(engine(&store, StrategyKind::Projection));

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let runner = Runner::new(RunnerId::new(n), RunnerScope::Instance);
                    let mut claimed = Vec::new();
                    while let PollOutcome::Assigned(a) = engine.poll(&runner).await.unwrap() {
                        claimed.push(a.job_id);
                    }
                    claimed
                })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            claimed.extend(handle.await.unwrap());
        }
        let unique: HashSet<JobId> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), jobs.len());
        assert_eq!(unique, jobs);
        assert_eq!(engine.metrics().assigned, jobs.len() as u64);
    }

    #[tokio::test]
    async fn test_single_poller_drains_in_queue_order() {
        let store = store();
        // Enqueue out of id order so queued_at decides.
        let late = store.enqueue(NewBuild::new(P1).queued_at(ago(10))).unwrap();
        let early = store.enqueue(NewBuild::new(P2).queued_at(ago(30))).unwrap();
        let middle = store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();

        let engine = engine(&store, StrategyKind::DirectScan);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        let mut order = Vec::new();
        while let Some(job) = assigned_job(&engine.poll(&runner).await.unwrap()) {
            order.push(job);
        }
        assert_eq!(order, vec![early, middle, late]);
    }

    #[tokio::test]
    async fn test_strategies_assign_the_same_build() {
        for kind in [StrategyKind::DirectScan, StrategyKind::Projection] {
            let store = store();
            store
                .enqueue(NewBuild::new(P2).tags(["docker"]).queued_at(ago(40)))
                .unwrap();
            let expected = store
                .enqueue(NewBuild::new(P1).tags(["docker"]).queued_at(ago(30)))
                .unwrap();
            store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();

            let runner = project_runner(1, &[P1]).with_tags(["docker", "linux"]);
            let outcome = engine(&store, kind).poll(&runner).await.unwrap();
            assert_eq!(assigned_job(&outcome), Some(expected), "strategy {}", kind);
        }
    }

    #[tokio::test]
    async fn test_projection_failure_falls_back_to_direct_scan() {
        let store = store();
        let job = store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        store.set_projection_available(false);

        let engine = engine(&store, StrategyKind::Projection);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        let outcome = engine.poll(&runner).await.unwrap();

        assert_eq!(assigned_job(&outcome), Some(job));
        assert_eq!(engine.metrics().failovers, 1);
        assert_eq!(engine.selector().selected(), StrategyKind::Projection);
    }

    #[tokio::test]
    async fn test_projection_failure_without_failover_is_an_error() {
        let store = store();
        store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        store.set_projection_available(false);

        let options = EngineOptions {
            failover: false,
            ..EngineOptions::default()
        };
        let engine = engine_with(&store, StrategyKind::Projection, options);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        let result = engine.poll(&runner).await;

        assert!(matches!(result, Err(Error::Backend(_))));
        assert_eq!(engine.metrics().failovers, 0);
    }

    /// A strategy whose snapshot never produces anything.
    struct StalledStrategy(StrategyKind);

    #[async_trait]
    impl QueueSnapshotStrategy for StalledStrategy {
        fn kind(&self) -> StrategyKind {
            self.0
        }

        fn fetch<'a>(
            &'a self,
            _scope: &ProjectScope,
            _cutoff: DateTime<Utc>,
        ) -> BoxStream<'a, Result<QueuedBuild>> {
            stream::pending().boxed()
        }

        async fn depth(&self, _scope: &ProjectScope, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_stalled_snapshot_ends_poll_empty_at_timeout() {
        let store = store();
        let job = store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        let selector = StrategySelector::new(
            Arc::new(StalledStrategy(StrategyKind::DirectScan)),
            Arc::new(StalledStrategy(StrategyKind::Projection)),
            StrategyKind::DirectScan,
        )
        .unwrap();
        let engine = MatchingEngine::new(
            ScopeResolver::new(Arc::new(store.clone())),
            Arc::new(selector),
            Arc::new(store.clone()),
            EngineOptions::default(),
        );

        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        let options = PollOptions {
            timeout: Some(Duration::from_millis(30)),
            ..PollOptions::default()
        };
        let outcome = engine.poll_with(&runner, options).await.unwrap();

        assert_eq!(outcome, PollOutcome::Empty);
        assert_eq!(engine.metrics().timeouts, 1);
        assert!(store.build(job).unwrap().runner_id.is_none());
    }

    #[tokio::test]
    async fn test_paused_runner_gets_nothing() {
        let store = store();
        store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        let engine = engine(&store, StrategyKind::DirectScan);

        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance).paused();
        assert_eq!(engine.poll(&runner).await.unwrap(), PollOutcome::Empty);
        assert_eq!(engine.metrics().paused, 1);
    }

    #[tokio::test]
    async fn test_malformed_registration_is_rejected() {
        let store = store();
        let engine = engine(&store, StrategyKind::DirectScan);
        let registration = RunnerRegistration {
            id: RunnerId::new(1),
            tags: Vec::new(),
            run_untagged: true,
            protected_ref_access: false,
            instance: true,
            group: Some(NS),
            projects: Vec::new(),
            active: true,
        };

        let result = engine
            .poll_registration(registration, PollOptions::default())
            .await;
        assert!(matches!(result, Err(Error::InvalidScope(_))));
    }

    #[tokio::test]
    async fn test_builds_newer_than_cutoff_wait() {
        let store = store();
        let fresh = store.enqueue(NewBuild::new(P1).queued_at(ago(2))).unwrap();
        let options = EngineOptions {
            backoff: Duration::from_secs(60),
            ..EngineOptions::default()
        };
        let engine = engine_with(&store, StrategyKind::DirectScan, options);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);

        assert_eq!(engine.poll(&runner).await.unwrap(), PollOutcome::Empty);

        let now = PollOptions {
            queued_before: Some(Utc::now()),
            ..PollOptions::default()
        };
        let outcome = engine.poll_with(&runner, now).await.unwrap();
        assert_eq!(assigned_job(&outcome), Some(fresh));
    }

    #[tokio::test]
    async fn test_switching_strategy_between_polls() {
        let store = store();
        let first = store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();
        let second = store.enqueue(NewBuild::new(P1).queued_at(ago(10))).unwrap();
        let engine = engine(&store, StrategyKind::DirectScan);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Instance);

        assert_eq!(assigned_job(&engine.poll(&runner).await.unwrap()), Some(first));
        engine.selector().select(StrategyKind::Projection);
        assert_eq!(assigned_job(&engine.poll(&runner).await.unwrap()), Some(second));
        assert_eq!(engine.poll(&runner).await.unwrap(), PollOutcome::Empty);
    }

    #[tokio::test]
    async fn test_group_runner_respects_project_opt_out() {
        let store = store();
        let mut opted_out = ProjectRecord::new(P2, NS);
        opted_out.group_runners_enabled = false;
        store.put_project(opted_out);
        store.enqueue(NewBuild::new(P2).queued_at(ago(20))).unwrap();
        let job = store.enqueue(NewBuild::new(P1).queued_at(ago(10))).unwrap();

        let engine = engine(&store, StrategyKind::Projection);
        let runner = Runner::new(RunnerId::new(1), RunnerScope::Group { namespace_id: NS });
        assert_eq!(assigned_job(&engine.poll(&runner).await.unwrap()), Some(job));
        assert_eq!(engine.poll(&runner).await.unwrap(), PollOutcome::Empty);
    }

    #[tokio::test]
    async fn test_queue_depth_counts_scope() {
        let store = store();
        store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();
        store.enqueue(NewBuild::new(P2).queued_at(ago(10))).unwrap();
        let engine = engine(&store, StrategyKind::DirectScan);

        let instance = Runner::new(RunnerId::new(1), RunnerScope::Instance);
        assert_eq!(engine.queue_depth(&instance).await.unwrap(), 2);
        assert_eq!(engine.queue_depth(&project_runner(2, &[P2])).await.unwrap(), 1);
        assert_eq!(engine.queue_depth(&project_runner(3, &[])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_depth_falls_back_to_direct_scan() {
        let store = store();
        store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();
        store.enqueue(NewBuild::new(P2).queued_at(ago(10))).unwrap();
        store.set_projection_available(false);

        let engine = engine(&store, StrategyKind::Projection);
        let instance = Runner::new(RunnerId::new(1), RunnerScope::Instance);

        assert_eq!(engine.queue_depth(&instance).await.unwrap(), 2);
        assert_eq!(engine.metrics().failovers, 1);
    }

    #[tokio::test]
    async fn test_queue_depth_without_failover_is_an_error() {
        let store = store();
        store.enqueue(NewBuild::new(P1).queued_at(ago(20))).unwrap();
        store.set_projection_available(false);

        let options = EngineOptions {
            failover: false,
            ..EngineOptions::default()
        };
        let engine = engine_with(&store, StrategyKind::Projection, options);
        let instance = Runner::new(RunnerId::new(1), RunnerScope::Instance);

        assert!(matches!(
            engine.queue_depth(&instance).await,
            Err(Error::Backend(_))
        ));
        assert_eq!(engine.metrics().failovers, 0);
    }

    /// A directory that never answers.
    struct StalledDirectory;

    #[async_trait]
    impl ProjectDirectory for StalledDirectory {
        async fn descendant_project_ids(&self, _namespace_id: NamespaceId) -> Result<Vec<ProjectId>> {
            std::future::pending().await
        }

        async fn projects(&self, _ids: &[ProjectId]) -> Result<Vec<ProjectRecord>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_scope_resolution_timeout_ends_poll_empty() {
        let store = store();
        let job = store.enqueue(NewBuild::new(P1).queued_at(ago(5))).unwrap();
        let selector = StrategySelector::new(
            Arc::new(store.builds_table()),
            Arc::new(store.pending_builds()),
            StrategyKind::DirectScan,
        )
        .unwrap();
        let engine = MatchingEngine::new(
            ScopeResolver::new(Arc::new(StalledDirectory)),
            Arc::new(selector),
            Arc::new(store.clone()),
            EngineOptions::default(),
        );

        let options = PollOptions {
            timeout: Some(Duration::from_millis(30)),
            ..PollOptions::default()
        };
        let outcome = engine
            .poll_with(&project_runner(1, &[P1]), options)
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Empty);
        assert_eq!(engine.metrics().timeouts, 1);
        assert_eq!(engine.metrics().scope_failures, 0);
        assert!(store.build(job).unwrap().runner_id.is_none());
    }

    /// Engine runs against PostgreSQL. They need `DATABASE_URL` and are
    /// `#[ignore]`d by default.
    mod postgres {
        use super::*;
        use runq_db::{PgBuildsTable, PgPendingBuilds, PgProjectDirectory};
        use sqlx::PgPool;
        use std::sync::OnceLock;
        use std::sync::atomic::{AtomicI64, Ordering};

        fn next_id() -> i64 {
            static NEXT: OnceLock<AtomicI64> = OnceLock::new();
            NEXT.get_or_init(|| AtomicI64::new(Utc::now().timestamp_micros()))
                .fetch_add(1, Ordering::Relaxed)
        }

        async fn pool(max_connections: u32) -> PgPool {
            let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let pool = runq_db::create_pool(&url, max_connections).await.unwrap();
            runq_db::run_migrations(&pool).await.unwrap();
            pool
        }

        async fn project(pool: &PgPool) -> ProjectId {
            let id = next_id();
            sqlx::query("INSERT INTO namespaces (id, name) VALUES ($1, $2)")
                .bind(id)
                .bind(format!("group-{}", id))
                .execute(pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO projects (id, namespace_id) VALUES ($1, $1)")
                .bind(id)
                .execute(pool)
                .await
                .unwrap();
            ProjectId::new(id)
        }

        async fn pending_build(pool: &PgPool, project: ProjectId, tags: &[&str], age_secs: i64) -> JobId {
            let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO ci_builds (project_id, namespace_id, status, tag_list, queued_at) \
                 VALUES ($1, $1, 'pending', $2, NOW() - make_interval(secs => $3)) RETURNING id",
            )
            .bind(project.get())
            .bind(tags)
            .bind(age_secs as f64)
            .fetch_one(pool)
            .await
            .unwrap();
            JobId::new(id)
        }

        fn pg_engine(pool: &PgPool, kind: StrategyKind) -> MatchingEngine {
            let selector = StrategySelector::new(
                Arc::new(PgBuildsTable::new(pool.clone()).with_page_size(3)),
                Arc::new(PgPendingBuilds::new(pool.clone()).with_page_size(3)),
                kind,
            )
            .unwrap();
            MatchingEngine::new(
                ScopeResolver::new(Arc::new(PgProjectDirectory::new(pool.clone()))),
                Arc::new(selector),
                Arc::new(PgBuildsTable::new(pool.clone())),
                EngineOptions::default(),
            )
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        #[ignore]
        async fn test_concurrent_pollers_on_small_pool() {
            for kind in [StrategyKind::DirectScan, StrategyKind::Projection] {
                // Fewer connections than pollers.
                let pool = pool(2).await;
                let project = project(&pool).await;
                let mut jobs = HashSet::new();
                for age in 1..=10 {
                    jobs.insert(pending_build(&pool, project, &[], 100 - age).await);
                }
                let engine = Arc::new(pg_engine(&pool, kind));

                let handles: Vec<_> = (0..6)
                    .map(|n| {
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            let runner = project_runner(n, &[project]);
                            let options = PollOptions {
                                timeout: Some(Duration::from_secs(2)),
                                ..PollOptions::default()
                            };
                            let mut claimed = Vec::new();
                            while let PollOutcome::Assigned(a) =
                                engine.poll_with(&runner, options.clone()).await.unwrap()
                            {
                                claimed.push(a.job_id);
                            }
                            claimed
                        })
                    })
                    .collect();

                let drained = tokio::time::timeout(Duration::from_secs(10), async {
                    let mut claimed = Vec::new();
                    for handle in handles {
                        claimed.extend(handle.await.unwrap());
                    }
                    claimed
                })
                .await
                .expect("pollers stalled on the connection pool");

                let unique: HashSet<JobId> = drained.iter().copied().collect();
                assert_eq!(drained.len(), jobs.len(), "strategy {}", kind);
                assert_eq!(unique, jobs, "strategy {}", kind);
                assert_eq!(engine.metrics().timeouts, 0, "strategy {}", kind);
            }
        }

        #[tokio::test]
        #[ignore]
        async fn test_strategies_drain_in_the_same_order() {
            let pool = pool(5).await;
            let mut orders = Vec::new();
            for kind in [StrategyKind::DirectScan, StrategyKind::Projection] {
                let project = project(&pool).await;
                let seeds: [(i64, &[&str]); 5] = [
                    (50, &["docker"]),
                    (40, &[]),
                    (30, &["rust"]),
                    (20, &["docker"]),
                    (10, &[]),
                ];
                for (age, tags) in seeds {
                    pending_build(&pool, project, tags, age).await;
                }

                let engine = pg_engine(&pool, kind);
                let runner = project_runner(1, &[project]).with_tags(["docker"]);
                let mut order = Vec::new();
                while let PollOutcome::Assigned(a) = engine.poll(&runner).await.unwrap() {
                    let row: (Vec<String>,) =
                        sqlx::query_as("SELECT tag_list FROM ci_builds WHERE id = $1")
                            .bind(a.job_id.get())
                            .fetch_one(&pool)
                            .await
                            .unwrap();
                    order.push(row.0);
                }
                orders.push(order);
            }

            let docker = vec!["docker".to_string()];
            assert_eq!(orders[0], vec![docker.clone(), vec![], docker, vec![]]);
            assert_eq!(orders[0], orders[1]);
        }
    }
}
