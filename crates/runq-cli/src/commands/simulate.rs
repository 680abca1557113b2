//! Drain an in-memory queue with concurrent runners.

use anyhow::{Result, bail};
use chrono::{Duration as ChronoDuration, Utc};
use runq_config::QueueConfig;
use runq_core::{
    Assignment, JobId, NamespaceId, ProjectId, ProjectRecord, Runner, RunnerId, RunnerScope,
    StrategyKind,
};
use runq_db::{MemoryStore, NewBuild};
use runq_scheduler::PollOutcome;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

const PROJECTS: i64 = 3;

#[derive(Serialize)]
struct Report {
    strategy: StrategyKind,
    assignments: Vec<Assignment>,
    metrics: runq_scheduler::MetricsSnapshot,
}

pub async fn run(runners: usize, builds: usize, strategy: StrategyKind) -> Result<()> {
    let store = seed(builds)?;
    let queue = QueueConfig {
        strategy,
        ..QueueConfig::default()
    };
    let engine = Arc::new(super::engine(
        Arc::new(store.builds_table()),
        Arc::new(store.pending_builds()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        &queue,
        None,
    )?);

    let mut handles = Vec::with_capacity(runners);
    for n in 0..runners {
        let engine = engine.clone();
        let runner = Runner::new(RunnerId::new(n as i64 + 1), RunnerScope::Instance)
            .with_tags(["docker", "linux"])
            .protected_ref_access(true);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let PollOutcome::Assigned(assignment) = engine.poll(&runner).await? {
                claimed.push(assignment);
            }
            Ok::<_, runq_core::Error>(claimed)
        }));
    }

    let mut assignments = Vec::with_capacity(builds);
    for handle in handles {
        assignments.extend(handle.await??);
    }
    assignments.sort_by_key(|a| a.job_id);

    let unique: HashSet<JobId> = assignments.iter().map(|a| a.job_id).collect();
    if unique.len() != assignments.len() {
        bail!("a build was assigned more than once");
    }
    if assignments.len() != builds {
        bail!("assigned {} of {} builds", assignments.len(), builds);
    }
    info!(builds, runners, %strategy, "Queue drained");

    let report = Report {
        strategy,
        assignments,
        metrics: engine.metrics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One namespace, a few projects, and `builds` pending builds queued a second
/// apart with a mix of tags and protected refs.
fn seed(builds: usize) -> Result<MemoryStore> {
    let store = MemoryStore::new();
    let namespace = NamespaceId::new(1);
    store.add_namespace(namespace, None);
    for id in 1..=PROJECTS {
        store.put_project(ProjectRecord::new(ProjectId::new(id), namespace));
    }

    let start = Utc::now() - ChronoDuration::seconds(builds as i64 + 1);
    for i in 0..builds {
        let tags: &[&str] = match i % 3 {
            0 => &[],
            1 => &["docker"],
            _ => &["docker", "linux"],
        };
        let mut build = NewBuild::new(ProjectId::new(i as i64 % PROJECTS + 1))
            .tags(tags.iter().copied())
            .queued_at(start + ChronoDuration::seconds(i as i64));
        if i % 5 == 0 {
            build = build.protected();
        }
        store.enqueue(build)?;
    }
    Ok(store)
}
