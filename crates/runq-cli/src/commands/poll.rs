//! Poll and depth commands against PostgreSQL.

use anyhow::Result;
use runq_config::SystemConfig;
use runq_core::{Runner, RunnerRegistration, StrategyKind};
use runq_scheduler::PollOptions;
use std::time::Duration;

use super::pg_engine;

pub async fn poll(
    config: &SystemConfig,
    registration: RunnerRegistration,
    timeout: Option<Duration>,
    strategy: Option<StrategyKind>,
) -> Result<()> {
    let engine = pg_engine(config, strategy).await?;
    let options = PollOptions {
        timeout,
        ..PollOptions::default()
    };
    let outcome = engine.poll_registration(registration, options).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub async fn depth(
    config: &SystemConfig,
    registration: RunnerRegistration,
    strategy: Option<StrategyKind>,
) -> Result<()> {
    let runner = Runner::try_from(registration)?;
    let engine = pg_engine(config, strategy).await?;
    let depth = engine.queue_depth(&runner).await?;
    let report = serde_json::json!({
        "runner_id": runner.id,
        "strategy": engine.selector().selected(),
        "depth": depth,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
