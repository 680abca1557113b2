//! CLI command implementations.

pub mod poll;
pub mod simulate;

use anyhow::{Context, Result};
use runq_config::{QueueConfig, SystemConfig};
use runq_core::{BuildClaimer, ProjectDirectory, QueueSnapshotStrategy, StrategyKind};
use runq_db::{PgBuildsTable, PgPendingBuilds, PgProjectDirectory};
use runq_scheduler::{MatchingEngine, ScopeResolver, StrategySelector};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Load the configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path, database_url: Option<String>) -> Result<SystemConfig> {
    let mut config = if path.exists() {
        runq_config::load_system_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        debug!(path = %path.display(), "No configuration file, using defaults");
        SystemConfig::default()
    };
    if let Some(url) = database_url {
        config.database.url = url;
    }
    Ok(config)
}

pub fn validate(path: &Path) -> Result<()> {
    match runq_config::load_system_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn migrate(config: &SystemConfig) -> Result<()> {
    let pool = connect(config).await?;
    runq_db::run_migrations(&pool).await?;
    info!("Migrations complete");
    Ok(())
}

async fn connect(config: &SystemConfig) -> Result<PgPool> {
    let pool = runq_db::create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;
    Ok(pool)
}

/// Engine over PostgreSQL.
async fn pg_engine(config: &SystemConfig, strategy: Option<StrategyKind>) -> Result<MatchingEngine> {
    let pool = connect(config).await?;
    engine(
        Arc::new(PgBuildsTable::new(pool.clone())),
        Arc::new(PgPendingBuilds::new(pool.clone())),
        Arc::new(PgProjectDirectory::new(pool.clone())),
        Arc::new(PgBuildsTable::new(pool)),
        &config.queue,
        strategy,
    )
}

fn engine(
    direct_scan: Arc<dyn QueueSnapshotStrategy>,
    projection: Arc<dyn QueueSnapshotStrategy>,
    directory: Arc<dyn ProjectDirectory>,
    claimer: Arc<dyn BuildClaimer>,
    queue: &QueueConfig,
    strategy: Option<StrategyKind>,
) -> Result<MatchingEngine> {
    let selector = StrategySelector::new(
        direct_scan,
        projection,
        strategy.unwrap_or(queue.strategy),
    )?;
    Ok(MatchingEngine::new(
        ScopeResolver::new(directory),
        Arc::new(selector),
        claimer,
        queue.clone().into(),
    ))
}
