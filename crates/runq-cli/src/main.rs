//! runq CLI tool.

use clap::{Args, Parser, Subcommand};
use runq_core::{NamespaceId, ProjectId, RunnerId, RunnerRegistration, StrategyKind};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "runq")]
#[command(about = "Match CI runners to pending builds", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, env = "RUNQ_CONFIG", default_value = "runq.kdl")]
    config: PathBuf,

    /// Database URL, overriding the configuration file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective settings
    Validate {
        /// Path to the configuration file (defaults to --config)
        path: Option<PathBuf>,
    },
    /// Run database migrations
    Migrate,
    /// Poll once on behalf of a runner and print the outcome
    Poll {
        #[command(flatten)]
        runner: RunnerArgs,
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Use this strategy instead of the configured one
        #[arg(long)]
        strategy: Option<StrategyKind>,
    },
    /// Count the pending builds a runner's scope can see
    Depth {
        #[command(flatten)]
        runner: RunnerArgs,
        #[arg(long)]
        strategy: Option<StrategyKind>,
    },
    /// Drain an in-memory queue with concurrent runners
    Simulate {
        /// Number of concurrent runners
        #[arg(long, default_value = "4")]
        runners: usize,
        /// Number of builds to enqueue
        #[arg(long, default_value = "20")]
        builds: usize,
        #[arg(long, default_value = "projection")]
        strategy: StrategyKind,
    },
}

/// Runner attributes as given on the command line.
#[derive(Args)]
struct RunnerArgs {
    #[arg(long)]
    runner_id: i64,
    /// Runner tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Accept builds without tags
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    run_untagged: bool,
    /// Allowed to run builds for protected refs
    #[arg(long)]
    protected: bool,
    #[arg(long)]
    paused: bool,
    /// Instance-wide runner
    #[arg(long)]
    instance: bool,
    /// Group runner for this namespace
    #[arg(long)]
    group: Option<i64>,
    /// Project runner for this project (repeatable)
    #[arg(long = "project")]
    projects: Vec<i64>,
}

impl From<RunnerArgs> for RunnerRegistration {
    fn from(args: RunnerArgs) -> Self {
        Self {
            id: RunnerId::new(args.runner_id),
            tags: args.tags,
            run_untagged: args.run_untagged,
            protected_ref_access: args.protected,
            instance: args.instance,
            group: args.group.map(NamespaceId::new),
            projects: args.projects.into_iter().map(ProjectId::new).collect(),
            active: !args.paused,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(path.as_ref().unwrap_or(&cli.config))?;
        }
        Commands::Migrate => {
            let config = commands::load_config(&cli.config, cli.database_url)?;
            commands::migrate(&config).await?;
        }
        Commands::Poll {
            runner,
            timeout_ms,
            strategy,
        } => {
            let config = commands::load_config(&cli.config, cli.database_url)?;
            commands::poll::poll(
                &config,
                runner.into(),
                timeout_ms.map(Duration::from_millis),
                strategy,
            )
            .await?;
        }
        Commands::Depth { runner, strategy } => {
            let config = commands::load_config(&cli.config, cli.database_url)?;
            commands::poll::depth(&config, runner.into(), strategy).await?;
        }
        Commands::Simulate {
            runners,
            builds,
            strategy,
        } => {
            commands::simulate::run(runners, builds, strategy).await?;
        }
    }

    Ok(())
}
