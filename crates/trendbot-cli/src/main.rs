mod runs;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trendbot_core::{AppConfig, LogFormat, RunOverrides, RunStore};
use trendbot_pipeline::{Collaborators, Orchestrator, PipelineSettings};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "trendbot-cli")]
#[command(about = "Trend pipeline operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Execute one pipeline run and wait for it to finish
    Run {
        /// Override the virality threshold for this run
        #[arg(long)]
        min_score: Option<f64>,
        /// Override the communities to scrape (repeatable)
        #[arg(long = "community")]
        communities: Vec<String>,
        /// Override how many candidates are forwarded to generation
        #[arg(long)]
        top_k: Option<usize>,
        /// Keep state in memory instead of Postgres
        #[arg(long)]
        ephemeral: bool,
    },
    /// Inspect workflow runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
    /// Show aggregate stats over a trailing window
    Stats {
        /// Window length in hours
        #[arg(long, default_value = "24")]
        hours: u64,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Poll engagement for recently published items outside a run
    CollectMetrics,
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    Ping,
    Migrate,
}

#[derive(Debug, Subcommand)]
enum RunsCommands {
    /// Most recent runs, newest first
    Recent {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Full detail for one run
    Show { id: Uuid },
}

fn build_overrides(
    min_score: Option<f64>,
    communities: Vec<String>,
    top_k: Option<usize>,
) -> RunOverrides {
    RunOverrides {
        min_score,
        communities: (!communities.is_empty()).then_some(communities),
        top_k,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("trendbot-cli ready; see --help");
        return Ok(());
    };

    let config = trendbot_core::load_app_config()?;
    init_tracing(&config)?;

    match command {
        Commands::Db { command } => {
            let pool = connect(&config).await?;
            match command {
                DbCommands::Ping => {
                    trendbot_db::health_check(&pool).await?;
                    println!("database ok");
                }
                DbCommands::Migrate => {
                    let applied = trendbot_db::run_migrations(&pool).await?;
                    println!("migrations applied ({applied} total)");
                }
            }
        }
        Commands::Run {
            min_score,
            communities,
            top_k,
            ephemeral,
        } => {
            let store: Arc<dyn RunStore> = if ephemeral {
                Arc::new(trendbot_db::MemoryRunStore::new())
            } else {
                Arc::new(trendbot_db::PgRunStore::new(connect(&config).await?))
            };
            let orchestrator = build_orchestrator(&config, store)?;
            if !ephemeral {
                if let Some(run_id) = orchestrator.recover().await? {
                    println!("marked interrupted run {run_id} as failed");
                }
            }
            let overrides = build_overrides(min_score, communities, top_k);
            let run = orchestrator.run_to_completion("cli", overrides).await?;
            runs::print_run(&run);
        }
        Commands::Runs { command } => {
            let store = trendbot_db::PgRunStore::new(connect(&config).await?);
            match command {
                RunsCommands::Recent { limit } => runs::run_recent(&store, limit).await?,
                RunsCommands::Show { id } => runs::run_show(&store, id).await?,
            }
        }
        Commands::Stats { hours, json } => {
            let store = trendbot_db::PgRunStore::new(connect(&config).await?);
            runs::run_stats(&store, hours, json).await?;
        }
        Commands::CollectMetrics => {
            let store: Arc<dyn RunStore> =
                Arc::new(trendbot_db::PgRunStore::new(connect(&config).await?));
            let orchestrator = build_orchestrator(&config, store)?;
            let outcome = orchestrator.collect_metrics_now().await?;
            println!(
                "collected {} of {} snapshot(s) ({:?})",
                outcome.output_count, outcome.input_count, outcome.status
            );
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool_config = trendbot_db::PoolConfig::from_app_config(config);
    let pool = trendbot_db::connect_pool(&config.database_url, pool_config).await?;
    Ok(pool)
}

fn build_orchestrator(config: &AppConfig, store: Arc<dyn RunStore>) -> anyhow::Result<Orchestrator> {
    let collaborators = Collaborators {
        source: Arc::new(trendbot_sources::reddit_from_config(config)?),
        generator: Arc::new(trendbot_sources::openai_from_config(config)?),
        publisher: Arc::new(trendbot_sources::x_from_config(config)?),
    };
    Ok(Orchestrator::new(
        store,
        collaborators,
        PipelineSettings::from_app_config(config),
    ))
}

#[cfg(test)]
mod tests;
