mod jobs;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use trendbot_core::{AppConfig, LogFormat, RunStore};
use trendbot_pipeline::{Collaborators, ControlPlane, Orchestrator, PipelineSettings, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(trendbot_core::load_app_config()?);
    init_tracing(&config)?;
    tracing::info!(
        env = %config.env,
        communities = ?config.communities,
        interval_minutes = config.interval_minutes,
        "starting trendbot-server"
    );

    let pool_config = trendbot_db::PoolConfig::from_app_config(&config);
    let pool = trendbot_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = trendbot_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let store: Arc<dyn RunStore> = Arc::new(trendbot_db::PgRunStore::new(pool.clone()));
    let collaborators = Collaborators {
        source: Arc::new(trendbot_sources::reddit_from_config(&config)?),
        generator: Arc::new(trendbot_sources::openai_from_config(&config)?),
        publisher: Arc::new(trendbot_sources::x_from_config(&config)?),
    };
    let orchestrator = Orchestrator::new(
        store,
        collaborators,
        PipelineSettings::from_app_config(&config),
    );

    // Must run before the scheduler can claim the single-flight slot.
    if let Some(run_id) = orchestrator.recover().await? {
        tracing::warn!(%run_id, "previous run was interrupted and marked failed");
    }

    let scheduler = Scheduler::new(
        Arc::new(orchestrator.clone()),
        config.scheduler_interval(),
        config.scheduler_enabled,
    );
    let scheduler_task = scheduler.start();
    let control = ControlPlane::new(orchestrator.clone(), Some(scheduler.clone()));
    let mut cron = jobs::build_job_scheduler(control).await?;

    shutdown_signal().await;

    scheduler.stop();
    orchestrator.shutdown();
    if let Err(e) = cron.shutdown().await {
        tracing::warn!(error = %e, "cron scheduler did not shut down cleanly");
    }
    if let Err(e) = scheduler_task.await {
        tracing::warn!(error = %e, "scheduler task ended abnormally");
    }
    match tokio::time::timeout(Duration::from_secs(120), orchestrator.wait_idle()).await {
        Ok(Some(run)) => tracing::info!(run_id = %run.id, status = %run.status, "active run finalized"),
        Ok(None) => {}
        Err(_) => tracing::warn!("active run still in flight at exit; it will be marked failed on restart"),
    }
    pool.close().await;
    tracing::info!("shutdown complete");
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

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
