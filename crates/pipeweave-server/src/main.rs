//! Binary entry point (§7): parses the CLI, wires a [`PipeweaveRunner`],
//! and either serves HTTP or runs a one-shot `db` subcommand.

use std::sync::Arc;

use clap::Parser;
use pipeweave_core::config::LogLevel;
use pipeweave_core::runner::PipeweaveRunnerBuilder;
use pipeweave_server::config::{AppConfig, Cli, Commands, DbAction};
use pipeweave_server::state::AppState;
use pipeweave_server::transport::ReqwestTransport;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level: LogLevel = cli.config.log_level.into();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(log_level.as_filter_directive()).unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let orchestrator_config = cli.config.to_orchestrator_config();
    let transport = Arc::new(ReqwestTransport::new(AppConfig::secret_key()));
    let runner = PipeweaveRunnerBuilder::new(orchestrator_config).transport(transport).build().await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Db { action } => run_db_action(&runner, action, cli.config.dlq_retention_days).await,
        Commands::Serve => serve(runner, &cli.config).await,
    }
}

async fn run_db_action(runner: &pipeweave_core::PipeweaveRunner, action: DbAction, dlq_retention_days: i64) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => {
            runner.store.run_migrations().await?;
            tracing::info!("migrations applied");
        }
        DbAction::Cleanup => {
            let expired = runner.idempotency.cleanup_expired().await?;
            let purged = runner.dlq.purge(dlq_retention_days).await?;
            tracing::info!(expired, purged, "cleanup complete");
        }
    }
    Ok(())
}

async fn serve(runner: pipeweave_core::PipeweaveRunner, config: &pipeweave_server::config::AppConfig) -> anyhow::Result<()> {
    let mode = config.mode.into();
    let dispatcher_handle = runner.start(mode).await?;
    let metrics_handle = pipeweave_server::metrics::install()?;

    let state = AppState { runner: Arc::new(runner), mode, dlq_retention_days: config.dlq_retention_days };
    let app = pipeweave_server::routes::build(state, config.max_body_bytes, metrics_handle);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, ?mode, "pipeweave-server listening");
    axum::serve(listener, app).await?;

    if let Some(handle) = dispatcher_handle {
        handle.abort();
    }
    Ok(())
}
