//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: API, workers and cron scheduler in one process.
//! - `worker`: queue workers only, against Postgres.
//! - `migrate`: run pending database migrations.
//! - `validate`: validate a workflow JSON file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adapters::AdapterRegistry;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use engine::{EngineConfig, Workflow, WorkflowEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Runs workflow automations: triggers, queue workers and actions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the API server together with workers and the cron scheduler.
    Serve {
        #[arg(long, env = "ENGINE_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Without a database everything is kept in memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        /// Workflow definitions to load in in-memory mode.
        #[arg(long, conflicts_with = "database_url")]
        workflows: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Start background workers that process queued jobs.
    Worker {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file (one workflow or an array).
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Jobs processed in parallel.
    #[arg(long, env = "ENGINE_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,
    /// Attempts per job before the execution fails.
    #[arg(long, env = "ENGINE_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
    /// First retry delay in milliseconds; doubles per attempt.
    #[arg(long, env = "ENGINE_BACKOFF_BASE_MS", default_value_t = 2000)]
    backoff_base_ms: u64,
    /// Default per-action deadline in seconds.
    #[arg(long, env = "ENGINE_ACTION_TIMEOUT_SECS", default_value_t = 30)]
    action_timeout_secs: u64,
    /// Seconds a claimed Postgres job may go without a heartbeat before
    /// another worker takes it over.
    #[arg(long, env = "ENGINE_JOB_LEASE_SECS", default_value_t = 600)]
    job_lease_secs: u64,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            job_lease: Duration::from_secs(self.job_lease_secs.max(4)),
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url, workflows, engine } => {
            let config = engine.config();
            let engine = match database_url {
                Some(url) => {
                    let pool = db::pool::create_pool(&url, pool_size(&config))
                        .await
                        .context("failed to connect to database")?;
                    WorkflowEngine::postgres(config, AdapterRegistry::with_builtins(), pool).await?
                }
                None => {
                    warn!("DATABASE_URL not set; running in memory, nothing is persisted");
                    let (engine, store) =
                        WorkflowEngine::in_memory(config, AdapterRegistry::with_builtins()).await?;
                    if let Some(path) = workflows {
                        for workflow in load_workflows(&path)? {
                            store.insert_workflow(workflow).await;
                        }
                    }
                    engine
                }
            };

            let engine = Arc::new(engine);
            engine.start().await.context("failed to start engine")?;

            info!("Starting API server on {bind}");
            api::serve(&bind, api::AppState::new(Arc::clone(&engine)), shutdown_signal())
                .await
                .context("API server failed")?;

            engine.shutdown().await?;
        }
        Command::Worker { database_url, engine } => {
            let config = engine.config();
            let pool = db::pool::create_pool(&database_url, pool_size(&config))
                .await
                .context("failed to connect to database")?;
            let engine =
                WorkflowEngine::postgres(config, AdapterRegistry::with_builtins(), pool).await?;

            info!("Starting background workers");
            engine.start_workers().await;
            shutdown_signal().await;
            engine.shutdown().await?;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool)
                .await
                .context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let registry = AdapterRegistry::with_builtins();
            let mut invalid = 0usize;

            for workflow in load_workflows(&path)? {
                match engine::validate_workflow(&workflow) {
                    Ok(()) => {
                        println!("✅ {} is valid ({} actions)", workflow.name, workflow.actions.len());
                        for action in &workflow.actions {
                            if !registry.contains(&action.action_type) {
                                println!(
                                    "   note: '{}' is not a built-in action; the host must register it",
                                    action.action_type
                                );
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("❌ {}: {e}", workflow.name);
                        invalid += 1;
                    }
                }
            }

            if invalid > 0 {
                bail!("{invalid} workflow(s) failed validation");
            }
        }
    }

    Ok(())
}

/// One connection per worker plus headroom for the API and the scheduler.
fn pool_size(config: &EngineConfig) -> u32 {
    u32::try_from(config.concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(5)
}

fn load_workflows(path: &Path) -> Result<Vec<Workflow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))?;

    let workflows = if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|w: Workflow| vec![w])
    };
    workflows.with_context(|| format!("{} is not a workflow definition", path.display()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
