use anyhow::{bail, Context};
use clinicbooks_ingest::{run_audit, Orchestrator, ProgressChannel};
use clinicbooks_storage::{open_db, seed_clinics, unfinished_uploads, DbPool};
use tokio::net::TcpListener;

mod api;
mod config;
mod error;
mod telemetry;

use crate::api::AppState;
use crate::config::Config;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Audit { fix: bool },
}

impl Command {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let args: Vec<String> = args.into_iter().collect();
        match args.first().map(String::as_str) {
            None | Some("serve") => Ok(Command::Serve),
            Some("audit") => match args.get(1).map(String::as_str) {
                None => Ok(Command::Audit { fix: false }),
                Some("--fix") => Ok(Command::Audit { fix: true }),
                Some(other) => bail!("unknown audit option '{other}'"),
            },
            Some(other) => bail!("unknown command '{other}' (expected serve or audit [--fix])"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Command::parse(std::env::args().skip(1))?;
    let config = Config::load()?;
    telemetry::init(&config);

    if let Some(dir) = config.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let pool = open_db(&config.database_path, config.max_connections, config.busy_timeout())
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    seed_clinics(&pool, &config.seed_clinics())
        .await
        .context("seeding clinics")?;

    let outcome = match command {
        Command::Serve => serve(&config, pool.clone()).await,
        Command::Audit { fix } => audit(&pool, fix).await,
    };

    pool.close().await;
    outcome
}

async fn serve(config: &Config, pool: DbPool) -> anyhow::Result<()> {
    for upload in unfinished_uploads(&pool).await? {
        tracing::warn!(
            upload_id = upload.id,
            status = %upload.status,
            "upload was interrupted; POST /api/uploads/{}/resume with its files to finish it",
            upload.id
        );
    }

    let orchestrator = Orchestrator::new(pool.clone(), ProgressChannel::new(config.progress_buffer));
    let state = AppState {
        orchestrator: orchestrator.clone(),
        pool,
    };
    let app = api::router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, database = %config.database_path.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("waiting for running uploads to finish");
    orchestrator.drain().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn audit(pool: &DbPool, fix: bool) -> anyhow::Result<()> {
    let report = run_audit(pool, fix).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
