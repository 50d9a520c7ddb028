//! lps-worker entry point.
//!
//! Runs one queue consumer (`--queue risk_evaluation|audit|notifications`)
//! or all of them (`--all`) in a single process. Ctrl-c stops every loop
//! gracefully after the in-flight job finishes.

use anyhow::{bail, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use lps_config::Settings;
use lps_workers::{run_worker, AuditHandler, JobHandler, RiskHandler, WebhookHandler};

#[derive(Parser, Debug)]
#[command(name = "lps-worker", about = "Run background workers for the loan system")]
struct Args {
    /// Queue to process: risk_evaluation, audit, or notifications.
    #[arg(short, long)]
    queue: Option<String>,

    /// Unique worker identifier; defaults to <queue>-<pid>.
    #[arg(short, long)]
    worker_id: Option<String>,

    /// Run workers for every queue in this process.
    #[arg(short, long)]
    all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    lps_config::load_dotenv();
    init_tracing();

    let args = Args::parse();
    let settings = Settings::from_env()?;
    let pool = lps_db::connect(&settings.database_url).await?;

    let handlers: Vec<Box<dyn JobHandler>> = if args.all {
        vec![
            Box::new(RiskHandler::new(pool.clone())),
            Box::new(AuditHandler::new(pool.clone())),
            Box::new(WebhookHandler::new(settings.clone())?),
        ]
    } else {
        match args.queue.as_deref() {
            Some("risk_evaluation") => vec![Box::new(RiskHandler::new(pool.clone()))],
            Some("audit") => vec![Box::new(AuditHandler::new(pool.clone()))],
            // `webhook` kept as an alias for the notifications queue.
            Some("notifications") | Some("webhook") => {
                vec![Box::new(WebhookHandler::new(settings.clone())?)]
            }
            Some(other) => bail!(
                "unknown queue: {other}. Available: risk_evaluation, audit, notifications"
            ),
            None => bail!("pass --queue <name> or --all"),
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    for handler in handlers {
        let pool = pool.clone();
        let shutdown = shutdown_rx.clone();
        let worker_id = args
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", handler.queue_name(), std::process::id()));
        tasks.push(tokio::spawn(async move {
            run_worker(pool, handler.as_ref(), &worker_id, shutdown).await
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        task.await??;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
