use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regrade::config::WorkerConfig;
use regrade::observability::{init_logging, LogFormat};
use regrade::trigger::router;
use regrade::worker::{prepare_classes, QueueWorker};
use regrade_storage::util::printer::print_cells;
use regrade_storage::{ClassId, InMemoryQueue, InMemoryStore};
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Gradebook recalculation worker.
#[derive(Debug, Parser)]
#[command(name = "regrade")]
#[command(about = "Recalculates gradebook formula columns from a queue of cell requests")]
#[command(version)]
struct Args {
    /// Emit logs as JSON lines instead of the human readable format.
    #[arg(long, env = "REGRADE_LOG_JSON", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enqueue every formula cell of the snapshot, then poll the queue until interrupted and
    /// answer HTTP triggers.
    Serve {
        /// Overrides REGRADE_HTTP_PORT.
        #[arg(long)]
        port: Option<u16>,

        /// Gradebook snapshot (JSON) to seed the in-memory store with.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Recalculate every formula column of a snapshot once and print the result.
    Recalculate {
        /// Gradebook snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Where to write the recalculated snapshot.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the student-visible tier instead of the instructor tier.
        #[arg(long)]
        public: bool,
    },
}

fn load_store(path: &Path) -> Result<InMemoryStore> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("could not read snapshot {}", path.display()))?;
    let store = InMemoryStore::from_json(&json)
        .with_context(|| format!("could not load snapshot {}", path.display()))?;

    Ok(store)
}

fn class_ids(store: &InMemoryStore) -> Result<BTreeSet<ClassId>> {
    let snapshot = store.snapshot()?;

    Ok(snapshot
        .columns
        .iter()
        .map(|column| column.class_id)
        .collect())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// A worker over `store` with every formula cell of it already enqueued.
async fn start_worker(
    store: Arc<InMemoryStore>,
    config: WorkerConfig,
) -> Result<(QueueWorker, usize)> {
    let queue = Arc::new(InMemoryQueue::new());
    let enqueued = prepare_classes(&*store, &*queue, &config, class_ids(&store)?).await?;

    Ok((QueueWorker::new(store, queue, config), enqueued))
}

async fn serve(port: Option<u16>, snapshot: Option<PathBuf>) -> Result<()> {
    let mut config = WorkerConfig::from_env()?;
    if let Some(port) = port {
        config.http_port = port;
    }

    let store = Arc::new(match snapshot {
        Some(path) => load_store(&path)?,
        None => InMemoryStore::new(),
    });

    info!(config = ?config, "Starting worker");
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let (worker, enqueued) = start_worker(store, config).await?;
    info!(enqueued, "Enqueued snapshot for recalculation");
    let worker = Arc::new(worker);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Listening for triggers");
    let app = router(worker.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    worker.run(shutdown_signal()).await;
    server.await??;

    Ok(())
}

async fn recalculate(snapshot: PathBuf, output: Option<PathBuf>, public: bool) -> Result<()> {
    let config = WorkerConfig::from_env()?;
    let store = Arc::new(load_store(&snapshot)?);
    let start = Instant::now();

    let (worker, enqueued) = start_worker(store.clone(), config).await?;
    let report = worker.drain().await?;
    let elapsed = start.elapsed();

    print_cells(&store.cells()?, !public);
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!(
        r##"
        Enqueued:  {}
        Written:   {}
        Failed:    {}
        Elapsed:   {:?}
    "##,
        enqueued, report.written, report.failed, elapsed
    );

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&store.snapshot()?)?;
        fs::write(&path, json).with_context(|| format!("could not write {}", path.display()))?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    match args.command {
        Commands::Serve { port, snapshot } => serve(port, snapshot).await,
        Commands::Recalculate {
            snapshot,
            output,
            public,
        } => recalculate(snapshot, output, public).await,
    }
}
