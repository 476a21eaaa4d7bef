use clap::Parser;
use gearman_worker::{EchoHandler, FunctionRegistry, ReverseHandler, Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gm-worker")]
#[command(about = "Gearman worker serving the echo and reverse functions", long_about = None)]
struct Args {
    /// Job servers, comma separated host[:port] list
    #[arg(short, long)]
    servers: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Network timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };

    if let Some(servers) = args.servers {
        config.servers = vec![servers];
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    let registry = FunctionRegistry::new();
    registry.register("echo", EchoHandler);
    registry.register("reverse", ReverseHandler);

    let mut worker = Worker::new(config, registry)?;

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.shutdown();
    });

    worker.run().await?;

    Ok(())
}
