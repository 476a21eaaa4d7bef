use async_trait::async_trait;
use gearman_core::{GearmanError, Serializer};
use gearman_worker::{FunctionHandler, FunctionRegistry, Job, JobResult, Worker, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize)]
struct ResizeRequest {
    url: String,
    widths: Vec<u32>,
}

#[derive(Serialize)]
struct ResizeResult {
    urls: Vec<String>,
}

/// Pretends to resize an image, reporting progress per width
struct ResizeHandler;

#[async_trait]
impl FunctionHandler for ResizeHandler {
    async fn execute(&self, job: &mut Job) -> JobResult {
        let request: ResizeRequest = job.workload_as()?;
        if request.widths.is_empty() {
            return Err(GearmanError::TaskFailed("no widths requested".to_string()));
        }

        let total = request.widths.len() as u32;
        let mut urls = Vec::new();
        for (done, width) in request.widths.iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            urls.push(format!("{}?w={}", request.url, width));
            job.send_status(done as u32 + 1, total)?;
        }

        job.send_complete_as(&ResizeResult { urls })?;
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = WorkerConfig {
        serializer: Serializer::Json,
        ..WorkerConfig::default()
    };

    let registry = FunctionRegistry::new();
    registry.register_with_timeout("resize", ResizeHandler, 60);

    let mut worker = Worker::new(config, registry)?;
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.shutdown();
    });

    worker.run().await?;
    Ok(())
}
