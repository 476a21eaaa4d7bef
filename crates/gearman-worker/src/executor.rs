use crate::handler::{FunctionHandler, JobResult};
use crate::job::Job;
use futures::FutureExt;
use gearman_core::GearmanError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Runs one handler against a job, bounded by an optional time limit
pub struct JobExecutor {
    handler: Arc<dyn FunctionHandler>,
    timeout: Option<Duration>,
}

impl JobExecutor {
    pub fn new(handler: Arc<dyn FunctionHandler>, timeout: Option<Duration>) -> Self {
        JobExecutor { handler, timeout }
    }

    /// Execute the handler. A panic or an expired time limit is turned into
    /// an error so the worker can report it and move on.
    pub async fn execute(&self, job: &mut Job) -> JobResult {
        info!("Executing {} ({})", job.function(), job.handle());

        let run = AssertUnwindSafe(self.handler.execute(job)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(GearmanError::Timeout(limit))),
            },
            None => run.await,
        };

        let result = outcome.unwrap_or_else(|_| {
            Err(GearmanError::TaskFailed("handler panicked".to_string()))
        });
        match &result {
            Ok(data) => info!("Job {} completed ({} bytes)", job.handle(), data.len()),
            Err(e) => error!("Job {} failed: {}", job.handle(), e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, EchoHandler};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct SlowHandler;

    #[async_trait]
    impl FunctionHandler for SlowHandler {
        async fn execute(&self, _job: &mut Job) -> JobResult {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(Vec::new())
        }
    }

    fn job() -> Job {
        let (tx, _rx) = mpsc::unbounded_channel();
        Job::new("H:1", "test", "", b"data".to_vec(), tx)
    }

    #[tokio::test]
    async fn test_executor_success() {
        let executor = JobExecutor::new(Arc::new(EchoHandler), None);
        assert_eq!(executor.execute(&mut job()).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let executor = JobExecutor::new(Arc::new(SlowHandler), Some(Duration::from_millis(50)));
        assert!(matches!(
            executor.execute(&mut job()).await,
            Err(GearmanError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_executor_recovers_from_panic() {
        let executor = JobExecutor::new(
            Arc::new(handler_fn(|_| panic!("handler bug"))),
            None,
        );
        assert!(matches!(
            executor.execute(&mut job()).await,
            Err(GearmanError::TaskFailed(_))
        ));
    }
}
