use crate::{Client, ClientConfig, RunState};
use gearman_core::{JobStatus, Result, Task, TaskId};
use std::time::Duration;

/// Synchronous client (wraps the async engine in its own runtime)
pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    client: Client,
}

impl BlockingClient {
    pub fn new() -> Result<Self> {
        Self::with_client(Client::new())
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::with_client(Client::from_config(config)?)
    }

    pub fn with_client(client: Client) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(BlockingClient { runtime, client })
    }

    /// The wrapped engine, for configuration and task inspection
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn add_servers(&mut self, servers: &str) -> Result<()> {
        self.client.add_servers(servers)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.client.set_timeout(timeout);
    }

    pub fn add_task(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<TaskId> {
        self.client.add_task(function, workload, unique)
    }

    pub fn add_task_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<TaskId> {
        self.client.add_task_background(function, workload, unique)
    }

    pub fn run_tasks(&mut self) -> Result<RunState> {
        self.runtime.block_on(self.client.run_tasks())
    }

    pub fn do_job(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Vec<u8>> {
        self.runtime.block_on(self.client.do_job(function, workload, unique))
    }

    pub fn do_background(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<String> {
        self.runtime
            .block_on(self.client.do_background(function, workload, unique))
    }

    pub fn execute(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Task> {
        self.runtime.block_on(self.client.execute(function, workload, unique))
    }

    pub fn job_status(&mut self, handle: &str) -> Result<JobStatus> {
        self.runtime.block_on(self.client.job_status(handle))
    }

    pub fn echo(&mut self, payload: &[u8]) -> Result<()> {
        self.runtime.block_on(self.client.echo(payload))
    }
}
