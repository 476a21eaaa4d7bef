use gearman_core::{GearmanError, Result, DEFAULT_PORT};
use gearman_protocol::admin::{self, AdminCommand, FunctionStatus, JobInfo, WorkerInfo};
use gearman_protocol::{ServerEndpoint, TextConnection};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the job server's administrative text protocol.
///
/// Connects on the first call; any socket error or timeout closes the
/// connection and the next call opens a new one.
#[derive(Debug)]
pub struct AdminClient {
    endpoint: ServerEndpoint,
    timeout: Duration,
    conn: Option<TextConnection>,
}

impl Default for AdminClient {
    fn default() -> Self {
        AdminClient::with_endpoint(ServerEndpoint::default())
    }
}

impl Clone for AdminClient {
    /// Same server and timeout, no connection
    fn clone(&self) -> Self {
        AdminClient {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            conn: None,
        }
    }
}

impl AdminClient {
    pub fn new(host: &str, port: u16) -> Self {
        AdminClient::with_endpoint(ServerEndpoint::new(host, port))
    }

    /// Parse `host[:port]`, defaulting the port to 4730
    pub fn from_address(address: &str) -> Result<Self> {
        Ok(AdminClient::with_endpoint(address.parse()?))
    }

    pub fn with_endpoint(endpoint: ServerEndpoint) -> Self {
        AdminClient {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
            conn: None,
        }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.conn = None;
    }

    pub fn set_server(&mut self, host: &str, port: Option<u16>) {
        self.endpoint = ServerEndpoint::new(host, port.unwrap_or(DEFAULT_PORT));
        self.conn = None;
    }

    pub async fn status(&mut self) -> Result<Vec<FunctionStatus>> {
        let raw = self.make_call(AdminCommand::Status).await?;
        admin::parse_status(&raw)
    }

    pub async fn workers(&mut self) -> Result<Vec<WorkerInfo>> {
        let raw = self.make_call(AdminCommand::Workers).await?;
        admin::parse_workers(&raw)
    }

    pub async fn version(&mut self) -> Result<String> {
        let raw = self.make_call(AdminCommand::Version).await?;
        single_field(&raw)
    }

    pub async fn getpid(&mut self) -> Result<u32> {
        let raw = self.make_call(AdminCommand::GetPid).await?;
        let pid = single_field(&raw)?;
        pid.parse().map_err(|_| {
            GearmanError::Protocol(format!("Failed to parse server response ({})", raw.trim_end()))
        })
    }

    pub async fn verbose(&mut self) -> Result<String> {
        let raw = self.make_call(AdminCommand::Verbose).await?;
        single_field(&raw)
    }

    pub async fn maxqueue(&mut self, function: &str, size: i64) -> Result<()> {
        let raw = self
            .make_call(AdminCommand::MaxQueue {
                function: function.to_string(),
                size,
            })
            .await?;
        admin::expect_ok(&raw)
    }

    /// `true` lets running jobs finish first
    pub async fn shutdown(&mut self, graceful: bool) -> Result<()> {
        let raw = self.make_call(AdminCommand::Shutdown { graceful }).await?;
        admin::expect_ok(&raw)
    }

    pub async fn drop_function(&mut self, function: &str) -> Result<()> {
        let raw = self
            .make_call(AdminCommand::DropFunction(function.to_string()))
            .await?;
        admin::expect_ok(&raw)
    }

    pub async fn create_function(&mut self, function: &str) -> Result<()> {
        let raw = self
            .make_call(AdminCommand::CreateFunction(function.to_string()))
            .await?;
        admin::expect_ok(&raw)
    }

    pub async fn show_jobs(&mut self) -> Result<Vec<JobInfo>> {
        let raw = self.make_call(AdminCommand::ShowJobs).await?;
        admin::parse_jobs(&raw)
    }

    pub async fn show_unique_jobs(&mut self) -> Result<Vec<String>> {
        let raw = self.make_call(AdminCommand::ShowUniqueJobs).await?;
        admin::parse_unique_jobs(&raw)
    }

    pub async fn cancel_job(&mut self, handle: &str) -> Result<()> {
        let raw = self
            .make_call(AdminCommand::CancelJob(handle.to_string()))
            .await?;
        admin::expect_ok(&raw)
    }

    /// Send one command and return the complete raw reply
    pub async fn make_call(&mut self, command: AdminCommand) -> Result<String> {
        let result = self.exchange(&command).await;
        if let Err(e) = &result {
            warn!("Admin command '{}' against {} failed: {}", command, self.endpoint, e);
            self.conn = None;
        }
        result
    }

    async fn exchange(&mut self, command: &AdminCommand) -> Result<String> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => TextConnection::connect(&self.endpoint, self.timeout).await?,
        };
        let conn = self.conn.insert(conn);

        debug!("admin -> {}", command);
        conn.send(command.to_line().as_bytes()).await?;

        let mut reply = Vec::new();
        loop {
            reply.extend_from_slice(&conn.recv_until_quiescent().await?);
            let raw = String::from_utf8_lossy(&reply);
            if admin::reply_complete(command, &raw) {
                return Ok(raw.into_owned());
            }
        }
    }
}

/// The single token of an `OK <token>` reply
fn single_field(raw: &str) -> Result<String> {
    let mut fields = admin::ok_fields(raw, 1)?;
    Ok(fields.remove(0))
}
