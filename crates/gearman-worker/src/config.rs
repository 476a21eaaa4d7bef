use gearman_core::{GearmanError, Result, Serializer};
use gearman_protocol::ServerEndpoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// `host[:port]` entries; each may itself be a comma separated list
    pub servers: Vec<String>,
    pub worker_id: Option<String>,
    /// Network timeout per operation, 0 waits forever
    pub timeout_ms: u64,
    /// Longest sleep after PRE_SLEEP before grabbing again without a NOOP
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Local time limit for functions registered without one, 0 for none
    pub job_timeout_secs: u64,
    pub serializer: Serializer,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            servers: vec!["127.0.0.1:4730".to_string()],
            worker_id: None,
            timeout_ms: 10_000,
            poll_interval_ms: 5_000,
            reconnect_delay_ms: 1_000,
            job_timeout_secs: 0,
            serializer: Serializer::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| GearmanError::Usage(format!("invalid worker config: {}", e)))
    }

    pub fn endpoints(&self) -> Result<Vec<ServerEndpoint>> {
        let mut endpoints = Vec::new();
        for servers in &self.servers {
            endpoints.extend(ServerEndpoint::parse_list(servers)?);
        }
        Ok(endpoints)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    /// Configured id, or `hostname-pid-random`
    pub fn generate_worker_id(&self) -> String {
        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let random = uuid::Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, std::process::id(), &random[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_worker_id() {
        let config = WorkerConfig::default();
        let id = config.generate_worker_id();
        assert!(id.contains(&format!("-{}-", std::process::id())));
        assert_ne!(id, config.generate_worker_id());

        let named = WorkerConfig {
            worker_id: Some("resizer-1".to_string()),
            ..WorkerConfig::default()
        };
        assert_eq!(named.generate_worker_id(), "resizer-1");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "servers:\n  - \"10.0.0.1,10.0.0.2:7003\"\n  - \"[::1]\"\njob_timeout_secs: 30"
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path()).unwrap();
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[1].port, 7003);
        assert_eq!(endpoints[2].host, "::1");
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }
}
