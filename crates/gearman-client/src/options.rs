use gearman_core::{GearmanError, Result, Serializer};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Behavior switches for a [`Client`](crate::Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// `run_tasks` returns `IoWait` instead of blocking for packets
    pub non_blocking: bool,

    /// Keep only the completion payload, not the data chunks before it
    pub unbuffered_result: bool,

    /// Drop finished tasks at the end of `run_tasks`
    pub free_tasks: bool,

    /// Replace a missing unique id with a fresh UUID
    pub generate_unique: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            non_blocking: false,
            unbuffered_result: false,
            free_tasks: false,
            generate_unique: true,
        }
    }
}

/// Client configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host[:port]` entries
    pub servers: Vec<String>,

    /// Per-operation timeout in milliseconds, 0 waits forever
    pub timeout_ms: u64,

    pub options: ClientOptions,

    pub serializer: Serializer,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: vec!["127.0.0.1:4730".to_string()],
            timeout_ms: 30_000,
            options: ClientOptions::default(),
            serializer: Serializer::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| GearmanError::Usage(format!("invalid client config: {}", e)))
    }
}
