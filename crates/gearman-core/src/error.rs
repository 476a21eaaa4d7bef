use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GearmanError {
    /// The job server could not be reached or the socket broke mid-call.
    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    /// The server answered with `ERR ...` or with data of the wrong shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The caller broke an API contract.
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// An `ERROR` packet from the job server.
    #[error("Server error {code}: {message}")]
    ServerError { code: String, message: String },

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Task raised an exception ({} bytes)", .0.len())]
    TaskException(Vec<u8>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GearmanError {
    /// True when the error came from the socket and the connection should be dropped.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            GearmanError::ConnectionFailure(_) | GearmanError::Io(_)
        )
    }
}

impl From<bincode::Error> for GearmanError {
    fn from(err: bincode::Error) -> Self {
        GearmanError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for GearmanError {
    fn from(err: serde_json::Error) -> Self {
        GearmanError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GearmanError>;
