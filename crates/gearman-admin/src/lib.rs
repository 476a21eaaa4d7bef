pub mod client;
pub mod sync_client;

pub use client::{AdminClient, DEFAULT_TIMEOUT};
pub use sync_client::BlockingAdmin;

pub use gearman_core::{GearmanError, Result};
pub use gearman_protocol::admin::{FunctionStatus, JobInfo, WorkerInfo};
