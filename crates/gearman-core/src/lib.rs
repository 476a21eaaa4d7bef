mod error;
mod job_status;
mod priority;
mod serializer;
mod task;

pub use error::{GearmanError, Result};
pub use job_status::JobStatus;
pub use priority::Priority;
pub use serializer::Serializer;
pub use task::{generate_unique, Task, TaskId, TaskKind, TaskState};

/// Default job server port
pub const DEFAULT_PORT: u16 = 4730;

/// Maximum payload accepted on the wire: 64MB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;
