//! Gearman client: submits jobs to one or more job servers and follows
//! them to completion.

mod callbacks;
mod client;
mod do_call;
mod options;
mod sync_client;

pub use callbacks::{CallbackRegistry, EventKind, LogCallback, TaskCallback};
pub use client::{Client, RunState, DEFAULT_TIMEOUT};
pub use do_call::{DoCall, DoEvent};
pub use options::{ClientConfig, ClientOptions};
pub use sync_client::BlockingClient;

pub use gearman_core::{GearmanError, JobStatus, Priority, Result, Serializer, Task, TaskId, TaskState};
