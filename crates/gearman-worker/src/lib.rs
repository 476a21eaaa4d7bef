//! Gearman worker: registers functions with job servers and runs the jobs
//! they hand out.

pub mod config;
pub mod executor;
pub mod handler;
pub mod job;
pub mod worker;

pub use config::WorkerConfig;
pub use handler::{handler_fn, EchoHandler, FunctionHandler, FunctionRegistry, JobResult, ReverseHandler};
pub use job::Job;
pub use worker::{ShutdownHandle, Worker};
