use crate::{GearmanError, JobStatus, Priority, Result, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-local identifier for a task
pub type TaskId = Uuid;

/// Fresh unique id for a submission that did not name one.
pub fn generate_unique() -> String {
    Uuid::new_v4().to_string()
}

/// What the task asks of the job server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Submit a job for a worker to run
    Submit,
    /// Ask for the status of an existing job handle
    Status,
}

/// Task lifecycle on the client side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Added but not yet written to a server
    Queued,
    /// Written, waiting for the server to answer
    Sent,
    /// Server created the job and returned a handle
    Submitted,
    /// At least one intermediate event (data, warning, status) arrived
    Running,
    Completed,
    Failed,
    Exception,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Sent => "sent",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Exception => "exception",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskState::Queued),
            "sent" => Some(TaskState::Sent),
            "submitted" => Some(TaskState::Submitted),
            "running" => Some(TaskState::Running),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "exception" => Some(TaskState::Exception),
            _ => None,
        }
    }

    fn is_final(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Exception
        )
    }
}

/// One unit of work submitted by a client, with its in-flight progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Function name the worker registered
    pub function: String,

    /// Deduplication token; empty when the server should not coalesce
    pub unique: String,

    pub workload: Vec<u8>,

    pub priority: Priority,

    /// Fire-and-forget: the task is done once the job is created
    pub background: bool,

    pub kind: TaskKind,

    /// Server assigned job handle
    pub handle: Option<String>,

    pub state: TaskState,

    pub numerator: u32,
    pub denominator: u32,

    /// Most recent data/warning/complete chunk
    pub data: Vec<u8>,

    /// Accumulated result (all data chunks plus the completion payload
    /// unless results are unbuffered)
    pub result: Vec<u8>,

    /// Answer to a status query
    pub status: Option<JobStatus>,

    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new foreground, normal priority submission
    pub fn new(function: impl Into<String>, workload: Vec<u8>, unique: impl Into<String>) -> Result<Self> {
        if workload.len() > MAX_PAYLOAD_SIZE {
            return Err(GearmanError::Usage(format!(
                "workload of {} bytes exceeds the {} byte limit",
                workload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let now = Utc::now();
        Ok(Task {
            id: Uuid::new_v4(),
            function: function.into(),
            unique: unique.into(),
            workload,
            priority: Priority::Normal,
            background: false,
            kind: TaskKind::Submit,
            handle: None,
            state: TaskState::Queued,
            numerator: 0,
            denominator: 0,
            data: Vec::new(),
            result: Vec::new(),
            status: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// A task that asks for the status of `handle`
    pub fn status_query(handle: impl Into<String>) -> Self {
        let now = Utc::now();
        let handle = handle.into();
        Task {
            id: Uuid::new_v4(),
            function: String::new(),
            unique: String::new(),
            workload: Vec::new(),
            priority: Priority::Normal,
            background: false,
            kind: TaskKind::Status,
            handle: Some(handle),
            state: TaskState::Queued,
            numerator: 0,
            denominator: 0,
            data: Vec::new(),
            result: Vec::new(),
            status: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Check if the task reached its end state.
    ///
    /// Background submissions end as soon as the job exists on the server.
    pub fn is_terminal(&self) -> bool {
        self.state.is_final() || (self.background && self.state == TaskState::Submitted)
    }

    pub fn is_successful(&self) -> bool {
        match self.kind {
            TaskKind::Status => self.state == TaskState::Completed,
            TaskKind::Submit if self.background => self.state == TaskState::Submitted,
            TaskKind::Submit => self.state == TaskState::Completed,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The request was written to a server
    pub fn mark_sent(&mut self) {
        self.state = TaskState::Sent;
        self.touch();
    }

    /// Server answered `JOB_CREATED`
    pub fn on_created(&mut self, handle: String) -> Result<()> {
        if self.state != TaskState::Sent {
            return Err(GearmanError::Protocol(format!(
                "job created for task {} in state {}",
                self.id,
                self.state.as_str()
            )));
        }
        self.handle = Some(handle);
        self.state = TaskState::Submitted;
        self.touch();
        Ok(())
    }

    /// Intermediate data chunk. Returns false if the task already finished.
    pub fn on_data(&mut self, chunk: Vec<u8>, buffered: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        if buffered {
            self.result.extend_from_slice(&chunk);
        }
        self.data = chunk;
        self.state = TaskState::Running;
        self.touch();
        true
    }

    pub fn on_warning(&mut self, chunk: Vec<u8>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.data = chunk;
        self.state = TaskState::Running;
        self.touch();
        true
    }

    pub fn on_status(&mut self, numerator: u32, denominator: u32) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.numerator = numerator;
        self.denominator = denominator;
        self.state = TaskState::Running;
        self.touch();
        true
    }

    pub fn on_complete(&mut self, chunk: Vec<u8>, buffered: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        if buffered {
            self.result.extend_from_slice(&chunk);
        } else {
            self.result = chunk.clone();
        }
        self.data = chunk;
        self.state = TaskState::Completed;
        self.touch();
        true
    }

    pub fn on_fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some(error.into());
        self.state = TaskState::Failed;
        self.touch();
        true
    }

    pub fn on_exception(&mut self, chunk: Vec<u8>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.error = Some(String::from_utf8_lossy(&chunk).into_owned());
        self.data = chunk;
        self.state = TaskState::Exception;
        self.touch();
        true
    }

    /// Answer to a status query
    pub fn on_status_response(&mut self, status: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.numerator = status.numerator;
        self.denominator = status.denominator;
        self.status = Some(status);
        self.state = TaskState::Completed;
        self.touch();
        true
    }

    /// Put an unfinished task back in the queue after its connection broke
    pub fn requeue(&mut self) {
        if self.is_terminal() {
            return;
        }
        if self.kind == TaskKind::Submit {
            self.handle = None;
        }
        self.state = TaskState::Queued;
        self.touch();
    }
}
