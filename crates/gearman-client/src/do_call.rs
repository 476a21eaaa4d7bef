use crate::callbacks::EventKind;
use crate::Client;
use gearman_core::{GearmanError, Result, Task, TaskId};
use std::collections::VecDeque;

/// One step of a running `do` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoEvent {
    /// The server accepted the job; ends a background call
    Created(String),
    Data(Vec<u8>),
    Warning(Vec<u8>),
    Status { numerator: u32, denominator: u32 },
    /// Final result, including buffered data chunks
    Complete(Vec<u8>),
    Fail(String),
    Exception(Vec<u8>),
}

impl DoEvent {
    fn from_task(kind: EventKind, task: &Task) -> Option<Self> {
        let event = match kind {
            EventKind::Workload => return None,
            EventKind::Created => DoEvent::Created(task.handle.clone().unwrap_or_default()),
            EventKind::Data => DoEvent::Data(task.data.clone()),
            EventKind::Warning => DoEvent::Warning(task.data.clone()),
            EventKind::Status => DoEvent::Status {
                numerator: task.numerator,
                denominator: task.denominator,
            },
            EventKind::Complete => DoEvent::Complete(task.result.clone()),
            EventKind::Fail => DoEvent::Fail(task.error.clone().unwrap_or_default()),
            EventKind::Exception => DoEvent::Exception(task.data.clone()),
        };
        Some(event)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DoEvent::Complete(_) | DoEvent::Fail(_) | DoEvent::Exception(_)
        )
    }
}

/// A submitted job driven one event at a time.
///
/// `next_event` yields intermediate events, then exactly one terminal
/// event, then `None`. Errors (timeouts, lost connections) are returned
/// without ending the call: a timed-out call can keep waiting, and a call
/// whose connection broke is resubmitted on the next `next_event`. A
/// server `ERROR` fails the job and is the last thing the call reports.
///
/// Dropping an unfinished call abandons the job on the client side.
pub struct DoCall<'a> {
    client: &'a mut Client,
    id: TaskId,
    finished: Option<Task>,
    backlog: VecDeque<DoEvent>,
}

impl<'a> DoCall<'a> {
    pub(crate) fn new(client: &'a mut Client, id: TaskId) -> Self {
        DoCall {
            client,
            id,
            finished: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task(&self) -> Option<&Task> {
        self.finished.as_ref().or_else(|| self.client.task(self.id))
    }

    pub fn job_handle(&self) -> Option<&str> {
        self.task().and_then(|t| t.handle.as_deref())
    }

    /// Last reported `(numerator, denominator)`
    pub fn status(&self) -> (u32, u32) {
        self.task()
            .map(|t| (t.numerator, t.denominator))
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some() && self.backlog.is_empty()
    }

    pub async fn next_event(&mut self) -> Result<Option<DoEvent>> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Ok(Some(event));
            }
            if self.finished.is_some() {
                return Ok(None);
            }

            let dispatched = match self.client.pump(self.id).await {
                Ok(dispatched) => dispatched,
                Err(e) => {
                    self.settle();
                    return Err(e);
                }
            };

            for (id, kind) in dispatched {
                if id != self.id {
                    continue;
                }
                if let Some(event) = self.client.task(id).and_then(|t| DoEvent::from_task(kind, t)) {
                    self.backlog.push_back(event);
                }
            }
            self.settle();
        }
    }

    /// The finished task; an error while the call is still running
    pub fn into_task(mut self) -> Result<Task> {
        self.finished
            .take()
            .ok_or_else(|| GearmanError::Usage(format!("job {} has not finished", self.id)))
    }

    fn settle(&mut self) {
        if self.client.task(self.id).is_some_and(Task::is_terminal) {
            self.finished = self.client.take_task(self.id);
        }
    }
}

impl Drop for DoCall<'_> {
    fn drop(&mut self) {
        if self.finished.is_none() {
            self.client.take_task(self.id);
        }
    }
}
