use crate::callbacks::{CallbackRegistry, EventKind};
use crate::do_call::DoCall;
use crate::options::{ClientConfig, ClientOptions};
use futures::FutureExt;
use gearman_core::{
    generate_unique, GearmanError, JobStatus, Priority, Result, Serializer, Task, TaskId, TaskKind,
    TaskState,
};
use gearman_protocol::{ConnectionPool, Packet, PacketType, ServerEndpoint};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one `run_tasks` pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Every task reached its end state
    Complete,
    /// Non-blocking mode: nothing more is readable right now
    IoWait,
}

/// A task event produced while handling one packet
pub(crate) type Dispatched = Vec<(TaskId, EventKind)>;

/// Requests written on one connection that still expect answers
#[derive(Debug, Default)]
struct Inflight {
    /// In write order, waiting for JOB_CREATED, STATUS_RES or ERROR
    pending: VecDeque<TaskId>,
    /// Created foreground jobs; coalesced submissions share a handle
    handles: HashMap<String, Vec<TaskId>>,
}

impl Inflight {
    fn task_ids(&self) -> Vec<TaskId> {
        self.pending
            .iter()
            .chain(self.handles.values().flatten())
            .copied()
            .collect()
    }

    fn contains(&self, id: TaskId) -> bool {
        self.pending.contains(&id) || self.handles.values().any(|ids| ids.contains(&id))
    }

    /// Stop routing job events to `id`. Pending entries stay so later
    /// replies still line up with the write order.
    fn forget(&mut self, id: TaskId) {
        self.handles.retain(|_, ids| {
            ids.retain(|t| *t != id);
            !ids.is_empty()
        });
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.handles.is_empty()
    }
}

fn find(tasks: &mut [Task], id: TaskId) -> Option<&mut Task> {
    tasks.iter_mut().find(|t| t.id == id)
}

fn server_error(packet: &Packet) -> Result<GearmanError> {
    Ok(GearmanError::ServerError {
        code: packet.arg_str(0)?.to_string(),
        message: String::from_utf8_lossy(packet.arg(1)?).into_owned(),
    })
}

fn parse_status(packet: &Packet) -> Result<JobStatus> {
    let client_count = match packet.kind {
        PacketType::StatusResUnique => Some(packet.arg_u32(5)?),
        _ => None,
    };
    Ok(JobStatus {
        is_known: packet.arg_flag(1)?,
        is_running: packet.arg_flag(2)?,
        numerator: packet.arg_u32(3)?,
        denominator: packet.arg_u32(4)?,
        client_count,
    })
}

/// Client engine: queues tasks, submits them across the configured job
/// servers and tracks each one until it finishes.
#[derive(Debug)]
pub struct Client {
    pool: ConnectionPool,
    inflight: Vec<Inflight>,
    tasks: Vec<Task>,
    callbacks: CallbackRegistry,
    options: ClientOptions,
    serializer: Serializer,
    next_server: usize,
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Clone for Client {
    /// Copies servers, timeout, options and serializer. Tasks, callbacks
    /// and open connections stay with the original.
    fn clone(&self) -> Self {
        Client {
            pool: self.pool.clone(),
            inflight: self.pool.endpoints().iter().map(|_| Inflight::default()).collect(),
            tasks: Vec::new(),
            callbacks: CallbackRegistry::default(),
            options: self.options,
            serializer: self.serializer,
            next_server: 0,
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Client {
            pool: ConnectionPool::new(DEFAULT_TIMEOUT),
            inflight: Vec::new(),
            tasks: Vec::new(),
            callbacks: CallbackRegistry::default(),
            options: ClientOptions::default(),
            serializer: Serializer::default(),
            next_server: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut client = Client::new();
        for servers in &config.servers {
            client.add_servers(servers)?;
        }
        client.set_timeout(Duration::from_millis(config.timeout_ms));
        client.options = config.options;
        client.serializer = config.serializer;
        Ok(client)
    }

    pub fn add_server(&mut self, host: &str, port: u16) {
        self.pool.add(ServerEndpoint::new(host, port));
        self.inflight.push(Inflight::default());
    }

    /// Add every entry of a `host[:port],...` list
    pub fn add_servers(&mut self, servers: &str) -> Result<()> {
        for endpoint in ServerEndpoint::parse_list(servers)? {
            self.pool.add(endpoint);
            self.inflight.push(Inflight::default());
        }
        Ok(())
    }

    pub fn remove_servers(&mut self) {
        for index in 0..self.pool.len() {
            self.release_connection(index);
        }
        self.pool.clear();
        self.inflight.clear();
        self.next_server = 0;
    }

    pub fn servers(&self) -> &[ServerEndpoint] {
        self.pool.endpoints()
    }

    pub fn timeout(&self) -> Duration {
        self.pool.timeout()
    }

    /// Closes every open connection. Unfinished tasks on them go back to
    /// `Queued` and lose their handle, so the next `run_tasks` submits them
    /// again. For a foreground job the server already created that is a
    /// second job unless both submissions carry the same unique id. Change
    /// the timeout while the client is idle to avoid this.
    pub fn set_timeout(&mut self, timeout: Duration) {
        for index in 0..self.pool.len() {
            self.release_connection(index);
        }
        self.pool.set_timeout(timeout);
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ClientOptions) {
        self.options = options;
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    pub fn set_serializer(&mut self, serializer: Serializer) {
        self.serializer = serializer;
    }

    pub fn set_callback(&mut self, kind: EventKind, handler: impl FnMut(&Task) + Send + 'static) {
        self.callbacks.set(kind, Box::new(handler));
    }

    pub fn set_log_fn(&mut self, handler: impl FnMut(&str) + Send + 'static) {
        self.callbacks.set_log(Box::new(handler));
    }

    pub fn clear_callbacks(&mut self) {
        self.callbacks.clear();
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Remove a task from the table, forgetting any request still in flight for it
    pub fn take_task(&mut self, id: TaskId) -> Option<Task> {
        let position = self.tasks.iter().position(|t| t.id == id)?;
        let task = self.tasks.remove(position);
        for inflight in self.inflight.iter_mut() {
            inflight.forget(id);
            // Status replies are matched by handle, not position
            if task.kind == TaskKind::Status {
                inflight.pending.retain(|t| *t != id);
            }
        }
        Some(task)
    }

    pub fn add_task(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::Normal, false)
    }

    pub fn add_task_high(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::High, false)
    }

    pub fn add_task_low(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::Low, false)
    }

    pub fn add_task_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::Normal, true)
    }

    pub fn add_task_high_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::High, true)
    }

    pub fn add_task_low_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<TaskId> {
        self.queue_submit(function, workload, unique, Priority::Low, true)
    }

    /// Queue a status query for an existing job handle
    pub fn add_task_status(&mut self, handle: &str) -> TaskId {
        let task = Task::status_query(handle);
        let id = task.id;
        self.tasks.push(task);
        id
    }

    fn queue_submit(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        background: bool,
    ) -> Result<TaskId> {
        if function.is_empty() {
            return Err(GearmanError::Usage("function name must not be empty".to_string()));
        }
        let unique = match unique {
            Some(unique) => unique.to_string(),
            None if self.options.generate_unique => generate_unique(),
            None => String::new(),
        };

        let task = Task::new(function, workload.to_vec(), unique)?
            .with_priority(priority)
            .with_background(background);
        let id = task.id;
        debug!("Queued task {} for {} ({} bytes)", id, function, workload.len());
        self.tasks.push(task);
        Ok(id)
    }

    /// Submit everything queued, then service connections until every
    /// task is finished.
    pub async fn run_tasks(&mut self) -> Result<RunState> {
        let queued: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.state == TaskState::Queued)
            .map(|t| t.id)
            .collect();
        for id in queued {
            self.submit(id).await?;
        }

        loop {
            let active = self.active_connections();
            if active.is_empty() {
                break;
            }

            let received = if self.options.non_blocking {
                match self.pool.recv_any(&active).now_or_never() {
                    Some(received) => received,
                    None => return Ok(RunState::IoWait),
                }
            } else {
                self.pool.recv_any(&active).await
            };

            match received {
                Some((index, Ok(packet))) => {
                    self.dispatch(index, packet)?;
                }
                Some((index, Err(e))) => return Err(self.connection_error(index, e)),
                None => {
                    for index in active {
                        self.release_connection(index);
                    }
                    return Err(GearmanError::ConnectionFailure(
                        "lost every connection with outstanding tasks".to_string(),
                    ));
                }
            }
        }

        if self.options.free_tasks {
            self.tasks.retain(|t| !t.is_terminal());
        }
        Ok(RunState::Complete)
    }

    /// Block until a connection with outstanding work has something to read
    pub async fn wait(&mut self) -> Result<()> {
        let active = self.active_connections();
        if active.is_empty() {
            return Ok(());
        }
        self.pool.ready_any(&active).await.map(|_| ())
    }

    /// Start a `do` call; drive it with [`DoCall::next_event`].
    pub async fn do_call(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        background: bool,
    ) -> Result<DoCall<'_>> {
        let id = self.queue_submit(function, workload, unique, priority, background)?;
        if let Err(e) = self.submit(id).await {
            self.take_task(id);
            return Err(e);
        }
        Ok(DoCall::new(self, id))
    }

    pub async fn do_job(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Vec<u8>> {
        self.do_foreground(function, workload, unique, Priority::Normal).await
    }

    pub async fn do_high(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Vec<u8>> {
        self.do_foreground(function, workload, unique, Priority::High).await
    }

    pub async fn do_low(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Vec<u8>> {
        self.do_foreground(function, workload, unique, Priority::Low).await
    }

    /// Returns the job handle once the server has accepted the job
    pub async fn do_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<String> {
        self.do_detached(function, workload, unique, Priority::Normal).await
    }

    pub async fn do_high_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<String> {
        self.do_detached(function, workload, unique, Priority::High).await
    }

    pub async fn do_low_background(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
    ) -> Result<String> {
        self.do_detached(function, workload, unique, Priority::Low).await
    }

    /// Submit and wait, returning the finished task whatever its outcome
    pub async fn execute(&mut self, function: &str, workload: &[u8], unique: Option<&str>) -> Result<Task> {
        let mut call = self.do_call(function, workload, unique, Priority::Normal, false).await?;
        while call.next_event().await?.is_some() {}
        call.into_task()
    }

    /// Serialize `value`, run it as a foreground job and decode the result
    pub async fn do_typed<T, R>(&mut self, function: &str, value: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let workload = self.serializer.dumps(value)?;
        let result = self.do_job(function, &workload, None).await?;
        self.serializer.loads(&result)
    }

    async fn do_foreground(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
    ) -> Result<Vec<u8>> {
        let task = self.drain(function, workload, unique, priority, false).await?;
        match task.state {
            TaskState::Completed => Ok(task.result),
            TaskState::Exception => Err(GearmanError::TaskException(task.data)),
            _ => Err(GearmanError::TaskFailed(
                task.error.unwrap_or_else(|| "job failed".to_string()),
            )),
        }
    }

    async fn do_detached(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
    ) -> Result<String> {
        let task = self.drain(function, workload, unique, priority, true).await?;
        task.handle
            .ok_or_else(|| GearmanError::Protocol("job server returned no job handle".to_string()))
    }

    async fn drain(
        &mut self,
        function: &str,
        workload: &[u8],
        unique: Option<&str>,
        priority: Priority,
        background: bool,
    ) -> Result<Task> {
        let mut call = self.do_call(function, workload, unique, priority, background).await?;
        while call.next_event().await?.is_some() {}
        call.into_task()
    }

    /// Ask each server in turn; the first one that knows the job wins.
    pub async fn job_status(&mut self, handle: &str) -> Result<JobStatus> {
        self.query_status(Packet::get_status(handle), PacketType::StatusRes, handle)
            .await
    }

    pub async fn unique_status(&mut self, unique: &str) -> Result<JobStatus> {
        self.query_status(
            Packet::get_status_unique(unique),
            PacketType::StatusResUnique,
            unique,
        )
        .await
    }

    async fn query_status(&mut self, request: Packet, reply: PacketType, key: &str) -> Result<JobStatus> {
        if self.pool.is_empty() {
            return Err(GearmanError::Usage("no job servers configured".to_string()));
        }

        let mut answer = None;
        let mut last_error = None;
        for index in 0..self.pool.len() {
            let result = self
                .exchange(index, request.clone(), |p| {
                    p.kind == reply && p.arg(0).map(|k| k == key.as_bytes()).unwrap_or(false)
                })
                .await
                .and_then(|packet| parse_status(&packet));

            match result {
                Ok(status) if status.is_known => return Ok(status),
                Ok(status) => answer = Some(status),
                Err(e @ GearmanError::ServerError { .. }) => return Err(e),
                Err(e) => {
                    warn!("Status query against {} failed: {}", self.pool.endpoints()[index], e);
                    last_error = Some(e);
                }
            }
        }

        match (answer, last_error) {
            (Some(status), _) => Ok(status),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(JobStatus::default()),
        }
    }

    /// Round-trip `payload` through every configured server
    pub async fn echo(&mut self, payload: &[u8]) -> Result<()> {
        if self.pool.is_empty() {
            return Err(GearmanError::Usage("no job servers configured".to_string()));
        }

        for index in 0..self.pool.len() {
            let reply = self
                .exchange(index, Packet::echo(payload), |p| p.kind == PacketType::EchoRes)
                .await?;
            if reply.arg(0)? != payload {
                return Err(GearmanError::Protocol(format!(
                    "echo from {} did not match the payload",
                    self.pool.endpoints()[index]
                )));
            }
        }
        Ok(())
    }

    /// Send `request` and read until `is_reply` matches. Packets for
    /// in-flight tasks that arrive first are dispatched as usual.
    async fn exchange(
        &mut self,
        index: usize,
        request: Packet,
        is_reply: impl Fn(&Packet) -> bool,
    ) -> Result<Packet> {
        let conn = self.pool.ensure_connected(index).await?;
        if let Err(e) = conn.send(request).await {
            return Err(self.connection_error(index, e));
        }

        loop {
            let received = match self.pool.get_mut(index) {
                Some(conn) => conn.recv().await,
                None => {
                    return Err(GearmanError::ConnectionFailure(format!(
                        "connection to {} was dropped",
                        self.pool.endpoints()[index]
                    )))
                }
            };
            let packet = received.map_err(|e| self.connection_error(index, e))?;

            if is_reply(&packet) {
                return Ok(packet);
            }
            if packet.kind == PacketType::Error && self.inflight[index].pending.is_empty() {
                return Err(server_error(&packet)?);
            }
            self.dispatch(index, packet)?;
        }
    }

    /// Write one task's request, trying each server from the next
    /// round-robin position until one accepts the connection.
    pub(crate) async fn submit(&mut self, id: TaskId) -> Result<usize> {
        if self.pool.is_empty() {
            return Err(GearmanError::Usage("no job servers configured".to_string()));
        }

        let count = self.pool.len();
        let start = self.next_server % count;
        self.next_server = self.next_server.wrapping_add(1);

        let mut last_error = None;
        for offset in 0..count {
            let index = (start + offset) % count;

            let conn = match self.pool.ensure_connected(index).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Skipping job server {}: {}", self.pool.endpoints()[index], e);
                    self.callbacks.log(&format!("failover: {}", e));
                    last_error = Some(e);
                    continue;
                }
            };

            let task = find(&mut self.tasks, id)
                .ok_or_else(|| GearmanError::Usage(format!("unknown task {}", id)))?;
            let packet = match task.kind {
                TaskKind::Submit => {
                    self.callbacks.fire(EventKind::Workload, task);
                    Packet::submit(
                        &task.function,
                        &task.unique,
                        &task.workload,
                        task.priority,
                        task.background,
                    )
                }
                TaskKind::Status => Packet::get_status(task.handle.as_deref().unwrap_or_default()),
            };

            match conn.send(packet).await {
                Ok(()) => {
                    task.mark_sent();
                    self.inflight[index].pending.push_back(id);
                    debug!("Task {} sent to {}", id, self.pool.endpoints()[index]);
                    return Ok(index);
                }
                Err(e) => {
                    self.release_connection(index);
                    self.callbacks.log(&format!("failover: {}", e));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GearmanError::ConnectionFailure("no job server reachable".to_string())
        }))
    }

    /// Read one packet from the connection serving `id` and dispatch it.
    /// A task re-queued after a broken connection is resubmitted first.
    pub(crate) async fn pump(&mut self, id: TaskId) -> Result<Dispatched> {
        let Some(index) = self.inflight.iter().position(|f| f.contains(id)) else {
            return match self.task(id).map(|t| (t.state, t.is_terminal())) {
                Some((TaskState::Queued, _)) => {
                    self.submit(id).await?;
                    Ok(Vec::new())
                }
                Some((_, true)) => Ok(Vec::new()),
                Some((state, false)) => Err(GearmanError::Protocol(format!(
                    "task {} is {} but no connection is serving it",
                    id,
                    state.as_str()
                ))),
                None => Err(GearmanError::Usage(format!("unknown task {}", id))),
            };
        };

        let received = match self.pool.get_mut(index) {
            Some(conn) => conn.recv().await,
            None => {
                self.release_connection(index);
                return Ok(Vec::new());
            }
        };

        match received {
            Ok(packet) => self.dispatch(index, packet),
            Err(e) => Err(self.connection_error(index, e)),
        }
    }

    fn active_connections(&self) -> Vec<usize> {
        self.inflight
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_idle())
            .map(|(i, _)| i)
            .collect()
    }

    /// Timeouts leave the connection in place; anything else drops it.
    fn connection_error(&mut self, index: usize, error: GearmanError) -> GearmanError {
        if !matches!(error, GearmanError::Timeout(_)) {
            warn!("Lost job server {}: {}", self.pool.endpoints()[index], error);
            self.callbacks.log(&format!("connection lost: {}", error));
            self.release_connection(index);
        }
        error
    }

    /// Close a connection and put its unfinished tasks back in the queue
    fn release_connection(&mut self, index: usize) {
        self.pool.invalidate(index);
        let Some(inflight) = self.inflight.get_mut(index) else {
            return;
        };
        for id in std::mem::take(inflight).task_ids() {
            if let Some(task) = find(&mut self.tasks, id) {
                task.requeue();
            }
        }
    }

    fn dispatch(&mut self, index: usize, packet: Packet) -> Result<Dispatched> {
        let buffered = !self.options.unbuffered_result;
        let mut events = Vec::new();

        match packet.kind {
            PacketType::JobCreated => {
                let handle = packet.arg_str(0)?.to_string();
                let tasks = &mut self.tasks;
                let inflight = &mut self.inflight[index];

                // Entries whose task was dropped still consume their reply
                let position = inflight.pending.iter().position(|id| {
                    !tasks
                        .iter()
                        .any(|t| t.id == *id && t.kind == TaskKind::Status)
                });
                let Some(id) = position.and_then(|p| inflight.pending.remove(p)) else {
                    return Err(GearmanError::Protocol(format!(
                        "job created ({}) with no submission pending",
                        handle
                    )));
                };
                let Some(task) = find(tasks, id) else {
                    return Ok(events);
                };

                task.on_created(handle.clone())?;
                if !task.background {
                    inflight.handles.entry(handle).or_default().push(id);
                }
                self.callbacks.fire(EventKind::Created, task);
                events.push((id, EventKind::Created));
            }

            PacketType::WorkData
            | PacketType::WorkWarning
            | PacketType::WorkStatus
            | PacketType::WorkComplete
            | PacketType::WorkFail
            | PacketType::WorkException => {
                let handle = packet.arg_str(0)?.to_string();
                let Some(ids) = self.inflight[index].handles.get(&handle).cloned() else {
                    debug!("Ignoring {:?} for unknown job {}", packet.kind, handle);
                    return Ok(events);
                };

                let (kind, terminal) = match packet.kind {
                    PacketType::WorkData => (EventKind::Data, false),
                    PacketType::WorkWarning => (EventKind::Warning, false),
                    PacketType::WorkStatus => (EventKind::Status, false),
                    PacketType::WorkComplete => (EventKind::Complete, true),
                    PacketType::WorkFail => (EventKind::Fail, true),
                    _ => (EventKind::Exception, true),
                };
                let progress = match packet.kind {
                    PacketType::WorkStatus => (packet.arg_u32(1)?, packet.arg_u32(2)?),
                    _ => (0, 0),
                };

                for id in ids {
                    let Some(task) = find(&mut self.tasks, id) else {
                        continue;
                    };
                    let applied = match kind {
                        EventKind::Data => task.on_data(packet.data(), buffered),
                        EventKind::Warning => task.on_warning(packet.data()),
                        EventKind::Status => task.on_status(progress.0, progress.1),
                        EventKind::Complete => task.on_complete(packet.data(), buffered),
                        EventKind::Fail => task.on_fail("job failed"),
                        _ => task.on_exception(packet.data()),
                    };
                    if applied {
                        self.callbacks.fire(kind, task);
                        events.push((id, kind));
                    }
                }

                if terminal {
                    self.inflight[index].handles.remove(&handle);
                }
            }

            PacketType::StatusRes => {
                let handle = packet.arg_str(0)?;
                let status = parse_status(&packet)?;
                let tasks = &mut self.tasks;
                let inflight = &mut self.inflight[index];

                let position = inflight.pending.iter().position(|id| {
                    tasks.iter().any(|t| {
                        t.id == *id && t.kind == TaskKind::Status && t.handle.as_deref() == Some(handle)
                    })
                });
                let Some(id) = position.and_then(|p| inflight.pending.remove(p)) else {
                    debug!("Ignoring unsolicited status for {}", handle);
                    return Ok(events);
                };
                if let Some(task) = find(tasks, id) {
                    if task.on_status_response(status) {
                        self.callbacks.fire(EventKind::Status, task);
                        events.push((id, EventKind::Status));
                    }
                }
            }

            PacketType::Error => {
                let error = server_error(&packet)?;
                warn!("Job server {} answered with {}", self.pool.endpoints()[index], error);
                self.callbacks.log(&error.to_string());

                if let Some(id) = self.inflight[index].pending.pop_front() {
                    if let Some(task) = find(&mut self.tasks, id) {
                        if task.on_fail(error.to_string()) {
                            self.callbacks.fire(EventKind::Fail, task);
                        }
                    }
                }
                return Err(error);
            }

            PacketType::Noop | PacketType::EchoRes | PacketType::OptionRes => {
                debug!("Ignoring {:?}", packet.kind);
            }

            other => {
                return Err(GearmanError::Protocol(format!(
                    "unexpected {:?} packet from {}",
                    other,
                    self.pool.endpoints()[index]
                )));
            }
        }

        Ok(events)
    }
}
