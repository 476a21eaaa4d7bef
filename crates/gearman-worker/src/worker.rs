use crate::config::WorkerConfig;
use crate::executor::JobExecutor;
use crate::handler::{FunctionHandler, FunctionRegistry};
use crate::job::Job;
use gearman_core::{GearmanError, Result, Serializer};
use gearman_protocol::{ConnectionPool, Packet, PacketType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stops a running [`Worker`] from another task
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    stopping: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// The worker finishes its current job, then `run` returns.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Worker process: grabs jobs from every configured job server and runs
/// the registered handler for each.
pub struct Worker {
    worker_id: String,
    registry: FunctionRegistry,
    pool: ConnectionPool,
    /// Earliest time a dropped server may be dialed again
    retry_at: Vec<Option<Instant>>,
    poll_interval: Duration,
    reconnect_delay: Duration,
    job_timeout: Option<Duration>,
    serializer: Serializer,
    shutdown: ShutdownHandle,
}

impl Worker {
    pub fn new(config: WorkerConfig, registry: FunctionRegistry) -> Result<Self> {
        let mut pool = ConnectionPool::new(config.timeout());
        for endpoint in config.endpoints()? {
            pool.add(endpoint);
        }

        Ok(Worker {
            worker_id: config.generate_worker_id(),
            registry,
            retry_at: vec![None; pool.len()],
            pool,
            poll_interval: config.poll_interval(),
            reconnect_delay: config.reconnect_delay(),
            job_timeout: config.job_timeout(),
            serializer: config.serializer,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Register a function; servers learn about it on reconnect.
    pub fn register<H: FunctionHandler + 'static>(&mut self, function: &str, handler: H) {
        self.registry.register(function, handler);
        self.reset_connections();
    }

    pub fn register_with_timeout<H: FunctionHandler + 'static>(
        &mut self,
        function: &str,
        handler: H,
        timeout_secs: u32,
    ) {
        self.registry.register_with_timeout(function, handler, timeout_secs);
        self.reset_connections();
    }

    pub fn unregister(&mut self, function: &str) -> bool {
        let removed = self.registry.unregister(function);
        if removed {
            self.reset_connections();
        }
        removed
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Grab and run jobs until shut down
    pub async fn run(&mut self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(GearmanError::Usage("no functions registered".to_string()));
        }
        if self.pool.is_empty() {
            return Err(GearmanError::Usage("no job servers configured".to_string()));
        }

        info!(
            "Starting worker {} for {:?}",
            self.worker_id,
            self.registry.functions().into_iter().map(|(f, _)| f).collect::<Vec<_>>()
        );

        while !self.shutdown.is_stopping() {
            let ran = self.work_once().await;
            if ran == 0 && !self.shutdown.is_stopping() {
                self.sleep().await;
            }
        }

        info!("Worker {} stopped", self.worker_id);
        self.reset_connections();
        Ok(())
    }

    /// One pass over every server, running at most one job from each.
    /// Returns how many jobs ran.
    pub async fn work_once(&mut self) -> usize {
        let mut ran = 0;
        for index in 0..self.pool.len() {
            if self.shutdown.is_stopping() {
                break;
            }
            match self.grab(index).await {
                Ok(true) => ran += 1,
                Ok(false) => {}
                Err(e) => self.drop_connection(index, &e),
            }
        }
        ran
    }

    /// Open the connection if needed and announce who we are and what we do.
    /// Returns false while a dropped server is still cooling down.
    async fn connect(&mut self, index: usize) -> Result<bool> {
        if self.pool.is_connected(index) {
            return Ok(true);
        }
        if self.retry_at[index].is_some_and(|at| Instant::now() < at) {
            return Ok(false);
        }

        let conn = self.pool.ensure_connected(index).await?;
        conn.send(Packet::set_client_id(&self.worker_id)).await?;
        let functions = self.registry.functions();
        for (function, timeout) in &functions {
            conn.send(Packet::can_do(function, *timeout)).await?;
        }

        info!("Registered {} functions with {}", functions.len(), conn.endpoint());
        self.retry_at[index] = None;
        Ok(true)
    }

    async fn grab(&mut self, index: usize) -> Result<bool> {
        if !self.connect(index).await? {
            return Ok(false);
        }
        let conn = self
            .pool
            .get_mut(index)
            .ok_or_else(|| GearmanError::ConnectionFailure("connection dropped".to_string()))?;

        conn.send(Packet::bare(PacketType::GrabJobUniq)).await?;
        loop {
            let packet = conn.recv().await?;
            match packet.kind {
                PacketType::JobAssignUniq | PacketType::JobAssign => {
                    self.run_job(index, packet).await?;
                    return Ok(true);
                }
                PacketType::NoJob => return Ok(false),
                // Wake-up left over from an earlier sleep
                PacketType::Noop => continue,
                PacketType::Error => {
                    return Err(GearmanError::ServerError {
                        code: packet.arg_str(0)?.to_string(),
                        message: String::from_utf8_lossy(packet.arg(1)?).into_owned(),
                    })
                }
                other => {
                    return Err(GearmanError::Protocol(format!(
                        "unexpected {:?} while grabbing a job",
                        other
                    )))
                }
            }
        }
    }

    async fn run_job(&mut self, index: usize, assignment: Packet) -> Result<()> {
        let (reports, mut pending) = mpsc::unbounded_channel();
        let mut job = Job::from_assignment(&assignment, reports)?.with_serializer(self.serializer);
        debug!("Assigned {} ({})", job.handle(), job.function());

        let conn = self
            .pool
            .get_mut(index)
            .ok_or_else(|| GearmanError::ConnectionFailure("connection dropped".to_string()))?;

        let Some(handler) = self.registry.get(job.function()) else {
            warn!("No handler registered for {}", job.function());
            job.send_fail()?;
            drop(job);
            while let Ok(report) = pending.try_recv() {
                conn.send(report).await?;
            }
            return Ok(());
        };

        let limit = self
            .registry
            .timeout(job.function())
            .map(|secs| Duration::from_secs(secs as u64))
            .or(self.job_timeout);
        let executor = JobExecutor::new(handler, limit);

        // Forward reports while the handler runs
        let result = {
            let execution = executor.execute(&mut job);
            tokio::pin!(execution);
            loop {
                tokio::select! {
                    result = &mut execution => break result,
                    Some(report) = pending.recv() => conn.send(report).await?,
                }
            }
        };

        match result {
            Ok(data) if !job.is_finished() => job.send_complete(&data)?,
            Ok(_) => {}
            Err(e) if !job.is_finished() => {
                job.send_exception(e.to_string().as_bytes())?;
                job.send_fail()?;
            }
            Err(e) => job.record_error(&e.to_string()),
        }
        if let Some(error) = job.error() {
            warn!("Job {} failed: {}", job.handle(), error);
        }
        drop(job);

        while let Ok(report) = pending.try_recv() {
            conn.send(report).await?;
        }
        Ok(())
    }

    /// PRE_SLEEP everywhere, then wait for a NOOP, the poll interval or shutdown
    async fn sleep(&mut self) {
        for index in 0..self.pool.len() {
            let Some(conn) = self.pool.get_mut(index) else {
                continue;
            };
            if let Err(e) = conn.send(Packet::bare(PacketType::PreSleep)).await {
                self.drop_connection(index, &e);
            }
        }

        let connected: Vec<usize> = (0..self.pool.len())
            .filter(|&i| self.pool.is_connected(i))
            .collect();
        let notify = self.shutdown.notify.clone();

        if connected.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = notify.notified() => {}
            }
            return;
        }

        debug!("Sleeping on {} servers", connected.len());
        let poll_interval = self.poll_interval;
        tokio::select! {
            received = self.pool.recv_any(&connected) => match received {
                Some((index, Ok(packet))) if packet.kind == PacketType::Noop => {
                    debug!("Woken up by {}", self.pool.endpoints()[index]);
                }
                Some((index, Ok(packet))) => {
                    warn!("Unexpected {:?} from {} while asleep", packet.kind, self.pool.endpoints()[index]);
                }
                Some((_, Err(GearmanError::Timeout(_)))) | None => {}
                Some((index, Err(e))) => self.drop_connection(index, &e),
            },
            _ = tokio::time::sleep(poll_interval) => {}
            _ = notify.notified() => {}
        }
    }

    fn drop_connection(&mut self, index: usize, error: &GearmanError) {
        warn!("Lost job server {}: {}", self.pool.endpoints()[index], error);
        self.pool.invalidate(index);
        self.retry_at[index] = Some(Instant::now() + self.reconnect_delay);
    }

    fn reset_connections(&mut self) {
        for index in 0..self.pool.len() {
            self.pool.invalidate(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, JobResult, ReverseHandler};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use gearman_protocol::PacketCodec;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::codec::Framed;

    type ServerConn = Framed<TcpStream, PacketCodec>;

    async fn listen() -> (TcpListener, WorkerConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = WorkerConfig {
            servers: vec![format!("127.0.0.1:{}", port)],
            worker_id: Some("test-worker".to_string()),
            timeout_ms: 2_000,
            poll_interval_ms: 200,
            reconnect_delay_ms: 50,
            ..WorkerConfig::default()
        };
        (listener, config)
    }

    async fn accept(listener: &TcpListener) -> ServerConn {
        let (socket, _) = listener.accept().await.unwrap();
        Framed::new(socket, PacketCodec)
    }

    async fn next(conn: &mut ServerConn) -> Packet {
        conn.next().await.unwrap().unwrap()
    }

    fn assign(handle: &str, function: &str, workload: &[u8]) -> Packet {
        Packet::response(
            PacketType::JobAssignUniq,
            vec![
                Bytes::copy_from_slice(handle.as_bytes()),
                Bytes::copy_from_slice(function.as_bytes()),
                Bytes::from_static(b"u-1"),
                Bytes::copy_from_slice(workload),
            ],
        )
    }

    async fn expect_handshake(conn: &mut ServerConn, functions: &[&str]) {
        let hello = next(conn).await;
        assert_eq!(hello.kind, PacketType::SetClientId);
        assert_eq!(hello.arg_str(0).unwrap(), "test-worker");
        for function in functions {
            let can_do = next(conn).await;
            assert_eq!(can_do.arg_str(0).unwrap(), *function);
        }
    }

    struct ChattyHandler;

    #[async_trait]
    impl FunctionHandler for ChattyHandler {
        async fn execute(&self, job: &mut Job) -> JobResult {
            job.send_status(1, 2)?;
            job.send_data(b"partial")?;
            job.send_complete(b"done")?;
            assert!(job.send_data(b"late").is_err());
            Ok(b"ignored".to_vec())
        }
    }

    #[tokio::test]
    async fn test_grab_run_and_sleep() {
        let (listener, config) = listen().await;
        let registry = FunctionRegistry::new();
        registry.register("reverse", ReverseHandler);
        registry.register_with_timeout("slow", ReverseHandler, 60);

        let mut worker = Worker::new(config, registry).unwrap();
        let handle = worker.shutdown_handle();
        let running = tokio::spawn(async move { worker.run().await });

        let mut conn = accept(&listener).await;
        expect_handshake(&mut conn, &["reverse"]).await;
        let timed = next(&mut conn).await;
        assert_eq!(timed.kind, PacketType::CanDoTimeout);
        assert_eq!(timed.arg_u32(1).unwrap(), 60);

        assert_eq!(next(&mut conn).await.kind, PacketType::GrabJobUniq);
        conn.send(assign("H:lap:1", "reverse", b"hello")).await.unwrap();
        let complete = next(&mut conn).await;
        assert_eq!(complete.kind, PacketType::WorkComplete);
        assert_eq!(complete.arg_str(0).unwrap(), "H:lap:1");
        assert_eq!(complete.arg(1).unwrap(), b"olleh");

        assert_eq!(next(&mut conn).await.kind, PacketType::GrabJobUniq);
        conn.send(Packet::response(PacketType::NoJob, Vec::new())).await.unwrap();
        assert_eq!(next(&mut conn).await.kind, PacketType::PreSleep);

        handle.shutdown();
        conn.send(Packet::response(PacketType::Noop, Vec::new())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_sends_exception_then_fail() {
        let (listener, config) = listen().await;
        let registry = FunctionRegistry::new();
        registry.register(
            "broken",
            handler_fn(|_| Err(GearmanError::TaskFailed("disk full".to_string()))),
        );

        let mut worker = Worker::new(config, registry).unwrap();
        let handle = worker.shutdown_handle();
        let running = tokio::spawn(async move { worker.run().await });

        let mut conn = accept(&listener).await;
        expect_handshake(&mut conn, &["broken"]).await;
        assert_eq!(next(&mut conn).await.kind, PacketType::GrabJobUniq);
        conn.send(assign("H:lap:2", "broken", b"x")).await.unwrap();

        let exception = next(&mut conn).await;
        assert_eq!(exception.kind, PacketType::WorkException);
        assert!(exception.arg_str(1).unwrap().contains("disk full"));
        let fail = next(&mut conn).await;
        assert_eq!(fail.kind, PacketType::WorkFail);
        assert_eq!(fail.arg_str(0).unwrap(), "H:lap:2");

        handle.shutdown();
        drop(conn);
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_reports_are_forwarded_once() {
        let (listener, config) = listen().await;
        let registry = FunctionRegistry::new();
        registry.register("chatty", ChattyHandler);

        let mut worker = Worker::new(config, registry).unwrap();
        let handle = worker.shutdown_handle();
        let running = tokio::spawn(async move { worker.run().await });

        let mut conn = accept(&listener).await;
        expect_handshake(&mut conn, &["chatty"]).await;
        assert_eq!(next(&mut conn).await.kind, PacketType::GrabJobUniq);
        conn.send(assign("H:lap:3", "chatty", b"")).await.unwrap();

        let kinds = [
            next(&mut conn).await.kind,
            next(&mut conn).await.kind,
            next(&mut conn).await.kind,
        ];
        assert_eq!(
            kinds,
            [PacketType::WorkStatus, PacketType::WorkData, PacketType::WorkComplete]
        );
        // Next thing on the wire is the following grab, not a second completion
        assert_eq!(next(&mut conn).await.kind, PacketType::GrabJobUniq);

        handle.shutdown();
        conn.send(Packet::response(PacketType::NoJob, Vec::new())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_lost_server() {
        let (listener, config) = listen().await;
        let registry = FunctionRegistry::new();
        registry.register("reverse", ReverseHandler);

        let mut worker = Worker::new(config, registry).unwrap();
        let handle = worker.shutdown_handle();
        let running = tokio::spawn(async move { worker.run().await });

        let mut first = accept(&listener).await;
        expect_handshake(&mut first, &["reverse"]).await;
        drop(first);

        let mut second = accept(&listener).await;
        expect_handshake(&mut second, &["reverse"]).await;

        handle.shutdown();
        drop(second);
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_requires_functions() {
        let (_listener, config) = listen().await;
        let mut worker = Worker::new(config, FunctionRegistry::new()).unwrap();
        assert!(matches!(worker.run().await, Err(GearmanError::Usage(_))));
    }
}
