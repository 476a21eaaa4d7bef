//! TCP connections to job servers.

use crate::{Packet, PacketCodec};
use futures::future::{select_all, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use gearman_core::{GearmanError, Result, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Size of the admin read buffer; a short read means the server is done talking
pub const READ_BUFFER_SIZE: usize = 4096;

/// Run `fut` bounded by `timeout`. A zero timeout waits forever.
pub async fn timed<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| GearmanError::Timeout(timeout))?
}

/// Address of one job server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerEndpoint {
            host: host.into(),
            port,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Parse a comma separated `SERVER[:PORT]` list
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        ServerEndpoint::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl FromStr for ServerEndpoint {
    type Err = GearmanError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || GearmanError::Usage(format!("invalid server address: '{}'", s));
        let parse_port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

        if s.is_empty() {
            return Err(invalid());
        }

        // [v6] or [v6]:port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => DEFAULT_PORT,
                t => parse_port(t.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            return Ok(ServerEndpoint::new(host, port));
        }

        match s.matches(':').count() {
            0 => Ok(ServerEndpoint::new(s, DEFAULT_PORT)),
            1 => {
                let (host, port) = s.split_once(':').ok_or_else(invalid)?;
                if host.is_empty() {
                    return Err(invalid());
                }
                Ok(ServerEndpoint::new(host, parse_port(port)?))
            }
            // Bare IPv6 address without a port
            _ => Ok(ServerEndpoint::new(s, DEFAULT_PORT)),
        }
    }
}

/// Binary protocol connection to one job server
pub struct Connection {
    endpoint: ServerEndpoint,
    framed: Framed<TcpStream, PacketCodec>,
    timeout: Duration,
    healthy: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("healthy", &self.healthy)
            .finish()
    }
}

impl Connection {
    /// Open a connection; the connect itself is bounded by `timeout`
    pub async fn connect(endpoint: &ServerEndpoint, timeout: Duration) -> Result<Self> {
        let address = endpoint.address();
        let stream = timed(timeout, async {
            TcpStream::connect(&address).await.map_err(|e| {
                GearmanError::ConnectionFailure(format!("could not connect to {}: {}", address, e))
            })
        })
        .await?;
        stream.set_nodelay(true)?;

        debug!("Connected to job server {}", endpoint);
        Ok(Connection {
            endpoint: endpoint.clone(),
            framed: Framed::new(stream, PacketCodec),
            timeout,
            healthy: true,
        })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// False once a socket or framing error has been seen
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Decoded bytes are already waiting in the read buffer
    pub fn has_buffered(&self) -> bool {
        !self.framed.read_buffer().is_empty()
    }

    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        debug!("-> {} {:?}", self.endpoint, packet.kind);
        let timeout = self.timeout;
        let framed = &mut self.framed;
        let result = timed(timeout, async { framed.send(packet).await.map_err(GearmanError::from) }).await;
        self.observe(result)
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        let timeout = self.timeout;
        let framed = &mut self.framed;
        let endpoint = &self.endpoint;
        let result = timed(timeout, async {
            match framed.next().await {
                Some(Ok(packet)) => Ok(packet),
                Some(Err(e)) => Err(GearmanError::from(e)),
                None => Err(GearmanError::ConnectionFailure(format!(
                    "connection closed by {}",
                    endpoint
                ))),
            }
        })
        .await;

        let packet = self.observe(result)?;
        debug!("<- {} {:?}", self.endpoint, packet.kind);
        Ok(packet)
    }

    /// Send one packet and read the next one back
    pub async fn request(&mut self, packet: Packet) -> Result<Packet> {
        self.send(packet).await?;
        self.recv().await
    }

    /// Resolve once the connection has something to read
    pub async fn ready(&self) -> Result<()> {
        if self.has_buffered() {
            return Ok(());
        }
        self.framed.get_ref().readable().await?;
        Ok(())
    }

    /// Timeouts leave the stream usable; anything else poisons it.
    fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !matches!(e, GearmanError::Timeout(_)) {
                warn!("Connection to {} failed: {}", self.endpoint, e);
                self.healthy = false;
            }
        }
        result
    }
}

/// One lazily opened connection per configured endpoint
#[derive(Debug)]
pub struct ConnectionPool {
    endpoints: Vec<ServerEndpoint>,
    slots: Vec<Option<Connection>>,
    timeout: Duration,
    /// Slot polled first by the next `recv_any`
    next_read: usize,
}

impl Clone for ConnectionPool {
    /// Copies configuration only; the clone starts disconnected.
    fn clone(&self) -> Self {
        ConnectionPool {
            endpoints: self.endpoints.clone(),
            slots: self.endpoints.iter().map(|_| None).collect(),
            timeout: self.timeout,
            next_read: 0,
        }
    }
}

impl ConnectionPool {
    pub fn new(timeout: Duration) -> Self {
        ConnectionPool {
            endpoints: Vec::new(),
            slots: Vec::new(),
            timeout,
            next_read: 0,
        }
    }

    pub fn add(&mut self, endpoint: ServerEndpoint) {
        self.endpoints.push(endpoint);
        self.slots.push(None);
    }

    /// Forget every endpoint, closing any open connection
    pub fn clear(&mut self) {
        self.endpoints.clear();
        self.slots.clear();
        self.next_read = 0;
    }

    pub fn endpoints(&self) -> &[ServerEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Takes effect on the next connect; open connections are dropped.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn is_connected(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(conn)) if conn.is_healthy())
    }

    pub fn connected_count(&self) -> usize {
        (0..self.slots.len()).filter(|&i| self.is_connected(i)).count()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots
            .get_mut(index)
            .and_then(|slot| slot.as_mut())
            .filter(|conn| conn.is_healthy())
    }

    pub fn invalidate(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                debug!("Dropped connection to {}", self.endpoints[index]);
            }
        }
    }

    /// Return the live connection for `index`, connecting if needed
    pub async fn ensure_connected(&mut self, index: usize) -> Result<&mut Connection> {
        let endpoint = self.endpoints.get(index).ok_or_else(|| {
            GearmanError::Usage(format!("no job server at index {}", index))
        })?;
        let slot = &mut self.slots[index];

        if let Some(conn) = slot.take().filter(|c| c.is_healthy()) {
            return Ok(slot.insert(conn));
        }

        let conn = Connection::connect(endpoint, self.timeout).await?;
        Ok(slot.insert(conn))
    }

    /// Read the next packet from whichever of `indices` delivers first.
    ///
    /// Polling starts just after the slot that delivered last time, so a
    /// connection with a backlog of buffered packets cannot starve the
    /// others. Returns `None` when none of them is connected.
    pub async fn recv_any(&mut self, indices: &[usize]) -> Option<(usize, Result<Packet>)> {
        let count = self.slots.len();
        let start = self.next_read;

        let mut reads: Vec<(usize, BoxFuture<'_, (usize, Result<Packet>)>)> = self
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .filter_map(|(i, slot)| slot.as_mut().filter(|c| c.is_healthy()).map(|c| (i, c)))
            .map(|(i, conn)| (i, async move { (i, conn.recv().await) }.boxed()))
            .collect();

        if reads.is_empty() {
            return None;
        }
        reads.sort_by_key(|(i, _)| (i + count - start % count) % count);

        let (result, _, rest) = select_all(reads.into_iter().map(|(_, read)| read)).await;
        drop(rest);

        self.next_read = (result.0 + 1) % count;
        Some(result)
    }

    /// Wait until any of `indices` is readable, bounded by the timeout.
    pub async fn ready_any(&self, indices: &[usize]) -> Result<usize> {
        let waits: Vec<BoxFuture<'_, Result<usize>>> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .filter_map(|(i, slot)| slot.as_ref().filter(|c| c.is_healthy()).map(|c| (i, c)))
            .map(|(i, conn)| async move { conn.ready().await.map(|_| i) }.boxed())
            .collect();

        if waits.is_empty() {
            return Err(GearmanError::Usage(
                "no open connection to wait on".to_string(),
            ));
        }

        timed(self.timeout, async {
            let (ready, _, _) = select_all(waits).await;
            ready
        })
        .await
    }
}

/// Admin text protocol connection
pub struct TextConnection {
    endpoint: ServerEndpoint,
    stream: TcpStream,
    timeout: Duration,
}

impl fmt::Debug for TextConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextConnection")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TextConnection {
    pub async fn connect(endpoint: &ServerEndpoint, timeout: Duration) -> Result<Self> {
        let address = endpoint.address();
        let stream = timed(timeout, async {
            TcpStream::connect(&address).await.map_err(|e| {
                GearmanError::ConnectionFailure(format!("could not connect to {}: {}", address, e))
            })
        })
        .await?;

        debug!("Opened admin connection to {}", endpoint);
        Ok(TextConnection {
            endpoint: endpoint.clone(),
            stream,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        timed(self.timeout, async {
            stream.write_all(bytes).await?;
            Ok(())
        })
        .await
    }

    /// Read until a read comes back shorter than the buffer.
    pub async fn recv_until_quiescent(&mut self) -> Result<Vec<u8>> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut out = Vec::new();

        loop {
            let stream = &mut self.stream;
            let n = timed(self.timeout, async { Ok(stream.read(&mut buf).await?) }).await?;

            if n == 0 {
                if out.is_empty() {
                    return Err(GearmanError::ConnectionFailure(format!(
                        "Connection Failed: {} closed the connection",
                        self.endpoint
                    )));
                }
                break;
            }

            out.extend_from_slice(&buf[..n]);
            if n < READ_BUFFER_SIZE {
                break;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!("10.0.0.1".parse::<ServerEndpoint>().unwrap(), ServerEndpoint::new("10.0.0.1", 4730));
        assert_eq!(
            "jobserver2.domain.com:7003".parse::<ServerEndpoint>().unwrap(),
            ServerEndpoint::new("jobserver2.domain.com", 7003)
        );
        assert_eq!("[::1]:4731".parse::<ServerEndpoint>().unwrap(), ServerEndpoint::new("::1", 4731));
        assert_eq!("fe80::2".parse::<ServerEndpoint>().unwrap().port, 4730);
        assert!("host:notaport".parse::<ServerEndpoint>().is_err());
        assert!(":4730".parse::<ServerEndpoint>().is_err());

        let list = ServerEndpoint::parse_list("10.0.0.1, localhost:4731,,").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].address(), "localhost:4731");
        assert_eq!(ServerEndpoint::new("::1", 4730).address(), "[::1]:4730");
    }

    #[test]
    fn test_pool_clone_is_disconnected() {
        let mut pool = ConnectionPool::new(Duration::from_secs(3));
        pool.add(ServerEndpoint::default());
        let clone = pool.clone();
        assert_eq!(clone.endpoints(), pool.endpoints());
        assert_eq!(clone.timeout(), Duration::from_secs(3));
        assert!(!clone.is_connected(0));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut pool = ConnectionPool::new(Duration::from_secs(1));
        pool.add(ServerEndpoint::new("127.0.0.1", port));
        let err = pool.ensure_connected(0).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!pool.is_connected(0));
    }

    #[tokio::test]
    async fn test_set_timeout_forces_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let mut pool = ConnectionPool::new(Duration::from_secs(1));
        pool.add(ServerEndpoint::new("127.0.0.1", port));
        pool.ensure_connected(0).await.unwrap();
        pool.ensure_connected(0).await.unwrap();
        assert!(pool.is_connected(0));

        pool.set_timeout(Duration::from_millis(1500));
        assert!(!pool.is_connected(0));

        let conn = pool.ensure_connected(0).await.unwrap();
        assert_eq!(conn.timeout(), Duration::from_millis(1500));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recv_timeout_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, PacketCodec);
            tokio::time::sleep(Duration::from_millis(300)).await;
            framed
                .send(Packet::response(PacketType::Noop, Vec::new()))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let endpoint = ServerEndpoint::new("127.0.0.1", port);
        let mut conn = Connection::connect(&endpoint, Duration::from_millis(100)).await.unwrap();
        assert!(matches!(conn.recv().await, Err(GearmanError::Timeout(_))));
        assert!(conn.is_healthy());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(conn.recv().await.unwrap().kind, PacketType::Noop);
    }

    #[tokio::test]
    async fn test_closed_stream_poisons_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut pool = ConnectionPool::new(Duration::from_secs(1));
        pool.add(ServerEndpoint::new("127.0.0.1", port));
        let conn = pool.ensure_connected(0).await.unwrap();
        let err = conn.recv().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!pool.is_connected(0));
    }

    async fn streaming_server(packets: Vec<Packet>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, PacketCodec);
            for packet in packets {
                framed.feed(packet).await.unwrap();
            }
            framed.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });
        port
    }

    #[tokio::test]
    async fn test_recv_any_rotates_between_connections() {
        let chatty = (0..200)
            .map(|_| Packet::work(PacketType::WorkData, "H:a", b"chunk"))
            .collect();
        let quiet = vec![Packet::work(PacketType::WorkComplete, "H:b", b"done")];

        let mut pool = ConnectionPool::new(Duration::from_secs(1));
        pool.add(ServerEndpoint::new("127.0.0.1", streaming_server(chatty).await));
        pool.add(ServerEndpoint::new("127.0.0.1", streaming_server(quiet).await));
        pool.ensure_connected(0).await.unwrap();
        pool.ensure_connected(1).await.unwrap();

        // Let both backlogs land before reading
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut order = Vec::new();
        for _ in 0..4 {
            let (index, packet) = pool.recv_any(&[0, 1]).await.unwrap();
            order.push((index, packet.unwrap().kind));
        }
        assert_eq!(order[0], (0, PacketType::WorkData));
        assert_eq!(order[1], (1, PacketType::WorkComplete));
        assert!(order[2..].iter().all(|(index, _)| *index == 0));
    }

    #[tokio::test]
    async fn test_quiescent_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut line = [0u8; 64];
            let n = socket.read(&mut line).await.unwrap();
            assert_eq!(&line[..n], b"version\r\n");
            socket.write_all(b"OK 1.1.19\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let endpoint = ServerEndpoint::new("127.0.0.1", port);
        let mut conn = TextConnection::connect(&endpoint, Duration::from_secs(1)).await.unwrap();
        conn.send(b"version\r\n").await.unwrap();
        assert_eq!(conn.recv_until_quiescent().await.unwrap(), b"OK 1.1.19\n");
    }
}
