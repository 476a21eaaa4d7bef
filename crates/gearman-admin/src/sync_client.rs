use crate::AdminClient;
use gearman_core::Result;
use gearman_protocol::admin::{FunctionStatus, JobInfo, WorkerInfo};
use std::time::Duration;

/// Synchronous admin client (wraps the async one in its own runtime)
pub struct BlockingAdmin {
    runtime: tokio::runtime::Runtime,
    admin: AdminClient,
}

impl BlockingAdmin {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_admin(AdminClient::new(host, port))
    }

    pub fn with_admin(admin: AdminClient) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(BlockingAdmin { runtime, admin })
    }

    pub fn admin(&self) -> &AdminClient {
        &self.admin
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.admin.set_timeout(timeout);
    }

    pub fn set_server(&mut self, host: &str, port: Option<u16>) {
        self.admin.set_server(host, port);
    }

    pub fn status(&mut self) -> Result<Vec<FunctionStatus>> {
        self.runtime.block_on(self.admin.status())
    }

    pub fn workers(&mut self) -> Result<Vec<WorkerInfo>> {
        self.runtime.block_on(self.admin.workers())
    }

    pub fn version(&mut self) -> Result<String> {
        self.runtime.block_on(self.admin.version())
    }

    pub fn getpid(&mut self) -> Result<u32> {
        self.runtime.block_on(self.admin.getpid())
    }

    pub fn verbose(&mut self) -> Result<String> {
        self.runtime.block_on(self.admin.verbose())
    }

    pub fn maxqueue(&mut self, function: &str, size: i64) -> Result<()> {
        self.runtime.block_on(self.admin.maxqueue(function, size))
    }

    pub fn shutdown(&mut self, graceful: bool) -> Result<()> {
        self.runtime.block_on(self.admin.shutdown(graceful))
    }

    pub fn drop_function(&mut self, function: &str) -> Result<()> {
        self.runtime.block_on(self.admin.drop_function(function))
    }

    pub fn create_function(&mut self, function: &str) -> Result<()> {
        self.runtime.block_on(self.admin.create_function(function))
    }

    pub fn show_jobs(&mut self) -> Result<Vec<JobInfo>> {
        self.runtime.block_on(self.admin.show_jobs())
    }

    pub fn show_unique_jobs(&mut self) -> Result<Vec<String>> {
        self.runtime.block_on(self.admin.show_unique_jobs())
    }

    pub fn cancel_job(&mut self, handle: &str) -> Result<()> {
        self.runtime.block_on(self.admin.cancel_job(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    #[test]
    fn test_blocking_version() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            (&socket).write_all(b"OK 1.1.19\n").unwrap();
            line
        });

        let mut admin = BlockingAdmin::new("127.0.0.1", port).unwrap();
        assert_eq!(admin.version().unwrap(), "1.1.19");
        assert_eq!(server.join().unwrap(), "version\r\n");
        assert!(admin.admin().is_connected());
    }
}
