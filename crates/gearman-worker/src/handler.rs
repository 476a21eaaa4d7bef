use crate::job::Job;
use async_trait::async_trait;
use gearman_core::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a handler; `Ok` bytes become the completion payload
pub type JobResult = Result<Vec<u8>>;

/// A function this worker can run
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn execute(&self, job: &mut Job) -> JobResult;
}

/// Adapter for plain closures over the workload
pub struct FnHandler<F>(F);

/// Wrap `f` so it can be registered as a handler
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&[u8]) -> JobResult + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> FunctionHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> JobResult + Send + Sync,
{
    async fn execute(&self, job: &mut Job) -> JobResult {
        (self.0)(job.workload())
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn FunctionHandler>,
    /// Seconds announced with CAN_DO_TIMEOUT
    timeout: Option<u32>,
}

/// Registered functions by name
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<RwLock<HashMap<String, Registration>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: FunctionHandler + 'static>(&self, function: impl Into<String>, handler: H) {
        self.insert(function.into(), Arc::new(handler), None);
    }

    /// Register with a server-side time limit in seconds
    pub fn register_with_timeout<H: FunctionHandler + 'static>(
        &self,
        function: impl Into<String>,
        handler: H,
        timeout_secs: u32,
    ) {
        self.insert(function.into(), Arc::new(handler), Some(timeout_secs));
    }

    fn insert(&self, function: String, handler: Arc<dyn FunctionHandler>, timeout: Option<u32>) {
        let mut functions = self.functions.write();
        functions.insert(function, Registration { handler, timeout });
    }

    pub fn unregister(&self, function: &str) -> bool {
        self.functions.write().remove(function).is_some()
    }

    pub fn get(&self, function: &str) -> Option<Arc<dyn FunctionHandler>> {
        let functions = self.functions.read();
        functions.get(function).map(|r| r.handler.clone())
    }

    pub fn timeout(&self, function: &str) -> Option<u32> {
        let functions = self.functions.read();
        functions.get(function).and_then(|r| r.timeout)
    }

    pub fn has_function(&self, function: &str) -> bool {
        self.functions.read().contains_key(function)
    }

    /// `(name, timeout)` pairs sorted by name
    pub fn functions(&self) -> Vec<(String, Option<u32>)> {
        let functions = self.functions.read();
        let mut list: Vec<_> = functions
            .iter()
            .map(|(name, r)| (name.clone(), r.timeout))
            .collect();
        list.sort();
        list
    }

    pub fn is_empty(&self) -> bool {
        self.functions.read().is_empty()
    }
}

/// Returns the workload unchanged
pub struct EchoHandler;

#[async_trait]
impl FunctionHandler for EchoHandler {
    async fn execute(&self, job: &mut Job) -> JobResult {
        Ok(job.workload().to_vec())
    }
}

/// Reverses the workload (by character when it is UTF-8)
pub struct ReverseHandler;

#[async_trait]
impl FunctionHandler for ReverseHandler {
    async fn execute(&self, job: &mut Job) -> JobResult {
        let reversed = match std::str::from_utf8(job.workload()) {
            Ok(text) => text.chars().rev().collect::<String>().into_bytes(),
            Err(_) => job.workload().iter().rev().copied().collect(),
        };
        Ok(reversed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gearman_core::GearmanError;
    use tokio::sync::mpsc;

    fn job(workload: &[u8]) -> Job {
        let (tx, _rx) = mpsc::unbounded_channel();
        Job::new("H:1", "test", "", workload.to_vec(), tx)
    }

    #[tokio::test]
    async fn test_builtin_handlers() {
        assert_eq!(EchoHandler.execute(&mut job(b"hello")).await.unwrap(), b"hello");
        assert_eq!(ReverseHandler.execute(&mut job(b"hello")).await.unwrap(), b"olleh");
        assert_eq!(
            ReverseHandler.execute(&mut job("héllo".as_bytes())).await.unwrap(),
            "olléh".as_bytes()
        );
        assert_eq!(ReverseHandler.execute(&mut job(&[0xff, 0x01])).await.unwrap(), vec![0x01, 0xff]);
    }

    #[tokio::test]
    async fn test_registry() {
        let registry = FunctionRegistry::new();
        registry.register("reverse", ReverseHandler);
        registry.register_with_timeout("echo", EchoHandler, 30);
        registry.register(
            "fail",
            handler_fn(|_| Err(GearmanError::TaskFailed("nope".to_string()))),
        );

        assert!(registry.has_function("echo"));
        assert!(!registry.has_function("resize"));
        assert_eq!(registry.timeout("echo"), Some(30));
        assert_eq!(
            registry.functions(),
            vec![
                ("echo".to_string(), Some(30)),
                ("fail".to_string(), None),
                ("reverse".to_string(), None),
            ]
        );

        let handler = registry.get("reverse").unwrap();
        assert_eq!(handler.execute(&mut job(b"abc")).await.unwrap(), b"cba");
        assert!(registry.get("fail").unwrap().execute(&mut job(b"")).await.is_err());

        // Clones share registrations
        let shared = registry.clone();
        assert!(shared.unregister("fail"));
        assert!(!registry.has_function("fail"));
    }
}
