use gearman_core::{GearmanError, Result, Serializer};
use gearman_protocol::{Packet, PacketType};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;

/// A job assigned to this worker.
///
/// Reports are queued on a channel the worker loop drains onto the
/// connection while the handler runs. A job gets exactly one outcome:
/// `send_complete` or `send_fail`. Anything reported after that is a
/// usage error.
#[derive(Debug)]
pub struct Job {
    handle: String,
    function: String,
    unique: String,
    workload: Vec<u8>,
    serializer: Serializer,
    reports: mpsc::UnboundedSender<Packet>,
    finished: bool,
    error: Option<String>,
}

impl Job {
    pub fn new(
        handle: impl Into<String>,
        function: impl Into<String>,
        unique: impl Into<String>,
        workload: Vec<u8>,
        reports: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Job {
            handle: handle.into(),
            function: function.into(),
            unique: unique.into(),
            workload,
            serializer: Serializer::default(),
            reports,
            finished: false,
            error: None,
        }
    }

    /// Build a job from `JOB_ASSIGN_UNIQ` (or plain `JOB_ASSIGN`)
    pub fn from_assignment(packet: &Packet, reports: mpsc::UnboundedSender<Packet>) -> Result<Self> {
        let (unique, workload) = match packet.kind {
            PacketType::JobAssignUniq => (packet.arg_str(2)?.to_string(), packet.arg(3)?.to_vec()),
            PacketType::JobAssign => (String::new(), packet.arg(2)?.to_vec()),
            other => {
                return Err(GearmanError::Protocol(format!(
                    "{:?} is not a job assignment",
                    other
                )))
            }
        };
        Ok(Job::new(
            packet.arg_str(0)?,
            packet.arg_str(1)?,
            unique,
            workload,
            reports,
        ))
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn unique(&self) -> &str {
        &self.unique
    }

    pub fn workload(&self) -> &[u8] {
        &self.workload
    }

    /// Decode the workload with the worker's serializer
    pub fn workload_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.serializer.loads(&self.workload)
    }

    /// True once complete or fail has been sent
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Error text gathered from exceptions and handler failures, one per line
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn record_error(&mut self, text: &str) {
        match &mut self.error {
            Some(error) => {
                error.push('\n');
                error.push_str(text);
            }
            None => self.error = Some(text.to_string()),
        }
    }

    pub fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.report(Packet::work(PacketType::WorkData, &self.handle, data), false)
    }

    pub fn send_warning(&mut self, data: &[u8]) -> Result<()> {
        self.report(Packet::work(PacketType::WorkWarning, &self.handle, data), false)
    }

    pub fn send_status(&mut self, numerator: u32, denominator: u32) -> Result<()> {
        self.report(Packet::work_status(&self.handle, numerator, denominator), false)
    }

    /// Report an exception payload. Follow it with `send_fail`.
    pub fn send_exception(&mut self, data: &[u8]) -> Result<()> {
        if !self.finished {
            self.record_error(&String::from_utf8_lossy(data));
        }
        self.report(Packet::work(PacketType::WorkException, &self.handle, data), false)
    }

    pub fn send_complete(&mut self, data: &[u8]) -> Result<()> {
        self.report(Packet::work(PacketType::WorkComplete, &self.handle, data), true)
    }

    pub fn send_complete_as<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let data = self.serializer.dumps(value)?;
        self.send_complete(&data)
    }

    pub fn send_fail(&mut self) -> Result<()> {
        self.report(Packet::work(PacketType::WorkFail, &self.handle, &[]), true)
    }

    fn report(&mut self, packet: Packet, terminal: bool) -> Result<()> {
        if self.finished {
            return Err(GearmanError::Usage(format!(
                "job {} already reported its outcome",
                self.handle
            )));
        }
        self.reports
            .send(packet)
            .map_err(|_| GearmanError::ConnectionFailure("worker connection is gone".to_string()))?;
        if terminal {
            self.finished = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn job() -> (Job, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Job::new("H:lap:1", "reverse", "u-1", b"hello".to_vec(), tx), rx)
    }

    #[test]
    fn test_from_assignment() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let packet = Packet::response(
            PacketType::JobAssignUniq,
            vec![
                Bytes::from_static(b"H:lap:7"),
                Bytes::from_static(b"resize"),
                Bytes::from_static(b"u-7"),
                Bytes::from_static(b"a\0b"),
            ],
        );
        let job = Job::from_assignment(&packet, tx).unwrap();
        assert_eq!(job.handle(), "H:lap:7");
        assert_eq!(job.function(), "resize");
        assert_eq!(job.unique(), "u-7");
        assert_eq!(job.workload(), b"a\0b");

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(Job::from_assignment(&Packet::bare(PacketType::NoJob), tx).is_err());
    }

    #[test]
    fn test_reports_in_order() {
        let (mut job, mut rx) = job();
        job.send_status(1, 2).unwrap();
        job.send_data(b"ol").unwrap();
        job.send_complete(b"leh").unwrap();

        let kinds: Vec<PacketType> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| p.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![PacketType::WorkStatus, PacketType::WorkData, PacketType::WorkComplete]
        );
        assert!(job.is_finished());
    }

    #[test]
    fn test_single_terminal_report() {
        let (mut job, mut rx) = job();
        job.send_exception(b"boom").unwrap();
        job.send_fail().unwrap();

        assert!(matches!(job.send_complete(b"late"), Err(GearmanError::Usage(_))));
        assert!(matches!(job.send_data(b"late"), Err(GearmanError::Usage(_))));
        assert!(matches!(job.send_fail(), Err(GearmanError::Usage(_))));

        assert_eq!(rx.try_recv().unwrap().kind, PacketType::WorkException);
        let fail = rx.try_recv().unwrap();
        assert_eq!(fail.kind, PacketType::WorkFail);
        assert_eq!(fail.args.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_error_text_accumulates() {
        let (mut job, _rx) = job();
        assert_eq!(job.error(), None);

        job.send_exception(b"disk full").unwrap();
        job.send_exception(b"retry failed").unwrap();
        assert_eq!(job.error(), Some("disk full\nretry failed"));

        job.send_fail().unwrap();
        assert!(job.send_exception(b"late").is_err());
        assert_eq!(job.error(), Some("disk full\nretry failed"));
    }

    #[test]
    fn test_closed_connection() {
        let (mut job, rx) = job();
        drop(rx);
        assert!(job.send_data(b"x").unwrap_err().is_connection_error());
        assert!(!job.is_finished());
    }

    #[test]
    fn test_typed_workload() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut job = Job::new("H:1", "sum", "", br#"[1,2,3]"#.to_vec(), tx)
            .with_serializer(Serializer::Json);
        let numbers: Vec<u32> = job.workload_as().unwrap();
        job.send_complete_as(&numbers.iter().sum::<u32>()).unwrap();
        assert_eq!(rx.try_recv().unwrap().arg(1).unwrap(), b"6");
    }
}
