use serde::{Deserialize, Serialize};

/// Last known state of a job as reported by `STATUS_RES` / `STATUS_RES_UNIQUE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub is_known: bool,
    pub is_running: bool,
    pub numerator: u32,
    pub denominator: u32,
    /// Only reported for lookups by unique id
    pub client_count: Option<u32>,
}

impl JobStatus {
    /// Completion ratio in `[0, 1]`, `None` while the denominator is zero.
    pub fn progress(&self) -> Option<f64> {
        if self.denominator == 0 {
            None
        } else {
            Some(self.numerator as f64 / self.denominator as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress() {
        let status = JobStatus {
            is_known: true,
            is_running: true,
            numerator: 1,
            denominator: 4,
            client_count: None,
        };
        assert_eq!(status.progress(), Some(0.25));
        assert_eq!(JobStatus::default().progress(), None);
    }
}
