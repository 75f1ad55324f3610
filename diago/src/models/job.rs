//! A single HTTP load profile within a test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{JobId, WorkerGroupName};
use crate::Error;

/// One HTTP-generating job. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub group: WorkerGroupName,
    pub priority: i32,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub config: Vec<String>,
    /// Target requests per second. Must be `>= 1`.
    pub frequency: u64,
    /// Duration of the load in seconds. Must be `>= 1`.
    pub duration: u64,
    pub http_method: String,
    pub http_url: String,
    #[serde(default)]
    pub http_body: String,
}

impl Job {
    /// Validate the invariants spec.md §3 places on a `Job`:
    /// `frequency >= 1` and `duration >= 1`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.frequency < 1 {
            return Err(Error::Validation(format!(
                "validation failed at Job.Frequency: expected >= 1, got {}",
                self.frequency
            )));
        }
        if self.duration < 1 {
            return Err(Error::Validation(format!(
                "validation failed at Job.Duration: expected >= 1, got {}",
                self.duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job {
            id: JobId::new("t1-0"),
            name: "job".into(),
            group: WorkerGroupName::new("default"),
            priority: 0,
            env: HashMap::new(),
            config: Vec::new(),
            frequency: 10,
            duration: 30,
            http_method: "GET".into(),
            http_url: "http://example.com".into(),
            http_body: String::new(),
        }
    }

    #[test]
    fn rejects_zero_frequency() {
        let mut job = base_job();
        job.frequency = 0;
        let err = job.validate().unwrap_err();
        assert_eq!(err.kind(), "Validation");
    }

    #[test]
    fn rejects_zero_duration() {
        let mut job = base_job();
        job.duration = 0;
        assert!(job.validate().is_err());
    }

    #[test]
    fn accepts_a_valid_job() {
        assert!(base_job().validate().is_ok());
    }
}
