//! A named collection of jobs plus optional chaos actions.

use serde::{Deserialize, Serialize};

use crate::models::{ChaosInstance, Job, TestId};
use crate::Error;

/// A test. The name doubles as the id (unique per installation); job
/// and chaos ids are assigned as `"<TestID>-<index>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: TestId,
    pub name: String,
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub chaos: Vec<ChaosInstance>,
}

/// Re-root a nested `Error::Validation` message at the containing
/// `Test`'s path, preserving the inner reason (spec.md §9: callers see
/// `"validation failed at <Type>.<path>: <reason>"`, not a generic
/// placeholder). Non-`Validation` errors pass through unchanged.
fn rescope(err: &Error, inner_prefix: &str, outer_prefix: &str) -> Error {
    match err {
        Error::Validation(msg) => {
            let full_prefix = format!("validation failed at {inner_prefix}");
            match msg.strip_prefix(&full_prefix) {
                Some(rest) => Error::Validation(format!("validation failed at {outer_prefix}{rest}")),
                None => Error::Validation(msg.clone()),
            }
        }
        other => Error::Generic(other.to_string()),
    }
}

impl Test {
    /// Build a `Test`, assigning job/chaos ids from the test id the
    /// way spec.md §3 requires, and validating every contained job
    /// and chaos instance.
    pub fn new(name: impl Into<String>, jobs: Vec<Job>, chaos: Vec<ChaosInstance>) -> Result<Self, Error> {
        let name = name.into();
        let id = TestId::new(name.clone());
        let jobs: Vec<Job> = jobs
            .into_iter()
            .enumerate()
            .map(|(i, mut job)| {
                job.id = crate::models::JobId::new(format!("{id}-{i}"));
                job
            })
            .collect();
        let chaos: Vec<ChaosInstance> = chaos
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.id = crate::models::ChaosId::new(format!("{id}-{i}"));
                c
            })
            .collect();
        let test = Test { id, name, jobs, chaos };
        test.validate()?;
        Ok(test)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (i, job) in self.jobs.iter().enumerate() {
            job.validate()
                .map_err(|e| rescope(&e, "Job.", &format!("Test.Jobs[{i}].")))?;
        }
        for (i, chaos) in self.chaos.iter().enumerate() {
            chaos
                .validate()
                .map_err(|e| rescope(&e, "ChaosInstance.", &format!("Test.Chaos[{i}].")))?;
        }
        Ok(())
    }

    /// The longest job duration in the test, used to bound chaos
    /// simulations (spec.md §4.6.3).
    pub fn max_job_duration(&self) -> u64 {
        self.jobs.iter().map(|j| j.duration).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn job(freq: u64) -> Job {
        Job {
            id: crate::models::JobId::new(""),
            name: "job".into(),
            group: crate::models::WorkerGroupName::new("default"),
            priority: 0,
            env: HashMap::new(),
            config: Vec::new(),
            frequency: freq,
            duration: 30,
            http_method: "GET".into(),
            http_url: "http://example.com".into(),
            http_body: String::new(),
        }
    }

    #[test]
    fn assigns_ids_from_test_id() {
        let test = Test::new("my-test", vec![job(10), job(20)], Vec::new()).unwrap();
        assert_eq!(test.jobs[0].id.as_str(), "my-test-0");
        assert_eq!(test.jobs[1].id.as_str(), "my-test-1");
    }

    #[test]
    fn rejects_invalid_job() {
        let err = Test::new("bad-test", vec![job(0)], Vec::new()).unwrap_err();
        assert_eq!(err.kind(), "Validation");
    }

    #[test]
    fn invalid_job_message_is_rescoped_and_keeps_the_real_field_and_reason() {
        let mut bad = job(10);
        bad.duration = 0;
        let err = Test::new("bad-test", vec![bad], Vec::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed at Test.Jobs[0].Duration: expected >= 1, got 0"
        );
    }

    #[test]
    fn invalid_chaos_message_is_rescoped_to_test_chaos_path() {
        let chaos = crate::models::ChaosInstance {
            id: crate::models::ChaosId::new(""),
            namespace: "default".into(),
            selectors: HashMap::new(),
            timeout: 5,
            count: 0,
        };
        let err = Test::new("bad-test", vec![job(10)], vec![chaos]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation failed at Test.Chaos[0].Count: expected >= 1, got 0"
        );
    }

    #[test]
    fn max_job_duration_picks_the_longest_job() {
        let mut jobs = vec![job(10), job(20)];
        jobs[0].duration = 5;
        jobs[1].duration = 60;
        let test = Test::new("t", jobs, Vec::new()).unwrap();
        assert_eq!(test.max_job_duration(), 60);
    }
}
