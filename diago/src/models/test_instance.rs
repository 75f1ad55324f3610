//! One execution of a `Test`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric_aggregator::AggregatedMetrics;
use crate::models::{ChaosId, ChaosResult, JobId, TestId, TestInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Adhoc,
    Scheduled,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Adhoc => "adhoc",
            TestType::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Submitted,
    Done,
    Failed,
    Stopped,
}

impl TestStatus {
    /// Terminal iff the status is one of done, failed, stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Done | TestStatus::Failed | TestStatus::Stopped)
    }
}

/// One execution of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInstance {
    pub id: TestInstanceId,
    pub test_id: TestId,
    #[serde(rename = "type")]
    pub kind: TestType,
    pub status: TestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: HashMap<JobId, AggregatedMetrics>,
    #[serde(default)]
    pub chaos_result: HashMap<ChaosId, ChaosResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestInstance {
    pub fn new(id: TestInstanceId, test_id: TestId, kind: TestType, created_at: DateTime<Utc>) -> Self {
        TestInstance {
            id,
            test_id,
            kind,
            status: TestStatus::Submitted,
            created_at,
            metrics: HashMap::new(),
            chaos_result: HashMap::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TestStatus::Failed;
        self.error = Some(error.into());
    }
}
