//! A cron-driven schedule that invokes the job funnel.

use serde::{Deserialize, Serialize};

use crate::models::{TestId, TestScheduleId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSchedule {
    pub id: TestScheduleId,
    pub name: String,
    pub test_id: TestId,
    pub cron_spec: String,
}
