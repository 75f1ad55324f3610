//! The Diago data model: identifiers, jobs, tests, instances, chaos,
//! and schedules. See spec.md §3.

mod chaos;
mod ids;
mod job;
mod schedule;
mod test;
mod test_instance;

pub use chaos::{ChaosInstance, ChaosResult, ChaosStatus};
pub use ids::{ChaosId, InstanceId, JobId, TestId, TestInstanceId, TestScheduleId, WorkerGroupName};
pub use job::Job;
pub use schedule::TestSchedule;
pub use test::Test;
pub use test_instance::{TestInstance, TestStatus, TestType};
