//! The persistent-store surface the core consumes (spec.md §6).

use async_trait::async_trait;

use crate::models::{Test, TestId, TestInstance, TestInstanceId, TestSchedule, TestScheduleId};
use crate::Error;

/// Durable storage for tests, test instances, and test schedules, plus
/// the by-test secondary indices the funnel and schedule manager need
/// to enumerate instances/schedules belonging to one test.
///
/// Concrete implementations: `SledStore` for production, the in-memory
/// `backends::mock::FakeStore` for tests.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn add_test(&self, test: &Test) -> Result<(), Error>;
    async fn get_test(&self, id: &TestId) -> Result<Test, Error>;
    async fn delete_test(&self, id: &TestId) -> Result<(), Error>;
    async fn get_all_tests(&self) -> Result<Vec<Test>, Error>;
    async fn get_all_tests_with_prefix(&self, prefix: &str) -> Result<Vec<Test>, Error>;

    async fn add_test_instance(&self, instance: &TestInstance) -> Result<(), Error>;
    async fn get_test_instance(&self, id: &TestInstanceId) -> Result<TestInstance, Error>;
    async fn get_test_instances_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestInstance>, Error>;
    async fn delete_test_instance(&self, id: &TestInstanceId) -> Result<(), Error>;
    async fn get_all_test_instances(&self) -> Result<Vec<TestInstance>, Error>;

    async fn add_test_schedule(&self, schedule: &TestSchedule) -> Result<(), Error>;
    async fn get_test_schedule(&self, id: &TestScheduleId) -> Result<TestSchedule, Error>;
    async fn delete_test_schedule(&self, id: &TestScheduleId) -> Result<(), Error>;
    async fn get_test_schedules_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestSchedule>, Error>;
    async fn get_all_test_schedules(&self) -> Result<Vec<TestSchedule>, Error>;
}
