//! In-memory fakes for the external adapter traits, for unit tests
//! that exercise the core without a real cluster, disk, or metrics
//! collector. Grounded on the teacher's `DryRun` scheduler
//! (`scaler/src/libs/schedulers/dry_run.rs`), which implements the real
//! `Scheduler` trait against pretend in-memory nodes instead of a
//! cluster.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backends::log_store::{LogStore, ResponseBlob};
use crate::backends::metrics_sink::MetricsSink;
use crate::backends::orchestrator::{Orchestrator, PodInfo, PodSpec, WorkerGroupResource};
use crate::backends::store::PersistentStore;
use crate::models::{JobId, Test, TestId, TestInstance, TestInstanceId, TestSchedule, TestScheduleId, WorkerGroupName};
use crate::Error;

/// A fake orchestrator that tracks created pods in memory and serves
/// a fixed table of worker-group resources.
#[derive(Default)]
pub struct FakeOrchestrator {
    pods: Mutex<HashMap<(String, String), PodSpec>>,
    groups: HashMap<String, WorkerGroupResource>,
    deleted: Mutex<HashSet<(String, String)>>,
}

impl FakeOrchestrator {
    pub fn new(groups: HashMap<String, WorkerGroupResource>) -> Self {
        FakeOrchestrator {
            pods: Mutex::new(HashMap::new()),
            groups,
            deleted: Mutex::new(HashSet::new()),
        }
    }

    pub fn created_pods(&self) -> Vec<PodSpec> {
        self.pods.lock().unwrap().values().cloned().collect()
    }

    pub fn was_deleted(&self, name: &str, namespace: &str) -> bool {
        self.deleted.lock().unwrap().contains(&(name.to_owned(), namespace.to_owned()))
    }

    /// Seed a pod directly into the fake's inventory, bypassing
    /// `create_pod`, for tests that need pre-existing pods to select
    /// chaos targets from.
    pub fn seed_pod(&self, name: &str, namespace: &str, labels: HashMap<String, String>) {
        self.pods.lock().unwrap().insert(
            (name.to_owned(), namespace.to_owned()),
            PodSpec {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
                image: "diago-worker:latest".into(),
                env: HashMap::new(),
                labels,
            },
        );
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_pod(&self, spec: PodSpec) -> Result<(), Error> {
        self.pods
            .lock()
            .unwrap()
            .insert((spec.name.clone(), spec.namespace.clone()), spec);
        Ok(())
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.pods.lock().unwrap().remove(&(name.to_owned(), namespace.to_owned()));
        self.deleted.lock().unwrap().insert((name.to_owned(), namespace.to_owned()));
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &HashMap<String, String>) -> Result<Vec<PodInfo>, Error> {
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .values()
            .filter(|p| p.namespace == namespace)
            .filter(|p| label_selector.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
            .map(|p| PodInfo {
                name: p.name.clone(),
                namespace: p.namespace.clone(),
                labels: p.labels.clone(),
            })
            .collect())
    }

    async fn get_worker_group(&self, _namespace: &str, group: &WorkerGroupName) -> Result<WorkerGroupResource, Error> {
        self.groups
            .get(group.as_str())
            .cloned()
            .ok_or_else(|| Error::GroupMissing(group.to_string()))
    }
}

/// An in-memory `PersistentStore`, with the same by-test indexing
/// behavior as `SledStore` but backed by plain `HashMap`s.
#[derive(Default)]
pub struct FakeStore {
    tests: Mutex<HashMap<String, Test>>,
    test_instances: Mutex<HashMap<String, TestInstance>>,
    test_schedules: Mutex<HashMap<String, TestSchedule>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for FakeStore {
    async fn add_test(&self, test: &Test) -> Result<(), Error> {
        self.tests.lock().unwrap().insert(test.id.to_string(), test.clone());
        Ok(())
    }

    async fn get_test(&self, id: &TestId) -> Result<Test, Error> {
        self.tests
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test {id}")))
    }

    async fn delete_test(&self, id: &TestId) -> Result<(), Error> {
        self.tests.lock().unwrap().remove(id.as_str());
        Ok(())
    }

    async fn get_all_tests(&self) -> Result<Vec<Test>, Error> {
        Ok(self.tests.lock().unwrap().values().cloned().collect())
    }

    async fn get_all_tests_with_prefix(&self, prefix: &str) -> Result<Vec<Test>, Error> {
        Ok(self
            .tests
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.id.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn add_test_instance(&self, instance: &TestInstance) -> Result<(), Error> {
        self.test_instances
            .lock()
            .unwrap()
            .insert(instance.id.to_string(), instance.clone());
        Ok(())
    }

    async fn get_test_instance(&self, id: &TestInstanceId) -> Result<TestInstance, Error> {
        self.test_instances
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test instance {id}")))
    }

    async fn get_test_instances_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestInstance>, Error> {
        Ok(self
            .test_instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| &i.test_id == test_id)
            .cloned()
            .collect())
    }

    async fn delete_test_instance(&self, id: &TestInstanceId) -> Result<(), Error> {
        self.test_instances.lock().unwrap().remove(id.as_str());
        Ok(())
    }

    async fn get_all_test_instances(&self) -> Result<Vec<TestInstance>, Error> {
        Ok(self.test_instances.lock().unwrap().values().cloned().collect())
    }

    async fn add_test_schedule(&self, schedule: &TestSchedule) -> Result<(), Error> {
        self.test_schedules
            .lock()
            .unwrap()
            .insert(schedule.id.to_string(), schedule.clone());
        Ok(())
    }

    async fn get_test_schedule(&self, id: &TestScheduleId) -> Result<TestSchedule, Error> {
        self.test_schedules
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("test schedule {id}")))
    }

    async fn delete_test_schedule(&self, id: &TestScheduleId) -> Result<(), Error> {
        self.test_schedules.lock().unwrap().remove(id.as_str());
        Ok(())
    }

    async fn get_test_schedules_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestSchedule>, Error> {
        Ok(self
            .test_schedules
            .lock()
            .unwrap()
            .values()
            .filter(|s| &s.test_id == test_id)
            .cloned()
            .collect())
    }

    async fn get_all_test_schedules(&self) -> Result<Vec<TestSchedule>, Error> {
        Ok(self.test_schedules.lock().unwrap().values().cloned().collect())
    }
}

/// A `LogStore` that remembers whatever is pushed into it via
/// `insert`, for tests that want to assert on logging behavior without
/// a real sink.
#[derive(Default)]
pub struct FakeLogStore {
    logs: Mutex<HashMap<(String, String), HashMap<JobId, Vec<ResponseBlob>>>>,
}

impl FakeLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, test_id: &TestId, test_instance_id: &TestInstanceId, logs: HashMap<JobId, Vec<ResponseBlob>>) {
        self.logs
            .lock()
            .unwrap()
            .insert((test_id.to_string(), test_instance_id.to_string()), logs);
    }
}

#[async_trait]
impl LogStore for FakeLogStore {
    async fn get_test_logs(
        &self,
        test_id: &TestId,
        test_instance_id: &TestInstanceId,
    ) -> Result<HashMap<JobId, Vec<ResponseBlob>>, Error> {
        self.logs
            .lock()
            .unwrap()
            .get(&(test_id.to_string(), test_instance_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("logs for test {test_id} instance {test_instance_id}")))
    }
}

/// A `MetricsSink` that records observations for assertions instead of
/// exporting them anywhere.
#[derive(Default)]
pub struct FakeMetricsSink {
    capacity: Mutex<HashMap<String, (u64, u64)>>,
    worker_count: Mutex<HashMap<String, u64>>,
}

impl FakeMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity_of(&self, group: &WorkerGroupName) -> Option<(u64, u64)> {
        self.capacity.lock().unwrap().get(group.as_str()).copied()
    }
}

impl MetricsSink for FakeMetricsSink {
    fn observe_capacity(&self, group: &WorkerGroupName, total: u64, remaining: u64) {
        self.capacity.lock().unwrap().insert(group.to_string(), (total, remaining));
    }

    fn observe_worker_count(&self, group: &WorkerGroupName, count: u64) {
        self.worker_count.lock().unwrap().insert(group.to_string(), count);
    }
}
