//! An embedded `sled`-backed `PersistentStore`.
//!
//! spec.md §1 asks for storage in "an embedded key-value store"; the
//! teacher's own cache layer (`scaler/src/libs/cache.rs`) CBOR-encodes
//! values before writing them, which this mirrors. Each model gets its
//! own tree; the by-test secondary indices live in their own trees
//! keyed `"<test_id>/<child_id>"` so a prefix scan lists a test's
//! children without maintaining a separate value blob.

use async_trait::async_trait;
use sled::Transactional;

use crate::backends::store::PersistentStore;
use crate::models::{Test, TestId, TestInstance, TestInstanceId, TestSchedule, TestScheduleId};
use crate::Error;

pub struct SledStore {
    db: sled::Db,
    tests: sled::Tree,
    test_instances: sled::Tree,
    test_instances_by_test: sled::Tree,
    test_schedules: sled::Tree,
    test_schedules_by_test: sled::Tree,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self, Error> {
        let db = sled::open(path)?;
        Ok(SledStore {
            tests: db.open_tree("tests")?,
            test_instances: db.open_tree("test_instances")?,
            test_instances_by_test: db.open_tree("test_instances_by_test")?,
            test_schedules: db.open_tree("test_schedules")?,
            test_schedules_by_test: db.open_tree("test_schedules_by_test")?,
            db,
        })
    }

    /// Flush pending writes to disk. Exposed for tests and clean
    /// shutdown; sled flushes periodically on its own otherwise.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

fn index_key(test_id: &TestId, child_id: &str) -> Vec<u8> {
    format!("{test_id}/{child_id}").into_bytes()
}

#[async_trait]
impl PersistentStore for SledStore {
    async fn add_test(&self, test: &Test) -> Result<(), Error> {
        let bytes = serde_cbor::to_vec(test)?;
        self.tests.insert(test.id.as_str(), bytes)?;
        Ok(())
    }

    async fn get_test(&self, id: &TestId) -> Result<Test, Error> {
        let bytes = self
            .tests
            .get(id.as_str())?
            .ok_or_else(|| Error::NotFound(format!("test {id}")))?;
        Ok(serde_cbor::from_slice(&bytes)?)
    }

    async fn delete_test(&self, id: &TestId) -> Result<(), Error> {
        self.tests.remove(id.as_str())?;
        Ok(())
    }

    async fn get_all_tests(&self) -> Result<Vec<Test>, Error> {
        self.tests
            .iter()
            .values()
            .map(|v| Ok(serde_cbor::from_slice(&v?)?))
            .collect()
    }

    async fn get_all_tests_with_prefix(&self, prefix: &str) -> Result<Vec<Test>, Error> {
        self.tests
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|v| Ok(serde_cbor::from_slice(&v?)?))
            .collect()
    }

    async fn add_test_instance(&self, instance: &TestInstance) -> Result<(), Error> {
        let bytes = serde_cbor::to_vec(instance)?;
        let key = index_key(&instance.test_id, instance.id.as_str());
        (&self.test_instances, &self.test_instances_by_test)
            .transaction(|(instances, by_test)| {
                instances.insert(instance.id.as_str(), bytes.clone())?;
                by_test.insert(key.clone(), &[])?;
                Ok::<_, sled::transaction::ConflictableTransactionError<sled::Error>>(())
            })
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn get_test_instance(&self, id: &TestInstanceId) -> Result<TestInstance, Error> {
        let bytes = self
            .test_instances
            .get(id.as_str())?
            .ok_or_else(|| Error::NotFound(format!("test instance {id}")))?;
        Ok(serde_cbor::from_slice(&bytes)?)
    }

    async fn get_test_instances_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestInstance>, Error> {
        let prefix = format!("{test_id}/");
        let mut out = Vec::new();
        for entry in self.test_instances_by_test.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let instance_id = String::from_utf8_lossy(&key);
            let instance_id = instance_id.rsplit('/').next().unwrap_or(&instance_id);
            out.push(self.get_test_instance(&TestInstanceId::new(instance_id)).await?);
        }
        Ok(out)
    }

    async fn delete_test_instance(&self, id: &TestInstanceId) -> Result<(), Error> {
        if let Some(bytes) = self.test_instances.get(id.as_str())? {
            let instance: TestInstance = serde_cbor::from_slice(&bytes)?;
            let key = index_key(&instance.test_id, id.as_str());
            (&self.test_instances, &self.test_instances_by_test)
                .transaction(|(instances, by_test)| {
                    instances.remove(id.as_str())?;
                    by_test.remove(key.clone())?;
                    Ok::<_, sled::transaction::ConflictableTransactionError<sled::Error>>(())
                })
                .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_all_test_instances(&self) -> Result<Vec<TestInstance>, Error> {
        self.test_instances
            .iter()
            .values()
            .map(|v| Ok(serde_cbor::from_slice(&v?)?))
            .collect()
    }

    async fn add_test_schedule(&self, schedule: &TestSchedule) -> Result<(), Error> {
        let bytes = serde_cbor::to_vec(schedule)?;
        let key = index_key(&schedule.test_id, schedule.id.as_str());
        (&self.test_schedules, &self.test_schedules_by_test)
            .transaction(|(schedules, by_test)| {
                schedules.insert(schedule.id.as_str(), bytes.clone())?;
                by_test.insert(key.clone(), &[])?;
                Ok::<_, sled::transaction::ConflictableTransactionError<sled::Error>>(())
            })
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    async fn get_test_schedule(&self, id: &TestScheduleId) -> Result<TestSchedule, Error> {
        let bytes = self
            .test_schedules
            .get(id.as_str())?
            .ok_or_else(|| Error::NotFound(format!("test schedule {id}")))?;
        Ok(serde_cbor::from_slice(&bytes)?)
    }

    async fn delete_test_schedule(&self, id: &TestScheduleId) -> Result<(), Error> {
        if let Some(bytes) = self.test_schedules.get(id.as_str())? {
            let schedule: TestSchedule = serde_cbor::from_slice(&bytes)?;
            let key = index_key(&schedule.test_id, id.as_str());
            (&self.test_schedules, &self.test_schedules_by_test)
                .transaction(|(schedules, by_test)| {
                    schedules.remove(id.as_str())?;
                    by_test.remove(key.clone())?;
                    Ok::<_, sled::transaction::ConflictableTransactionError<sled::Error>>(())
                })
                .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_test_schedules_by_test_id(&self, test_id: &TestId) -> Result<Vec<TestSchedule>, Error> {
        let prefix = format!("{test_id}/");
        let mut out = Vec::new();
        for entry in self.test_schedules_by_test.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let schedule_id = String::from_utf8_lossy(&key);
            let schedule_id = schedule_id.rsplit('/').next().unwrap_or(&schedule_id);
            out.push(self.get_test_schedule(&TestScheduleId::new(schedule_id)).await?);
        }
        Ok(out)
    }

    async fn get_all_test_schedules(&self) -> Result<Vec<TestSchedule>, Error> {
        self.test_schedules
            .iter()
            .values()
            .map(|v| Ok(serde_cbor::from_slice(&v?)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobId, WorkerGroupName};
    use std::collections::HashMap;

    fn job(id: &str) -> Job {
        Job {
            id: JobId::new(id),
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

    fn store() -> SledStore {
        SledStore::open(&format!("/tmp/diago-test-{}", uuid::Uuid::new_v4())).unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_test() {
        let store = store();
        let test = Test::new("t1", vec![job("t1-0")], Vec::new()).unwrap();
        store.add_test(&test).await.unwrap();
        let fetched = store.get_test(&test.id).await.unwrap();
        assert_eq!(fetched, test);
    }

    #[tokio::test]
    async fn test_instances_are_indexed_by_test_id() {
        let store = store();
        let test_id = TestId::new("t1");
        let instance = TestInstance::new(
            TestInstanceId::new("ti-0"),
            test_id.clone(),
            crate::models::TestType::Adhoc,
            chrono::Utc::now(),
        );
        store.add_test_instance(&instance).await.unwrap();
        let found = store.get_test_instances_by_test_id(&test_id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, instance.id);
    }

    #[tokio::test]
    async fn deleting_a_test_instance_removes_it_from_the_index() {
        let store = store();
        let test_id = TestId::new("t1");
        let instance = TestInstance::new(
            TestInstanceId::new("ti-0"),
            test_id.clone(),
            crate::models::TestType::Adhoc,
            chrono::Utc::now(),
        );
        store.add_test_instance(&instance).await.unwrap();
        store.delete_test_instance(&instance.id).await.unwrap();
        let found = store.get_test_instances_by_test_id(&test_id).await.unwrap();
        assert!(found.is_empty());
        assert!(store.get_test_instance(&instance.id).await.is_err());
    }
}
