//! Test lifecycle orchestration: `BeginTest`/`StopTest` under striped
//! per-test locking, chaos orchestration, and per-job metric
//! aggregation (C6). Grounded on spec.md §4.6.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{event, instrument, Level};

use crate::backends::PersistentStore;
use crate::chaos::ChaosSimulator;
use crate::metric_aggregator::MetricAggregator;
use crate::models::{
    ChaosId, ChaosInstance, ChaosResult, JobId, TestId, TestInstance, TestInstanceId, TestStatus, TestType,
    WorkerGroupName,
};
use crate::pod_group::JobEvent;
use crate::scheduler::Scheduler;
use crate::Error;

/// A single funnel owns one `Scheduler` and one `ChaosSimulator` and
/// runs every test in the installation through them.
pub struct JobFunnel {
    scheduler: Arc<Scheduler>,
    chaos: Arc<ChaosSimulator>,
    store: Arc<dyn PersistentStore>,
    test_locks: StdMutex<HashMap<TestId, Arc<AsyncMutex<()>>>>,
    ongoing: StdMutex<HashSet<TestId>>,
}

impl JobFunnel {
    pub fn new(scheduler: Arc<Scheduler>, chaos: Arc<ChaosSimulator>, store: Arc<dyn PersistentStore>) -> Self {
        JobFunnel {
            scheduler,
            chaos,
            store,
            test_locks: StdMutex::new(HashMap::new()),
            ongoing: StdMutex::new(HashSet::new()),
        }
    }

    /// §4.6.1: acquire-global, get-or-insert, release-global, return
    /// the per-test lock for the caller to acquire.
    fn test_lock(&self, test_id: &TestId) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.test_locks
                .lock()
                .unwrap()
                .entry(test_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// `BeginTest(testID, type)`. Takes an owned `Arc` because the
    /// completion task spawned at the end holds a `'static` handle
    /// back into `self` (store, chaos).
    #[instrument(name = "JobFunnel::begin_test", skip(self), fields(test_id = %test_id), err(Debug))]
    pub async fn begin_test(self: Arc<Self>, test_id: TestId, kind: TestType) -> Result<TestInstanceId, Error> {
        let lock = self.test_lock(&test_id);
        let _guard = lock.lock().await;

        let test = self.store.get_test(&test_id).await?;
        if self.ongoing.lock().unwrap().contains(&test_id) {
            return Err(Error::AlreadyRunning(test_id.to_string()));
        }

        let instance_id = TestInstanceId::new(format!("{}-{}", test.name, Utc::now().timestamp()));
        let mut instance = TestInstance::new(instance_id.clone(), test_id.clone(), kind, Utc::now());
        self.store.add_test_instance(&instance).await?;

        let mut submitted: Vec<(JobId, WorkerGroupName)> = Vec::new();
        let mut started_signals = Vec::new();
        let mut consumer_handles = Vec::new();
        let mut aggregators: HashMap<JobId, Arc<StdMutex<MetricAggregator>>> = HashMap::new();

        for job in &test.jobs {
            let events = match Arc::clone(&self.scheduler).submit(job.clone()).await {
                Ok(events) => events,
                Err(e) => {
                    instance.mark_failed(e.to_string());
                    if let Err(store_err) = self.store.add_test_instance(&instance).await {
                        event!(Level::WARN, error = %store_err, "failed to persist failed test instance");
                    }
                    for (job_id, group) in submitted.iter().rev() {
                        if let Err(stop_err) = self.scheduler.stop(group, job_id) {
                            event!(Level::WARN, job = %job_id, error = %stop_err, "rollback stop failed");
                        }
                    }
                    return Err(Error::JobSubmissionFailed {
                        job: job.id.to_string(),
                        source: Box::new(e),
                    });
                }
            };

            let aggregator = Arc::new(StdMutex::new(MetricAggregator::new()));
            let (started_tx, started_rx) = oneshot::channel();
            consumer_handles.push(spawn_job_consumer(job.id.clone(), events, Arc::clone(&aggregator), started_tx));
            aggregators.insert(job.id.clone(), aggregator);
            started_signals.push(started_rx);
            submitted.push((job.id.clone(), job.group.clone()));
        }

        self.ongoing.lock().unwrap().insert(test_id.clone());

        let max_job_duration = test.max_job_duration();
        let chaos_instances = test.chaos.clone();
        let funnel = Arc::clone(&self);
        let completion_test_id = test_id.clone();
        let completion_instance_id = instance_id.clone();
        tokio::spawn(async move {
            for rx in started_signals {
                let _ = rx.await;
            }

            let chaos_result = funnel
                .run_chaos(&completion_test_id, &chaos_instances, max_job_duration)
                .await;

            for handle in consumer_handles {
                let _ = handle.await;
            }

            funnel.ongoing.lock().unwrap().remove(&completion_test_id);

            match funnel.store.get_test_instance(&completion_instance_id).await {
                Ok(mut instance) => {
                    if !instance.is_terminal() {
                        instance.status = TestStatus::Done;
                        instance.metrics = aggregators
                            .iter()
                            .map(|(id, agg)| (id.clone(), agg.lock().unwrap().snapshot()))
                            .collect();
                        instance.chaos_result = chaos_result;
                        if let Err(e) = funnel.store.add_test_instance(&instance).await {
                            event!(Level::WARN, error = %e, "failed to persist completed test instance");
                        }
                    }
                }
                Err(e) => event!(Level::WARN, error = %e, "failed to reload test instance at completion"),
            }
        });

        Ok(instance_id)
    }

    /// §4.6.3: run every chaos instance concurrently; a simulation
    /// failure (from preconditions or a failed deletion) is recorded
    /// per-chaos rather than failing the whole test.
    async fn run_chaos(
        &self,
        test_id: &TestId,
        chaos_instances: &[ChaosInstance],
        max_job_duration: u64,
    ) -> HashMap<ChaosId, ChaosResult> {
        let outcomes = join_all(chaos_instances.iter().map(|instance| {
            let chaos_id = instance.id.clone();
            let simulate = Arc::clone(&self.chaos).simulate(test_id.clone(), instance.clone(), max_job_duration);
            async move { (chaos_id, simulate.await) }
        }))
        .await;

        let mut results = HashMap::with_capacity(outcomes.len());
        for (chaos_id, outcome) in outcomes {
            let result = match outcome {
                Ok((mut err_rx, selected_pods)) => {
                    let mut errors = Vec::new();
                    while let Some(e) = err_rx.recv().await {
                        errors.push(e.to_string());
                    }
                    if errors.is_empty() {
                        ChaosResult::success(selected_pods)
                    } else {
                        ChaosResult::failed(errors.join("; "))
                    }
                }
                Err(e) => ChaosResult::failed(e.to_string()),
            };
            results.insert(chaos_id, result);
        }
        results
    }

    /// `StopTest(testID)`.
    #[instrument(name = "JobFunnel::stop_test", skip(self), fields(test_id = %test_id), err(Debug))]
    pub async fn stop_test(&self, test_id: TestId) -> Result<(), Error> {
        let lock = self.test_lock(&test_id);
        let _guard = lock.lock().await;

        if !self.ongoing.lock().unwrap().contains(&test_id) {
            return Err(Error::NotRunning(test_id.to_string()));
        }

        let test = self.store.get_test(&test_id).await?;
        for chaos in &test.chaos {
            self.chaos.stop(&test_id, &chaos.id);
        }

        let mut first_failure = None;
        for job in &test.jobs {
            if let Err(e) = self.scheduler.stop(&job.group, &job.id) {
                event!(Level::WARN, job = %job.id, error = %e, "Scheduler::stop failed during StopTest");
                first_failure.get_or_insert_with(|| e.to_string());
            }
        }

        for mut instance in self.store.get_test_instances_by_test_id(&test_id).await? {
            if !instance.is_terminal() {
                instance.status = TestStatus::Stopped;
                self.store.add_test_instance(&instance).await?;
            }
        }

        self.ongoing.lock().unwrap().remove(&test_id);

        if let Some(msg) = first_failure {
            return Err(Error::StopFailed(msg));
        }
        Ok(())
    }
}

/// One job's event-channel consumer: folds `Metrics` into the
/// aggregator and signals `started` on the first `Start`. Exits (and
/// closes the aggregator) when the pod group closes the channel.
fn spawn_job_consumer(
    job_id: JobId,
    mut events: mpsc::Receiver<JobEvent>,
    aggregator: Arc<StdMutex<MetricAggregator>>,
    started_tx: oneshot::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut started_tx = Some(started_tx);
        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Start { dispatched_frequency } => {
                    event!(Level::INFO, job = %job_id, dispatched_frequency, "job dispatched");
                    if let Some(tx) = started_tx.take() {
                        let _ = tx.send(());
                    }
                }
                JobEvent::Metrics(sample) => {
                    aggregator.lock().unwrap().add(&sample);
                }
            }
        }
        aggregator.lock().unwrap().close();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{FakeOrchestrator, FakeStore};
    use crate::backends::WorkerGroupResource;
    use crate::models::{Job, Test, WorkerGroupName as Group};
    use std::collections::HashMap as Map;

    fn job(id: &str, freq: u64, duration: u64) -> Job {
        Job {
            id: JobId::new(id),
            name: "job".into(),
            group: Group::new("load-gen"),
            priority: 0,
            env: Map::new(),
            config: Vec::new(),
            frequency: freq,
            duration,
            http_method: "GET".into(),
            http_url: "http://example.com".into(),
            http_body: String::new(),
        }
    }

    fn funnel() -> Arc<JobFunnel> {
        let mut groups = Map::new();
        groups.insert(
            "load-gen".to_owned(),
            WorkerGroupResource {
                image: "diago-worker:latest".into(),
                capacity: 10,
                allowed_inactivity_period: 60,
            },
        );
        let orchestrator = Arc::new(FakeOrchestrator::new(groups));
        let scheduler = Arc::new(Scheduler::new("default".into(), "leader".into(), 5000, 10, orchestrator.clone()));
        let chaos = Arc::new(ChaosSimulator::new(orchestrator));
        let store = Arc::new(FakeStore::new());
        Arc::new(JobFunnel::new(scheduler, chaos, store))
    }

    #[tokio::test]
    async fn begin_test_fails_not_found_for_unknown_test() {
        let funnel = funnel();
        let err = funnel.begin_test(TestId::new("ghost"), TestType::Adhoc).await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn stop_test_fails_not_running_when_never_started() {
        let funnel = funnel();
        let err = funnel.stop_test(TestId::new("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), "NotRunning");
    }

    #[tokio::test]
    async fn begin_test_twice_is_already_running() {
        let funnel = funnel();
        let test = Test::new("t1", vec![job("j0", 5, 30)], Vec::new()).unwrap();
        funnel.store.add_test(&test).await.unwrap();

        funnel.clone().begin_test(test.id.clone(), TestType::Adhoc).await.unwrap();
        let err = funnel.begin_test(test.id.clone(), TestType::Adhoc).await.unwrap_err();
        assert_eq!(err.kind(), "AlreadyRunning");
    }

    #[tokio::test]
    async fn begin_test_rejects_unknown_worker_group_and_rolls_back() {
        let funnel = funnel();
        let mut jobs = vec![job("j0", 5, 30)];
        jobs.push({
            let mut j = job("j1", 5, 30);
            j.group = Group::new("ghost-group");
            j
        });
        let test = Test::new("t2", jobs, Vec::new()).unwrap();
        funnel.store.add_test(&test).await.unwrap();

        let err = funnel.begin_test(test.id.clone(), TestType::Adhoc).await.unwrap_err();
        assert_eq!(err.kind(), "JobSubmissionFailed");
        assert!(!funnel.ongoing.lock().unwrap().contains(&test.id));
    }

    #[tokio::test]
    async fn stop_test_transitions_running_instances_to_stopped() {
        let funnel = funnel();
        let test = Test::new("t3", vec![job("j0", 5, 30)], Vec::new()).unwrap();
        funnel.store.add_test(&test).await.unwrap();

        let instance_id = funnel.clone().begin_test(test.id.clone(), TestType::Adhoc).await.unwrap();
        funnel.stop_test(test.id.clone()).await.unwrap();

        let instance = funnel.store.get_test_instance(&instance_id).await.unwrap();
        assert_eq!(instance.status, TestStatus::Stopped);

        let err = funnel.stop_test(test.id.clone()).await.unwrap_err();
        assert_eq!(err.kind(), "NotRunning");
    }
}
