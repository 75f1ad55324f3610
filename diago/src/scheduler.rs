//! Top-level registry of pod groups and the Submit/Stop/Register entry
//! points (C4). Grounded on spec.md §4.4.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{event, instrument, Level};

use crate::backends::{MetricsSink, Orchestrator};
use crate::models::{InstanceId, Job, JobId, WorkerGroupName};
use crate::pod_group::{JobEvent, PodGroup};
use crate::Error;

pub struct Scheduler {
    namespace: String,
    leader_host: String,
    leader_port: u16,
    default_per_pod_capacity: u64,
    orchestrator: Arc<dyn Orchestrator>,
    groups: Mutex<HashMap<WorkerGroupName, Arc<PodGroup>>>,
}

impl Scheduler {
    pub fn new(
        namespace: String,
        leader_host: String,
        leader_port: u16,
        default_per_pod_capacity: u64,
        orchestrator: Arc<dyn Orchestrator>,
    ) -> Self {
        Scheduler {
            namespace,
            leader_host,
            leader_port,
            default_per_pod_capacity,
            orchestrator,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Locate or lazily create the pod group for `group`, spawning its
    /// reaper task on first creation. Takes an owned `Arc` so the
    /// reaper task can hold a `'static` handle back to the registry.
    #[instrument(name = "Scheduler::create_pod_group", skip(self), err(Debug))]
    async fn create_pod_group(self: Arc<Self>, group: &WorkerGroupName, strict: bool) -> Result<Arc<PodGroup>, Error> {
        // fast path: the group already exists
        if let Some(existing) = self.groups.lock().unwrap().get(group) {
            return Ok(Arc::clone(existing));
        }

        let pod_group = PodGroup::new(
            group.clone(),
            self.namespace.clone(),
            self.leader_host.clone(),
            self.leader_port,
            self.default_per_pod_capacity,
            Arc::clone(&self.orchestrator),
            strict,
        )
        .await?;

        // idempotent under the mutex: another caller may have raced us
        let mut groups = self.groups.lock().unwrap();
        let pod_group = Arc::clone(groups.entry(group.clone()).or_insert(pod_group));
        drop(groups);

        self.spawn_reaper(group.clone(), Arc::clone(&pod_group));
        Ok(pod_group)
    }

    fn spawn_reaper(self: Arc<Self>, group: WorkerGroupName, pod_group: Arc<PodGroup>) {
        let mut cleanup = pod_group.subscribe_cleanup();
        let scheduler = self;
        tokio::spawn(async move {
            if cleanup.changed().await.is_err() {
                return;
            }
            pod_group.mark_reaped();
            scheduler.groups.lock().unwrap().remove(&group);
            event!(Level::INFO, group = %group, "reaped drained pod group");
        });
    }

    /// `Submit(job)`: strict creation — fails with `UnknownGroup` if
    /// the orchestrator has no resource for `job.Group`.
    #[instrument(name = "Scheduler::submit", skip(self, job), fields(job_id = %job.id, group = %job.group))]
    pub async fn submit(self: Arc<Self>, job: Job) -> Result<tokio::sync::mpsc::Receiver<JobEvent>, Error> {
        let group = job.group.clone();
        let pod_group = self
            .create_pod_group(&group, true)
            .await
            .map_err(|_| Error::UnknownGroup(group.to_string()))?;
        Ok(pod_group.add_job(job).await)
    }

    /// `Register(group, instance, freq)`: non-strict creation, used
    /// when a worker announces itself for a group the leader did not
    /// necessarily spawn (e.g. a pre-warmed fleet).
    #[instrument(name = "Scheduler::register", skip(self, inbound), err(Debug))]
    pub async fn register(
        self: Arc<Self>,
        group: WorkerGroupName,
        instance: InstanceId,
        announced_capacity: u64,
        inbound: tokio::sync::mpsc::Receiver<diago_proto::Message>,
    ) -> Result<tokio::sync::mpsc::Receiver<diago_proto::Message>, Error> {
        let pod_group = self.create_pod_group(&group, false).await?;
        pod_group.register_pod(instance, announced_capacity, inbound).await
    }

    /// `Stop(job)`: locate the owning group and forward `removeJob`.
    #[instrument(name = "Scheduler::stop", skip(self))]
    pub fn stop(&self, group: &WorkerGroupName, job_id: &JobId) -> Result<(), Error> {
        let pod_group = self
            .groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("worker group {group}")))?;
        pod_group.remove_job(job_id);
        Ok(())
    }

    /// Push every live group's capacity and worker-count gauges into
    /// `sink`. Called periodically by the leader binary's exporter
    /// loop, not by anything in the core itself.
    pub fn report_metrics(&self, sink: &dyn MetricsSink) {
        for pod_group in self.groups.lock().unwrap().values() {
            let capacity = pod_group.capacity();
            sink.observe_capacity(pod_group.group(), capacity.cumulative_max(), capacity.current_total_remaining());
            sink.observe_worker_count(pod_group.group(), capacity.instance_count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::FakeOrchestrator;
    use crate::backends::WorkerGroupResource;
    use std::collections::HashMap as Map;

    fn job(group: &str, freq: u64) -> Job {
        Job {
            id: JobId::new("job-0"),
            name: "job".into(),
            group: WorkerGroupName::new(group),
            priority: 0,
            env: Map::new(),
            config: Vec::new(),
            frequency: freq,
            duration: 30,
            http_method: "GET".into(),
            http_url: "http://example.com".into(),
            http_body: String::new(),
        }
    }

    fn scheduler_with(groups: Map<String, WorkerGroupResource>) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            "default".into(),
            "leader".into(),
            5000,
            10,
            Arc::new(FakeOrchestrator::new(groups)),
        ))
    }

    #[tokio::test]
    async fn submit_fails_with_unknown_group_when_orchestrator_has_no_resource() {
        let scheduler = scheduler_with(Map::new());
        let err = scheduler.submit(job("ghost", 10)).await.unwrap_err();
        assert_eq!(err.kind(), "UnknownGroup");
    }

    #[tokio::test]
    async fn submit_lazily_creates_the_pod_group() {
        let mut groups = Map::new();
        groups.insert(
            "load-gen".to_owned(),
            WorkerGroupResource {
                image: "diago-worker:latest".into(),
                capacity: 10,
                allowed_inactivity_period: 60,
            },
        );
        let scheduler = scheduler_with(groups);
        let events = Arc::clone(&scheduler).submit(job("load-gen", 10)).await.unwrap();
        drop(events);
        assert_eq!(scheduler.groups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_on_unknown_group_is_not_found() {
        let scheduler = scheduler_with(Map::new());
        let err = scheduler.stop(&WorkerGroupName::new("ghost"), &JobId::new("job-0")).unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }
}
