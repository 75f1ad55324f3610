//! Worker lifecycle for one worker group: spawn, register, dispatch,
//! reap (C2). Grounded on spec.md §4.2; the hardest subsystem in the
//! core.
//!
//! Two distinct mutexes guard state, per spec.md §5's lock ordering:
//! `workers` (the "pod" lock) is always acquired before `queue` (the
//! "queue" lock) when both are needed together.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use diago_proto::{message, HttpRequest, Message as WireMessage, Metrics as WireMetrics};
use tokio::sync::{mpsc, watch};
use tracing::{event, instrument, Level};

use crate::backends::{Orchestrator, PodSpec};
use crate::capacity::CapacityManager;
use crate::models::{InstanceId, Job, JobId, WorkerGroupName};
use crate::Error;

/// One event surfaced on a job's event channel, read by the funnel's
/// per-job consumer task.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The aggregate dispatch for this job has been issued; carries
    /// the actually-dispatched frequency (may be less than requested
    /// under partial dispatch, spec.md §4.2.7).
    Start { dispatched_frequency: u64 },
    /// One observed request outcome, forwarded from a worker.
    Metrics(WireMetrics),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodGroupState {
    Active,
    Draining,
    Reaped,
}

struct QueueState {
    queue: VecDeque<Job>,
    job_channels: HashMap<JobId, mpsc::Sender<JobEvent>>,
    workload_count: HashMap<JobId, u64>,
}

/// Leader-side runtime state tracking one worker group.
pub struct PodGroup {
    group: WorkerGroupName,
    namespace: String,
    leader_host: String,
    leader_port: u16,
    capacity: CapacityManager,
    orchestrator: Arc<dyn Orchestrator>,
    workers: Mutex<HashMap<InstanceId, mpsc::Sender<WireMessage>>>,
    queue: Mutex<QueueState>,
    has_ever_registered: AtomicBool,
    reaped: AtomicBool,
    cleanup_tx: watch::Sender<bool>,
    _cleanup_rx: watch::Receiver<bool>,
}

impl PodGroup {
    /// Construct a new pod group for `group`. In strict mode (used by
    /// `Scheduler::submit`) the orchestrator must already know the
    /// worker group's resource, or this fails with `GroupMissing`.
    #[instrument(name = "PodGroup::new", skip(orchestrator), err(Debug))]
    pub async fn new(
        group: WorkerGroupName,
        namespace: String,
        leader_host: String,
        leader_port: u16,
        default_per_pod_capacity: u64,
        orchestrator: Arc<dyn Orchestrator>,
        strict: bool,
    ) -> Result<Arc<Self>, Error> {
        if strict {
            orchestrator
                .get_worker_group(&namespace, &group)
                .await
                .map_err(|_| Error::GroupMissing(group.to_string()))?;
        }
        let (cleanup_tx, cleanup_rx) = watch::channel(false);
        Ok(Arc::new(PodGroup {
            capacity: CapacityManager::new(group.clone(), default_per_pod_capacity),
            group,
            namespace,
            leader_host,
            leader_port,
            orchestrator,
            workers: Mutex::new(HashMap::new()),
            queue: Mutex::new(QueueState {
                queue: VecDeque::new(),
                job_channels: HashMap::new(),
                workload_count: HashMap::new(),
            }),
            has_ever_registered: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
            cleanup_tx,
            _cleanup_rx: cleanup_rx,
        }))
    }

    pub fn group(&self) -> &WorkerGroupName {
        &self.group
    }

    pub fn capacity(&self) -> &CapacityManager {
        &self.capacity
    }

    pub fn state(&self) -> PodGroupState {
        if self.reaped.load(Ordering::Acquire) {
            return PodGroupState::Reaped;
        }
        let drained = self.workers.lock().unwrap().is_empty();
        if drained && self.has_ever_registered.load(Ordering::Acquire) {
            PodGroupState::Draining
        } else {
            PodGroupState::Active
        }
    }

    /// A fresh receiver that resolves once this group has drained
    /// (transitioned `Active` → `Draining`). Used by the scheduler's
    /// reaper task.
    pub fn subscribe_cleanup(&self) -> watch::Receiver<bool> {
        self._cleanup_rx.clone()
    }

    pub fn mark_reaped(&self) {
        self.reaped.store(true, Ordering::Release);
    }

    /// Queue `job`, request new workers if the existing fleet falls
    /// short, and attempt dispatch. Takes an owned `Arc` since spawning
    /// the background spawn-request task needs a `'static` handle.
    #[instrument(name = "PodGroup::add_job", skip(self, job), fields(job_id = %job.id))]
    pub async fn add_job(self: Arc<Self>, job: Job) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(2);
        {
            let mut queue = self.queue.lock().unwrap();
            queue.job_channels.insert(job.id.clone(), tx);
            queue.queue.push_back(job.clone());
        }
        Arc::clone(&self).request_spawn(job.frequency);
        self.distribute();
        rx
    }

    /// Send `Stop` to every worker currently holding capacity for
    /// `job_id`. Workers respond with `Finish`, which reclaims capacity
    /// normally.
    #[instrument(name = "PodGroup::remove_job", skip(self))]
    pub fn remove_job(&self, job_id: &JobId) {
        let pods = self.capacity.get_pod_assignment(job_id);
        let workers = self.workers.lock().unwrap();
        for instance in pods {
            if let Some(outbound) = workers.get(&instance) {
                let msg = WireMessage::stop(job_id.to_string());
                if let Err(e) = outbound.try_send(msg) {
                    event!(Level::WARN, instance = %instance, job = %job_id, error = %e, "dropping Stop: outbound channel full or closed");
                }
            }
        }
    }

    /// Admit a freshly registered worker. Returns the receiving half of
    /// its outbound channel, which the gRPC handler forwards onto the
    /// worker's stream. `inbound` carries messages received from the
    /// worker; this spawns the router task that consumes it.
    #[instrument(name = "PodGroup::register_pod", skip(self, inbound), err(Debug))]
    pub async fn register_pod(
        self: Arc<Self>,
        instance: InstanceId,
        announced_capacity: u64,
        mut inbound: mpsc::Receiver<WireMessage>,
    ) -> Result<mpsc::Receiver<WireMessage>, Error> {
        let (outbound_tx, outbound_rx) = mpsc::channel(2);
        self.capacity.add_instance(instance.clone(), announced_capacity)?;
        self.has_ever_registered.store(true, Ordering::Release);
        self.workers.lock().unwrap().insert(instance.clone(), outbound_tx);
        self.distribute();

        let router_instance = instance.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                self.route_message(&router_instance, msg);
            }
            self.remove_instance(&router_instance).await;
        });
        Ok(outbound_rx)
    }

    /// §4.2.4: dispatch one incoming message from a worker's inbound
    /// channel.
    fn route_message(&self, instance: &InstanceId, msg: WireMessage) {
        let Some(payload) = msg.payload else {
            event!(Level::WARN, instance = %instance, "discarding empty message from worker");
            return;
        };
        match payload {
            message::Payload::Finish(finish) => {
                let job_id = JobId::new(finish.job_id);
                self.on_finish(instance, &job_id);
                self.distribute();
            }
            message::Payload::Metrics(metrics) => {
                let job_id = JobId::new(metrics.job_id.clone());
                let queue = self.queue.lock().unwrap();
                if let Some(ch) = queue.job_channels.get(&job_id) {
                    if let Err(e) = ch.try_send(JobEvent::Metrics(metrics)) {
                        event!(Level::WARN, job = %job_id, error = %e, "discarding metrics: job event channel full or closed");
                    }
                } else {
                    event!(Level::WARN, job = %job_id, "discarding metrics: job already terminated");
                }
            }
            other => {
                event!(Level::WARN, instance = %instance, kind = other.kind(), "unexpected payload from worker; ignoring");
            }
        }
    }

    /// Reclaim capacity for `(instance, job)` and decrement the job's
    /// outstanding worker count, closing its channel if this was the
    /// last outstanding worker.
    fn on_finish(&self, instance: &InstanceId, job_id: &JobId) {
        if let Err(e) = self.capacity.reclaim_capacity(instance, job_id) {
            event!(Level::WARN, instance = %instance, job = %job_id, error = %e, "reclaim_capacity failed");
        }
        self.decrement_workload(job_id);
    }

    fn decrement_workload(&self, job_id: &JobId) {
        let mut queue = self.queue.lock().unwrap();
        if let Some(count) = queue.workload_count.get_mut(job_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                queue.workload_count.remove(job_id);
                // dropping the sender closes the channel for the funnel's consumer
                queue.job_channels.remove(job_id);
            }
        }
    }

    /// §4.2.5: a worker's router exited (stream closed or errored).
    /// Every job it was holding capacity for is counted as implicitly
    /// finishing (spec.md §4.3).
    #[instrument(name = "PodGroup::remove_instance", skip(self))]
    async fn remove_instance(&self, instance: &InstanceId) {
        let jobs = self.capacity.jobs_assigned_to(instance);
        self.workers.lock().unwrap().remove(instance);
        self.capacity.remove_instance(instance);

        let drained = self.workers.lock().unwrap().is_empty();
        if drained {
            let _ = self.cleanup_tx.send(true);
        }

        for job_id in &jobs {
            self.decrement_workload(job_id);
        }
        self.distribute();

        let pod_name = format!("{}-{}", self.group, instance);
        if let Err(e) = self.orchestrator.delete_pod(&pod_name, &self.namespace).await {
            event!(Level::WARN, pod = %pod_name, error = %e, "failed to delete pod; it may already be gone");
        }
    }

    /// §4.2.6: ask the capacity manager how many new workers `freq`
    /// requires and spawn them in the background. A no-op if the
    /// existing fleet already covers `freq`. Takes an owned `Arc`
    /// purely so the spawned task can hold a `'static` handle.
    fn request_spawn(self: Arc<Self>, freq: u64) {
        let Some(count) = self.capacity.instances_needed(freq) else {
            return;
        };
        tokio::spawn(async move { self.add_instances(count).await });
    }

    #[instrument(name = "PodGroup::add_instances", skip(self), fields(group = %self.group))]
    async fn add_instances(&self, count: u64) {
        let resource = match self.orchestrator.get_worker_group(&self.namespace, &self.group).await {
            Ok(resource) => resource,
            Err(e) => {
                event!(Level::WARN, error = %e, "failed to resolve worker group resource; not spawning");
                return;
            }
        };

        let mut tasks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let instance = InstanceId::generate();
            let mut env = HashMap::new();
            env.insert("DIAGO_LEADER_HOST".to_owned(), self.leader_host.clone());
            env.insert("DIAGO_LEADER_PORT".to_owned(), self.leader_port.to_string());
            env.insert("DIAGO_GROUP".to_owned(), self.group.to_string());
            env.insert("DIAGO_INSTANCE".to_owned(), instance.to_string());
            env.insert(
                "DIAGO_ALLOWED_INACTIVITY_PERIOD".to_owned(),
                resource.allowed_inactivity_period.to_string(),
            );
            let mut labels = HashMap::new();
            labels.insert("group".to_owned(), self.group.to_string());
            labels.insert("instance".to_owned(), instance.to_string());
            let spec = PodSpec {
                name: format!("{}-{}", self.group, instance),
                namespace: self.namespace.clone(),
                image: resource.image.clone(),
                env,
                labels,
            };
            let orchestrator = Arc::clone(&self.orchestrator);
            tasks.push(tokio::spawn(async move { orchestrator.create_pod(spec).await }));
        }

        // partial spawn is tolerated; each failure is logged, not propagated (spec.md §4.2.6)
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => event!(Level::WARN, error = %e, "failed to create worker pod"),
                Err(e) => event!(Level::WARN, error = %e, "spawn task for worker pod panicked"),
            }
        }
    }

    /// §4.2.3: dispatch at most one job per call. The pod lock is
    /// always acquired before the queue lock.
    fn distribute(&self) {
        let workers = self.workers.lock().unwrap();
        let mut queue = self.queue.lock().unwrap();

        let Some(job) = queue.queue.front().cloned() else {
            return;
        };
        if job.frequency > self.capacity.current_total_remaining() {
            return;
        }
        queue.queue.pop_front();

        let mut need = job.frequency;
        for (instance, outbound) in workers.iter() {
            if need == 0 {
                break;
            }
            let (assigned, still_required) = match self.capacity.assign_capacity(instance, job.id.clone(), need) {
                Ok(v) => v,
                Err(e) => {
                    event!(Level::WARN, instance = %instance, job = %job.id, error = %e, "assign_capacity failed");
                    continue;
                }
            };
            need = still_required;
            if assigned == 0 {
                continue;
            }
            *queue.workload_count.entry(job.id.clone()).or_insert(0) += 1;
            let request = HttpRequest {
                method: job.http_method.clone(),
                url: job.http_url.clone(),
                body: job.http_body.clone().into_bytes(),
            };
            let msg = WireMessage::start(job.id.to_string(), assigned, job.duration, request);
            if let Err(e) = outbound.try_send(msg) {
                event!(Level::WARN, instance = %instance, job = %job.id, error = %e, "dropping Start: outbound channel full or closed");
            }
        }

        let dispatched = job.frequency - need;
        if let Some(ch) = queue.job_channels.get(&job.id) {
            if let Err(e) = ch.try_send(JobEvent::Start {
                dispatched_frequency: dispatched,
            }) {
                event!(Level::WARN, job = %job.id, error = %e, "dropping Start event: job event channel full or closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::FakeOrchestrator;
    use crate::backends::WorkerGroupResource;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn job(id: &str, freq: u64) -> Job {
        Job {
            id: JobId::new(id),
            name: "job".into(),
            group: WorkerGroupName::new("load-gen"),
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

    fn orchestrator() -> Arc<FakeOrchestrator> {
        let mut groups = Map::new();
        groups.insert(
            "load-gen".to_owned(),
            WorkerGroupResource {
                image: "diago-worker:latest".into(),
                capacity: 10,
                allowed_inactivity_period: 60,
            },
        );
        Arc::new(FakeOrchestrator::new(groups))
    }

    async fn group(orchestrator: Arc<FakeOrchestrator>) -> Arc<PodGroup> {
        PodGroup::new(
            WorkerGroupName::new("load-gen"),
            "default".into(),
            "leader".into(),
            5000,
            10,
            orchestrator,
            true,
        )
        .await
        .unwrap()
    }

    async fn register(group: &Arc<PodGroup>, instance: &str, capacity: u64) -> mpsc::Receiver<WireMessage> {
        let (_inbound_tx, inbound_rx) = mpsc::channel(4);
        Arc::clone(group)
            .register_pod(InstanceId::from(instance.to_owned()), capacity, inbound_rx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn basic_dispatch_splits_across_two_workers() {
        let orchestrator = orchestrator();
        let group = group(orchestrator.clone()).await;
        let mut events = Arc::clone(&group).add_job(job("job-a", 15)).await;

        let mut w1 = register(&group, "w1", 10).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), w1.recv()).await.is_err());
        let mut w2 = register(&group, "w2", 10).await;

        let start1 = w1.recv().await.unwrap();
        let start2 = w2.recv().await.unwrap();
        let freq = |m: &WireMessage| match m.payload.as_ref().unwrap() {
            message::Payload::Start(s) => s.frequency,
            _ => panic!("expected Start"),
        };
        assert_eq!(freq(&start1) + freq(&start2), 15);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, JobEvent::Start { dispatched_frequency: 15 }));
    }

    #[tokio::test]
    async fn sequential_queueing_dispatches_job_b_after_job_a_finishes() {
        let orchestrator = orchestrator();
        let group = group(orchestrator.clone()).await;
        let mut outbound = register(&group, "w1", 10).await;

        let mut events_a = Arc::clone(&group).add_job(job("job-a", 6)).await;
        let start_a = outbound.recv().await.unwrap();
        assert!(matches!(start_a.payload, Some(message::Payload::Start(_))));
        assert!(matches!(events_a.recv().await.unwrap(), JobEvent::Start { dispatched_frequency: 6 }));

        let mut events_b = Arc::clone(&group).add_job(job("job-b", 5)).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), outbound.recv()).await.is_err());

        // simulate worker finishing job A over its inbound channel
        group.route_message(&InstanceId::from("w1".to_owned()), WireMessage::finish("job-a"));

        let start_b = outbound.recv().await.unwrap();
        assert!(matches!(start_b.payload, Some(message::Payload::Start(_))));
        assert!(matches!(events_b.recv().await.unwrap(), JobEvent::Start { dispatched_frequency: 5 }));
    }

    #[tokio::test]
    async fn empty_queue_distribute_is_a_noop() {
        let orchestrator = orchestrator();
        let group = group(orchestrator).await;
        group.distribute();
    }
}
