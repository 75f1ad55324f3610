//! Delayed pod deletion under selectors, with cooperative cancellation
//! and an at-most-one-simulation-per-pod invariant (C5).
//!
//! Grounded on spec.md §4.5. The "pod currently in a simulation" set
//! is the only piece of cross-call state; everything else (the
//! per-simulation stop signal, the error channel) is scoped to one
//! `simulate` call, mirroring the teacher's `watch`-based cleanup
//! signal in `pod_group.rs`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{event, instrument, Level};

use crate::backends::{Orchestrator, PodInfo};
use crate::models::{ChaosId, ChaosInstance, TestId};
use crate::Error;

fn sim_key(pod: &str, namespace: &str) -> String {
    format!("{pod}-{namespace}")
}

/// Runs chaos simulations for every `JobFunnel` in the process. One
/// instance is shared across all tests, since the "pod in simulation"
/// invariant spec.md §4.5 asks for is global, not per-test.
pub struct ChaosSimulator {
    orchestrator: Arc<dyn Orchestrator>,
    in_simulation: Mutex<HashSet<String>>,
    stops: Mutex<HashMap<(TestId, ChaosId), watch::Sender<bool>>>,
}

impl ChaosSimulator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        ChaosSimulator {
            orchestrator,
            in_simulation: Mutex::new(HashSet::new()),
            stops: Mutex::new(HashMap::new()),
        }
    }

    /// `Simulate(testID, instance, testDuration)`. Takes an owned
    /// `Arc` because the aggregating task spawned here holds a
    /// `'static` handle back to `self` to run pod deletions.
    #[instrument(name = "ChaosSimulator::simulate", skip(self, instance), fields(test_id = %test_id, chaos_id = %instance.id), err(Debug))]
    pub async fn simulate(
        self: Arc<Self>,
        test_id: TestId,
        instance: ChaosInstance,
        test_duration: u64,
    ) -> Result<(mpsc::Receiver<Error>, Vec<String>), Error> {
        if test_duration <= instance.timeout {
            return Err(Error::InvalidDuration(format!(
                "pod time of death is after end of test: timeout {} >= test duration {test_duration}",
                instance.timeout
            )));
        }

        let candidates = self
            .orchestrator
            .list_pods(&instance.namespace, &instance.selectors)
            .await?;
        if candidates.is_empty() {
            return Err(Error::NoCandidates(format!(
                "no pods match selectors in namespace {}",
                instance.namespace
            )));
        }

        let selected = {
            let mut in_simulation = self.in_simulation.lock().unwrap();
            let free: Vec<&PodInfo> = candidates
                .iter()
                .filter(|p| !in_simulation.contains(&sim_key(&p.name, &p.namespace)))
                .collect();
            if free.len() < instance.count {
                return Err(Error::InsufficientCandidates(format!(
                    "chaos instance {} needs {} free pods, only {} available",
                    instance.id,
                    instance.count,
                    free.len()
                )));
            }
            let selected: Vec<PodInfo> = free.into_iter().take(instance.count).cloned().collect();
            for pod in &selected {
                in_simulation.insert(sim_key(&pod.name, &pod.namespace));
            }
            selected
        };

        let (stop_tx, _) = watch::channel(false);
        self.stops
            .lock()
            .unwrap()
            .insert((test_id.clone(), instance.id.clone()), stop_tx.clone());

        let (err_tx, err_rx) = mpsc::channel(selected.len().max(1));
        let selected_names: Vec<String> = selected.iter().map(|p| p.name.clone()).collect();
        let timeout = instance.timeout;
        let key = (test_id, instance.id);
        let simulator = self;

        // Subscribe every per-pod receiver before returning to the
        // caller, so a `stop()` issued the instant `simulate` returns
        // can never race a task's own late subscription.
        let pods_with_stops: Vec<(PodInfo, watch::Receiver<bool>)> =
            selected.into_iter().map(|pod| (pod, stop_tx.subscribe())).collect();

        tokio::spawn(async move {
            let mut tasks = Vec::with_capacity(pods_with_stops.len());
            for (pod, mut stop_rx) in pods_with_stops {
                let simulator = Arc::clone(&simulator);
                let err_tx = err_tx.clone();
                tasks.push(tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(timeout)) => {
                            if let Err(e) = simulator.orchestrator.delete_pod(&pod.name, &pod.namespace).await {
                                event!(Level::WARN, pod = %pod.name, error = %e, "chaos deletion failed");
                                let _ = err_tx.send(e).await;
                            }
                        }
                        _ = stop_rx.changed() => {
                            event!(Level::INFO, pod = %pod.name, "chaos deletion cancelled");
                        }
                    }
                    simulator
                        .in_simulation
                        .lock()
                        .unwrap()
                        .remove(&sim_key(&pod.name, &pod.namespace));
                }));
            }
            for task in tasks {
                let _ = task.await;
            }
            simulator.stops.lock().unwrap().remove(&key);
        });

        Ok((err_rx, selected_names))
    }

    /// `Stop(testID, chaosID)`: idempotent — a missing or already
    /// finished simulation is silently ignored.
    pub fn stop(&self, test_id: &TestId, chaos_id: &ChaosId) {
        if let Some(tx) = self
            .stops
            .lock()
            .unwrap()
            .get(&(test_id.clone(), chaos_id.clone()))
        {
            let _ = tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::FakeOrchestrator;
    use std::collections::HashMap as Map;

    fn instance(count: usize, timeout: u64) -> ChaosInstance {
        let mut selectors = Map::new();
        selectors.insert("app".to_owned(), "load-gen".to_owned());
        ChaosInstance {
            id: ChaosId::new("t1-0"),
            namespace: "default".into(),
            selectors,
            timeout,
            count,
        }
    }

    fn orchestrator_with_pods(names: &[&str]) -> Arc<FakeOrchestrator> {
        let orchestrator = Arc::new(FakeOrchestrator::new(Map::new()));
        for name in names {
            orchestrator.seed_pod(name, "default", [("app".to_owned(), "load-gen".to_owned())].into());
        }
        orchestrator
    }

    #[tokio::test]
    async fn rejects_duration_not_longer_than_timeout() {
        let sim = Arc::new(ChaosSimulator::new(orchestrator_with_pods(&["pod-a"])));
        let err = sim.simulate(TestId::new("t1"), instance(1, 10), 10).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidDuration");
    }

    #[tokio::test]
    async fn rejects_when_no_pods_match_selectors() {
        let sim = Arc::new(ChaosSimulator::new(orchestrator_with_pods(&[])));
        let err = sim.simulate(TestId::new("t1"), instance(1, 1), 10).await.unwrap_err();
        assert_eq!(err.kind(), "NoCandidates");
    }

    #[tokio::test]
    async fn rejects_when_fewer_free_candidates_than_requested() {
        let sim = Arc::new(ChaosSimulator::new(orchestrator_with_pods(&["pod-a"])));
        let err = sim.simulate(TestId::new("t1"), instance(2, 1), 10).await.unwrap_err();
        assert_eq!(err.kind(), "InsufficientCandidates");
    }

    #[tokio::test]
    async fn a_pod_already_in_simulation_is_not_selected_twice() {
        let sim = Arc::new(ChaosSimulator::new(orchestrator_with_pods(&["pod-a"])));
        let (_rx, selected) = Arc::clone(&sim).simulate(TestId::new("t1"), instance(1, 60), 120).await.unwrap();
        assert_eq!(selected, vec!["pod-a".to_owned()]);

        let err = sim.simulate(TestId::new("t2"), instance(1, 1), 10).await.unwrap_err();
        assert_eq!(err.kind(), "InsufficientCandidates");
    }

    #[tokio::test]
    async fn stop_cancels_pending_deletion_and_the_pod_is_not_deleted() {
        let orchestrator = orchestrator_with_pods(&["pod-a"]);
        let sim = Arc::new(ChaosSimulator::new(Arc::clone(&orchestrator) as Arc<dyn Orchestrator>));
        let chaos_id = ChaosId::new("t1-0");
        let test_id = TestId::new("t1");
        let (mut err_rx, _selected) = Arc::clone(&sim)
            .simulate(test_id.clone(), instance(1, 5), 60)
            .await
            .unwrap();
        sim.stop(&test_id, &chaos_id);
        assert!(err_rx.recv().await.is_none());
        assert!(!orchestrator.was_deleted("pod-a", "default"));
    }
}
