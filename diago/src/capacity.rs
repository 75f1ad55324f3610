//! Per worker-group ledger of max/remaining capacity (C1).
//!
//! Grounded on the original `internal/scheduler.CapacityManager`
//! (`original_source/internal/scheduler/`), restated against
//! spec.md §4.1: a single mutex guards all bookkeeping, and every
//! operation except `get_pod_assignment` is O(1).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{InstanceId, JobId, WorkerGroupName};
use crate::Error;

struct State {
    instance_count: u64,
    cumulative_max: u64,
    max: HashMap<InstanceId, u64>,
    remaining: HashMap<InstanceId, u64>,
    distribution: HashMap<InstanceId, HashMap<JobId, u64>>,
}

/// Authoritative capacity ledger for one worker group.
pub struct CapacityManager {
    group: WorkerGroupName,
    default_per_pod_capacity: u64,
    state: Mutex<State>,
}

impl CapacityManager {
    pub fn new(group: WorkerGroupName, default_per_pod_capacity: u64) -> Self {
        CapacityManager {
            group,
            default_per_pod_capacity,
            state: Mutex::new(State {
                instance_count: 0,
                cumulative_max: 0,
                max: HashMap::new(),
                remaining: HashMap::new(),
                distribution: HashMap::new(),
            }),
        }
    }

    pub fn group(&self) -> &WorkerGroupName {
        &self.group
    }

    /// How many new workers are needed to cover `freq` beyond what is
    /// already provisioned. `None` means the existing fleet already
    /// covers it (spec.md's `AlreadySufficient`, treated here as "no
    /// spawn needed" rather than an error).
    pub fn instances_needed(&self, freq: u64) -> Option<u64> {
        let state = self.state.lock().unwrap();
        let deficit = freq.saturating_sub(state.cumulative_max);
        if deficit == 0 {
            return None;
        }
        let count = deficit.div_ceil(self.default_per_pod_capacity.max(1));
        Some(count)
    }

    /// Register a freshly spawned/registered worker's announced
    /// capacity. Errors if `id` is already known.
    pub fn add_instance(&self, id: InstanceId, capacity: u64) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.max.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("instance {id}")));
        }
        state.max.insert(id.clone(), capacity);
        state.remaining.insert(id.clone(), capacity);
        state.distribution.insert(id, HashMap::new());
        state.cumulative_max += capacity;
        state.instance_count += 1;
        Ok(())
    }

    /// Delete all bookkeeping for a worker that has disconnected or
    /// been reaped.
    pub fn remove_instance(&self, id: &InstanceId) {
        let mut state = self.state.lock().unwrap();
        if let Some(max) = state.max.remove(id) {
            state.cumulative_max -= max;
            state.instance_count -= 1;
        }
        state.remaining.remove(id);
        state.distribution.remove(id);
    }

    /// Assign up to `required` of `id`'s remaining capacity to `job`.
    /// Returns `(assigned, still_required)`.
    pub fn assign_capacity(&self, id: &InstanceId, job: JobId, required: u64) -> Result<(u64, u64), Error> {
        let mut state = self.state.lock().unwrap();
        let remaining = *state
            .remaining
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("instance {id}")))?;
        {
            let dist = state
                .distribution
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("instance {id}")))?;
            if dist.contains_key(&job) {
                return Err(Error::AlreadyExists(format!("assignment for instance {id} job {job}")));
            }
        }
        let assigned = required.min(remaining);
        *state.remaining.get_mut(id).unwrap() -= assigned;
        state.distribution.get_mut(id).unwrap().insert(job, assigned);
        Ok((assigned, required - assigned))
    }

    /// Return the capacity assigned to `(id, job)` back to `remaining`.
    pub fn reclaim_capacity(&self, id: &InstanceId, job: &JobId) -> Result<u64, Error> {
        let mut state = self.state.lock().unwrap();
        let dist = state
            .distribution
            .get_mut(id)
            .ok_or_else(|| Error::NotAssigned {
                instance: id.to_string(),
                job: job.to_string(),
            })?;
        let reclaimed = dist.remove(job).ok_or_else(|| Error::NotAssigned {
            instance: id.to_string(),
            job: job.to_string(),
        })?;
        *state.remaining.get_mut(id).unwrap() += reclaimed;
        Ok(reclaimed)
    }

    /// All jobs with a non-zero assignment on `id`, used when a worker
    /// disconnects to find which jobs it was implicitly finishing.
    pub fn jobs_assigned_to(&self, id: &InstanceId) -> Vec<JobId> {
        let state = self.state.lock().unwrap();
        state
            .distribution
            .get(id)
            .map(|dist| dist.iter().filter(|(_, &n)| n > 0).map(|(job, _)| job.clone()).collect())
            .unwrap_or_default()
    }

    /// All pods with a non-zero assignment for `job`. O(instances).
    pub fn get_pod_assignment(&self, job: &JobId) -> Vec<InstanceId> {
        let state = self.state.lock().unwrap();
        state
            .distribution
            .iter()
            .filter(|(_, dist)| dist.get(job).is_some_and(|&n| n > 0))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sum of remaining capacity across every registered instance.
    pub fn current_total_remaining(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.remaining.values().sum()
    }

    pub fn cumulative_max(&self) -> u64 {
        self.state.lock().unwrap().cumulative_max
    }

    pub fn instance_count(&self) -> u64 {
        self.state.lock().unwrap().instance_count
    }

    #[cfg(test)]
    fn max_of(&self, id: &InstanceId) -> Option<u64> {
        self.state.lock().unwrap().max.get(id).copied()
    }

    #[cfg(test)]
    fn remaining_of(&self, id: &InstanceId) -> Option<u64> {
        self.state.lock().unwrap().remaining.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> WorkerGroupName {
        WorkerGroupName::new("load-gen")
    }

    #[test]
    fn calculate_instance_count_rounds_up() {
        let cm = CapacityManager::new(group(), 10);
        assert_eq!(cm.instances_needed(15), Some(2));
        assert_eq!(cm.instances_needed(10), Some(1));
        assert_eq!(cm.instances_needed(0), None);
    }

    #[test]
    fn freq_equal_to_cumulative_max_spawns_nothing() {
        let cm = CapacityManager::new(group(), 10);
        cm.add_instance(InstanceId::from("a".to_owned()), 10).unwrap();
        assert_eq!(cm.instances_needed(10), None);
    }

    #[test]
    fn add_then_remove_instance_round_trips() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        assert_eq!(cm.cumulative_max(), 10);
        cm.remove_instance(&id);
        assert_eq!(cm.cumulative_max(), 0);
        assert_eq!(cm.instance_count(), 0);
        assert!(cm.max_of(&id).is_none());
    }

    #[test]
    fn add_instance_twice_is_rejected() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        let err = cm.add_instance(id, 10).unwrap_err();
        assert_eq!(err.kind(), "AlreadyExists");
    }

    #[test]
    fn assign_then_reclaim_restores_remaining() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        let job = JobId::new("job-0");
        let (assigned, still_required) = cm.assign_capacity(&id, job.clone(), 6).unwrap();
        assert_eq!(assigned, 6);
        assert_eq!(still_required, 0);
        assert_eq!(cm.remaining_of(&id), Some(4));
        let reclaimed = cm.reclaim_capacity(&id, &job).unwrap();
        assert_eq!(reclaimed, 6);
        assert_eq!(cm.remaining_of(&id), Some(10));
    }

    #[test]
    fn assign_capacity_partially_satisfies_when_remaining_is_short() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        let (assigned, still_required) = cm.assign_capacity(&id, JobId::new("job-0"), 15).unwrap();
        assert_eq!(assigned, 10);
        assert_eq!(still_required, 5);
    }

    #[test]
    fn double_assignment_of_the_same_instance_job_pair_is_rejected() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        let job = JobId::new("job-0");
        cm.assign_capacity(&id, job.clone(), 3).unwrap();
        let err = cm.assign_capacity(&id, job, 3).unwrap_err();
        assert_eq!(err.kind(), "AlreadyExists");
    }

    #[test]
    fn reclaim_without_assignment_is_not_assigned() {
        let cm = CapacityManager::new(group(), 10);
        let id = InstanceId::from("a".to_owned());
        cm.add_instance(id.clone(), 10).unwrap();
        let err = cm.reclaim_capacity(&id, &JobId::new("job-0")).unwrap_err();
        assert_eq!(err.kind(), "NotAssigned");
    }

    #[test]
    fn get_pod_assignment_finds_every_instance_with_nonzero_share() {
        let cm = CapacityManager::new(group(), 10);
        let a = InstanceId::from("a".to_owned());
        let b = InstanceId::from("b".to_owned());
        cm.add_instance(a.clone(), 10).unwrap();
        cm.add_instance(b.clone(), 10).unwrap();
        let job = JobId::new("job-0");
        cm.assign_capacity(&a, job.clone(), 4).unwrap();
        cm.assign_capacity(&b, job.clone(), 0).unwrap();
        let assigned = cm.get_pod_assignment(&job);
        assert_eq!(assigned, vec![a]);
    }
}
