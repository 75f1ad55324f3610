//! The narrow orchestrator surface the core consumes (spec.md §6).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::WorkerGroupName;
use crate::Error;

/// The pod deletion propagation policy. The core always deletes with
/// foreground propagation and zero grace period (spec.md §4.2.5,
/// §4.5), so this exists mainly to keep the trait signature explicit
/// about what it asks the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePropagation {
    Foreground,
}

/// A pod spec the core asks the orchestrator to create.
#[derive(Debug, Clone)]
pub struct PodSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

/// What the orchestrator knows about a pod when listing for chaos
/// target selection.
#[derive(Debug, Clone)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
}

/// The orchestrator's resource describing a worker group's image and
/// per-pod capacity (spec.md §6 `GetWorkerGroup`).
#[derive(Debug, Clone)]
pub struct WorkerGroupResource {
    pub image: String,
    pub capacity: u64,
    pub allowed_inactivity_period: u64,
}

/// The container-orchestrator capabilities the core consumes.
/// Concrete implementations wrap a real client (see `KubeOrchestrator`)
/// or fake one out for tests (see `backends::mock::FakeOrchestrator`).
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_pod(&self, spec: PodSpec) -> Result<(), Error>;

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error>;

    async fn list_pods(&self, namespace: &str, label_selector: &HashMap<String, String>) -> Result<Vec<PodInfo>, Error>;

    async fn get_worker_group(&self, namespace: &str, group: &WorkerGroupName) -> Result<WorkerGroupResource, Error>;
}
