//! A Kubernetes-backed `Orchestrator`, grounded on
//! `scaler/src/libs/schedulers/k8s.rs`'s `kube`/`k8s-openapi` usage.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec as K8sPodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::Resource;
use tracing::{event, instrument, Level};

use crate::backends::orchestrator::{Orchestrator, PodInfo, PodSpec, WorkerGroupResource};
use crate::models::WorkerGroupName;
use crate::Error;

/// Talks to a single Kubernetes cluster on behalf of the pod group and
/// chaos simulator.
pub struct KubeOrchestrator {
    client: kube::Client,
    /// Known worker-group resources, keyed by group name. A real
    /// deployment would source this from a CRD or ConfigMap; the core
    /// only needs `get_worker_group` to resolve a name to an image and
    /// capacity (spec.md §6), so this table stands in for that lookup
    /// the way the original's `storage map[string]PodConfig` does.
    groups: HashMap<String, WorkerGroupResource>,
}

impl KubeOrchestrator {
    pub async fn new(groups: HashMap<String, WorkerGroupResource>) -> Result<Self, Error> {
        let client = kube::Client::try_default().await?;
        Ok(KubeOrchestrator { client, groups })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    #[instrument(name = "KubeOrchestrator::create_pod", skip(self), err(Debug))]
    async fn create_pod(&self, spec: PodSpec) -> Result<(), Error> {
        let env: Vec<EnvVar> = spec
            .env
            .into_iter()
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                value_from: None,
            })
            .collect();
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(spec.name.clone()),
                namespace: Some(spec.namespace.clone()),
                labels: Some(spec.labels.into_iter().collect()),
                ..Default::default()
            },
            spec: Some(K8sPodSpec {
                containers: vec![Container {
                    name: spec.name.clone(),
                    image: Some(spec.image),
                    env: Some(env),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_owned()),
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            status: None,
        };
        self.pods(&spec.namespace)
            .create(&PostParams::default(), &pod)
            .await?;
        event!(Level::INFO, pod = %spec.name, namespace = %spec.namespace, "created pod");
        Ok(())
    }

    #[instrument(name = "KubeOrchestrator::delete_pod", skip(self), err(Debug))]
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            grace_period_seconds: Some(0),
            ..Default::default()
        };
        match self.pods(namespace).delete(name, &params).await {
            Ok(_) => {
                event!(Level::INFO, pod = %name, namespace = %namespace, "deleted pod");
                Ok(())
            }
            // the pod may already be gone; log and continue (spec.md §4.2.5)
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                event!(Level::WARN, pod = %name, namespace = %namespace, "pod already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(name = "KubeOrchestrator::list_pods", skip(self, label_selector), err(Debug))]
    async fn list_pods(&self, namespace: &str, label_selector: &HashMap<String, String>) -> Result<Vec<PodInfo>, Error> {
        let selector = label_selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let params = ListParams::default().labels(&selector);
        let list = self.pods(namespace).list(&params).await?;
        let pods = list
            .into_iter()
            .map(|pod| PodInfo {
                name: pod.meta().name.clone().unwrap_or_default(),
                namespace: pod.meta().namespace.clone().unwrap_or_default(),
                labels: pod.meta().labels.clone().unwrap_or_default().into_iter().collect(),
            })
            .collect();
        Ok(pods)
    }

    async fn get_worker_group(&self, _namespace: &str, group: &WorkerGroupName) -> Result<WorkerGroupResource, Error> {
        self.groups
            .get(group.as_str())
            .cloned()
            .ok_or_else(|| Error::GroupMissing(group.to_string()))
    }
}
