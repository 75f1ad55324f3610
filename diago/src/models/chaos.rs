//! A parameterised pod-killing action associated with a test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::ChaosId;
use crate::Error;

/// After the test starts, wait `timeout` seconds, then delete up to
/// `count` pods matching `selectors` in `namespace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosInstance {
    pub id: ChaosId,
    pub namespace: String,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    /// Seconds to wait after test start before deleting pods.
    pub timeout: u64,
    /// Number of pods to delete.
    pub count: usize,
}

impl ChaosInstance {
    pub fn validate(&self) -> Result<(), Error> {
        if self.count < 1 {
            return Err(Error::Validation(format!(
                "validation failed at ChaosInstance.Count: expected >= 1, got {}",
                self.count
            )));
        }
        Ok(())
    }
}

/// The outcome of one chaos instance's simulation, recorded on the
/// owning `TestInstance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosResult {
    pub status: ChaosStatus,
    #[serde(default)]
    pub deleted_pods: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosStatus {
    Success,
    Failed,
}

impl ChaosResult {
    pub fn failed(error: impl Into<String>) -> Self {
        ChaosResult {
            status: ChaosStatus::Failed,
            deleted_pods: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn success(deleted_pods: Vec<String>) -> Self {
        ChaosResult {
            status: ChaosStatus::Success,
            deleted_pods,
            error: None,
        }
    }
}
