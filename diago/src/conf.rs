//! The shared configuration for Diago, loaded from the environment.

use serde::{Deserialize, Serialize};

use crate::Error;

fn default_grpc_port() -> u16 {
    5000
}

fn default_api_port() -> u16 {
    80
}

fn default_prometheus_port() -> u16 {
    2112
}

fn default_group_capacity() -> u64 {
    200
}

fn default_namespace() -> String {
    "default".to_owned()
}

fn default_storage_path() -> String {
    "diago.db".to_owned()
}

fn default_debug() -> bool {
    false
}

/// Configuration for the Diago leader, sourced entirely from
/// `DIAGO_*` environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Conf {
    /// The host the leader's worker-protocol server binds on.
    pub host: String,
    /// The port the worker-protocol gRPC server listens on.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    /// The port the internal API surface would be mounted on by a
    /// caller (not bound by this crate; see SPEC_FULL.md §4.10).
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// The port the Prometheus scrape endpoint listens on.
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
    /// The default per-pod capacity used when a worker group's
    /// resource does not declare its own.
    #[serde(default = "default_group_capacity")]
    pub default_group_capacity: u64,
    /// The default orchestrator namespace for spawned worker pods.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    /// Path to the embedded persistent store's data directory.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Whether to run with debug-level tracing.
    #[serde(default = "default_debug")]
    pub debug: bool,
}

impl Conf {
    /// Load configuration from `DIAGO_*` environment variables.
    ///
    /// Mirrors the teacher's `Conf::new`, layering a `config::
    /// Environment` source over the builder — Diago has no base YAML
    /// file since spec.md §6 specifies env-only configuration.
    pub fn from_env() -> Result<Self, Error> {
        let conf: Conf = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("DIAGO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_host_is_set() {
        std::env::set_var("DIAGO_HOST", "0.0.0.0");
        std::env::remove_var("DIAGO_GRPC_PORT");
        let conf = Conf::from_env().expect("host alone should be sufficient");
        assert_eq!(conf.host, "0.0.0.0");
        assert_eq!(conf.grpc_port, 5000);
        assert_eq!(conf.default_group_capacity, 200);
        assert_eq!(conf.default_namespace, "default");
        std::env::remove_var("DIAGO_HOST");
    }
}
