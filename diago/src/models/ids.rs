//! Opaque string-typed identifiers used throughout the data model.

use std::fmt;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_owned())
            }
        }
    };
}

string_id!(JobId, "Identifies one job within a test.");
string_id!(TestId, "Identifies a test; also the test's unique name.");
string_id!(TestInstanceId, "Identifies one execution of a test.");
string_id!(TestScheduleId, "Identifies a cron-driven test schedule.");
string_id!(ChaosId, "Identifies one chaos instance within a test.");
string_id!(WorkerGroupName, "Names a class of worker pods sharing an image.");

/// Identifies one worker pod in a group. Minted by the leader as a
/// short random hash when spawning a pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Mint a fresh instance id: an 8-character lowercase-alphanumeric
    /// hash, comfortably above the spec's 6-character minimum.
    pub fn generate() -> Self {
        let hash: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        InstanceId(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        InstanceId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_instance_ids_meet_minimum_length() {
        let id = InstanceId::generate();
        assert!(id.as_str().len() >= 6);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_instance_ids_are_distinct() {
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        assert_ne!(a, b);
    }
}
