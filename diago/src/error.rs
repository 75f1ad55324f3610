//! The error type for the Diago control plane core.

use std::fmt;

/// An error produced by the Diago scheduling/dispatch core.
///
/// Mirrors the error-kind table in the design spec: each surfaced kind
/// is its own variant rather than a single opaque string, so callers
/// can match on `Error::kind()` the way the HTTP layer would map a
/// kind to a status code.
#[derive(Debug)]
pub enum Error {
    /// `Scheduler::submit` was called for a worker group the
    /// orchestrator has no resource for.
    UnknownGroup(String),
    /// `JobFunnel::begin_test` was called for a test that already has
    /// a running instance.
    AlreadyRunning(String),
    /// `JobFunnel::stop_test` was called for a test with no running
    /// instance.
    NotRunning(String),
    /// One or more jobs failed to submit during `begin_test`; already
    /// submitted jobs were stopped in reverse order.
    JobSubmissionFailed { job: String, source: Box<Error> },
    /// `Scheduler::stop` failed for at least one job during
    /// `stop_test`.
    StopFailed(String),
    /// A pod group has no orchestrator-side resource for its group
    /// name (`PodGroup::new` in strict mode).
    GroupMissing(String),
    /// A test, test instance, or test schedule was not found in the
    /// persistent store.
    NotFound(String),
    /// A capacity-manager operation was attempted against an instance
    /// id that already exists.
    AlreadyExists(String),
    /// `CapacityManager::reclaim_capacity` was called for an
    /// `(instance, job)` pair with no assignment.
    NotAssigned { instance: String, job: String },
    /// A worker sent a first frame other than `Register`, or a
    /// payload kind the leader does not recognize.
    ProtocolViolation(String),
    /// A cron spec failed to parse.
    InvalidCronSpec(String),
    /// A model failed validation (`"validation failed at
    /// <Type>.<path>: <reason>"`).
    Validation(String),
    /// `ChaosSimulator::simulate` found no pods matching the
    /// instance's selectors.
    NoCandidates(String),
    /// `ChaosSimulator::simulate` was asked to run with a test
    /// duration that does not exceed the chaos instance's timeout.
    InvalidDuration(String),
    /// `ChaosSimulator::simulate` was asked for more pods than are
    /// currently free of another simulation.
    InsufficientCandidates(String),
    /// A generic error with a message, used the way the teacher's
    /// client `Error::Generic` covers cases with no dedicated variant.
    Generic(String),
    /// An error talking to the orchestrator (pod create/delete/list).
    Orchestrator(String),
    /// An error from the persistent store.
    Store(String),
    /// An error from the gRPC transport.
    Transport(tonic::transport::Error),
    /// A gRPC status returned by or sent to a worker stream.
    Status(tonic::Status),
    /// An error encoding or decoding CBOR for the persistent store.
    Cbor(serde_cbor::Error),
    /// An error encoding or decoding JSON.
    Json(serde_json::Error),
    /// An error from the embedded key-value store.
    Sled(sled::Error),
    /// An error joining a tokio task.
    Join(tokio::task::JoinError),
    /// An IO error.
    Io(std::io::Error),
    /// An error loading configuration.
    Config(config::ConfigError),
}

impl Error {
    /// Get the kind of this error as a short, stable string, the way
    /// the teacher's client `Error::kind()` does for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownGroup(_) => "UnknownGroup",
            Error::AlreadyRunning(_) => "AlreadyRunning",
            Error::NotRunning(_) => "NotRunning",
            Error::JobSubmissionFailed { .. } => "JobSubmissionFailed",
            Error::StopFailed(_) => "StopFailed",
            Error::GroupMissing(_) => "GroupMissing",
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::NotAssigned { .. } => "NotAssigned",
            Error::ProtocolViolation(_) => "ProtocolViolation",
            Error::InvalidCronSpec(_) => "InvalidCronSpec",
            Error::Validation(_) => "Validation",
            Error::NoCandidates(_) => "NoCandidates",
            Error::InvalidDuration(_) => "InvalidDuration",
            Error::InsufficientCandidates(_) => "InsufficientCandidates",
            Error::Generic(_) => "Generic",
            Error::Orchestrator(_) => "Orchestrator",
            Error::Store(_) => "StoreFailure",
            Error::Transport(_) => "Transport",
            Error::Status(_) => "Status",
            Error::Cbor(_) => "Cbor",
            Error::Json(_) => "Json",
            Error::Sled(_) => "Sled",
            Error::Join(_) => "Join",
            Error::Io(_) => "Io",
            Error::Config(_) => "Config",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownGroup(g) => write!(f, "unknown worker group {g}"),
            Error::AlreadyRunning(t) => write!(f, "test {t} is already running"),
            Error::NotRunning(t) => write!(f, "test {t} is not running"),
            Error::JobSubmissionFailed { job, source } => {
                write!(f, "job {job} failed to submit: {source}")
            }
            Error::StopFailed(t) => write!(f, "failed to stop test {t}"),
            Error::GroupMissing(g) => write!(f, "worker group {g} has no orchestrator resource"),
            Error::NotFound(what) => write!(f, "{what} not found"),
            Error::AlreadyExists(what) => write!(f, "{what} already exists"),
            Error::NotAssigned { instance, job } => {
                write!(f, "instance {instance} has no capacity assigned for job {job}")
            }
            Error::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Error::InvalidCronSpec(spec) => write!(f, "invalid cron spec {spec}"),
            Error::Validation(msg) => write!(f, "{msg}"),
            Error::NoCandidates(msg) => write!(f, "{msg}"),
            Error::InvalidDuration(msg) => write!(f, "{msg}"),
            Error::InsufficientCandidates(msg) => write!(f, "{msg}"),
            Error::Generic(msg) => write!(f, "{msg}"),
            Error::Orchestrator(msg) => write!(f, "orchestrator error: {msg}"),
            Error::Store(msg) => write!(f, "store error: {msg}"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Status(e) => write!(f, "status error: {e}"),
            Error::Cbor(e) => write!(f, "cbor error: {e}"),
            Error::Json(e) => write!(f, "json error: {e}"),
            Error::Sled(e) => write!(f, "sled error: {e}"),
            Error::Join(e) => write!(f, "join error: {e}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Config(e) => write!(f, "config error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<tonic::Status> for Error {
    fn from(e: tonic::Status) -> Self {
        Error::Status(e)
    }
}

impl From<serde_cbor::Error> for Error {
    fn from(e: serde_cbor::Error) -> Self {
        Error::Cbor(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Sled(e)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Join(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e)
    }
}

#[cfg(feature = "k8s")]
impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::Orchestrator(e.to_string())
    }
}
