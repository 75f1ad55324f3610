//! Generated types and gRPC stubs for the leader<->worker coordination stream.
//!
//! The wire shape is grounded on the single bidirectional `Coordinate`
//! RPC of the original implementation's worker service: one stream,
//! one tagged-union `Message`, `Register` required as the first frame.

tonic::include_proto!("worker");

pub use worker_client::WorkerClient;
pub use worker_server::{Worker, WorkerServer};

impl message::Payload {
    /// A short tag for logging, used the way the leader logs an
    /// unrecognized payload kind before terminating a stream.
    pub fn kind(&self) -> &'static str {
        match self {
            message::Payload::Register(_) => "Register",
            message::Payload::Start(_) => "Start",
            message::Payload::Stop(_) => "Stop",
            message::Payload::Metrics(_) => "Metrics",
            message::Payload::Finish(_) => "Finish",
        }
    }
}

impl Message {
    pub fn register(group: impl Into<String>, instance: impl Into<String>, capacity: u64) -> Self {
        Message {
            payload: Some(message::Payload::Register(Register {
                group: group.into(),
                instance: instance.into(),
                capacity,
            })),
        }
    }

    pub fn start(
        job_id: impl Into<String>,
        frequency: u64,
        duration: u64,
        request: HttpRequest,
    ) -> Self {
        Message {
            payload: Some(message::Payload::Start(Start {
                job_id: job_id.into(),
                frequency,
                duration,
                request: Some(request),
                persist_sampling_rate: None,
            })),
        }
    }

    pub fn stop(job_id: impl Into<String>) -> Self {
        Message {
            payload: Some(message::Payload::Stop(Stop {
                job_id: job_id.into(),
            })),
        }
    }

    pub fn finish(job_id: impl Into<String>) -> Self {
        Message {
            payload: Some(message::Payload::Finish(Finish {
                job_id: job_id.into(),
            })),
        }
    }
}
