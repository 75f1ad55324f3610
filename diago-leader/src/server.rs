//! The leader side of the worker protocol (C3): a Tonic service that
//! adapts the gRPC bidirectional stream onto `Scheduler::register`.
//!
//! Grounded on spec.md §4.3/§6: the first frame must be `Register`;
//! anything else is a `ProtocolViolation` and the stream is refused.
//! After that, inbound frames are forwarded into the channel the pod
//! group's router reads, and the pod group's outbound channel is
//! forwarded back out as the response stream.

use std::pin::Pin;
use std::sync::Arc;

use diago::models::{InstanceId, WorkerGroupName};
use diago::Scheduler;
use diago_proto::worker_server::Worker;
use diago_proto::{message, Message};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use tracing::{event, instrument, Level};

pub struct WorkerService {
    scheduler: Arc<Scheduler>,
}

impl WorkerService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        WorkerService { scheduler }
    }
}

type CoordinateStream = Pin<Box<dyn Stream<Item = Result<Message, Status>> + Send>>;

#[tonic::async_trait]
impl Worker for WorkerService {
    type CoordinateStream = CoordinateStream;

    #[instrument(name = "WorkerService::coordinate", skip(self, request), err(Debug))]
    async fn coordinate(
        &self,
        request: Request<Streaming<Message>>,
    ) -> Result<Response<Self::CoordinateStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before Register"))?;
        let register = match first.payload {
            Some(message::Payload::Register(register)) => register,
            other => {
                let kind = other.map(|p| p.kind()).unwrap_or("empty");
                event!(Level::WARN, kind, "protocol violation: first frame was not Register");
                return Err(Status::invalid_argument(format!(
                    "protocol violation: first frame must be Register, got {kind}"
                )));
            }
        };

        let group = WorkerGroupName::new(register.group);
        let instance = InstanceId::from(register.instance);
        event!(Level::INFO, group = %group, instance = %instance, capacity = register.capacity, "worker registered");

        let (forward_tx, forward_rx) = mpsc::channel(2);
        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(msg)) => {
                        if forward_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        event!(Level::WARN, error = %e, "worker stream error; treating as disconnect");
                        break;
                    }
                }
            }
            // dropping forward_tx here closes the channel the pod group's
            // router reads, which it treats as an implicit Finish for
            // every job this worker was holding capacity for.
        });

        let outbound = Arc::clone(&self.scheduler)
            .register(group, instance, register.capacity, forward_rx)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        let response_stream = ReceiverStream::new(outbound).map(Ok);
        Ok(Response::new(Box::pin(response_stream)))
    }
}
