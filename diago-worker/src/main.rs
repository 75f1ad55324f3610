//! A reference implementation of the worker side of the protocol
//! (C3): register with the leader, run `Start` jobs by issuing HTTP
//! requests at the requested rate, stream `Metrics` back, answer
//! `Stop`, and disconnect after `DIAGO_ALLOWED_INACTIVITY_PERIOD`
//! seconds with no assigned work.
//!
//! Intentionally thin per spec.md §1 ("worker-side load generation
//! internals" are out of the core's scope) — this exists to make the
//! protocol exercisable end-to-end and to host protocol-level tests,
//! not to be a tuned load generator.

mod args;
mod job;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use diago_proto::worker_client::WorkerClient;
use diago_proto::{message, Message};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tracing::{event, Level};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = args::Args::parse();
    let env = args::Env::from_process_env();

    let endpoint = format!("http://{}:{}", env.leader_host, env.leader_port);
    event!(Level::INFO, %endpoint, group = %env.group, instance = %env.instance, "connecting to leader");
    let mut client = WorkerClient::connect(endpoint)
        .await
        .expect("failed to connect to the diago leader");

    let (to_leader, from_worker) = mpsc::channel::<Message>(8);
    to_leader
        .send(Message {
            payload: Some(message::Payload::Register(diago_proto::Register {
                group: env.group.clone(),
                instance: env.instance.clone(),
                capacity: args.capacity,
            })),
        })
        .await
        .expect("outbound channel closed before Register could be sent");

    let response = client
        .coordinate(Request::new(ReceiverStream::new(from_worker)))
        .await
        .expect("Coordinate RPC failed");
    let mut inbound = response.into_inner();

    let http = reqwest::Client::new();
    let stops: Arc<Mutex<HashMap<String, watch::Sender<bool>>>> = Arc::new(Mutex::new(HashMap::new()));

    let idle_period = Duration::from_secs(env.allowed_inactivity_period.max(1));
    let mut idle_deadline = tokio::time::Instant::now() + idle_period;

    loop {
        tokio::select! {
            msg = inbound.message() => {
                match msg {
                    Ok(Some(Message { payload: Some(message::Payload::Start(start)) })) => {
                        idle_deadline = tokio::time::Instant::now() + idle_period;
                        let (stop_tx, stop_rx) = watch::channel(false);
                        stops.lock().unwrap().insert(start.job_id.clone(), stop_tx);
                        let request = start.request.unwrap_or_default();
                        tokio::spawn(job::run(
                            start.job_id,
                            start.frequency,
                            start.duration,
                            request,
                            http.clone(),
                            to_leader.clone(),
                            stop_rx,
                        ));
                    }
                    Ok(Some(Message { payload: Some(message::Payload::Stop(stop)) })) => {
                        idle_deadline = tokio::time::Instant::now() + idle_period;
                        if let Some(stop_tx) = stops.lock().unwrap().remove(&stop.job_id) {
                            let _ = stop_tx.send(true);
                        }
                    }
                    Ok(Some(other)) => {
                        event!(Level::WARN, kind = ?other.payload, "ignoring unexpected message from leader");
                    }
                    Ok(None) => {
                        event!(Level::INFO, "leader closed the stream");
                        break;
                    }
                    Err(e) => {
                        event!(Level::WARN, error = %e, "stream error; disconnecting");
                        break;
                    }
                }
            }
            () = tokio::time::sleep_until(idle_deadline) => {
                event!(Level::INFO, "no work for the allowed inactivity period; disconnecting");
                break;
            }
        }
    }
}
