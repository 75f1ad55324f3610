//! Runs one `Start` job: issue HTTP requests at the target rate for
//! the given duration, streaming a `Metrics` frame back per request,
//! and sending `Finish` on completion or early `Stop`.
//!
//! spec.md §1 places worker-side load generation internals out of
//! scope for grounding depth; this module exists only to make the
//! protocol exercisable end-to-end, not to be a tuned load generator.

use std::time::{Duration, Instant};

use diago_proto::{HttpRequest, Message};
use tokio::sync::{mpsc, watch};
use tracing::{event, Level};

async fn send_one(client: reqwest::Client, request: HttpRequest) -> (u32, u64, u64, u64, Option<String>) {
    let bytes_out = request.body.len() as u64;
    let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
        Ok(m) => m,
        Err(e) => return (0, 0, bytes_out, 0, Some(e.to_string())),
    };
    let started = Instant::now();
    let result = client.request(method, &request.url).body(request.body.clone()).send().await;
    let latency = started.elapsed().as_millis() as u64;
    match result {
        Ok(resp) => {
            let code = resp.status().as_u16() as u32;
            match resp.bytes().await {
                Ok(body) => (code, body.len() as u64, bytes_out, latency, None),
                Err(e) => (code, 0, bytes_out, latency, Some(e.to_string())),
            }
        }
        Err(e) => (0, 0, bytes_out, latency, Some(e.to_string())),
    }
}

/// Run `job_id` at `frequency` requests/sec for `duration` seconds,
/// or until `stop_rx` fires, whichever comes first.
pub async fn run(
    job_id: String,
    frequency: u64,
    duration: u64,
    request: HttpRequest,
    client: reqwest::Client,
    outbound: mpsc::Sender<Message>,
    mut stop_rx: watch::Receiver<bool>,
) {
    event!(Level::INFO, job = %job_id, frequency, duration, "starting job");
    let period = Duration::from_secs_f64(1.0 / frequency.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let deadline = Instant::now() + Duration::from_secs(duration);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    break;
                }
                let client = client.clone();
                let request = request.clone();
                let outbound = outbound.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    let (code, bytes_in, bytes_out, latency_millis, error) = send_one(client, request).await;
                    let msg = Message {
                        payload: Some(diago_proto::message::Payload::Metrics(diago_proto::Metrics {
                            job_id,
                            code,
                            bytes_in,
                            bytes_out,
                            latency_millis,
                            error,
                            timestamp_millis: chrono::Utc::now().timestamp_millis(),
                        })),
                    };
                    let _ = outbound.send(msg).await;
                });
            }
            changed = stop_rx.changed() => {
                if changed.is_ok() && *stop_rx.borrow() {
                    event!(Level::INFO, job = %job_id, "job stopped early");
                    break;
                }
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    let finish = Message {
        payload: Some(diago_proto::message::Payload::Finish(diago_proto::Finish { job_id: job_id.clone() })),
    };
    let _ = outbound.send(finish).await;
    event!(Level::INFO, job = %job_id, "job finished");
}
