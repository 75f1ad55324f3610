//! The Prometheus scrape endpoint (`DIAGO_PROMETHEUS_PORT`), kept
//! separate from the worker-protocol gRPC server the way spec.md §6
//! keeps metrics exposition out of the core's concern — this module
//! only wires `Scheduler::report_metrics` and `PrometheusSink::render`
//! behind a one-route `axum::Router`.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use diago::backends::PrometheusSink;
use diago::Scheduler;

async fn scrape(
    Extension(scheduler): Extension<Arc<Scheduler>>,
    Extension(sink): Extension<Arc<PrometheusSink>>,
) -> impl IntoResponse {
    scheduler.report_metrics(sink.as_ref());
    match sink.render() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(scheduler: Arc<Scheduler>, sink: Arc<PrometheusSink>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .layer(Extension(scheduler))
        .layer(Extension(sink))
}
