//! The Diago leader binary: wiring, not logic. Loads `Conf`, builds
//! the external adapters and the core components, then starts the
//! worker-protocol gRPC server and the Prometheus scrape endpoint.
//! Plays the role the teacher's `scaler/src/main.rs` plays for its own
//! control loop (SPEC_FULL.md §1).

mod args;
mod metrics_server;
mod server;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use diago::backends::mock::FakeOrchestrator;
use diago::backends::{NullLogStore, Orchestrator, PersistentStore, PrometheusSink, SledStore, WorkerGroupResource};
#[cfg(feature = "k8s")]
use diago::backends::KubeOrchestrator;
use diago::{ChaosSimulator, Conf, JobFunnel, ScheduleManager, Scheduler};
use diago_proto::worker_server::WorkerServer;
use tracing::{event, Level};

fn load_worker_groups(raw: Option<&str>) -> HashMap<String, WorkerGroupResource> {
    let Some(raw) = raw else {
        return HashMap::new();
    };
    #[derive(serde::Deserialize)]
    struct Entry {
        image: String,
        capacity: u64,
        allowed_inactivity_period: u64,
    }
    match serde_json::from_str::<HashMap<String, Entry>>(raw) {
        Ok(entries) => entries
            .into_iter()
            .map(|(name, e)| {
                (
                    name,
                    WorkerGroupResource {
                        image: e.image,
                        capacity: e.capacity,
                        allowed_inactivity_period: e.allowed_inactivity_period,
                    },
                )
            })
            .collect(),
        Err(e) => {
            event!(Level::WARN, error = %e, "failed to parse --worker-groups; ignoring");
            HashMap::new()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = args::Args::parse();
    let conf = Conf::from_env().expect("failed to load configuration from DIAGO_* env vars");
    diago::trace::init(conf.debug);

    let groups = load_worker_groups(args.worker_groups.as_deref());

    let orchestrator: Arc<dyn Orchestrator> = if args.dry_run {
        event!(Level::INFO, "running with an in-memory orchestrator (--dry-run)");
        Arc::new(FakeOrchestrator::new(groups))
    } else {
        #[cfg(feature = "k8s")]
        {
            Arc::new(
                KubeOrchestrator::new(groups)
                    .await
                    .expect("failed to build the Kubernetes orchestrator client"),
            )
        }
        #[cfg(not(feature = "k8s"))]
        {
            event!(Level::WARN, "built without the k8s feature; falling back to the in-memory orchestrator");
            Arc::new(FakeOrchestrator::new(groups))
        }
    };

    let store = Arc::new(SledStore::open(&conf.storage_path).expect("failed to open the persistent store"));
    let _log_store = Arc::new(NullLogStore);
    let metrics_sink = Arc::new(PrometheusSink::new().expect("failed to build the Prometheus metrics sink"));

    let scheduler = Arc::new(Scheduler::new(
        conf.default_namespace.clone(),
        conf.host.clone(),
        conf.grpc_port,
        conf.default_group_capacity,
        Arc::clone(&orchestrator),
    ));
    let chaos = Arc::new(ChaosSimulator::new(Arc::clone(&orchestrator)));
    let store_handle: Arc<dyn PersistentStore> = store;
    let funnel = Arc::new(JobFunnel::new(
        Arc::clone(&scheduler),
        Arc::clone(&chaos),
        Arc::clone(&store_handle),
    ));
    let _schedule_manager = ScheduleManager::new(Arc::clone(&funnel), Arc::clone(&store_handle))
        .await
        .expect("failed to load persisted test schedules");

    let grpc_addr: SocketAddr = format!("{}:{}", conf.host, conf.grpc_port)
        .parse()
        .expect("invalid DIAGO_HOST/DIAGO_GRPC_PORT");
    let metrics_addr: SocketAddr = format!("{}:{}", conf.host, conf.prometheus_port)
        .parse()
        .expect("invalid DIAGO_HOST/DIAGO_PROMETHEUS_PORT");

    event!(Level::INFO, %grpc_addr, %metrics_addr, "diago leader starting");

    let grpc_server = tonic::transport::Server::builder()
        .add_service(WorkerServer::new(server::WorkerService::new(Arc::clone(&scheduler))))
        .serve(grpc_addr);

    let metrics_router = metrics_server::router(Arc::clone(&scheduler), Arc::clone(&metrics_sink));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .expect("failed to bind the Prometheus scrape endpoint");
    let metrics_server = axum::serve(metrics_listener, metrics_router);

    tokio::select! {
        res = grpc_server => {
            if let Err(e) = res {
                event!(Level::ERROR, error = %e, "worker-protocol server exited");
            }
        }
        res = metrics_server => {
            if let Err(e) = res {
                event!(Level::ERROR, error = %e, "metrics server exited");
            }
        }
    }
}
