//! Diago: a distributed HTTP load-testing control plane.
//!
//! A leader orchestrates worker pods over a gRPC coordination stream,
//! dispatching jobs for the capacity each pod announces, running
//! delayed chaos deletions alongside a test, and reducing streamed
//! metrics into a per-job summary. See `SPEC_FULL.md` for the design.

mod capacity;
mod chaos;
mod conf;
mod error;
mod funnel;
mod metric_aggregator;
pub mod models;
mod pod_group;
mod schedule_manager;
mod scheduler;
pub mod trace;

pub mod backends;

pub use chaos::ChaosSimulator;
pub use conf::Conf;
pub use error::Error;
pub use funnel::JobFunnel;
pub use metric_aggregator::{AggregatedMetrics, MetricAggregator};
pub use pod_group::{JobEvent, PodGroup, PodGroupState};
pub use schedule_manager::ScheduleManager;
pub use scheduler::Scheduler;

pub use capacity::CapacityManager;
