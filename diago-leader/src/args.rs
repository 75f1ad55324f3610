use clap::Parser;

/// Command line args for the Diago leader.
///
/// Everything that actually shapes behaviour (ports, capacities,
/// storage path) comes from `DIAGO_*` environment variables per
/// spec.md §6; these flags only cover what an operator needs at
/// process-launch time, the way the teacher's scaler splits `--config`
/// (env/file wiring) from `--dry-run` (a launch-time mode switch).
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// Don't talk to a real orchestrator; use an in-memory fake so the
    /// leader can run standalone (e.g. for local testing against
    /// `diago-worker` processes started by hand).
    #[clap(long, default_value_t)]
    pub dry_run: bool,
    /// JSON object mapping worker-group name to
    /// `{"image", "capacity", "allowed_inactivity_period"}`, used to
    /// seed the orchestrator's group table. A real deployment would
    /// source this from a CRD or ConfigMap (spec.md §6
    /// `GetWorkerGroup`); that lookup mechanism is left to the
    /// deployment, so this flag is the stand-in for it here.
    #[clap(long)]
    pub worker_groups: Option<String>,
}
