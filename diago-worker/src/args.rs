use clap::Parser;

/// Command line args for the reference Diago worker.
///
/// The leader passes connection details through environment variables
/// when it spawns a pod (spec.md §4.2.6: `DIAGO_LEADER_HOST`,
/// `DIAGO_LEADER_PORT`, `DIAGO_GROUP`, `DIAGO_INSTANCE`,
/// `DIAGO_ALLOWED_INACTIVITY_PERIOD`); `--capacity` is the one thing a
/// worker decides for itself and announces in its `Register` frame.
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// Requests per second this worker announces it can sustain.
    #[clap(long, default_value_t = 200)]
    pub capacity: u64,
}

#[derive(Debug, Clone)]
pub struct Env {
    pub leader_host: String,
    pub leader_port: u16,
    pub group: String,
    pub instance: String,
    pub allowed_inactivity_period: u64,
}

impl Env {
    pub fn from_process_env() -> Self {
        Env {
            leader_host: std::env::var("DIAGO_LEADER_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned()),
            leader_port: std::env::var("DIAGO_LEADER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            group: std::env::var("DIAGO_GROUP").unwrap_or_else(|_| "default".to_owned()),
            instance: std::env::var("DIAGO_INSTANCE").unwrap_or_else(|_| "standalone".to_owned()),
            allowed_inactivity_period: std::env::var("DIAGO_ALLOWED_INACTIVITY_PERIOD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}
