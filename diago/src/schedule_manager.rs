//! Cron-driven test scheduling (C7). Grounded on spec.md §4.7.
//!
//! The `cron` crate parses a seconds-prefixed six-field expression and
//! has no built-in runner; each registered schedule gets its own task
//! that sleeps until `Schedule::upcoming`'s next tick or a stop signal,
//! whichever comes first — the same `watch`-based cancellation shape
//! used by `pod_group.rs`'s cleanup signal and `chaos.rs`'s stop
//! channel.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tracing::{event, instrument, Level};

use crate::backends::PersistentStore;
use crate::funnel::JobFunnel;
use crate::models::{TestId, TestSchedule, TestScheduleId, TestType};
use crate::Error;

/// Expand a five-field cron spec or `@`-descriptor into the
/// seconds-prefixed six-field form `cron::Schedule` parses.
fn normalize_spec(spec: &str) -> Result<String, Error> {
    let spec = spec.trim();
    let descriptor = match spec {
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@weekly" => Some("0 0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@hourly" => Some("0 0 * * * *"),
        _ => None,
    };
    if let Some(expanded) = descriptor {
        return Ok(expanded.to_owned());
    }
    match spec.split_whitespace().count() {
        5 => Ok(format!("0 {spec}")),
        6 => Ok(spec.to_owned()),
        _ => Err(Error::InvalidCronSpec(spec.to_owned())),
    }
}

fn parse_cron_spec(spec: &str) -> Result<Schedule, Error> {
    let normalized = normalize_spec(spec)?;
    Schedule::from_str(&normalized).map_err(|_| Error::InvalidCronSpec(spec.to_owned()))
}

struct Entry {
    stop_tx: watch::Sender<bool>,
}

/// Owns every registered cron entry and the funnel they fire into.
pub struct ScheduleManager {
    funnel: Arc<JobFunnel>,
    store: Arc<dyn PersistentStore>,
    entries: Mutex<HashMap<TestScheduleId, Entry>>,
}

impl ScheduleManager {
    /// Load every persisted schedule and register it with the cron
    /// runner before returning, so the manager comes up already
    /// driving whatever was scheduled before the last restart.
    #[instrument(name = "ScheduleManager::new", skip(funnel, store), err(Debug))]
    pub async fn new(funnel: Arc<JobFunnel>, store: Arc<dyn PersistentStore>) -> Result<Arc<Self>, Error> {
        let manager = Arc::new(ScheduleManager {
            funnel,
            store,
            entries: Mutex::new(HashMap::new()),
        });
        for schedule in manager.store.get_all_test_schedules().await? {
            manager.register(schedule);
        }
        Ok(manager)
    }

    fn register(self: &Arc<Self>, schedule: TestSchedule) {
        let parsed = match parse_cron_spec(&schedule.cron_spec) {
            Ok(s) => s,
            Err(e) => {
                event!(Level::WARN, schedule = %schedule.id, error = %e, "refusing to register schedule with invalid cron spec");
                return;
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        self.entries.lock().unwrap().insert(schedule.id.clone(), Entry { stop_tx });

        let manager = Arc::clone(self);
        let schedule_id = schedule.id.clone();
        let test_id = schedule.test_id.clone();
        tokio::spawn(run_schedule(manager, schedule_id, test_id, parsed, stop_rx));
    }

    /// `Add(schedule, persist)`.
    #[instrument(name = "ScheduleManager::add", skip(self, schedule), fields(schedule_id = %schedule.id), err(Debug))]
    pub async fn add(self: &Arc<Self>, schedule: TestSchedule, persist: bool) -> Result<(), Error> {
        parse_cron_spec(&schedule.cron_spec)?;
        if persist {
            self.store.add_test_schedule(&schedule).await?;
        }
        self.register(schedule);
        Ok(())
    }

    /// `Remove(id)`: unregister with the cron runner, then delete from
    /// the persistent store.
    #[instrument(name = "ScheduleManager::remove", skip(self), err(Debug))]
    pub async fn remove(&self, id: &TestScheduleId) -> Result<(), Error> {
        if let Some(entry) = self.entries.lock().unwrap().remove(id) {
            let _ = entry.stop_tx.send(true);
        }
        self.store.delete_test_schedule(id).await?;
        Ok(())
    }

    /// `ValidateSpec(spec)`: parse-only, no registration.
    pub fn validate_spec(&self, spec: &str) -> Result<(), Error> {
        parse_cron_spec(spec).map(|_| ())
    }
}

async fn run_schedule(
    manager: Arc<ScheduleManager>,
    schedule_id: TestScheduleId,
    test_id: TestId,
    parsed: Schedule,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut upcoming = parsed.upcoming(Utc);
    loop {
        let Some(next) = upcoming.next() else {
            break;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
        if let Err(e) = Arc::clone(&manager.funnel).begin_test(test_id.clone(), TestType::Scheduled).await {
            event!(Level::WARN, schedule = %schedule_id, test = %test_id, error = %e, "scheduled BeginTest failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_spec_gets_a_seconds_prefix() {
        assert_eq!(normalize_spec("0 9 * * MON-FRI").unwrap(), "0 0 9 * * MON-FRI");
    }

    #[test]
    fn descriptors_expand_to_six_fields() {
        assert_eq!(normalize_spec("@hourly").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_spec("@daily").unwrap(), "0 0 0 * * *");
    }

    #[test]
    fn wrong_field_count_is_invalid() {
        let err = normalize_spec("* * *").unwrap_err();
        assert_eq!(err.kind(), "InvalidCronSpec");
    }

    #[test]
    fn valid_spec_parses() {
        assert!(parse_cron_spec("0 9 * * MON-FRI").is_ok());
    }

    #[test]
    fn garbage_spec_is_invalid_cron_spec() {
        let err = parse_cron_spec("not a cron spec").unwrap_err();
        assert_eq!(err.kind(), "InvalidCronSpec");
    }
}
