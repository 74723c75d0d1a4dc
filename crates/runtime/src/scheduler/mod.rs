//! Periodic delta scheduling.
//!
//! A six-field (seconds-first) cron expression drives a timer that enqueues a
//! delta job for every known tenant. `DELTA_TIMER_RUN_ON_STARTUP=1` fires one
//! sweep immediately on boot.

use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::TimerConfig;
use crate::dispatch::Dispatcher;
use crate::types::ConfigError;

/// Timer that fans out delta jobs on a cron schedule.
pub struct DeltaTimer {
    schedule: Schedule,
    run_on_startup: bool,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for DeltaTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaTimer")
            .field("schedule", &self.schedule)
            .field("run_on_startup", &self.run_on_startup)
            .finish()
    }
}

impl DeltaTimer {
    pub fn new(config: &TimerConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, ConfigError> {
        let schedule =
            Schedule::from_str(&config.schedule).map_err(|e| ConfigError::InvalidValue {
                name: "DELTA_TIMER_SCHEDULE".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            schedule,
            run_on_startup: config.run_on_startup,
            dispatcher,
        })
    }

    /// Spawn the timer loop. Abort the returned handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.run_on_startup {
                let enqueued = self.dispatcher.delta_all().await;
                tracing::info!(enqueued, "startup delta sweep complete");
            }
            loop {
                let Some(next) = self.schedule.upcoming(Utc).next() else {
                    tracing::warn!("cron schedule has no upcoming fire times, timer stopping");
                    return;
                };
                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(wait).await;
                let enqueued = self.dispatcher.delta_all().await;
                tracing::info!(enqueued, fired_at = %next, "scheduled delta sweep complete");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::ingest::{BackfillJob, JobHandler, SessionQueue};
    use crate::store::DataStore;
    use crate::types::RuntimeError;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(&self, _job: &BackfillJob) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn on_dead_letter(&self, _job: &BackfillJob, _e: &RuntimeError) {}
    }

    fn dispatcher(dir: &tempfile::TempDir) -> Arc<Dispatcher> {
        let store = Arc::new(DataStore::open(dir.path()).unwrap());
        let queue = SessionQueue::start("test", 2, 3, Arc::new(NoopHandler));
        Arc::new(Dispatcher::new(store, queue, SyncConfig::default()))
    }

    #[tokio::test]
    async fn default_schedule_parses_as_hourly() {
        let dir = tempfile::TempDir::new().unwrap();
        let timer = DeltaTimer::new(&TimerConfig::default(), dispatcher(&dir)).unwrap();
        let next_two: Vec<_> = timer.schedule.upcoming(Utc).take(2).collect();
        assert_eq!(next_two.len(), 2);
        // Consecutive fires are exactly one hour apart.
        assert_eq!((next_two[1] - next_two[0]).num_seconds(), 3600);
    }

    #[tokio::test]
    async fn invalid_schedule_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TimerConfig {
            schedule: "not a cron".to_string(),
            run_on_startup: false,
        };
        let err = DeltaTimer::new(&config, dispatcher(&dir)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn six_field_seconds_first_is_accepted() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TimerConfig {
            schedule: "*/30 * * * * *".to_string(),
            run_on_startup: false,
        };
        let timer = DeltaTimer::new(&config, dispatcher(&dir)).unwrap();
        let next_two: Vec<_> = timer.schedule.upcoming(Utc).take(2).collect();
        assert_eq!((next_two[1] - next_two[0]).num_seconds(), 30);
    }
}
