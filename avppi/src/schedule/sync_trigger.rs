//! Daily remote sync trigger
//!
//! Fires the sync-and-reload job at most once per local calendar day, on the
//! first tick at or after the configured time. The trigger honors the
//! operation coordinator: when another job holds it, the tick is skipped
//! without recording anything, so the next tick retries. Once the job has
//! started under the coordinator, today's date is recorded whatever the
//! outcome.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use avppi_common::TimeOfDay;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::db::SettingsStore;
use crate::error::Result;
use crate::ops::{JobGuard, JobKind, OperationCoordinator};
use crate::state::SyncOrigin;
use crate::tasks::ControlLoop;

/// Sync-then-reload job run by the trigger
#[async_trait]
pub trait ScheduledSync: Send + Sync + 'static {
    /// Run the composite job; `guard` proves the coordinator slot is held
    ///
    /// Returns whether the remote sync succeeded.
    async fn sync_and_reload(&self, guard: &JobGuard, origin: SyncOrigin) -> Result<bool>;
}

/// Outcome of one trigger evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Disabled,
    /// Before the configured time, or the time is malformed
    NotDue,
    AlreadyRanToday,
    /// Coordinator held by another job
    Busy(JobKind),
    /// Job ran; `true` when the sync succeeded
    Ran(bool),
}

pub struct SyncTrigger {
    store: SettingsStore,
    coordinator: OperationCoordinator,
    job: Arc<dyn ScheduledSync>,
    clock: Arc<dyn Clock>,
}

impl SyncTrigger {
    pub fn new(
        store: SettingsStore,
        coordinator: OperationCoordinator,
        job: Arc<dyn ScheduledSync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            job,
            clock,
        }
    }

    /// One evaluation
    pub async fn evaluate(&self) -> Result<TriggerOutcome> {
        let schedule = self.store.sync_schedule().await?;
        if !schedule.enabled {
            return Ok(TriggerOutcome::Disabled);
        }

        let target = match TimeOfDay::parse(&schedule.time) {
            Ok(t) => t,
            Err(_) => {
                warn!(time = %schedule.time, "Malformed sync time, not triggering");
                return Ok(TriggerOutcome::NotDue);
            }
        };

        let now = self.clock.now();
        if now.time() < target.as_naive() {
            return Ok(TriggerOutcome::NotDue);
        }
        let today = now.date();
        if schedule.last_run_date == Some(today) {
            return Ok(TriggerOutcome::AlreadyRanToday);
        }

        let guard = match self.coordinator.try_acquire(JobKind::Sync) {
            Ok(guard) => guard,
            Err(active) => {
                info!(active = %active, "Skipping scheduled sync, another job is running");
                return Ok(TriggerOutcome::Busy(active));
            }
        };

        info!(time = %now.format("%H:%M"), "Scheduled remote sync triggered");
        let outcome = AssertUnwindSafe(self.job.sync_and_reload(&guard, SyncOrigin::Scheduled))
            .catch_unwind()
            .await;
        self.store.set_sync_last_run(today).await?;
        drop(guard);

        let success = match outcome {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                warn!("Scheduled sync failed: {}", e);
                false
            }
            Err(_) => {
                error!("Scheduled sync panicked");
                false
            }
        };
        debug!(date = %today, success, "Sync trigger recorded run");
        Ok(TriggerOutcome::Ran(success))
    }
}

#[async_trait]
impl ControlLoop for SyncTrigger {
    fn name(&self) -> &'static str {
        "sync_trigger"
    }

    async fn tick(&mut self) -> Result<()> {
        self.evaluate().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{SettingsDefaults, SyncScheduleUpdate};
    use crate::error::Error;
    use avppi_common::db::init_memory_database;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSync {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ScheduledSync for FakeSync {
        async fn sync_and_reload(&self, guard: &JobGuard, origin: SyncOrigin) -> Result<bool> {
            assert_eq!(guard.kind(), JobKind::Sync);
            assert_eq!(origin, SyncOrigin::Scheduled);
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Job("remote unreachable".to_string()));
            }
            Ok(true)
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    async fn setup(fail: bool) -> (SyncTrigger, Arc<FakeSync>, Arc<ManualClock>, OperationCoordinator) {
        let db = init_memory_database().await.unwrap();
        let store = SettingsStore::open(
            db,
            SettingsDefaults {
                language: "fr".to_string(),
                remote_path: "AVPPi-medias".to_string(),
                remote_name: "drive".to_string(),
            },
        )
        .await
        .unwrap();
        let job = Arc::new(FakeSync {
            runs: AtomicU32::new(0),
            fail,
        });
        let clock = Arc::new(ManualClock::new(at(4, 5, 0)));
        let coordinator = OperationCoordinator::new();
        let trigger = SyncTrigger::new(store, coordinator.clone(), job.clone(), clock.clone());
        (trigger, job, clock, coordinator)
    }

    #[tokio::test]
    async fn test_fires_once_per_day() {
        let (trigger, job, clock, _) = setup(false).await;
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::NotDue);

        clock.set(at(4, 6, 0));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(true));
        for minute in 1..30 {
            clock.set(at(4, 6, minute));
            assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::AlreadyRanToday);
        }
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);

        clock.set(at(5, 6, 1));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(true));
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_skips_without_recording() {
        let (trigger, job, clock, coordinator) = setup(false).await;
        clock.set(at(4, 7, 0));

        let guard = coordinator.try_acquire(JobKind::Sanitize).unwrap();
        assert_eq!(
            trigger.evaluate().await.unwrap(),
            TriggerOutcome::Busy(JobKind::Sanitize)
        );
        assert_eq!(trigger.store.sync_schedule().await.unwrap().last_run_date, None);
        drop(guard);

        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(true));
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn test_failure_still_recorded() {
        let (trigger, job, clock, coordinator) = setup(true).await;
        clock.set(at(4, 6, 30));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(false));
        assert_eq!(
            trigger.store.sync_schedule().await.unwrap().last_run_date,
            Some(at(4, 0, 0).date())
        );
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::AlreadyRanToday);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test]
    async fn test_time_change_rearms_same_day() {
        let (trigger, job, clock, _) = setup(false).await;
        clock.set(at(4, 6, 30));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(true));

        trigger
            .store
            .update_sync_schedule(SyncScheduleUpdate {
                enabled: None,
                time: Some("18:00".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::NotDue);

        clock.set(at(4, 18, 0));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Ran(true));
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_never_fires() {
        let (trigger, job, clock, _) = setup(false).await;
        trigger
            .store
            .update_sync_schedule(SyncScheduleUpdate {
                enabled: Some(false),
                time: None,
            })
            .await
            .unwrap();
        clock.set(at(4, 23, 0));
        assert_eq!(trigger.evaluate().await.unwrap(), TriggerOutcome::Disabled);
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }
}
