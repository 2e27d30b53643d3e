//! services/engine/src/foreground/reset.rs
//!
//! The Daily Reset Coordinator makes sure today has exactly one dose record per
//! active reminder and that today's reminders are armed.
//!
//! Every trigger (initial load, visibility regained, the periodic check) calls
//! `run_if_needed`. A run is skipped while another is in flight and once the
//! last-reset marker already equals today. A run that retries after a partial
//! failure keeps what is already armed for today and only arms what is missing.

use chrono::NaiveDate;
use dose_reminder_core::domain::DoseStatus;
use dose_reminder_core::ports::{Clock, DoseStore, LocalStorage, PortResult, UpsertMode};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::foreground::scheduler::{NotificationScheduler, ScheduleOutcome};
use crate::foreground::state::{EngineContext, SingleFlight};

/// Called with the reset date after every fully successful run.
pub type ResetCallback = Box<dyn Fn(NaiveDate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    AlreadyRunning,
    AlreadyDone,
    Completed(ResetSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub reminders: usize,
    /// Upserts that failed. The marker only advances when this is zero.
    pub failed_upserts: usize,
    pub armed: usize,
    pub missed: usize,
    /// Reminders whose dose was already taken or forgotten.
    pub resolved: usize,
}

pub struct DailyResetCoordinator {
    store: Arc<dyn DoseStore>,
    local: Arc<dyn LocalStorage>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<NotificationScheduler>,
    flight: SingleFlight,
    /// The day the schedule was last cleared and re-armed for.
    armed_for: Mutex<Option<NaiveDate>>,
    on_complete: Option<ResetCallback>,
}

impl DailyResetCoordinator {
    pub fn new(ctx: &EngineContext, scheduler: Arc<NotificationScheduler>) -> Self {
        Self {
            store: ctx.store.clone(),
            local: ctx.local.clone(),
            clock: ctx.clock.clone(),
            scheduler,
            flight: SingleFlight::new(),
            armed_for: Mutex::new(None),
            on_complete: None,
        }
    }

    pub fn with_completion(mut self, callback: ResetCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub async fn run_if_needed(&self, user_id: Uuid) -> PortResult<ResetOutcome> {
        let Some(_guard) = self.flight.try_acquire() else {
            debug!(%user_id, "Daily reset already in flight, skipping.");
            return Ok(ResetOutcome::AlreadyRunning);
        };

        let today = self.clock.today();
        if self.local.last_reset_date().await? == Some(today) {
            return Ok(ResetOutcome::AlreadyDone);
        }
        info!(%user_id, %today, "Running daily reset.");

        // --- 1. Ensure one pending record per active reminder ---
        let reminders = self.store.list_active_reminders(user_id).await?;
        let upserts = reminders.iter().map(|r| {
            self.store.upsert_dose_record(
                r.reminder.id,
                today,
                DoseStatus::Pending,
                None,
                UpsertMode::IgnoreDuplicates,
            )
        });
        let mut summary = ResetSummary {
            reminders: reminders.len(),
            ..ResetSummary::default()
        };
        for (reminder, result) in reminders.iter().zip(join_all(upserts).await) {
            if let Err(e) = result {
                summary.failed_upserts += 1;
                error!(reminder_id = %reminder.reminder.id, "Failed to create today's dose record: {}", e);
            }
        }

        // --- 2. Read back today's statuses ---
        let statuses: HashMap<Uuid, DoseStatus> = self
            .store
            .list_dose_records(user_id, today)
            .await?
            .into_iter()
            .map(|d| (d.record.reminder_id, d.record.status))
            .collect();

        // --- 3. Re-arm notifications ---
        let rearming = *self.armed_for.lock().unwrap_or_else(|p| p.into_inner()) == Some(today);
        if !rearming {
            self.scheduler.clear_all().await?;
        }
        for active in &reminders {
            let reminder = &active.reminder;
            if statuses.get(&reminder.id).map_or(false, DoseStatus::is_terminal) {
                summary.resolved += 1;
                continue;
            }
            match self
                .scheduler
                .schedule(reminder.id, active.payload(), reminder.time_of_day)
                .await
            {
                Ok(ScheduleOutcome::Armed { .. }) | Ok(ScheduleOutcome::AlreadyArmed) => {
                    summary.armed += 1
                }
                Ok(ScheduleOutcome::Missed) => summary.missed += 1,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, "Failed to arm reminder: {}", e);
                }
            }
        }
        *self.armed_for.lock().unwrap_or_else(|p| p.into_inner()) = Some(today);

        // --- 4. Advance the marker only on full success ---
        if summary.failed_upserts > 0 {
            warn!(
                %user_id,
                failed = summary.failed_upserts,
                "Daily reset incomplete; it will be retried on the next trigger."
            );
            return Ok(ResetOutcome::Completed(summary));
        }
        self.local.set_last_reset_date(today).await?;
        if let Some(callback) = &self.on_complete {
            callback(today);
        }
        info!(
            %user_id, %today,
            reminders = summary.reminders,
            armed = summary.armed,
            missed = summary.missed,
            resolved = summary.resolved,
            "Daily reset complete."
        );
        Ok(ResetOutcome::Completed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreground::testing::{at, day, Harness};
    use chrono::Duration;
    use dose_reminder_core::domain::ScheduleKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(h: &Harness) -> DailyResetCoordinator {
        DailyResetCoordinator::new(&h.ctx, h.scheduler.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let h = Harness::new(at(7, 0));
        h.add_reminder(8, 0);
        h.add_reminder(20, 0);
        let reset = coordinator(&h);

        let first = reset.run_if_needed(h.user_id).await.unwrap();
        match first {
            ResetOutcome::Completed(s) => {
                assert_eq!(s.reminders, 2);
                assert_eq!(s.armed, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            reset.run_if_needed(h.user_id).await.unwrap(),
            ResetOutcome::AlreadyDone
        );
        assert_eq!(h.store.records().len(), 2);
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), Some(day()));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_triggers_create_one_set_of_records() {
        let h = Harness::new(at(7, 0));
        h.add_reminder(8, 0);
        h.add_reminder(12, 30);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let reset = coordinator(&h).with_completion(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (load, visibility) =
            tokio::join!(reset.run_if_needed(h.user_id), reset.run_if_needed(h.user_id));
        let outcomes = [load.unwrap(), visibility.unwrap()];
        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, ResetOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);

        assert_eq!(h.store.records().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ctx.agent.get_scheduled().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_doses_are_not_rearmed() {
        let h = Harness::new(at(9, 30));
        let taken = h.add_reminder(9, 0);
        h.add_reminder(21, 0);
        h.store
            .upsert_dose_record(
                taken.reminder.id,
                day(),
                DoseStatus::Taken,
                None,
                UpsertMode::Overwrite,
            )
            .await
            .unwrap();

        let outcome = coordinator(&h).run_if_needed(h.user_id).await.unwrap();
        let ResetOutcome::Completed(summary) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.armed, 1);
        // The automatic upsert never touched the taken record.
        assert_eq!(
            h.store.record_for(taken.reminder.id, day()).unwrap().status,
            DoseStatus::Taken
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_leaves_marker_for_retry() {
        let h = Harness::new(at(7, 0));
        h.add_reminder(8, 0);
        let reset = coordinator(&h);

        h.store.set_unavailable(true);
        assert!(reset.run_if_needed(h.user_id).await.is_err());
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), None);

        h.store.set_unavailable(false);
        assert!(matches!(
            reset.run_if_needed(h.user_id).await.unwrap(),
            ResetOutcome::Completed(_)
        ));
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), Some(day()));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_retries_without_refiring() {
        let h = Harness::new(at(9, 10));
        let due = h.add_reminder(9, 0);
        let evening = h.add_reminder(21, 0);
        h.store.set_upsert_failing(evening.reminder.id, true);
        let reset = coordinator(&h);

        let ResetOutcome::Completed(first) = reset.run_if_needed(h.user_id).await.unwrap() else {
            panic!("first run did not complete");
        };
        assert_eq!(first.failed_upserts, 1);
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), None);
        h.ctx.agent.get_scheduled().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let tag = ScheduleKey::for_reminder(due.reminder.id).tag();
        let shown = |h: &Harness| h.presenter.history().iter().filter(|n| n.tag == tag).count();
        assert_eq!(shown(&h), 1);

        // Periodic retries while the store still rejects one reminder.
        for _ in 0..5 {
            h.clock.advance(Duration::minutes(1));
            reset.run_if_needed(h.user_id).await.unwrap();
            h.ctx.agent.get_scheduled().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(shown(&h), 1);
        assert_eq!(h.scheduler.list_scheduled().await.len(), 2);

        h.store.set_upsert_failing(evening.reminder.id, false);
        h.clock.advance(Duration::minutes(1));
        let ResetOutcome::Completed(last) = reset.run_if_needed(h.user_id).await.unwrap() else {
            panic!("retry did not complete");
        };
        assert_eq!(last.failed_upserts, 0);
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), Some(day()));
        assert!(h.store.record_for(evening.reminder.id, day()).is_some());
        h.ctx.agent.get_scheduled().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(shown(&h), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn midnight_rollover_creates_the_new_day() {
        let h = Harness::new(at(23, 58));
        let reminder = h.add_reminder(8, 0);
        let reset = coordinator(&h);
        reset.run_if_needed(h.user_id).await.unwrap();

        h.clock.advance(Duration::minutes(5));
        assert!(matches!(
            reset.run_if_needed(h.user_id).await.unwrap(),
            ResetOutcome::Completed(_)
        ));
        let tomorrow = day().succ_opt().unwrap();
        let record = h.store.record_for(reminder.reminder.id, tomorrow).unwrap();
        assert_eq!(record.status, DoseStatus::Pending);
        assert_eq!(h.ctx.local.last_reset_date().await.unwrap(), Some(tomorrow));
    }
}
