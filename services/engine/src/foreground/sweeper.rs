//! services/engine/src/foreground/sweeper.rs
//!
//! The Expired Dose Sweeper resolves today's still-pending doses whose action
//! window has closed. It re-derives every state through the window evaluator
//! and writes with a conditional update, so a dose the user resolved in the
//! meantime is never overwritten.

use chrono::{NaiveDateTime, Timelike};
use dose_reminder_core::domain::DoseStatus;
use dose_reminder_core::ports::{Clock, DoseStore, PortResult};
use dose_reminder_core::window::{evaluate, DoseState, WindowPolicy};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::foreground::state::{EngineContext, SingleFlight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    AlreadyRunning,
    /// A pass already completed during this minute.
    SameMinute,
    Swept { examined: usize, resolved: usize },
}

pub struct ExpiredDoseSweeper {
    store: Arc<dyn DoseStore>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
    flight: SingleFlight,
    last_minute: Mutex<Option<NaiveDateTime>>,
}

fn minute_of(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

impl ExpiredDoseSweeper {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            policy: ctx.policy(),
            flight: SingleFlight::new(),
            last_minute: Mutex::new(None),
        }
    }

    pub async fn sweep(&self, user_id: Uuid) -> PortResult<SweepOutcome> {
        let Some(_guard) = self.flight.try_acquire() else {
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let now = self.clock.now();
        let minute = minute_of(now);
        if *self.last_minute.lock().unwrap_or_else(|p| p.into_inner()) == Some(minute) {
            return Ok(SweepOutcome::SameMinute);
        }

        let doses = self.store.list_dose_records(user_id, now.date()).await?;
        let mut examined = 0;
        let mut resolved = 0;
        for dose in doses.iter().filter(|d| d.record.status == DoseStatus::Pending) {
            examined += 1;
            let evaluation = evaluate(now, dose.time_of_day, Some(DoseStatus::Pending), &self.policy);
            if evaluation.state != DoseState::Forgotten {
                continue;
            }
            match self.store.mark_forgotten_if_pending(dose.record.id).await {
                Ok(true) => {
                    resolved += 1;
                    info!(
                        reminder_id = %dose.record.reminder_id,
                        scheduled = %dose.time_of_day,
                        "Dose window closed; marked as forgotten."
                    );
                }
                Ok(false) => {
                    debug!(record_id = %dose.record.id, "Dose was resolved concurrently, skipping.");
                }
                Err(e) => {
                    error!(record_id = %dose.record.id, "Failed to mark dose as forgotten: {}", e);
                }
            }
        }

        *self.last_minute.lock().unwrap_or_else(|p| p.into_inner()) = Some(minute);
        Ok(SweepOutcome::Swept { examined, resolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreground::testing::{at, day, Harness};
    use chrono::Duration;
    use dose_reminder_core::ports::UpsertMode;

    async fn pending(h: &Harness, hour: u32, minute: u32) -> Uuid {
        let reminder = h.add_reminder(hour, minute);
        h.store
            .upsert_dose_record(
                reminder.reminder.id,
                day(),
                DoseStatus::Pending,
                None,
                UpsertMode::IgnoreDuplicates,
            )
            .await
            .unwrap();
        reminder.reminder.id
    }

    fn status(h: &Harness, reminder_id: Uuid) -> DoseStatus {
        h.store.record_for(reminder_id, day()).unwrap().status
    }

    #[tokio::test]
    async fn closed_window_resolves_once() {
        let h = Harness::new(at(10, 1));
        let nine = pending(&h, 9, 0).await;
        let sweeper = ExpiredDoseSweeper::new(&h.ctx);

        assert_eq!(
            sweeper.sweep(h.user_id).await.unwrap(),
            SweepOutcome::Swept { examined: 1, resolved: 1 }
        );
        assert_eq!(status(&h, nine), DoseStatus::Forgotten);

        assert_eq!(sweeper.sweep(h.user_id).await.unwrap(), SweepOutcome::SameMinute);
        h.clock.advance(Duration::minutes(1));
        assert_eq!(
            sweeper.sweep(h.user_id).await.unwrap(),
            SweepOutcome::Swept { examined: 0, resolved: 0 }
        );
    }

    #[tokio::test]
    async fn future_and_open_doses_stay_pending() {
        let h = Harness::new(at(10, 0));
        let open = pending(&h, 9, 0).await;
        let later = pending(&h, 21, 0).await;
        let sweeper = ExpiredDoseSweeper::new(&h.ctx);

        sweeper.sweep(h.user_id).await.unwrap();
        assert_eq!(status(&h, open), DoseStatus::Pending);
        assert_eq!(status(&h, later), DoseStatus::Pending);

        // Walk the clock through the rest of the day.
        let mut now = at(10, 0);
        while now < at(21, 0) {
            now += Duration::minutes(13);
            h.clock.set(now.min(at(20, 59)));
            sweeper.sweep(h.user_id).await.unwrap();
            assert_eq!(status(&h, later), DoseStatus::Pending, "at {}", now);
        }
        assert_eq!(status(&h, open), DoseStatus::Forgotten);
    }

    #[tokio::test]
    async fn taken_dose_is_never_touched() {
        let h = Harness::new(at(23, 0));
        let reminder = h.add_reminder(9, 0);
        h.store
            .upsert_dose_record(
                reminder.reminder.id,
                day(),
                DoseStatus::Taken,
                None,
                UpsertMode::Overwrite,
            )
            .await
            .unwrap();

        let outcome = ExpiredDoseSweeper::new(&h.ctx).sweep(h.user_id).await.unwrap();
        assert_eq!(outcome, SweepOutcome::Swept { examined: 0, resolved: 0 });
        assert_eq!(status(&h, reminder.reminder.id), DoseStatus::Taken);
    }

    #[tokio::test]
    async fn store_failure_allows_retry_in_the_same_minute() {
        let h = Harness::new(at(12, 0));
        let nine = pending(&h, 9, 0).await;
        let sweeper = ExpiredDoseSweeper::new(&h.ctx);

        h.store.set_unavailable(true);
        assert!(sweeper.sweep(h.user_id).await.is_err());
        h.store.set_unavailable(false);
        assert!(matches!(
            sweeper.sweep(h.user_id).await.unwrap(),
            SweepOutcome::Swept { resolved: 1, .. }
        ));
        assert_eq!(status(&h, nine), DoseStatus::Forgotten);
    }
}
