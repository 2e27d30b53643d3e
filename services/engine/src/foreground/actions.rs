//! services/engine/src/foreground/actions.rs
//!
//! Explicit user decisions about a dose, made from the foreground UI.

use dose_reminder_core::domain::Reminder;
use dose_reminder_core::ports::{Clock, DoseStore, UpsertMode};
use dose_reminder_core::window::{can_perform_action, evaluate, DoseAction, DoseEvaluation, WindowPolicy};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DoseActionError;
use crate::foreground::scheduler::NotificationScheduler;
use crate::foreground::state::EngineContext;

pub struct DoseActions {
    store: Arc<dyn DoseStore>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
    scheduler: Arc<NotificationScheduler>,
}

impl DoseActions {
    pub fn new(ctx: &EngineContext, scheduler: Arc<NotificationScheduler>) -> Self {
        Self {
            store: ctx.store.clone(),
            clock: ctx.clock.clone(),
            policy: ctx.policy(),
            scheduler,
        }
    }

    /// Validates and records `action` for today's occurrence of `reminder`.
    ///
    /// A rejected action makes no store call. On success the reminder's armed
    /// notification and any snooze instance are cancelled.
    pub async fn mark(
        &self,
        user_id: Uuid,
        reminder: &Reminder,
        action: DoseAction,
    ) -> Result<DoseEvaluation, DoseActionError> {
        let now = self.clock.now();
        let date = now.date();

        let saved = self
            .store
            .find_dose_record(reminder.id, date)
            .await?
            .map(|r| r.status);
        can_perform_action(now, reminder.time_of_day, action, saved, &self.policy).map_err(
            |rejection| DoseActionError::Rejected {
                reason: rejection.to_string(),
            },
        )?;

        let status = action.target_status();
        self.store
            .upsert_dose_record(reminder.id, date, status, Some(now.time()), UpsertMode::Overwrite)
            .await?;
        info!(%user_id, reminder_id = %reminder.id, %date, %status, "Dose resolved by user.");

        if let Err(e) = self.scheduler.cancel(reminder.id).await {
            warn!(reminder_id = %reminder.id, "Failed to cancel notification after resolving dose: {}", e);
        }

        Ok(evaluate(now, reminder.time_of_day, Some(status), &self.policy))
    }
}
