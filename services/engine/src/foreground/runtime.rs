//! services/engine/src/foreground/runtime.rs
//!
//! The foreground context for one signed-in user.
//!
//! `start` runs the initial-load triggers and spawns the recurring jobs;
//! `on_visibility_regained` funnels into the same guarded entry points;
//! `shutdown` is logout: every timer stops, the armed schedule is cleared and
//! the last-reset marker is forgotten so the next sign-in re-arms.

use chrono::NaiveDate;
use dose_reminder_core::domain::{DailyDose, DoseStatus, FeedbackPreferences, NotificationPayload};
use dose_reminder_core::ports::{PortResult, UpsertMode};
use dose_reminder_core::window::{evaluate, DoseEvaluation};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::foreground::actions::DoseActions;
use crate::foreground::analytics::start_analytics_forwarder;
use crate::foreground::reset::DailyResetCoordinator;
use crate::foreground::scheduler::NotificationScheduler;
use crate::foreground::state::EngineContext;
use crate::foreground::sweeper::ExpiredDoseSweeper;

pub struct ForegroundRuntime {
    ctx: EngineContext,
    user_id: Uuid,
    scheduler: Arc<NotificationScheduler>,
    reset: Arc<DailyResetCoordinator>,
    sweeper: Arc<ExpiredDoseSweeper>,
    actions: DoseActions,
    refreshed: watch::Receiver<Option<NaiveDate>>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ForegroundRuntime {
    pub async fn start(ctx: EngineContext, user_id: Uuid) -> Self {
        info!(%user_id, "Starting foreground runtime.");
        let token = CancellationToken::new();
        let scheduler = Arc::new(NotificationScheduler::new(&ctx));

        let (refresh_tx, refreshed) = watch::channel(None);
        let reset = Arc::new(
            DailyResetCoordinator::new(&ctx, scheduler.clone()).with_completion(Box::new(
                move |date| {
                    let _ = refresh_tx.send(Some(date));
                },
            )),
        );
        let sweeper = Arc::new(ExpiredDoseSweeper::new(&ctx));
        let actions = DoseActions::new(&ctx, scheduler.clone());

        // --- 1. Subscribe before anything is posted to the agent ---
        let forwarder = start_analytics_forwarder(
            ctx.store.clone(),
            ctx.clock.clone(),
            user_id,
            ctx.agent.subscribe(),
            token.clone(),
        );

        // --- 2. Restore what a previous run armed ---
        if let Err(e) = scheduler.load_from_storage().await {
            error!("Failed to restore notification schedule: {}", e);
        }

        let mut runtime = Self {
            user_id,
            scheduler,
            actions,
            refreshed,
            tasks: vec![forwarder],
            reset,
            sweeper,
            token,
            ctx,
        };

        // --- 3. Initial-load triggers ---
        runtime.run_triggers().await;

        // --- 4. Recurring jobs ---
        let reset_job = start_reset_check_job(
            runtime.reset.clone(),
            user_id,
            runtime.ctx.config.reset_check_interval,
            runtime.token.clone(),
        );
        let sweep_job = start_sweep_job(
            runtime.sweeper.clone(),
            user_id,
            runtime.ctx.config.sweep_interval,
            runtime.token.clone(),
        );
        runtime.tasks.push(reset_job);
        runtime.tasks.push(sweep_job);
        runtime
    }

    /// The host app came back to the foreground.
    pub async fn on_visibility_regained(&self) {
        info!(user_id = %self.user_id, "Visibility regained.");
        self.run_triggers().await;
    }

    async fn run_triggers(&self) {
        if let Err(e) = self.reset.run_if_needed(self.user_id).await {
            error!(user_id = %self.user_id, "Daily reset failed: {}", e);
        }
        if let Err(e) = self.sweeper.sweep(self.user_id).await {
            error!(user_id = %self.user_id, "Expired dose sweep failed: {}", e);
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn actions(&self) -> &DoseActions {
        &self.actions
    }

    /// Changes to `Some(date)` each time a daily reset completes.
    pub fn refreshed(&self) -> watch::Receiver<Option<NaiveDate>> {
        self.refreshed.clone()
    }

    /// Today's doses with their state derived afresh from the clock.
    ///
    /// Missing records are created lazily as `pending`, the same way the reset would.
    pub async fn today(&self) -> PortResult<Vec<(DailyDose, DoseEvaluation)>> {
        let now = self.ctx.clock.now();
        let today = now.date();
        let reminders = self.ctx.store.list_active_reminders(self.user_id).await?;
        let mut doses = self.ctx.store.list_dose_records(self.user_id, today).await?;

        let missing: Vec<_> = reminders
            .iter()
            .filter(|r| !doses.iter().any(|d| d.record.reminder_id == r.reminder.id))
            .collect();
        if !missing.is_empty() {
            for r in missing {
                self.ctx
                    .store
                    .upsert_dose_record(
                        r.reminder.id,
                        today,
                        DoseStatus::Pending,
                        None,
                        UpsertMode::IgnoreDuplicates,
                    )
                    .await?;
            }
            doses = self.ctx.store.list_dose_records(self.user_id, today).await?;
        }

        let policy = self.ctx.policy();
        Ok(doses
            .into_iter()
            .map(|d| {
                let evaluation = evaluate(now, d.time_of_day, Some(d.record.status), &policy);
                (d, evaluation)
            })
            .collect())
    }

    /// Snoozes from inside the app, with the configured snooze length.
    pub async fn snooze(&self, reminder_id: Uuid, payload: NotificationPayload) -> PortResult<()> {
        self.scheduler
            .snooze(reminder_id, payload, self.ctx.config.snooze_minutes)
            .await
            .map(|_| ())
    }

    pub async fn feedback_preferences(&self) -> PortResult<FeedbackPreferences> {
        self.ctx.local.feedback_preferences().await
    }

    pub async fn set_feedback_preferences(&self, prefs: FeedbackPreferences) -> PortResult<()> {
        self.ctx.local.set_feedback_preferences(prefs).await
    }

    /// Logout. Disarms the schedule and drops the last-reset marker, then stops every job.
    pub async fn shutdown(self) {
        if let Err(e) = self.scheduler.clear_all().await {
            error!("Failed to clear notification schedule on shutdown: {}", e);
        }
        if let Err(e) = self.ctx.local.clear_last_reset_date().await {
            error!("Failed to clear last-reset marker on shutdown: {}", e);
        }
        self.stop().await;
    }

    /// Stops every job. The armed schedule stays persisted for the next start.
    pub async fn stop(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Foreground task ended abnormally: {}", e);
            }
        }
        info!(user_id = %self.user_id, "Foreground runtime stopped.");
    }
}

//=========================================================================================
// Recurring Jobs
//=========================================================================================

fn recurring(period: Duration) -> tokio::time::Interval {
    // The initial-load trigger already ran, so the first tick is one period out.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Catches a midnight rollover while the app stays open.
pub fn start_reset_check_job(
    reset: Arc<DailyResetCoordinator>,
    user_id: Uuid,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = recurring(period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = reset.run_if_needed(user_id).await {
                        error!(%user_id, "Scheduled daily reset failed: {}", e);
                    }
                }
            }
        }
    })
}

pub fn start_sweep_job(
    sweeper: Arc<ExpiredDoseSweeper>,
    user_id: Uuid,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = recurring(period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = sweeper.sweep(user_id).await {
                        error!(%user_id, "Scheduled sweep failed: {}", e);
                    }
                }
            }
        }
    })
}
