//! services/engine/src/agent/delivery.rs
//!
//! The Delivery Agent's event loop.
//!
//! Per fired instance the agent walks `armed -> delivered -> {taken, snoozed -> armed, dismissed}`.
//! Every timer is a sleep raced against its own `CancellationToken`. A timer that
//! loses the race to a cancel or a re-arm still may have queued its `Fire`
//! command, so each arming carries a generation number and stale fires are dropped.

use chrono::Duration as ChronoDuration;
use dose_reminder_core::domain::{
    AnalyticsEventKind, DoseStatus, NotificationPayload, ScheduleKey,
};
use dose_reminder_core::ports::{
    Clock, DoseStore, NotificationPresenter, PortResult, PresentedNotification, UpsertMode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{AgentMessage, ForegroundMessage, ScheduledEntryDto, TrackedEvent};
use super::{AgentCommand, AgentHandle, Interaction};

pub const CONFIRMED_TAG: &str = "dose-confirmed";
pub const ERROR_TAG: &str = "dose-error";
pub const SNOOZED_TAG: &str = "dose-snoozed";

/// Collaborators the agent needs. The store is used for best-effort direct writes only.
#[derive(Clone)]
pub struct AgentDeps {
    pub presenter: Arc<dyn NotificationPresenter>,
    pub store: Arc<dyn DoseStore>,
    pub clock: Arc<dyn Clock>,
    pub snooze_minutes: i64,
}

struct ArmedTimer {
    payload: NotificationPayload,
    fire_at: chrono::NaiveDateTime,
    generation: u64,
    token: CancellationToken,
}

pub struct DeliveryAgent {
    deps: AgentDeps,
    timers_tx: mpsc::WeakSender<AgentCommand>,
    events: broadcast::Sender<AgentMessage>,
    armed: HashMap<ScheduleKey, ArmedTimer>,
    delivered: HashMap<ScheduleKey, NotificationPayload>,
    next_generation: u64,
}

impl DeliveryAgent {
    /// Starts the agent on its own task and returns a handle to it.
    pub fn spawn(deps: AgentDeps) -> (AgentHandle, JoinHandle<()>) {
        let (handle, rx) = AgentHandle::channel();
        let agent = DeliveryAgent {
            deps,
            timers_tx: handle.weak_sender(),
            events: handle.events_sender(),
            armed: HashMap::new(),
            delivered: HashMap::new(),
            next_generation: 0,
        };
        let task = tokio::spawn(agent.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<AgentCommand>) {
        info!("Delivery agent started.");
        while let Some(command) = rx.recv().await {
            match command {
                AgentCommand::Foreground(msg) => self.handle_foreground(msg).await,
                AgentCommand::GetScheduled(reply) => {
                    let _ = reply.send(self.scheduled_entries());
                }
                AgentCommand::Interact { key, interaction } => {
                    self.handle_interaction(key, interaction).await
                }
                AgentCommand::Fire { key, generation } => self.fire(key, generation).await,
                AgentCommand::Shutdown => break,
            }
        }

        // --- Cleanup ---
        for (_, timer) in self.armed.drain() {
            timer.token.cancel();
        }
        info!("Delivery agent stopped.");
    }

    //=====================================================================================
    // Foreground Messages
    //=====================================================================================

    async fn handle_foreground(&mut self, msg: ForegroundMessage) {
        match msg {
            ForegroundMessage::ScheduleNotification {
                reminder_id,
                payload,
                delay_ms,
            } => {
                let key = ScheduleKey::from(reminder_id);
                self.arm(key, payload.into(), Duration::from_millis(delay_ms));
            }
            ForegroundMessage::CancelNotification { reminder_id } => {
                let key = ScheduleKey::from(reminder_id);
                if let Some(timer) = self.armed.remove(&key) {
                    timer.token.cancel();
                    debug!(key = %key, "Cancelled armed timer.");
                }
                self.delivered.remove(&key);
                if let Err(e) = self.deps.presenter.close(&key.tag()).await {
                    warn!(key = %key, "Failed to close notification: {}", e);
                }
            }
            ForegroundMessage::TrackAnalytics(event) => {
                self.broadcast(AgentMessage::TrackAnalytics(event));
            }
            ForegroundMessage::GetScheduled => {
                let entries = self.scheduled_entries();
                self.broadcast(AgentMessage::Scheduled { entries });
            }
        }
    }

    fn scheduled_entries(&self) -> Vec<ScheduledEntryDto> {
        let mut entries: Vec<ScheduledEntryDto> = self
            .armed
            .iter()
            .map(|(key, timer)| ScheduledEntryDto {
                reminder_id: key.as_str().to_string(),
                payload: (&timer.payload).into(),
                fire_at: timer.fire_at,
            })
            .collect();
        entries.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then(a.reminder_id.cmp(&b.reminder_id)));
        entries
    }

    //=====================================================================================
    // Timers
    //=====================================================================================

    /// Arms a timer for `key`, replacing any timer already armed for it.
    fn arm(&mut self, key: ScheduleKey, payload: NotificationPayload, delay: Duration) {
        if let Some(previous) = self.armed.remove(&key) {
            previous.token.cancel();
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let token = CancellationToken::new();
        let fire_at = self.deps.clock.now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());

        let timer_token = token.clone();
        let timers_tx = self.timers_tx.clone();
        let timer_key = key.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(tx) = timers_tx.upgrade() {
                        let _ = tx.send(AgentCommand::Fire { key: timer_key, generation }).await;
                    }
                }
            }
        });

        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Armed timer.");
        self.armed.insert(
            key,
            ArmedTimer {
                payload,
                fire_at,
                generation,
                token,
            },
        );
    }

    async fn fire(&mut self, key: ScheduleKey, generation: u64) {
        let current = self
            .armed
            .get(&key)
            .map_or(false, |timer| timer.generation == generation);
        if !current {
            debug!(key = %key, "Dropping stale timer fire.");
            return;
        }
        let Some(ArmedTimer { payload, .. }) = self.armed.remove(&key) else {
            return;
        };

        let notification = PresentedNotification {
            tag: key.tag(),
            title: "💊 Time for your medication".to_string(),
            body: format!("{} - {}", payload.medication_name, payload.dosage),
            actions: vec![
                ("mark-taken".to_string(), "✓ Mark taken".to_string()),
                (
                    "snooze".to_string(),
                    format!("⏰ Snooze {} min", self.deps.snooze_minutes),
                ),
            ],
            require_interaction: true,
            silent: false,
        };

        if let Err(e) = self.deps.presenter.show(notification).await {
            error!(key = %key, "Failed to present reminder: {}", e);
            return;
        }

        info!(key = %key, medication = %payload.medication_name, "Reminder delivered.");
        let mut event = self.event(AnalyticsEventKind::Delivered, &key, &payload);
        if key.is_snooze() {
            event = event.with_metadata("snoozed", "true");
        }
        self.broadcast(AgentMessage::TrackAnalytics(event));
        self.delivered.insert(key, payload);
    }

    //=====================================================================================
    // User Interaction
    //=====================================================================================

    async fn handle_interaction(&mut self, key: ScheduleKey, interaction: Interaction) {
        let Some(payload) = self.delivered.remove(&key) else {
            warn!(key = %key, ?interaction, "Interaction for a notification that is not on screen, dropping.");
            return;
        };
        let Some(reminder_id) = key.reminder_id() else {
            warn!(key = %key, "Notification key does not reference a reminder, dropping.");
            return;
        };

        if interaction != Interaction::Dismiss {
            let clicked = self
                .event(AnalyticsEventKind::Clicked, &key, &payload)
                .with_metadata("action", interaction.action_name());
            self.broadcast(AgentMessage::TrackAnalytics(clicked));
        }
        if let Err(e) = self.deps.presenter.close(&key.tag()).await {
            warn!(key = %key, "Failed to close notification: {}", e);
        }

        match interaction {
            Interaction::MarkTaken => self.mark_taken(key, reminder_id, payload).await,
            Interaction::Snooze => self.snooze(key, reminder_id, payload).await,
            Interaction::Open => {
                self.broadcast(AgentMessage::FocusRequested {
                    reminder_id: Some(reminder_id),
                });
            }
            Interaction::Dismiss => {
                let dismissed = self.event(AnalyticsEventKind::Dismissed, &key, &payload);
                self.broadcast(AgentMessage::TrackAnalytics(dismissed));
            }
        }
    }

    async fn mark_taken(&mut self, key: ScheduleKey, reminder_id: Uuid, payload: NotificationPayload) {
        let taken = self.event(AnalyticsEventKind::ActionTaken, &key, &payload);
        self.broadcast(AgentMessage::TrackAnalytics(taken));

        // The dose is resolved; a pending snooze would only nag.
        if let Some(timer) = self.armed.remove(&ScheduleKey::snooze_of(reminder_id)) {
            timer.token.cancel();
        }

        let confirmation = match self.record_taken(reminder_id).await {
            Ok(()) => PresentedNotification {
                tag: CONFIRMED_TAG.to_string(),
                title: "✓ Dose confirmed".to_string(),
                body: format!("{} marked as taken", payload.medication_name),
                actions: Vec::new(),
                require_interaction: false,
                silent: true,
            },
            Err(e) => {
                error!(%reminder_id, "Failed to record taken dose: {}", e);
                PresentedNotification {
                    tag: ERROR_TAG.to_string(),
                    title: "Could not record your dose".to_string(),
                    body: format!("Open the app to mark {} as taken.", payload.medication_name),
                    actions: Vec::new(),
                    require_interaction: false,
                    silent: false,
                }
            }
        };
        if let Err(e) = self.deps.presenter.show(confirmation).await {
            warn!(%reminder_id, "Failed to present confirmation: {}", e);
        }
    }

    /// Read-then-upsert of today's record. An already taken dose is left alone.
    async fn record_taken(&self, reminder_id: Uuid) -> PortResult<()> {
        let now = self.deps.clock.now();
        let date = now.date();

        if let Some(existing) = self.deps.store.find_dose_record(reminder_id, date).await? {
            if existing.status == DoseStatus::Taken {
                debug!(%reminder_id, %date, "Dose already recorded as taken.");
                return Ok(());
            }
        }

        self.deps
            .store
            .upsert_dose_record(
                reminder_id,
                date,
                DoseStatus::Taken,
                Some(now.time()),
                UpsertMode::Overwrite,
            )
            .await?;
        info!(%reminder_id, %date, "Dose marked as taken from notification.");
        Ok(())
    }

    async fn snooze(&mut self, key: ScheduleKey, reminder_id: Uuid, payload: NotificationPayload) {
        let minutes = self.deps.snooze_minutes;
        let snoozed = self
            .event(AnalyticsEventKind::ActionSnoozed, &key, &payload)
            .with_metadata("minutes", minutes.to_string());
        self.broadcast(AgentMessage::TrackAnalytics(snoozed));

        let body = format!(
            "We'll remind you about {} again in {} minutes.",
            payload.medication_name, minutes
        );
        let delay = Duration::from_secs(u64::try_from(minutes).unwrap_or(0) * 60);
        self.arm(ScheduleKey::snooze_of(reminder_id), payload, delay);

        let confirmation = PresentedNotification {
            tag: SNOOZED_TAG.to_string(),
            title: "⏰ Reminder snoozed".to_string(),
            body,
            actions: Vec::new(),
            require_interaction: false,
            silent: true,
        };
        if let Err(e) = self.deps.presenter.show(confirmation).await {
            warn!(%reminder_id, "Failed to present snooze confirmation: {}", e);
        }
    }

    //=====================================================================================
    // Helpers
    //=====================================================================================

    fn event(&self, kind: AnalyticsEventKind, key: &ScheduleKey, payload: &NotificationPayload) -> TrackedEvent {
        TrackedEvent::new(
            kind,
            key.reminder_id(),
            Some(payload.medication_id),
            self.deps.clock.now_utc(),
        )
    }

    fn broadcast(&self, msg: AgentMessage) {
        // No subscribers simply means no foreground context is connected right now.
        if self.events.send(msg).is_err() {
            debug!("No foreground context connected; message dropped.");
        }
    }
}
