//! services/engine/src/foreground/scheduler.rs
//!
//! The Notification Scheduler owns the device's armed schedule.
//!
//! Every armed entry is persisted to local storage keyed by its schedule key
//! and mirrored to the Delivery Agent, which keeps the real timers. The
//! scheduler itself never fires anything.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use dose_reminder_core::domain::{
    AnalyticsEventKind, NotificationPayload, ScheduleKey, ScheduledNotification,
};
use dose_reminder_core::ports::{Clock, LocalStorage, PortResult};
use dose_reminder_core::window::{todays_occurrence, WindowPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::protocol::{ForegroundMessage, PayloadDto, TrackedEvent};
use crate::agent::AgentHandle;
use crate::foreground::state::EngineContext;

/// Result of a `schedule` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Armed { fire_at: NaiveDateTime },
    /// The key was already armed; nothing changed.
    AlreadyArmed,
    /// Today's window already closed. Nothing is deferred to tomorrow.
    Missed,
}

/// When a reminder at `time_of_day` should fire, given `now`.
///
/// Today's occurrence if it is still ahead; `now` if it has passed but the dose
/// is still inside its window; `None` once the window has closed.
pub fn fire_time_for(
    now: NaiveDateTime,
    time_of_day: NaiveTime,
    policy: &WindowPolicy,
) -> Option<NaiveDateTime> {
    let occurrence = todays_occurrence(now, time_of_day);
    if occurrence >= now {
        return Some(occurrence);
    }
    let (_, window_end) = policy.window_for(now, time_of_day);
    if now <= window_end {
        Some(now)
    } else {
        None
    }
}

pub struct NotificationScheduler {
    local: Arc<dyn LocalStorage>,
    clock: Arc<dyn Clock>,
    agent: AgentHandle,
    policy: WindowPolicy,
    entries: Mutex<BTreeMap<ScheduleKey, ScheduledNotification>>,
}

impl NotificationScheduler {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            local: ctx.local.clone(),
            clock: ctx.clock.clone(),
            agent: ctx.agent.clone(),
            policy: ctx.policy(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    //=====================================================================================
    // Public Operations
    //=====================================================================================

    /// Arms a reminder for today. Scheduling an already armed reminder is a no-op.
    pub async fn schedule(
        &self,
        reminder_id: Uuid,
        payload: NotificationPayload,
        time_of_day: NaiveTime,
    ) -> PortResult<ScheduleOutcome> {
        let key = ScheduleKey::for_reminder(reminder_id);
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        if entries.contains_key(&key) {
            debug!(%reminder_id, "Reminder already armed.");
            return Ok(ScheduleOutcome::AlreadyArmed);
        }

        let Some(fire_at) = fire_time_for(now, time_of_day, &self.policy) else {
            info!(%reminder_id, %time_of_day, "Window already closed today, not arming.");
            return Ok(ScheduleOutcome::Missed);
        };

        let entry = ScheduledNotification {
            key: key.clone(),
            payload,
            fire_at,
        };
        entries.insert(key, entry.clone());
        self.persist(&entries).await?;
        drop(entries);

        self.mirror(&entry, now).await;
        self.track(AnalyticsEventKind::Scheduled, &entry).await;
        info!(%reminder_id, %fire_at, "Reminder scheduled.");
        Ok(ScheduleOutcome::Armed { fire_at })
    }

    /// Removes the reminder's entry and its snooze instance, and withdraws
    /// anything the agent still shows for them.
    pub async fn cancel(&self, reminder_id: Uuid) -> PortResult<()> {
        let keys = [
            ScheduleKey::for_reminder(reminder_id),
            ScheduleKey::snooze_of(reminder_id),
        ];
        self.cancel_keys(&keys).await
    }

    pub async fn cancel_all_for_medication(&self, medication_id: Uuid) -> PortResult<usize> {
        let keys: Vec<ScheduleKey> = {
            let entries = self.entries.lock().await;
            entries
                .values()
                .filter(|e| e.payload.medication_id == medication_id)
                .map(|e| e.key.clone())
                .collect()
        };
        self.cancel_keys(&keys).await?;
        info!(%medication_id, cancelled = keys.len(), "Cancelled reminders for medication.");
        Ok(keys.len())
    }

    /// Arms a derived `-snooze` entry `minutes` from now. The original entry and
    /// the dose record are left alone.
    pub async fn snooze(
        &self,
        reminder_id: Uuid,
        payload: NotificationPayload,
        minutes: i64,
    ) -> PortResult<NaiveDateTime> {
        let key = ScheduleKey::snooze_of(reminder_id);
        let now = self.clock.now();
        let fire_at = now + Duration::minutes(minutes.max(0));
        let entry = ScheduledNotification {
            key: key.clone(),
            payload,
            fire_at,
        };

        {
            let mut entries = self.entries.lock().await;
            entries.insert(key, entry.clone());
            self.persist(&entries).await?;
        }
        self.mirror(&entry, now).await;
        info!(%reminder_id, %fire_at, "Reminder snoozed.");
        Ok(fire_at)
    }

    pub async fn list_scheduled(&self) -> Vec<ScheduledNotification> {
        self.entries.lock().await.values().cloned().collect()
    }

    //=====================================================================================
    // Housekeeping
    //=====================================================================================

    /// Restores the schedule saved by a previous run and re-mirrors what is still ahead.
    pub async fn load_from_storage(&self) -> PortResult<usize> {
        let stored = self.local.load_schedule().await?;
        {
            let mut entries = self.entries.lock().await;
            entries.clear();
            for entry in stored {
                entries.insert(entry.key.clone(), entry);
            }
        }
        self.clean_expired().await?;

        let now = self.clock.now();
        let restored = self.list_scheduled().await;
        for entry in &restored {
            self.mirror(entry, now).await;
        }
        info!(restored = restored.len(), "Restored notification schedule.");
        Ok(restored.len())
    }

    /// Drops entries whose fire time has passed. Returns how many were dropped.
    pub async fn clean_expired(&self) -> PortResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.fire_at >= now);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await?;
            debug!(removed, "Dropped expired schedule entries.");
        }
        Ok(removed)
    }

    /// Disarms everything, locally and in the agent.
    pub async fn clear_all(&self) -> PortResult<()> {
        let keys: Vec<ScheduleKey> = self.entries.lock().await.keys().cloned().collect();
        self.cancel_keys(&keys).await
    }

    //=====================================================================================
    // Helpers
    //=====================================================================================

    async fn cancel_keys(&self, keys: &[ScheduleKey]) -> PortResult<()> {
        {
            let mut entries = self.entries.lock().await;
            for key in keys {
                entries.remove(key);
            }
            self.persist(&entries).await?;
        }
        for key in keys {
            let msg = ForegroundMessage::CancelNotification {
                reminder_id: key.as_str().to_string(),
            };
            if self.agent.post(msg).await.is_err() {
                warn!(key = %key, "Delivery agent unavailable, cancel not mirrored.");
            }
        }
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<ScheduleKey, ScheduledNotification>) -> PortResult<()> {
        let snapshot: Vec<ScheduledNotification> = entries.values().cloned().collect();
        self.local.save_schedule(&snapshot).await
    }

    async fn mirror(&self, entry: &ScheduledNotification, now: NaiveDateTime) {
        let delay_ms = (entry.fire_at - now).num_milliseconds().max(0) as u64;
        let msg = ForegroundMessage::ScheduleNotification {
            reminder_id: entry.key.as_str().to_string(),
            payload: PayloadDto::from(&entry.payload),
            delay_ms,
        };
        if self.agent.post(msg).await.is_err() {
            warn!(key = %entry.key, "Delivery agent unavailable, entry kept locally only.");
        }
    }

    async fn track(&self, kind: AnalyticsEventKind, entry: &ScheduledNotification) {
        let event = TrackedEvent::new(
            kind,
            entry.key.reminder_id(),
            Some(entry.payload.medication_id),
            self.clock.now_utc(),
        )
        .with_metadata("fire_at", entry.fire_at.to_string());
        if self.agent.post(ForegroundMessage::TrackAnalytics(event)).await.is_err() {
            warn!(key = %entry.key, "Delivery agent unavailable, analytics event dropped.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreground::testing::{at, payload_for, Harness};

    #[test]
    fn fire_time_rules() {
        let policy = WindowPolicy::default();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(fire_time_for(at(8, 0), nine, &policy), Some(at(9, 0)));
        assert_eq!(fire_time_for(at(9, 0), nine, &policy), Some(at(9, 0)));
        // Past but still in the window: fire right away.
        assert_eq!(fire_time_for(at(9, 30), nine, &policy), Some(at(9, 30)));
        // Window closed: missed, never tomorrow.
        assert_eq!(fire_time_for(at(10, 1), nine, &policy), None);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_twice_arms_once() {
        let h = Harness::new(at(8, 0));
        let reminder_id = Uuid::new_v4();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();

        let first = h
            .scheduler
            .schedule(reminder_id, payload_for(Uuid::new_v4()), nine)
            .await
            .unwrap();
        assert_eq!(first, ScheduleOutcome::Armed { fire_at: at(9, 0) });
        let second = h
            .scheduler
            .schedule(reminder_id, payload_for(Uuid::new_v4()), nine)
            .await
            .unwrap();
        assert_eq!(second, ScheduleOutcome::AlreadyArmed);

        assert_eq!(h.scheduler.list_scheduled().await.len(), 1);
        assert_eq!(h.local.load_schedule().await.unwrap().len(), 1);
        let armed = h.ctx.agent.get_scheduled().await.unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].reminder_id, reminder_id.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_is_not_armed() {
        let h = Harness::new(at(11, 0));
        let outcome = h
            .scheduler
            .schedule(
                Uuid::new_v4(),
                payload_for(Uuid::new_v4()),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Missed);
        assert!(h.scheduler.list_scheduled().await.is_empty());
        assert!(h.ctx.agent.get_scheduled().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_for_medication_matches_payload() {
        let h = Harness::new(at(6, 0));
        let medication = Uuid::new_v4();
        let other = Uuid::new_v4();
        for (med, hour) in [(medication, 8), (medication, 20), (other, 12)] {
            h.scheduler
                .schedule(
                    Uuid::new_v4(),
                    payload_for(med),
                    NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                )
                .await
                .unwrap();
        }

        let cancelled = h.scheduler.cancel_all_for_medication(medication).await.unwrap();
        assert_eq!(cancelled, 2);
        let left = h.scheduler.list_scheduled().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payload.medication_id, other);
        assert_eq!(h.ctx.agent.get_scheduled().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snooze_adds_a_derived_entry() {
        let h = Harness::new(at(9, 2));
        let reminder_id = Uuid::new_v4();
        h.scheduler
            .schedule(
                reminder_id,
                payload_for(Uuid::new_v4()),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        let fire_at = h
            .scheduler
            .snooze(reminder_id, payload_for(Uuid::new_v4()), 5)
            .await
            .unwrap();
        assert_eq!(fire_at, at(9, 7));

        let keys: Vec<String> = h
            .scheduler
            .list_scheduled()
            .await
            .into_iter()
            .map(|e| e.key.to_string())
            .collect();
        assert!(keys.contains(&reminder_id.to_string()));
        assert!(keys.contains(&format!("{}-snooze", reminder_id)));

        h.scheduler.cancel(reminder_id).await.unwrap();
        assert!(h.scheduler.list_scheduled().await.is_empty());
        assert!(h.ctx.agent.get_scheduled().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reload_drops_expired_and_remirrors_the_rest() {
        let h = Harness::new(at(7, 0));
        for hour in [8, 20] {
            h.scheduler
                .schedule(
                    Uuid::new_v4(),
                    payload_for(Uuid::new_v4()),
                    NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                )
                .await
                .unwrap();
        }

        // A fresh foreground context and agent, three hours later.
        let restarted = Harness::with_local(at(10, 0), h.local.clone());
        let restored = restarted.scheduler.load_from_storage().await.unwrap();
        assert_eq!(restored, 1);
        assert_eq!(restarted.local.load_schedule().await.unwrap().len(), 1);
        let armed = restarted.ctx.agent.get_scheduled().await.unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].fire_at, at(20, 0));
    }
}
