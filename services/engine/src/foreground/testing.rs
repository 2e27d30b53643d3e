//! Shared fixtures for the foreground unit tests.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use dose_reminder_core::domain::{ActiveReminder, NotificationPayload, Reminder};
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::{InMemoryDoseStore, InMemoryLocalStorage, ManualClock, RecordingPresenter};
use crate::agent::{AgentDeps, DeliveryAgent};
use crate::config::Config;
use crate::foreground::scheduler::NotificationScheduler;
use crate::foreground::state::EngineContext;

pub(crate) fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
}

pub(crate) fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, 0).unwrap()
}

pub(crate) fn payload_for(medication_id: Uuid) -> NotificationPayload {
    NotificationPayload {
        medication_id,
        medication_name: "Amoxicillin".to_string(),
        dosage: "250mg".to_string(),
    }
}

pub(crate) struct Harness {
    pub ctx: EngineContext,
    pub store: Arc<InMemoryDoseStore>,
    pub local: Arc<InMemoryLocalStorage>,
    pub clock: Arc<ManualClock>,
    pub presenter: Arc<RecordingPresenter>,
    pub scheduler: Arc<NotificationScheduler>,
    pub user_id: Uuid,
}

impl Harness {
    pub fn new(now: NaiveDateTime) -> Self {
        Self::with_local(now, Arc::new(InMemoryLocalStorage::new()))
    }

    pub fn with_local(now: NaiveDateTime, local: Arc<InMemoryLocalStorage>) -> Self {
        let store = Arc::new(InMemoryDoseStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let presenter = Arc::new(RecordingPresenter::new());
        let config = Config::default();
        let (agent, _task) = DeliveryAgent::spawn(AgentDeps {
            presenter: presenter.clone(),
            store: store.clone(),
            clock: clock.clone(),
            snooze_minutes: config.snooze_minutes,
        });
        let ctx = EngineContext {
            store: store.clone(),
            local: local.clone(),
            clock: clock.clone(),
            agent,
            config: Arc::new(config),
        };
        let scheduler = Arc::new(NotificationScheduler::new(&ctx));
        Self {
            ctx,
            store,
            local,
            clock,
            presenter,
            scheduler,
            user_id: Uuid::new_v4(),
        }
    }

    /// Registers an active reminder for the harness user.
    pub fn add_reminder(&self, h: u32, m: u32) -> ActiveReminder {
        let reminder = ActiveReminder {
            reminder: Reminder {
                id: Uuid::new_v4(),
                medication_id: Uuid::new_v4(),
                time_of_day: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
                recurrence: "daily".to_string(),
                active: true,
            },
            medication_name: "Amoxicillin".to_string(),
            dosage: "250mg".to_string(),
        };
        self.store.insert_reminder(self.user_id, reminder.clone());
        reminder
    }
}
