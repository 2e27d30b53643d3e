//! services/engine/src/adapters/memory.rs
//!
//! An in-memory `DoseStore` with the same conflict semantics as the Postgres
//! adapter. Used by the unit and end-to-end test suites.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use dose_reminder_core::domain::{ActiveReminder, AnalyticsEvent, DailyDose, DoseRecord, DoseStatus};
use dose_reminder_core::ports::{DoseStore, PortError, PortResult, UpsertMode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryDoseStore {
    reminders: Mutex<Vec<(Uuid, ActiveReminder)>>,
    records: Mutex<Vec<DoseRecord>>,
    analytics: Mutex<Vec<AnalyticsEvent>>,
    unavailable: AtomicBool,
    failing_upserts: Mutex<HashSet<Uuid>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl InMemoryDoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_reminder(&self, user_id: Uuid, reminder: ActiveReminder) {
        lock(&self.reminders).push((user_id, reminder));
    }

    /// Flips the reminder's `active` flag, e.g. to simulate deactivation.
    pub fn set_reminder_active(&self, reminder_id: Uuid, active: bool) {
        for (_, r) in lock(&self.reminders).iter_mut() {
            if r.reminder.id == reminder_id {
                r.reminder.active = active;
            }
        }
    }

    pub fn records(&self) -> Vec<DoseRecord> {
        lock(&self.records).clone()
    }

    pub fn record_for(&self, reminder_id: Uuid, date: NaiveDate) -> Option<DoseRecord> {
        lock(&self.records)
            .iter()
            .find(|r| r.reminder_id == reminder_id && r.date == date)
            .cloned()
    }

    pub fn analytics_events(&self) -> Vec<AnalyticsEvent> {
        lock(&self.analytics).clone()
    }

    /// While set, every port call fails with `PortError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// While set, upserts for this one reminder fail with `PortError::Unavailable`.
    pub fn set_upsert_failing(&self, reminder_id: Uuid, failing: bool) {
        let mut failing_upserts = lock(&self.failing_upserts);
        if failing {
            failing_upserts.insert(reminder_id);
        } else {
            failing_upserts.remove(&reminder_id);
        }
    }

    fn check_available(&self) -> PortResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn reminder_owner(&self, reminder_id: Uuid) -> Option<(Uuid, NaiveTime)> {
        lock(&self.reminders)
            .iter()
            .find(|(_, r)| r.reminder.id == reminder_id)
            .map(|(user, r)| (*user, r.reminder.time_of_day))
    }
}

#[async_trait]
impl DoseStore for InMemoryDoseStore {
    async fn list_active_reminders(&self, user_id: Uuid) -> PortResult<Vec<ActiveReminder>> {
        self.check_available()?;
        let mut active: Vec<ActiveReminder> = lock(&self.reminders)
            .iter()
            .filter(|(owner, r)| *owner == user_id && r.reminder.active)
            .map(|(_, r)| r.clone())
            .collect();
        active.sort_by_key(|r| r.reminder.time_of_day);
        Ok(active)
    }

    async fn upsert_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
        status: DoseStatus,
        actual_time: Option<NaiveTime>,
        mode: UpsertMode,
    ) -> PortResult<()> {
        self.check_available()?;
        if lock(&self.failing_upserts).contains(&reminder_id) {
            return Err(PortError::Unavailable(format!(
                "upsert for reminder {} rejected",
                reminder_id
            )));
        }
        let mut records = lock(&self.records);
        match records
            .iter_mut()
            .find(|r| r.reminder_id == reminder_id && r.date == date)
        {
            Some(existing) => {
                if mode == UpsertMode::Overwrite {
                    existing.status = status;
                    existing.actual_time = actual_time;
                }
            }
            None => records.push(DoseRecord {
                id: Uuid::new_v4(),
                reminder_id,
                date,
                status,
                actual_time,
            }),
        }
        Ok(())
    }

    async fn find_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<DoseRecord>> {
        self.check_available()?;
        Ok(self.record_for(reminder_id, date))
    }

    async fn list_dose_records(&self, user_id: Uuid, date: NaiveDate) -> PortResult<Vec<DailyDose>> {
        self.check_available()?;
        let records = self.records();
        let mut doses: Vec<DailyDose> = records
            .into_iter()
            .filter(|r| r.date == date)
            .filter_map(|record| match self.reminder_owner(record.reminder_id) {
                Some((owner, time_of_day)) if owner == user_id => {
                    Some(DailyDose { record, time_of_day })
                }
                _ => None,
            })
            .collect();
        doses.sort_by_key(|d| d.time_of_day);
        Ok(doses)
    }

    async fn mark_forgotten_if_pending(&self, record_id: Uuid) -> PortResult<bool> {
        self.check_available()?;
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == record_id) {
            Some(r) if r.status == DoseStatus::Pending => {
                r.status = DoseStatus::Forgotten;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(format!("Dose record {} not found", record_id))),
        }
    }

    async fn insert_analytics_event(&self, event: AnalyticsEvent) -> PortResult<()> {
        self.check_available()?;
        lock(&self.analytics).push(event);
        Ok(())
    }
}
