//! services/engine/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DoseStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use dose_reminder_core::domain::{
    ActiveReminder, AnalyticsEvent, DailyDose, DoseRecord, DoseStatus, Reminder,
};
use dose_reminder_core::ports::{DoseStore, PortError, PortResult, UpsertMode};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DoseStore` port.
#[derive(Clone)]
pub struct PgDoseStore {
    pool: PgPool,
}

impl PgDoseStore {
    /// Creates a new `PgDoseStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_status(raw: &str) -> PortResult<DoseStatus> {
    raw.parse::<DoseStatus>()
        .map_err(|e| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ActiveReminderRecord {
    id: Uuid,
    medication_id: Uuid,
    time_of_day: NaiveTime,
    recurrence: String,
    active: bool,
    medication_name: String,
    dosage: String,
}
impl ActiveReminderRecord {
    fn to_domain(self) -> ActiveReminder {
        ActiveReminder {
            reminder: Reminder {
                id: self.id,
                medication_id: self.medication_id,
                time_of_day: self.time_of_day,
                recurrence: self.recurrence,
                active: self.active,
            },
            medication_name: self.medication_name,
            dosage: self.dosage,
        }
    }
}

#[derive(FromRow)]
struct DoseRecordRow {
    id: Uuid,
    reminder_id: Uuid,
    date: NaiveDate,
    status: String,
    actual_time: Option<NaiveTime>,
}
impl DoseRecordRow {
    fn to_domain(self) -> PortResult<DoseRecord> {
        Ok(DoseRecord {
            id: self.id,
            reminder_id: self.reminder_id,
            date: self.date,
            status: parse_status(&self.status)?,
            actual_time: self.actual_time,
        })
    }
}

#[derive(FromRow)]
struct DailyDoseRow {
    id: Uuid,
    reminder_id: Uuid,
    date: NaiveDate,
    status: String,
    actual_time: Option<NaiveTime>,
    time_of_day: NaiveTime,
}
impl DailyDoseRow {
    fn to_domain(self) -> PortResult<DailyDose> {
        Ok(DailyDose {
            record: DoseRecord {
                id: self.id,
                reminder_id: self.reminder_id,
                date: self.date,
                status: parse_status(&self.status)?,
                actual_time: self.actual_time,
            },
            time_of_day: self.time_of_day,
        })
    }
}

//=========================================================================================
// `DoseStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DoseStore for PgDoseStore {
    async fn list_active_reminders(&self, user_id: Uuid) -> PortResult<Vec<ActiveReminder>> {
        let records = sqlx::query_as::<_, ActiveReminderRecord>(
            "SELECT r.id, r.medication_id, r.time_of_day, r.recurrence, r.active, \
                    m.name AS medication_name, m.dosage \
             FROM reminders r \
             JOIN medications m ON m.id = r.medication_id \
             WHERE m.user_id = $1 AND r.active = TRUE \
             ORDER BY r.time_of_day ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn upsert_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
        status: DoseStatus,
        actual_time: Option<NaiveTime>,
        mode: UpsertMode,
    ) -> PortResult<()> {
        let sql = match mode {
            UpsertMode::IgnoreDuplicates => {
                "INSERT INTO dose_records (id, reminder_id, date, status, actual_time) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (reminder_id, date) DO NOTHING"
            }
            UpsertMode::Overwrite => {
                "INSERT INTO dose_records (id, reminder_id, date, status, actual_time) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (reminder_id, date) \
                 DO UPDATE SET status = EXCLUDED.status, actual_time = EXCLUDED.actual_time"
            }
        };

        let result = sqlx::query(sql)
            .bind(Uuid::new_v4())
            .bind(reminder_id)
            .bind(date)
            .bind(status.as_str())
            .bind(actual_time)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        debug!(
            %reminder_id, %date, %status, ?mode,
            rows = result.rows_affected(),
            "Upserted dose record"
        );
        Ok(())
    }

    async fn find_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<DoseRecord>> {
        let record = sqlx::query_as::<_, DoseRecordRow>(
            "SELECT id, reminder_id, date, status, actual_time \
             FROM dose_records WHERE reminder_id = $1 AND date = $2",
        )
        .bind(reminder_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(|r| r.to_domain()).transpose()
    }

    async fn list_dose_records(&self, user_id: Uuid, date: NaiveDate) -> PortResult<Vec<DailyDose>> {
        let records = sqlx::query_as::<_, DailyDoseRow>(
            "SELECT d.id, d.reminder_id, d.date, d.status, d.actual_time, r.time_of_day \
             FROM dose_records d \
             JOIN reminders r ON r.id = d.reminder_id \
             JOIN medications m ON m.id = r.medication_id \
             WHERE m.user_id = $1 AND d.date = $2 \
             ORDER BY r.time_of_day ASC",
        )
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn mark_forgotten_if_pending(&self, record_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE dose_records SET status = 'forgotten' WHERE id = $1 AND status = 'pending'",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_analytics_event(&self, event: AnalyticsEvent) -> PortResult<()> {
        let metadata = if event.metadata.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&event.metadata)
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            )
        };

        sqlx::query(
            "INSERT INTO notification_analytics \
                 (id, user_id, event_type, reminder_id, medication_id, metadata, occurred_at) \
             VALUES ($1, $2, $3, $4, $5, CAST($6 AS JSONB), $7)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.kind.as_str())
        .bind(event.reminder_id)
        .bind(event.medication_id)
        .bind(metadata)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
