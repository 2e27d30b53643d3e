//! crates/dose_reminder_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the remote store, the device clock, local storage and the
//! platform notification surface.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ActiveReminder, AnalyticsEvent, DailyDose, DoseRecord, DoseStatus, FeedbackPreferences,
    ScheduledNotification,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, disk).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// How an upsert treats an existing `(reminder_id, date)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Leave an existing record untouched. Used by every automatic writer.
    IgnoreDuplicates,
    /// Replace status and actual time. Reserved for explicit user actions.
    Overwrite,
}

#[async_trait]
pub trait DoseStore: Send + Sync {
    // --- Reminders (read-only) ---
    async fn list_active_reminders(&self, user_id: Uuid) -> PortResult<Vec<ActiveReminder>>;

    // --- Dose Records ---
    async fn upsert_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
        status: DoseStatus,
        actual_time: Option<NaiveTime>,
        mode: UpsertMode,
    ) -> PortResult<()>;

    async fn find_dose_record(
        &self,
        reminder_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<DoseRecord>>;

    /// All of the user's records for `date`, each joined with its reminder's time of day.
    async fn list_dose_records(&self, user_id: Uuid, date: NaiveDate) -> PortResult<Vec<DailyDose>>;

    /// Sets a record to `forgotten` only if it is still `pending` at write time.
    /// Returns whether the row changed.
    async fn mark_forgotten_if_pending(&self, record_id: Uuid) -> PortResult<bool>;

    // --- Analytics ---
    async fn insert_analytics_event(&self, event: AnalyticsEvent) -> PortResult<()>;
}

/// Source of wall-clock time. Local time is device-local and carries no zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn now_utc(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Small per-device key/value persistence that survives restarts.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn load_schedule(&self) -> PortResult<Vec<ScheduledNotification>>;

    async fn save_schedule(&self, entries: &[ScheduledNotification]) -> PortResult<()>;

    async fn last_reset_date(&self) -> PortResult<Option<NaiveDate>>;

    async fn set_last_reset_date(&self, date: NaiveDate) -> PortResult<()>;

    /// Forgets the marker so the next reset runs even on the same day.
    async fn clear_last_reset_date(&self) -> PortResult<()>;

    async fn feedback_preferences(&self) -> PortResult<FeedbackPreferences>;

    async fn set_feedback_preferences(&self, prefs: FeedbackPreferences) -> PortResult<()>;
}

/// A notification as handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedNotification {
    /// Presenting a notification with an existing tag replaces it.
    pub tag: String,
    pub title: String,
    pub body: String,
    /// `(action id, label)` pairs.
    pub actions: Vec<(String, String)>,
    pub require_interaction: bool,
    pub silent: bool,
}

#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn show(&self, notification: PresentedNotification) -> PortResult<()>;

    async fn close(&self, tag: &str) -> PortResult<()>;
}
