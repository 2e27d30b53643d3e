//! crates/dose_reminder_core/src/domain.rs
//!
//! Defines the pure, core data structures for the dose reminder engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A recurring time-of-day at which a medication should be taken.
///
/// Owned by the medication CRUD layer; this engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub id: Uuid,
    pub medication_id: Uuid,
    /// Device-local time of day. No timezone is stored.
    pub time_of_day: NaiveTime,
    pub recurrence: String,
    pub active: bool,
}

/// A `Reminder` joined with the display fields of its medication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveReminder {
    pub reminder: Reminder,
    pub medication_name: String,
    pub dosage: String,
}

impl ActiveReminder {
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            medication_id: self.reminder.medication_id,
            medication_name: self.medication_name.clone(),
            dosage: self.dosage.clone(),
        }
    }
}

/// The persisted resolution of one day's occurrence of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoseStatus {
    Pending,
    Taken,
    Forgotten,
}

impl DoseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseStatus::Pending => "pending",
            DoseStatus::Taken => "taken",
            DoseStatus::Forgotten => "forgotten",
        }
    }

    /// `Taken` and `Forgotten` are final; automatic logic must never overwrite them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DoseStatus::Taken | DoseStatus::Forgotten)
    }
}

impl fmt::Display for DoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored or transmitted value that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown dose status '{0}'")]
    UnknownStatus(String),
    #[error("unknown analytics event kind '{0}'")]
    UnknownEventKind(String),
}

impl FromStr for DoseStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DoseStatus::Pending),
            "taken" => Ok(DoseStatus::Taken),
            "forgotten" => Ok(DoseStatus::Forgotten),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// At most one exists per `(reminder_id, date)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseRecord {
    pub id: Uuid,
    pub reminder_id: Uuid,
    /// Device-local calendar date.
    pub date: NaiveDate,
    pub status: DoseStatus,
    pub actual_time: Option<NaiveTime>,
}

/// A dose record together with the time of day of the reminder it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyDose {
    pub record: DoseRecord,
    pub time_of_day: NaiveTime,
}

/// Denormalized display data carried by every scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub medication_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
}

const SNOOZE_SUFFIX: &str = "-snooze";

/// Identifies an entry in the notification schedule.
///
/// Either the plain reminder id, or the reminder id followed by `-snooze`
/// for a snoozed instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleKey(String);

impl ScheduleKey {
    pub fn for_reminder(reminder_id: Uuid) -> Self {
        Self(reminder_id.to_string())
    }

    pub fn snooze_of(reminder_id: Uuid) -> Self {
        Self(format!("{}{}", reminder_id, SNOOZE_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_snooze(&self) -> bool {
        self.0.ends_with(SNOOZE_SUFFIX)
    }

    /// The reminder this entry belongs to, with any snooze suffix stripped.
    /// Returns `None` when the key does not reference a valid reminder id.
    pub fn reminder_id(&self) -> Option<Uuid> {
        let base = self.0.strip_suffix(SNOOZE_SUFFIX).unwrap_or(&self.0);
        Uuid::parse_str(base).ok()
    }

    /// Notification tag used by the presenter for this entry.
    pub fn tag(&self) -> String {
        format!("dose-reminder-{}", self.0)
    }
}

impl From<String> for ScheduleKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ScheduleKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An armed entry of the local notification schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub key: ScheduleKey,
    pub payload: NotificationPayload,
    /// Device-local fire time.
    pub fire_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsEventKind {
    Scheduled,
    Delivered,
    Clicked,
    ActionTaken,
    ActionSnoozed,
    Dismissed,
}

impl AnalyticsEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventKind::Scheduled => "scheduled",
            AnalyticsEventKind::Delivered => "delivered",
            AnalyticsEventKind::Clicked => "clicked",
            AnalyticsEventKind::ActionTaken => "action_taken",
            AnalyticsEventKind::ActionSnoozed => "action_snoozed",
            AnalyticsEventKind::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for AnalyticsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalyticsEventKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(AnalyticsEventKind::Scheduled),
            "delivered" => Ok(AnalyticsEventKind::Delivered),
            "clicked" => Ok(AnalyticsEventKind::Clicked),
            "action_taken" => Ok(AnalyticsEventKind::ActionTaken),
            "action_snoozed" => Ok(AnalyticsEventKind::ActionSnoozed),
            "dismissed" => Ok(AnalyticsEventKind::Dismissed),
            other => Err(ParseError::UnknownEventKind(other.to_string())),
        }
    }
}

/// Append-only record of something that happened to a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: AnalyticsEventKind,
    pub reminder_id: Option<Uuid>,
    pub medication_id: Option<Uuid>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

/// User preferences for tactile and audio feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackPreferences {
    pub sound_enabled: bool,
    pub haptic_enabled: bool,
}

impl Default for FeedbackPreferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            haptic_enabled: true,
        }
    }
}
