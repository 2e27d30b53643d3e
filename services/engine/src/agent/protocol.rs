//! services/engine/src/agent/protocol.rs
//!
//! Defines the message protocol between foreground contexts and the Delivery Agent.
//!
//! Messages are internally tagged JSON objects (`{"type": "SCHEDULE_NOTIFICATION", ...}`)
//! so they stay readable when logged or persisted. Domain types never cross the
//! channel directly; the conversions at the bottom of this file are the boundary.

use chrono::{DateTime, NaiveDateTime, Utc};
use dose_reminder_core::domain::{
    AnalyticsEvent, AnalyticsEventKind, NotificationPayload, ParseError, ScheduleKey,
    ScheduledNotification,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

//=========================================================================================
// Shared Payloads
//=========================================================================================

/// Display data for a reminder notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PayloadDto {
    pub medication_id: Uuid,
    pub medication_name: String,
    pub dosage: String,
}

/// An analytics event in flight. Either side of the channel may emit one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    /// One of the snake_case analytics kinds, e.g. `action_taken`.
    pub event: String,
    pub reminder_id: Option<Uuid>,
    pub medication_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One armed entry, as reported by `GET_SCHEDULED`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntryDto {
    /// The schedule key: a reminder id, possibly with a `-snooze` suffix.
    pub reminder_id: String,
    pub payload: PayloadDto,
    pub fire_at: NaiveDateTime,
}

//=========================================================================================
// Messages Sent FROM a Foreground Context TO the Delivery Agent
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForegroundMessage {
    /// Arms (or re-arms) a timer for the given key.
    ScheduleNotification {
        reminder_id: String,
        payload: PayloadDto,
        delay_ms: u64,
    },

    /// Withdraws the armed timer and any visible notification for the key.
    CancelNotification { reminder_id: String },

    /// An analytics event the agent should rebroadcast to every foreground context.
    TrackAnalytics(TrackedEvent),

    /// Asks for the agent's armed set. Answered with `AgentMessage::Scheduled`.
    GetScheduled,
}

//=========================================================================================
// Messages Sent FROM the Delivery Agent TO every Foreground Context
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    TrackAnalytics(TrackedEvent),

    /// The agent's armed set.
    Scheduled { entries: Vec<ScheduledEntryDto> },

    /// The user chose to open the app from a notification.
    FocusRequested { reminder_id: Option<Uuid> },
}

//=========================================================================================
// Conversions
//=========================================================================================

impl From<&NotificationPayload> for PayloadDto {
    fn from(p: &NotificationPayload) -> Self {
        Self {
            medication_id: p.medication_id,
            medication_name: p.medication_name.clone(),
            dosage: p.dosage.clone(),
        }
    }
}

impl From<PayloadDto> for NotificationPayload {
    fn from(p: PayloadDto) -> Self {
        Self {
            medication_id: p.medication_id,
            medication_name: p.medication_name,
            dosage: p.dosage,
        }
    }
}

impl From<&ScheduledNotification> for ScheduledEntryDto {
    fn from(n: &ScheduledNotification) -> Self {
        Self {
            reminder_id: n.key.as_str().to_string(),
            payload: PayloadDto::from(&n.payload),
            fire_at: n.fire_at,
        }
    }
}

impl From<ScheduledEntryDto> for ScheduledNotification {
    fn from(e: ScheduledEntryDto) -> Self {
        Self {
            key: ScheduleKey::from(e.reminder_id),
            payload: e.payload.into(),
            fire_at: e.fire_at,
        }
    }
}

impl TrackedEvent {
    pub fn new(
        kind: AnalyticsEventKind,
        reminder_id: Option<Uuid>,
        medication_id: Option<Uuid>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("timestamp".to_string(), occurred_at.to_rfc3339());
        Self {
            event: kind.as_str().to_string(),
            reminder_id,
            medication_id,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Builds the persisted event. The emitter's `timestamp` metadata wins over
    /// `received_at` so that late forwarding does not skew the record.
    pub fn into_event(self, user_id: Uuid, received_at: DateTime<Utc>) -> Result<AnalyticsEvent, ParseError> {
        let kind = self.event.parse::<AnalyticsEventKind>()?;
        let occurred_at = self
            .metadata
            .get("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(received_at);

        Ok(AnalyticsEvent {
            id: Uuid::new_v4(),
            user_id,
            kind,
            reminder_id: self.reminder_id,
            medication_id: self.medication_id,
            metadata: self.metadata,
            occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn messages_use_screaming_snake_case_tags() {
        let msg = ForegroundMessage::CancelNotification {
            reminder_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "CANCEL_NOTIFICATION");
        assert_eq!(json["reminder_id"], "abc");

        let get: ForegroundMessage = serde_json::from_str(r#"{"type":"GET_SCHEDULED"}"#).unwrap();
        assert_eq!(get, ForegroundMessage::GetScheduled);
    }

    #[test]
    fn track_analytics_flattens_the_event() {
        let raw = r#"{"type":"TRACK_ANALYTICS","event":"dismissed","reminder_id":null,"medication_id":null}"#;
        let msg: AgentMessage = serde_json::from_str(raw).unwrap();
        match msg {
            AgentMessage::TrackAnalytics(e) => {
                assert_eq!(e.event, "dismissed");
                assert!(e.metadata.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn emitter_timestamp_wins() {
        let emitted = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let received = Utc.with_ymd_and_hms(2024, 3, 10, 9, 5, 0).unwrap();
        let event = TrackedEvent::new(AnalyticsEventKind::Delivered, None, None, emitted)
            .into_event(Uuid::new_v4(), received)
            .unwrap();
        assert_eq!(event.occurred_at, emitted);
        assert_eq!(event.kind, AnalyticsEventKind::Delivered);

        let bogus = TrackedEvent {
            event: "exploded".to_string(),
            reminder_id: None,
            medication_id: None,
            metadata: BTreeMap::new(),
        };
        assert_eq!(
            bogus.into_event(Uuid::new_v4(), received).unwrap_err(),
            ParseError::UnknownEventKind("exploded".to_string())
        );
    }
}
