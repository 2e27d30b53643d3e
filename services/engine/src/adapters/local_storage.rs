//! services/engine/src/adapters/local_storage.rs
//!
//! Implementations of the `LocalStorage` port.
//!
//! `JsonFileStorage` keeps the whole device state in a single JSON document:
//! the armed schedule keyed by reminder id, the last-reset date and the
//! feedback preferences. Every write goes to a temporary file first and is then
//! renamed over the original, so a crash mid-write leaves the old document intact.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dose_reminder_core::domain::{FeedbackPreferences, ScheduleKey, ScheduledNotification};
use dose_reminder_core::ports::{LocalStorage, PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use crate::agent::protocol::PayloadDto;

//=========================================================================================
// On-disk Document
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct StorageDocument {
    #[serde(default)]
    schedule: BTreeMap<String, StoredEntry>,
    #[serde(default)]
    last_reset_date: Option<NaiveDate>,
    #[serde(default)]
    feedback: StoredFeedback,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct StoredEntry {
    payload: PayloadDto,
    fire_at: NaiveDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct StoredFeedback {
    sound_enabled: bool,
    haptic_enabled: bool,
}

impl Default for StoredFeedback {
    fn default() -> Self {
        FeedbackPreferences::default().into()
    }
}

impl From<FeedbackPreferences> for StoredFeedback {
    fn from(p: FeedbackPreferences) -> Self {
        Self {
            sound_enabled: p.sound_enabled,
            haptic_enabled: p.haptic_enabled,
        }
    }
}

impl From<StoredFeedback> for FeedbackPreferences {
    fn from(p: StoredFeedback) -> Self {
        Self {
            sound_enabled: p.sound_enabled,
            haptic_enabled: p.haptic_enabled,
        }
    }
}

impl StorageDocument {
    fn schedule_entries(&self) -> Vec<ScheduledNotification> {
        self.schedule
            .iter()
            .map(|(key, entry)| ScheduledNotification {
                key: ScheduleKey::from(key.as_str()),
                payload: entry.payload.clone().into(),
                fire_at: entry.fire_at,
            })
            .collect()
    }

    fn replace_schedule(&mut self, entries: &[ScheduledNotification]) {
        self.schedule = entries
            .iter()
            .map(|n| {
                (
                    n.key.as_str().to_string(),
                    StoredEntry {
                        payload: PayloadDto::from(&n.payload),
                        fire_at: n.fire_at,
                    },
                )
            })
            .collect();
    }
}

//=========================================================================================
// JSON File Adapter
//=========================================================================================

pub struct JsonFileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> PortResult<StorageDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str::<StorageDocument>(&raw) {
                Ok(doc) => Ok(doc),
                Err(e) => {
                    warn!(path = %self.path.display(), "Discarding unreadable local state: {}", e);
                    Ok(StorageDocument::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StorageDocument::default()),
            Err(e) => Err(PortError::Unavailable(e.to_string())),
        }
    }

    async fn write_document(&self, doc: &StorageDocument) -> PortResult<()> {
        let raw = serde_json::to_vec_pretty(doc).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn update<F>(&self, f: F) -> PortResult<()>
    where
        F: FnOnce(&mut StorageDocument) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        f(&mut doc);
        self.write_document(&doc).await
    }
}

#[async_trait]
impl LocalStorage for JsonFileStorage {
    async fn load_schedule(&self) -> PortResult<Vec<ScheduledNotification>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.schedule_entries())
    }

    async fn save_schedule(&self, entries: &[ScheduledNotification]) -> PortResult<()> {
        self.update(|doc| doc.replace_schedule(entries)).await
    }

    async fn last_reset_date(&self) -> PortResult<Option<NaiveDate>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.last_reset_date)
    }

    async fn set_last_reset_date(&self, date: NaiveDate) -> PortResult<()> {
        self.update(|doc| doc.last_reset_date = Some(date)).await
    }

    async fn clear_last_reset_date(&self) -> PortResult<()> {
        self.update(|doc| doc.last_reset_date = None).await
    }

    async fn feedback_preferences(&self) -> PortResult<FeedbackPreferences> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.feedback.into())
    }

    async fn set_feedback_preferences(&self, prefs: FeedbackPreferences) -> PortResult<()> {
        self.update(|doc| doc.feedback = prefs.into()).await
    }
}

//=========================================================================================
// In-memory Adapter
//=========================================================================================

/// Keeps the same document in memory. Shares its state across clones of the `Arc`.
#[derive(Default)]
pub struct InMemoryLocalStorage {
    doc: Mutex<StorageDocument>,
}

impl InMemoryLocalStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStorage for InMemoryLocalStorage {
    async fn load_schedule(&self) -> PortResult<Vec<ScheduledNotification>> {
        Ok(self.doc.lock().await.schedule_entries())
    }

    async fn save_schedule(&self, entries: &[ScheduledNotification]) -> PortResult<()> {
        self.doc.lock().await.replace_schedule(entries);
        Ok(())
    }

    async fn last_reset_date(&self) -> PortResult<Option<NaiveDate>> {
        Ok(self.doc.lock().await.last_reset_date)
    }

    async fn set_last_reset_date(&self, date: NaiveDate) -> PortResult<()> {
        self.doc.lock().await.last_reset_date = Some(date);
        Ok(())
    }

    async fn clear_last_reset_date(&self) -> PortResult<()> {
        self.doc.lock().await.last_reset_date = None;
        Ok(())
    }

    async fn feedback_preferences(&self) -> PortResult<FeedbackPreferences> {
        Ok(self.doc.lock().await.feedback.into())
    }

    async fn set_feedback_preferences(&self, prefs: FeedbackPreferences) -> PortResult<()> {
        self.doc.lock().await.feedback = prefs.into();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dose_reminder_core::domain::NotificationPayload;
    use uuid::Uuid;

    fn entry(key: ScheduleKey) -> ScheduledNotification {
        ScheduledNotification {
            key,
            payload: NotificationPayload {
                medication_id: Uuid::new_v4(),
                medication_name: "Metformin".to_string(),
                dosage: "500mg".to_string(),
            },
            fire_at: NaiveDate::from_ymd_opt(2024, 3, 10)
                .and_then(|d| d.and_hms_opt(9, 0, 0))
                .unwrap(),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dose-reminder-{}-{}.json", name, Uuid::new_v4()))
    }

    #[tokio::test]
    async fn file_storage_survives_reopen() {
        let path = temp_path("reopen");
        let reminder = Uuid::new_v4();
        let entries = vec![
            entry(ScheduleKey::for_reminder(reminder)),
            entry(ScheduleKey::snooze_of(reminder)),
        ];
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        {
            let storage = JsonFileStorage::new(&path);
            storage.save_schedule(&entries).await.unwrap();
            storage.set_last_reset_date(date).await.unwrap();
            storage
                .set_feedback_preferences(FeedbackPreferences {
                    sound_enabled: false,
                    haptic_enabled: true,
                })
                .await
                .unwrap();
        }

        let reopened = JsonFileStorage::new(&path);
        let mut loaded = reopened.load_schedule().await.unwrap();
        loaded.sort_by(|a, b| a.key.cmp(&b.key));
        let mut expected = entries.clone();
        expected.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(loaded, expected);
        assert_eq!(reopened.last_reset_date().await.unwrap(), Some(date));
        assert!(!reopened.feedback_preferences().await.unwrap().sound_enabled);

        reopened.clear_last_reset_date().await.unwrap();
        assert_eq!(JsonFileStorage::new(&path).last_reset_date().await.unwrap(), None);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_or_corrupt_file_reads_as_defaults() {
        let path = temp_path("corrupt");
        let storage = JsonFileStorage::new(&path);
        assert!(storage.load_schedule().await.unwrap().is_empty());
        assert_eq!(storage.last_reset_date().await.unwrap(), None);
        assert_eq!(
            storage.feedback_preferences().await.unwrap(),
            FeedbackPreferences::default()
        );

        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(storage.load_schedule().await.unwrap().is_empty());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
