//! services/engine/src/adapters/presenter.rs
//!
//! Implementations of the `NotificationPresenter` port. The platform notification
//! surface is host-provided; the binary logs what it would show, and tests record it.

use async_trait::async_trait;
use dose_reminder_core::ports::{NotificationPresenter, PortResult, PresentedNotification};
use std::sync::Mutex;
use tracing::info;

/// Writes every notification to the log instead of a system tray.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

#[async_trait]
impl NotificationPresenter for LogPresenter {
    async fn show(&self, n: PresentedNotification) -> PortResult<()> {
        let actions: Vec<&str> = n.actions.iter().map(|(_, label)| label.as_str()).collect();
        info!(tag = %n.tag, silent = n.silent, ?actions, "[notification] {}: {}", n.title, n.body);
        Ok(())
    }

    async fn close(&self, tag: &str) -> PortResult<()> {
        info!(%tag, "[notification] closed");
        Ok(())
    }
}

/// Keeps the notifications that are currently visible, keyed by tag.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    visible: Mutex<Vec<PresentedNotification>>,
    history: Mutex<Vec<PresentedNotification>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<PresentedNotification> {
        self.visible.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_visible(&self, tag: &str) -> bool {
        self.visible().iter().any(|n| n.tag == tag)
    }

    /// Every notification ever shown, in order.
    pub fn history(&self) -> Vec<PresentedNotification> {
        self.history.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationPresenter for RecordingPresenter {
    async fn show(&self, n: PresentedNotification) -> PortResult<()> {
        {
            let mut visible = self.visible.lock().unwrap_or_else(|p| p.into_inner());
            // Same tag replaces the earlier notification.
            visible.retain(|v| v.tag != n.tag);
            visible.push(n.clone());
        }
        self.history.lock().unwrap_or_else(|p| p.into_inner()).push(n);
        Ok(())
    }

    async fn close(&self, tag: &str) -> PortResult<()> {
        self.visible
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|v| v.tag != tag);
        Ok(())
    }
}
