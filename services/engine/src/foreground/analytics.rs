//! services/engine/src/foreground/analytics.rs
//!
//! Persists the analytics events the Delivery Agent broadcasts. The agent has
//! no store session for analytics; this task writes on behalf of the signed-in user.

use dose_reminder_core::ports::{Clock, DoseStore};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::protocol::{AgentMessage, TrackedEvent};

pub fn start_analytics_forwarder(
    store: Arc<dyn DoseStore>,
    clock: Arc<dyn Clock>,
    user_id: Uuid,
    mut events: broadcast::Receiver<AgentMessage>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = events.recv() => msg,
            };
            match msg {
                Ok(AgentMessage::TrackAnalytics(event)) => {
                    persist(store.as_ref(), clock.as_ref(), user_id, event).await
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Analytics forwarder fell behind; events dropped.");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Analytics forwarder stopped.");
    })
}

async fn persist(store: &dyn DoseStore, clock: &dyn Clock, user_id: Uuid, event: TrackedEvent) {
    let kind = event.event.clone();
    let event = match event.into_event(user_id, clock.now_utc()) {
        Ok(event) => event,
        Err(e) => {
            warn!(kind = %kind, "Dropping malformed analytics event: {}", e);
            return;
        }
    };
    match store.insert_analytics_event(event).await {
        Ok(()) => debug!(kind = %kind, "Analytics event recorded."),
        Err(e) => error!(kind = %kind, "Failed to record analytics event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::protocol::ForegroundMessage;
    use crate::foreground::testing::{at, Harness};
    use dose_reminder_core::domain::AnalyticsEventKind;
    use std::collections::BTreeMap;

    #[tokio::test(start_paused = true)]
    async fn agent_broadcasts_are_persisted_for_the_user() {
        let h = Harness::new(at(9, 0));
        let token = CancellationToken::new();
        let task = start_analytics_forwarder(
            h.ctx.store.clone(),
            h.ctx.clock.clone(),
            h.user_id,
            h.ctx.agent.subscribe(),
            token.clone(),
        );

        let reminder_id = Uuid::new_v4();
        let good = TrackedEvent::new(
            AnalyticsEventKind::ActionTaken,
            Some(reminder_id),
            None,
            h.ctx.clock.now_utc(),
        );
        let bad = TrackedEvent {
            event: "teleported".to_string(),
            reminder_id: None,
            medication_id: None,
            metadata: BTreeMap::new(),
        };
        h.ctx.agent.post(ForegroundMessage::TrackAnalytics(bad)).await.unwrap();
        h.ctx.agent.post(ForegroundMessage::TrackAnalytics(good)).await.unwrap();
        h.ctx.agent.get_scheduled().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        token.cancel();
        task.await.unwrap();

        let stored = h.store.analytics_events();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, h.user_id);
        assert_eq!(stored[0].kind, AnalyticsEventKind::ActionTaken);
        assert_eq!(stored[0].reminder_id, Some(reminder_id));
    }
}
