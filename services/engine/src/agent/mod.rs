//! services/engine/src/agent/mod.rs
//!
//! The Delivery Agent: a background actor that owns its own timers, presents
//! reminders when they fire and handles what the user does with them.
//!
//! The agent shares no memory with foreground contexts. Foreground code talks
//! to it through an `AgentHandle` (an mpsc mailbox) and listens to it through a
//! broadcast subscription.

pub mod delivery;
pub mod protocol;

use dose_reminder_core::domain::ScheduleKey;
use tokio::sync::{broadcast, mpsc, oneshot};

pub use delivery::{AgentDeps, DeliveryAgent};
pub use protocol::{AgentMessage, ForegroundMessage, PayloadDto, ScheduledEntryDto, TrackedEvent};

const MAILBOX_CAPACITY: usize = 256;
const BROADCAST_CAPACITY: usize = 256;

/// What the user did with a presented reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    MarkTaken,
    Snooze,
    /// Clicked the notification body.
    Open,
    /// Closed it without choosing an action.
    Dismiss,
}

impl Interaction {
    /// The `action` metadata recorded with the `clicked` event.
    pub fn action_name(&self) -> &'static str {
        match self {
            Interaction::MarkTaken => "mark-taken",
            Interaction::Snooze => "snooze",
            Interaction::Open => "open",
            Interaction::Dismiss => "dismiss",
        }
    }

    /// Maps a notification action id back to an interaction.
    pub fn from_action_id(id: &str) -> Option<Self> {
        match id {
            "mark-taken" => Some(Interaction::MarkTaken),
            "snooze" => Some(Interaction::Snooze),
            "" | "open" => Some(Interaction::Open),
            _ => None,
        }
    }
}

/// Everything the agent's mailbox accepts.
#[derive(Debug)]
pub(crate) enum AgentCommand {
    Foreground(ForegroundMessage),
    GetScheduled(oneshot::Sender<Vec<ScheduledEntryDto>>),
    Interact {
        key: ScheduleKey,
        interaction: Interaction,
    },
    /// Sent by a timer task. `generation` identifies which arming fired.
    Fire {
        key: ScheduleKey,
        generation: u64,
    },
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
#[error("The delivery agent is not running")]
pub struct AgentUnavailable;

/// A cheap, cloneable connection to a running Delivery Agent.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
    events: broadcast::Sender<AgentMessage>,
}

impl AgentHandle {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<AgentCommand>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        (Self { tx, events }, rx)
    }

    pub(crate) fn events_sender(&self) -> broadcast::Sender<AgentMessage> {
        self.events.clone()
    }

    pub(crate) fn weak_sender(&self) -> mpsc::WeakSender<AgentCommand> {
        self.tx.downgrade()
    }

    /// Fire-and-forget delivery of a foreground message.
    pub async fn post(&self, msg: ForegroundMessage) -> Result<(), AgentUnavailable> {
        self.tx
            .send(AgentCommand::Foreground(msg))
            .await
            .map_err(|_| AgentUnavailable)
    }

    /// Request/response form of `GET_SCHEDULED`.
    pub async fn get_scheduled(&self) -> Result<Vec<ScheduledEntryDto>, AgentUnavailable> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::GetScheduled(reply))
            .await
            .map_err(|_| AgentUnavailable)?;
        rx.await.map_err(|_| AgentUnavailable)
    }

    /// Reports a user interaction with the notification identified by `key`.
    pub async fn interact(
        &self,
        key: ScheduleKey,
        interaction: Interaction,
    ) -> Result<(), AgentUnavailable> {
        self.tx
            .send(AgentCommand::Interact { key, interaction })
            .await
            .map_err(|_| AgentUnavailable)
    }

    /// Subscribes a foreground context to everything the agent broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentMessage> {
        self.events.subscribe()
    }

    /// Stops the agent. Armed timers are cancelled.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(AgentCommand::Shutdown).await;
    }
}
