//! crates/dose_reminder_core/src/window.rs
//!
//! The clock/window evaluator: a pure mapping from (now, scheduled time, saved
//! status) to the lifecycle state of a dose and what the user may do with it.
//!
//! Nothing here performs I/O or caches results. The same inputs produce
//! different outputs as `now` advances, so callers evaluate afresh on every
//! tick.

use crate::domain::DoseStatus;
use chrono::{Duration, NaiveDateTime, NaiveTime};

//=========================================================================================
// Window Policy
//=========================================================================================

/// Offsets, relative to the scheduled time, that bound the action window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    lead: Duration,
    tolerance: Duration,
}

impl WindowPolicy {
    pub const DEFAULT_LEAD_MINUTES: i64 = 0;
    pub const DEFAULT_TOLERANCE_MINUTES: i64 = 60;

    /// Returns `None` when the window would close before it opens.
    pub fn new(lead_minutes: i64, tolerance_minutes: i64) -> Option<Self> {
        if tolerance_minutes < lead_minutes {
            return None;
        }
        Some(Self {
            lead: Duration::minutes(lead_minutes),
            tolerance: Duration::minutes(tolerance_minutes),
        })
    }

    pub fn lead_minutes(&self) -> i64 {
        self.lead.num_minutes()
    }

    pub fn tolerance_minutes(&self) -> i64 {
        self.tolerance.num_minutes()
    }

    /// The `[start, end]` window of a dose, anchored to the calendar day of `now`.
    pub fn window_for(&self, now: NaiveDateTime, scheduled: NaiveTime) -> (NaiveDateTime, NaiveDateTime) {
        let scheduled_today = todays_occurrence(now, scheduled);
        (scheduled_today + self.lead, scheduled_today + self.tolerance)
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::minutes(Self::DEFAULT_LEAD_MINUTES),
            tolerance: Duration::minutes(Self::DEFAULT_TOLERANCE_MINUTES),
        }
    }
}

/// `time_of_day` on the calendar day of `now`. Never rolls over into tomorrow.
pub fn todays_occurrence(now: NaiveDateTime, time_of_day: NaiveTime) -> NaiveDateTime {
    now.date().and_time(time_of_day)
}

//=========================================================================================
// Evaluation
//=========================================================================================

/// The derived lifecycle state of a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseState {
    /// Not yet due.
    Pending,
    /// Inside the action window.
    Active,
    Taken,
    Forgotten,
}

impl DoseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseState::Pending => "pending",
            DoseState::Active => "active",
            DoseState::Taken => "taken",
            DoseState::Forgotten => "forgotten",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoseEvaluation {
    pub state: DoseState,
    pub can_mark_taken: bool,
    pub can_mark_forgotten: bool,
    /// Negative once the window has opened.
    pub minutes_until_window_opens: i64,
    /// Negative once the window has closed.
    pub minutes_until_window_closes: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
}

impl DoseEvaluation {
    pub fn status_label(&self) -> &'static str {
        match self.state {
            DoseState::Pending => "Pending",
            DoseState::Active => "Due now",
            DoseState::Taken => "Taken",
            DoseState::Forgotten => "Forgotten",
        }
    }
}

/// Evaluates the state of a dose scheduled at `scheduled` (device-local time of day).
///
/// A saved `Taken` or `Forgotten` status always wins over the clock.
pub fn evaluate(
    now: NaiveDateTime,
    scheduled: NaiveTime,
    saved_status: Option<DoseStatus>,
    policy: &WindowPolicy,
) -> DoseEvaluation {
    let (window_start, window_end) = policy.window_for(now, scheduled);
    let minutes_until_window_opens = round_minutes(window_start - now);
    let minutes_until_window_closes = round_minutes(window_end - now);

    let resolved = |state| DoseEvaluation {
        state,
        can_mark_taken: false,
        can_mark_forgotten: false,
        minutes_until_window_opens,
        minutes_until_window_closes,
        window_start,
        window_end,
    };

    match saved_status {
        Some(DoseStatus::Taken) => return resolved(DoseState::Taken),
        Some(DoseStatus::Forgotten) => return resolved(DoseState::Forgotten),
        Some(DoseStatus::Pending) | None => {}
    }

    if now < window_start {
        resolved(DoseState::Pending)
    } else if now <= window_end {
        DoseEvaluation {
            can_mark_taken: true,
            can_mark_forgotten: true,
            ..resolved(DoseState::Active)
        }
    } else {
        resolved(DoseState::Forgotten)
    }
}

/// Rounds half up, matching how the UI has always displayed minute counts.
fn round_minutes(delta: Duration) -> i64 {
    (delta.num_seconds() + 30).div_euclid(60)
}

//=========================================================================================
// Action Validation
//=========================================================================================

/// An explicit user decision about a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoseAction {
    MarkTaken,
    MarkForgotten,
}

impl DoseAction {
    pub fn target_status(&self) -> DoseStatus {
        match self {
            DoseAction::MarkTaken => DoseStatus::Taken,
            DoseAction::MarkForgotten => DoseStatus::Forgotten,
        }
    }
}

/// Why a user action was refused. The messages are shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionRejection {
    #[error("This dose was already marked as taken.")]
    AlreadyTaken,
    #[error("This dose was already marked as forgotten.")]
    AlreadyForgotten,
    #[error("Wait until {} to mark this dose as taken.", .0.format("%H:%M"))]
    NotYetDue(NaiveTime),
    #[error("The action window has already closed.")]
    WindowClosed,
    #[error("It is not time for this medication yet. Wait until {}.", .0.format("%H:%M"))]
    TooEarlyToForget(NaiveTime),
}

/// Decides whether `action` may be applied right now.
pub fn can_perform_action(
    now: NaiveDateTime,
    scheduled: NaiveTime,
    action: DoseAction,
    saved_status: Option<DoseStatus>,
    policy: &WindowPolicy,
) -> Result<DoseEvaluation, ActionRejection> {
    match saved_status {
        Some(DoseStatus::Taken) => return Err(ActionRejection::AlreadyTaken),
        Some(DoseStatus::Forgotten) => return Err(ActionRejection::AlreadyForgotten),
        _ => {}
    }

    let evaluation = evaluate(now, scheduled, saved_status, policy);
    let opens_at = evaluation.window_start.time();
    match (action, evaluation.state) {
        (DoseAction::MarkTaken, DoseState::Pending) => Err(ActionRejection::NotYetDue(opens_at)),
        (DoseAction::MarkTaken, DoseState::Forgotten) => Err(ActionRejection::WindowClosed),
        (DoseAction::MarkForgotten, DoseState::Pending) => {
            Err(ActionRejection::TooEarlyToForget(opens_at))
        }
        _ => Ok(evaluation),
    }
}

/// Human readable remaining time, e.g. `45min`, `1h 30min`, `2h`.
pub fn format_time_remaining(minutes: i64) -> String {
    if minutes <= 0 {
        return "expired".to_string();
    }
    if minutes < 60 {
        return format!("{}min", minutes);
    }
    let hours = minutes / 60;
    let mins = minutes % 60;
    if mins > 0 {
        format!("{}h {}min", hours, mins)
    } else {
        format!("{}h", hours)
    }
}
