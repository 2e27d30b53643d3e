pub mod domain;
pub mod ports;
pub mod window;

pub use domain::{
    ActiveReminder, AnalyticsEvent, AnalyticsEventKind, DailyDose, DoseRecord, DoseStatus,
    FeedbackPreferences, NotificationPayload, ParseError, Reminder, ScheduleKey, ScheduledNotification,
};
pub use ports::{
    Clock, DoseStore, LocalStorage, NotificationPresenter, PortError, PortResult,
    PresentedNotification, UpsertMode,
};
pub use window::{
    can_perform_action, evaluate, format_time_remaining, todays_occurrence, ActionRejection,
    DoseAction, DoseEvaluation, DoseState, WindowPolicy,
};
