pub mod actions;
pub mod analytics;
pub mod reset;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::DoseActions;
pub use reset::{DailyResetCoordinator, ResetOutcome, ResetSummary};
pub use runtime::ForegroundRuntime;
pub use scheduler::{NotificationScheduler, ScheduleOutcome};
pub use state::{EngineContext, SingleFlight};
pub use sweeper::{ExpiredDoseSweeper, SweepOutcome};
