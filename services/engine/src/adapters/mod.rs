pub mod clock;
pub mod db;
pub mod local_storage;
pub mod memory;
pub mod presenter;

pub use clock::{ManualClock, SystemClock};
pub use db::PgDoseStore;
pub use local_storage::{InMemoryLocalStorage, JsonFileStorage};
pub use memory::InMemoryDoseStore;
pub use presenter::{LogPresenter, RecordingPresenter};
