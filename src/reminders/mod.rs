// src/reminders/mod.rs

pub mod job;
pub mod message;
pub mod store;
pub mod window;

pub use job::{ReminderJob, RunLog, RunSummary};
pub use store::{PgReminderStore, ReminderStore};
pub use window::ReminderWindow;
