//! Reminder and no-show scheduling

pub mod reminder;

pub use reminder::{ReminderScheduler, ReminderSettings, TickReport};
