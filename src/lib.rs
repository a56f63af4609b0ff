//! Salon Queue - booking lifecycle and live provider queues
//!
//! This crate manages appointment bookings for service providers, keeps a
//! live FIFO queue per provider with wait-time estimates, and sends
//! reminders and automatic no-show transitions on a periodic tick.

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod slot;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{error_kind, scheduling_error, Result, SchedulingError};
pub use types::*;

// Re-export key components
pub use booking::BookingStateMachine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use notify::{NotificationDispatcher, Notifier};
pub use queue::{QueueEngine, QueueSnapshot};
pub use scheduler::{ReminderScheduler, TickReport};
pub use service::SalonSystem;
pub use store::{InMemoryStore, StorePorts};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
