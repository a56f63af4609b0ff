//! Service layer for the salon-queue service
//!
//! This module contains the wiring of the scheduling core, the main
//! application state and background task management for the production
//! service.

pub mod app;
pub mod health;
pub mod system;

pub use app::{AppState, ServiceContext, ServiceError};
pub use health::{HealthCheck, HealthStatus};
pub use system::SalonSystem;
