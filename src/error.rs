//! Error types for the booking and queue engine
//!
//! Domain failures are raised as `SchedulingError` and carried through the
//! crate as `anyhow::Error`, so callers can downcast to recover the kind.

use crate::types::{BookingId, BookingStatus, SlotStatus};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific scheduling scenarios
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Slot {slot_id} is not available (currently {status})")]
    SlotUnavailable { slot_id: String, status: SlotStatus },

    #[error("Booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {booking_id} is not in the queue of provider {provider_id}")]
    EntryNotFound {
        provider_id: String,
        booking_id: BookingId,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Concurrent modification of {entity} {id}")]
    VersionConflict { entity: &'static str, id: String },

    #[error("Slot {slot_id} expected {expected} but found {found}")]
    SlotStatusConflict {
        slot_id: String,
        expected: SlotStatus,
        found: SlotStatus,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Notification dispatch failed: {message}")]
    NotificationFailed { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl SchedulingError {
    /// Short stable label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingError::SlotUnavailable { .. } => "slot_unavailable",
            SchedulingError::InvalidTransition { .. } => "invalid_transition",
            SchedulingError::EntryNotFound { .. } => "entry_not_found",
            SchedulingError::NotFound { .. } => "not_found",
            SchedulingError::InvalidRequest { .. } => "invalid_request",
            SchedulingError::VersionConflict { .. } => "version_conflict",
            SchedulingError::SlotStatusConflict { .. } => "slot_status_conflict",
            SchedulingError::ConfigurationError { .. } => "configuration",
            SchedulingError::NotificationFailed { .. } => "notification_failed",
            SchedulingError::AmqpConnectionFailed { .. } => "amqp_connection",
            SchedulingError::InternalError { .. } => "internal",
        }
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        SchedulingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

/// Recover the domain error carried by an `anyhow::Error`, if any
pub fn scheduling_error(err: &anyhow::Error) -> Option<&SchedulingError> {
    err.downcast_ref::<SchedulingError>()
}

/// Metrics label for an arbitrary error
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    scheduling_error(err)
        .map(SchedulingError::kind)
        .unwrap_or("other")
}
