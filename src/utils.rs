//! Utility functions for the booking and queue engine

use crate::error::{Result, SchedulingError};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Longest service a single queue entry may claim
pub const MAX_SERVICE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Generate a new unique booking ID
pub fn generate_booking_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Reject zero or implausibly long service durations
pub fn validate_service_duration(duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Err(SchedulingError::InvalidRequest {
            reason: "Service duration must be greater than zero".to_string(),
        }
        .into());
    }
    if duration > MAX_SERVICE_DURATION {
        return Err(SchedulingError::InvalidRequest {
            reason: format!(
                "Service duration of {}s exceeds the {}s maximum",
                duration.as_secs(),
                MAX_SERVICE_DURATION.as_secs()
            ),
        }
        .into());
    }
    Ok(())
}

/// Convert a validated std duration into a chrono offset
pub fn to_time_delta(duration: Duration) -> Result<TimeDelta> {
    validate_service_duration(duration)?;
    TimeDelta::from_std(duration).map_err(|e| {
        SchedulingError::InvalidRequest {
            reason: format!("Service duration out of range: {}", e),
        }
        .into()
    })
}

/// Elapsed time from `start` to `end`, zero when `end` precedes `start`
pub fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    end.signed_duration_since(start)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Service durations are catalogued in whole minutes
pub fn minutes(count: u32) -> Duration {
    Duration::from_secs(u64::from(count) * 60)
}
