//! Common types used throughout the booking and queue engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for bookings
pub type BookingId = Uuid;

/// Opaque reference to a provider (salon)
pub type ProviderId = String;

/// Opaque reference to a customer
pub type CustomerId = String;

/// Opaque reference to a service offered by a provider
pub type ServiceId = String;

/// Opaque identifier of a bookable slot, scoped to one provider
pub type SlotId = String;

/// Lifecycle status of a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
    NoShow,
}

impl BookingStatus {
    /// Statuses reachable in one step from this one
    pub fn allowed_transitions(self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[
                BookingStatus::Confirmed,
                BookingStatus::Rejected,
                BookingStatus::Cancelled,
            ],
            BookingStatus::Confirmed => &[
                BookingStatus::Completed,
                BookingStatus::NoShow,
                BookingStatus::Cancelled,
            ],
            _ => &[],
        }
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// No further transition is permitted from a terminal status
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Terminal statuses that hand the slot back to the ledger
    pub fn releases_slot(self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::NoShow => "no-show",
        };
        write!(f, "{}", label)
    }
}

/// Availability of a provider's bookable slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Reserved,
    Booked,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Reserved => write!(f, "reserved"),
            SlotStatus::Booked => write!(f, "booked"),
        }
    }
}

/// A provider's bookable time unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub provider_id: ProviderId,
    pub status: SlotStatus,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// Create an available slot, as schedule generation would
    pub fn available(id: impl Into<SlotId>, provider_id: impl Into<ProviderId>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            status: SlotStatus::Available,
            updated_at: Utc::now(),
        }
    }
}

/// A customer's booking of one slot with one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub customer_id: CustomerId,
    pub provider_id: ProviderId,
    pub service_id: ServiceId,
    pub slot_id: SlotId,
    pub scheduled_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub rejection_reason: Option<String>,
    pub rating_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by the store on every write
    pub version: u64,
}

impl Booking {
    /// Build a new pending booking from a request
    pub fn pending(id: BookingId, request: BookingRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id: request.customer_id,
            provider_id: request.provider_id,
            service_id: request.service_id,
            slot_id: request.slot_id,
            scheduled_at: request.scheduled_at,
            status: BookingStatus::Pending,
            rejection_reason: None,
            rating_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Scheduled date in `YYYY-MM-DD` form, as shown to customers
    pub fn date_label(&self) -> String {
        self.scheduled_at.format("%Y-%m-%d").to_string()
    }

    /// Scheduled time in `HH:MM` form, as shown to customers
    pub fn time_label(&self) -> String {
        self.scheduled_at.format("%H:%M").to_string()
    }
}

/// Inbound request for a new booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub customer_id: CustomerId,
    pub provider_id: ProviderId,
    pub service_id: ServiceId,
    pub slot_id: SlotId,
    pub scheduled_at: DateTime<Utc>,
}

/// Party a notification is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Customer(CustomerId),
    /// The account that owns a provider
    ProviderOwner(ProviderId),
}
