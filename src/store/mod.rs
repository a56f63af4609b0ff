//! Persistence ports
//!
//! The engine only talks to storage through these traits. Every write that
//! can race is conditional: bookings and queues carry a version, slots are
//! updated by compare-and-set on their status.

pub mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::queue::ProviderQueue;
use crate::types::{
    Booking, BookingId, CustomerId, ProviderId, Recipient, ServiceId, Slot, SlotId, SlotStatus,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>>;

    /// Store a new booking; fails if the id is already taken
    async fn insert_booking(&self, booking: Booking) -> Result<()>;

    /// Replace a booking whose stored version still equals `expected_version`.
    ///
    /// Returns the stored copy with its version bumped, or
    /// `VersionConflict` if someone else wrote first.
    async fn update_booking(&self, booking: Booking, expected_version: u64) -> Result<Booking>;

    /// Confirmed bookings scheduled on or after `date`, earliest first
    async fn list_confirmed_from(&self, date: NaiveDate) -> Result<Vec<Booking>>;

    /// Every booking made by a customer, in no particular order
    async fn list_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Booking>>;
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn get_slot(&self, id: &SlotId) -> Result<Option<Slot>>;

    /// Register a slot produced by schedule generation
    async fn insert_slot(&self, slot: Slot) -> Result<()>;

    /// Move a slot from `expected` to `next`.
    ///
    /// Fails with `NotFound` for an unknown slot and `SlotStatusConflict` if
    /// the stored status is not `expected`.
    async fn compare_and_set_slot(
        &self,
        id: &SlotId,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<Slot>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn load_queue(&self, provider_id: &ProviderId) -> Result<Option<ProviderQueue>>;

    /// Persist a queue document if the stored one is still at
    /// `expected_version` (an absent document counts as version 0)
    async fn save_queue(&self, queue: &ProviderQueue, expected_version: u64) -> Result<()>;
}

/// Provider-side settings the lifecycle depends on
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    /// Catalogued duration of a service, in minutes
    async fn service_duration_minutes(
        &self,
        provider_id: &ProviderId,
        service_id: &ServiceId,
    ) -> Result<Option<u32>>;

    /// Whether new requests for this provider are confirmed without review
    async fn auto_accept(&self, provider_id: &ProviderId) -> Result<bool>;
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Device token for a recipient, `None` if they cannot be reached
    async fn resolve_token(&self, recipient: &Recipient) -> Result<Option<String>>;
}

/// One handle per port, so a single backend can serve all of them
#[derive(Clone)]
pub struct StorePorts {
    pub bookings: Arc<dyn BookingStore>,
    pub slots: Arc<dyn SlotStore>,
    pub queues: Arc<dyn QueueStore>,
    pub catalog: Arc<dyn ProviderCatalog>,
    pub directory: Arc<dyn RecipientDirectory>,
}

impl StorePorts {
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            bookings: store.clone(),
            slots: store.clone(),
            queues: store.clone(),
            catalog: store.clone(),
            directory: store,
        }
    }
}
