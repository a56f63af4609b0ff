//! In-memory implementation of every persistence port

use super::{BookingStore, ProviderCatalog, QueueStore, RecipientDirectory, SlotStore};
use crate::error::{Result, SchedulingError};
use crate::queue::ProviderQueue;
use crate::types::{
    Booking, BookingId, BookingStatus, CustomerId, ProviderId, Recipient, ServiceId, Slot, SlotId,
    SlotStatus,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct CatalogEntry {
    service_minutes: HashMap<ServiceId, u32>,
    auto_accept: bool,
}

/// Document store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
    slots: RwLock<HashMap<SlotId, Slot>>,
    queues: RwLock<HashMap<ProviderId, ProviderQueue>>,
    catalog: RwLock<HashMap<ProviderId, CatalogEntry>>,
    tokens: RwLock<HashMap<Recipient, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a service in a provider's catalog
    pub fn register_service(
        &self,
        provider_id: impl Into<ProviderId>,
        service_id: impl Into<ServiceId>,
        minutes: u32,
    ) -> Result<()> {
        let mut catalog = self
            .catalog
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("catalog write"))?;
        catalog
            .entry(provider_id.into())
            .or_default()
            .service_minutes
            .insert(service_id.into(), minutes);
        Ok(())
    }

    pub fn set_auto_accept(&self, provider_id: impl Into<ProviderId>, enabled: bool) -> Result<()> {
        let mut catalog = self
            .catalog
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("catalog write"))?;
        catalog.entry(provider_id.into()).or_default().auto_accept = enabled;
        Ok(())
    }

    /// Associate a device token with a recipient
    pub fn register_token(&self, recipient: Recipient, token: impl Into<String>) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("tokens write"))?;
        tokens.insert(recipient, token.into());
        Ok(())
    }

    /// Number of stored bookings (for stats and debugging)
    pub fn booking_count(&self) -> Result<usize> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("bookings read"))?;
        Ok(bookings.len())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("bookings read"))?;
        Ok(bookings.get(&id).cloned())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<()> {
        let mut bookings = self
            .bookings
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("bookings write"))?;

        if bookings.contains_key(&booking.id) {
            return Err(SchedulingError::InvalidRequest {
                reason: format!("Booking {} already exists", booking.id),
            }
            .into());
        }

        bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn update_booking(&self, mut booking: Booking, expected_version: u64) -> Result<Booking> {
        let mut bookings = self
            .bookings
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("bookings write"))?;

        let stored = bookings
            .get(&booking.id)
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "booking",
                id: booking.id.to_string(),
            })?;

        if stored.version != expected_version {
            return Err(SchedulingError::VersionConflict {
                entity: "booking",
                id: booking.id.to_string(),
            }
            .into());
        }

        booking.version = expected_version + 1;
        bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn list_confirmed_from(&self, date: NaiveDate) -> Result<Vec<Booking>> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("bookings read"))?;

        let mut confirmed: Vec<Booking> = bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.scheduled_at.date_naive() >= date)
            .cloned()
            .collect();
        confirmed.sort_by_key(|b| b.scheduled_at);
        Ok(confirmed)
    }

    async fn list_for_customer(&self, customer_id: &CustomerId) -> Result<Vec<Booking>> {
        let bookings = self
            .bookings
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("bookings read"))?;

        Ok(bookings
            .values()
            .filter(|b| &b.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SlotStore for InMemoryStore {
    async fn get_slot(&self, id: &SlotId) -> Result<Option<Slot>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("slots read"))?;
        Ok(slots.get(id).cloned())
    }

    async fn insert_slot(&self, slot: Slot) -> Result<()> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("slots write"))?;
        slots.insert(slot.id.clone(), slot);
        Ok(())
    }

    async fn compare_and_set_slot(
        &self,
        id: &SlotId,
        expected: SlotStatus,
        next: SlotStatus,
    ) -> Result<Slot> {
        let mut slots = self
            .slots
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("slots write"))?;

        let slot = slots.get_mut(id).ok_or_else(|| SchedulingError::NotFound {
            entity: "slot",
            id: id.clone(),
        })?;

        if slot.status != expected {
            return Err(SchedulingError::SlotStatusConflict {
                slot_id: id.clone(),
                expected,
                found: slot.status,
            }
            .into());
        }

        slot.status = next;
        slot.updated_at = Utc::now();
        Ok(slot.clone())
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn load_queue(&self, provider_id: &ProviderId) -> Result<Option<ProviderQueue>> {
        let queues = self
            .queues
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("queues read"))?;
        Ok(queues.get(provider_id).cloned())
    }

    async fn save_queue(&self, queue: &ProviderQueue, expected_version: u64) -> Result<()> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| SchedulingError::lock_poisoned("queues write"))?;

        let stored_version = queues
            .get(&queue.provider_id)
            .map(|q| q.version)
            .unwrap_or(0);
        if stored_version != expected_version {
            return Err(SchedulingError::VersionConflict {
                entity: "queue",
                id: queue.provider_id.clone(),
            }
            .into());
        }

        queues.insert(queue.provider_id.clone(), queue.clone());
        Ok(())
    }
}

#[async_trait]
impl ProviderCatalog for InMemoryStore {
    async fn service_duration_minutes(
        &self,
        provider_id: &ProviderId,
        service_id: &ServiceId,
    ) -> Result<Option<u32>> {
        let catalog = self
            .catalog
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("catalog read"))?;
        Ok(catalog
            .get(provider_id)
            .and_then(|entry| entry.service_minutes.get(service_id).copied()))
    }

    async fn auto_accept(&self, provider_id: &ProviderId) -> Result<bool> {
        let catalog = self
            .catalog
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("catalog read"))?;
        Ok(catalog
            .get(provider_id)
            .map(|entry| entry.auto_accept)
            .unwrap_or(false))
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryStore {
    async fn resolve_token(&self, recipient: &Recipient) -> Result<Option<String>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| SchedulingError::lock_poisoned("tokens read"))?;
        Ok(tokens.get(recipient).cloned())
    }
}
