//! Test fixtures shared by the integration and concurrency suites
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use salon_queue::clock::ManualClock;
use salon_queue::config::SchedulingSettings;
use salon_queue::error::Result;
use salon_queue::metrics::MetricsCollector;
use salon_queue::notify::RecordingDispatcher;
use salon_queue::service::SalonSystem;
use salon_queue::store::{InMemoryStore, StorePorts};
use salon_queue::types::{Booking, BookingRequest, Recipient, Slot, SlotStatus};
use std::sync::Arc;

pub const PROVIDER: &str = "salon-1";
pub const OTHER_PROVIDER: &str = "salon-2";

/// Fixed wall clock the suites start from: 2024-05-01 14:00 UTC
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap()
}

/// A fully wired scheduling core over the in-memory store
pub struct TestSystem {
    pub system: SalonSystem,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

pub fn create_test_system() -> TestSystem {
    create_test_system_with(Arc::new(RecordingDispatcher::new()))
}

pub fn create_test_system_with(dispatcher: Arc<RecordingDispatcher>) -> TestSystem {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(base_time()));
    let metrics = Arc::new(MetricsCollector::new().unwrap());

    let system = SalonSystem::new(
        StorePorts::in_memory(store.clone()),
        dispatcher.clone(),
        clock.clone(),
        metrics,
        &SchedulingSettings::default(),
    );

    for provider in [PROVIDER, OTHER_PROVIDER] {
        store.register_service(provider, "cut", 30).unwrap();
        store.register_service(provider, "color", 20).unwrap();
        store.register_service(provider, "shave", 15).unwrap();
        store
            .register_token(
                Recipient::ProviderOwner(provider.to_string()),
                format!("{}-owner", provider),
            )
            .unwrap();
    }

    TestSystem {
        system,
        store,
        clock,
        dispatcher,
    }
}

impl TestSystem {
    /// Register a customer's device so notifications reach them
    pub fn register_customer(&self, customer: &str) {
        self.store
            .register_token(
                Recipient::Customer(customer.to_string()),
                format!("{}-device", customer),
            )
            .unwrap();
    }

    pub async fn open_slot(&self, provider: &str, slot: &str) {
        self.system
            .slots()
            .register(Slot::available(slot, provider))
            .await
            .unwrap();
    }

    pub async fn slot_status(&self, slot: &str) -> SlotStatus {
        self.system
            .slots()
            .get(&slot.to_string())
            .await
            .unwrap()
            .status
    }

    /// Open a slot and request it for a customer
    pub async fn request(
        &self,
        provider: &str,
        customer: &str,
        slot: &str,
        service: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Booking> {
        self.register_customer(customer);
        self.open_slot(provider, slot).await;
        self.system
            .bookings()
            .request_booking(BookingRequest {
                customer_id: customer.to_string(),
                provider_id: provider.to_string(),
                service_id: service.to_string(),
                slot_id: slot.to_string(),
                scheduled_at,
            })
            .await
    }

    /// Request and accept a booking at the default provider
    pub async fn confirmed(
        &self,
        customer: &str,
        slot: &str,
        service: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Booking {
        let booking = self
            .request(PROVIDER, customer, slot, service, scheduled_at)
            .await
            .unwrap();
        self.system.bookings().accept(booking.id).await.unwrap()
    }

    /// Bodies of every notification sent to one device token
    pub fn bodies_for(&self, token: &str) -> Vec<String> {
        self.dispatcher
            .sent()
            .into_iter()
            .filter(|n| n.recipient_token == token)
            .map(|n| n.body)
            .collect()
    }
}
