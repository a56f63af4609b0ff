//! Availability ledger for provider slots
//!
//! Slots only change as a side effect of booking transitions, so the
//! mutating operations are crate-private and driven by the state machine.

use crate::error::{scheduling_error, Result, SchedulingError};
use crate::store::SlotStore;
use crate::types::{BookingStatus, ProviderId, Slot, SlotId, SlotStatus};
use std::sync::Arc;
use tracing::debug;

/// Slot status implied by a booking status
pub fn slot_status_for(status: BookingStatus) -> SlotStatus {
    match status {
        BookingStatus::Pending => SlotStatus::Reserved,
        BookingStatus::Confirmed | BookingStatus::Completed => SlotStatus::Booked,
        BookingStatus::Cancelled | BookingStatus::Rejected | BookingStatus::NoShow => {
            SlotStatus::Available
        }
    }
}

pub struct SlotLedger {
    store: Arc<dyn SlotStore>,
}

impl SlotLedger {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    /// Add a slot produced by schedule generation
    pub async fn register(&self, slot: Slot) -> Result<()> {
        debug!("Registering slot {} for provider {}", slot.id, slot.provider_id);
        self.store.insert_slot(slot).await
    }

    pub async fn get(&self, slot_id: &SlotId) -> Result<Slot> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound {
                    entity: "slot",
                    id: slot_id.clone(),
                }
                .into()
            })
    }

    /// Take an available slot for a new request
    pub(crate) async fn reserve(&self, slot_id: &SlotId, provider_id: &ProviderId) -> Result<Slot> {
        let slot = self.get(slot_id).await?;
        if &slot.provider_id != provider_id {
            return Err(SchedulingError::InvalidRequest {
                reason: format!(
                    "Slot {} belongs to provider {}, not {}",
                    slot_id, slot.provider_id, provider_id
                ),
            }
            .into());
        }

        self.store
            .compare_and_set_slot(slot_id, SlotStatus::Available, SlotStatus::Reserved)
            .await
            .map_err(|e| match scheduling_error(&e) {
                Some(SchedulingError::SlotStatusConflict { found, .. }) => {
                    SchedulingError::SlotUnavailable {
                        slot_id: slot_id.clone(),
                        status: *found,
                    }
                    .into()
                }
                _ => e,
            })
    }

    /// Move a slot between two statuses; no-op when they are equal
    pub(crate) async fn transition(
        &self,
        slot_id: &SlotId,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        self.store.compare_and_set_slot(slot_id, from, to).await?;
        debug!("Slot {} moved from {} to {}", slot_id, from, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn ledger_with_slot() -> SlotLedger {
        let store = Arc::new(InMemoryStore::new());
        let ledger = SlotLedger::new(store);
        ledger
            .register(Slot::available("slot-1", "salon-1"))
            .await
            .unwrap();
        ledger
    }

    #[test]
    fn test_slot_status_for_booking_status() {
        assert_eq!(slot_status_for(BookingStatus::Pending), SlotStatus::Reserved);
        assert_eq!(slot_status_for(BookingStatus::Confirmed), SlotStatus::Booked);
        assert_eq!(slot_status_for(BookingStatus::Completed), SlotStatus::Booked);
        assert_eq!(slot_status_for(BookingStatus::NoShow), SlotStatus::Available);
        assert_eq!(slot_status_for(BookingStatus::Rejected), SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_reserve_twice_reports_slot_unavailable() {
        let ledger = ledger_with_slot().await;
        let slot_id = "slot-1".to_string();
        let provider = "salon-1".to_string();

        let slot = ledger.reserve(&slot_id, &provider).await.unwrap();
        assert_eq!(slot.status, SlotStatus::Reserved);

        let err = ledger.reserve(&slot_id, &provider).await.unwrap_err();
        assert!(matches!(
            scheduling_error(&err),
            Some(SchedulingError::SlotUnavailable {
                status: SlotStatus::Reserved,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_reserve_checks_provider_and_existence() {
        let ledger = ledger_with_slot().await;

        let err = ledger
            .reserve(&"slot-1".to_string(), &"salon-2".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            scheduling_error(&err),
            Some(SchedulingError::InvalidRequest { .. })
        ));

        let err = ledger
            .reserve(&"slot-x".to_string(), &"salon-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            scheduling_error(&err),
            Some(SchedulingError::NotFound { entity: "slot", .. })
        ));

        let slot = ledger.get(&"slot-1".to_string()).await.unwrap();
        assert_eq!(slot.status, SlotStatus::Available);
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let ledger = ledger_with_slot().await;
        let slot_id = "slot-1".to_string();

        assert!(ledger
            .transition(&slot_id, SlotStatus::Reserved, SlotStatus::Booked)
            .await
            .is_err());
        ledger
            .transition(&slot_id, SlotStatus::Available, SlotStatus::Available)
            .await
            .unwrap();
        ledger
            .transition(&slot_id, SlotStatus::Available, SlotStatus::Booked)
            .await
            .unwrap();
        assert_eq!(
            ledger.get(&slot_id).await.unwrap().status,
            SlotStatus::Booked
        );
    }
}
