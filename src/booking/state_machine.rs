//! Booking lifecycle
//!
//! Every transition runs under the lock of the booking's provider queue and
//! writes three documents in a fixed order: slot, booking, queue. If a later
//! write fails the earlier ones are rolled back, so a refused or failed
//! transition leaves all three as they were. The writes run on a task of
//! their own, so dropping the caller cannot stop them halfway. Notifications
//! go out after the lock is released and never affect the outcome.

use crate::clock::Clock;
use crate::error::{error_kind, Result, SchedulingError};
use crate::metrics::MetricsCollector;
use crate::notify::{messages, Notifier};
use crate::queue::{QueueEngine, QueueEntry, QueueEvent};
use crate::slot::{slot_status_for, SlotLedger};
use crate::store::{BookingStore, ProviderCatalog};
use crate::types::{
    Booking, BookingId, BookingRequest, BookingStatus, CustomerId, SlotId, SlotStatus,
};
use crate::utils::{generate_booking_id, minutes};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a transition does to the provider's queue
#[derive(Debug, Clone, Copy)]
enum QueueChange {
    Keep,
    Enqueue(Duration),
    Remove,
    Complete,
    NoShow,
}

#[derive(Clone)]
struct Transition {
    operation: &'static str,
    to: BookingStatus,
    queue: QueueChange,
    rejection_reason: Option<String>,
}

/// Result of a committed transition, consumed after the lock is released
struct Applied {
    booking: Booking,
    previous: BookingStatus,
    events: Vec<QueueEvent>,
    removed: Option<QueueEntry>,
    moved_up: Option<BookingId>,
}

#[derive(Clone)]
pub struct BookingStateMachine {
    bookings: Arc<dyn BookingStore>,
    catalog: Arc<dyn ProviderCatalog>,
    slots: Arc<SlotLedger>,
    queue: Arc<QueueEngine>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl BookingStateMachine {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        catalog: Arc<dyn ProviderCatalog>,
        slots: Arc<SlotLedger>,
        queue: Arc<QueueEngine>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            bookings,
            catalog,
            slots,
            queue,
            notifier,
            clock,
            metrics,
        }
    }

    /// Create a pending booking and reserve its slot.
    ///
    /// Providers with auto-accept enabled confirm the booking straight away;
    /// if that fails the booking is still returned, pending.
    pub async fn request_booking(&self, request: BookingRequest) -> Result<Booking> {
        let machine = self.clone();
        let result: Result<Booking> = run_to_completion(async move {
            validate_request(&request)?;

            let lock = machine.queue.lock(&request.provider_id).await?;
            machine
                .slots
                .reserve(&request.slot_id, &request.provider_id)
                .await?;

            let booking = Booking::pending(generate_booking_id(), request, machine.clock.now());
            if let Err(e) = machine.bookings.insert_booking(booking.clone()).await {
                machine
                    .compensate_slot(&booking.slot_id, SlotStatus::Reserved, SlotStatus::Available)
                    .await;
                return Err(e);
            }
            drop(lock);
            Ok(booking)
        })
        .await;
        let booking = self.observe("request_booking", result)?;

        self.metrics.record_booking_requested();
        info!(
            "📅 Booking {} requested by {} at provider {} for {}",
            booking.id, booking.customer_id, booking.provider_id, booking.scheduled_at
        );
        self.notifier
            .to_provider_owner(&booking, messages::booking_requested(&booking))
            .await;

        let auto_accept = match self.catalog.auto_accept(&booking.provider_id).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(
                    "Failed to read auto-accept flag for provider {}: {}",
                    booking.provider_id, e
                );
                false
            }
        };
        if !auto_accept {
            return Ok(booking);
        }

        debug!("Provider {} auto-accepts bookings", booking.provider_id);
        match self.accept(booking.id).await {
            Ok(confirmed) => Ok(confirmed),
            Err(e) => {
                warn!("Auto-accept of booking {} failed: {}", booking.id, e);
                Ok(booking)
            }
        }
    }

    /// pending → confirmed. Books the slot and puts the booking in the queue.
    pub async fn accept(&self, booking_id: BookingId) -> Result<Booking> {
        let result: Result<Applied> = async {
            let booking = self.get_booking(booking_id).await?;
            ensure_transition(&booking, BookingStatus::Confirmed)?;
            let duration = self.service_duration(&booking).await?;

            self.apply(
                booking_id,
                Transition {
                    operation: "accept",
                    to: BookingStatus::Confirmed,
                    queue: QueueChange::Enqueue(duration),
                    rejection_reason: None,
                },
            )
            .await
        }
        .await;
        let applied = self.observe("accept", result)?;

        self.metrics.record_enqueued();
        self.notifier
            .to_customer(&applied.booking, messages::booking_confirmed(&applied.booking))
            .await;
        self.queue.publish(&applied.events).await;
        Ok(applied.booking)
    }

    /// pending → rejected, releasing the slot
    pub async fn reject(&self, booking_id: BookingId, reason: &str) -> Result<Booking> {
        let result = if reason.trim().is_empty() {
            Err(SchedulingError::InvalidRequest {
                reason: "A rejection reason is required".to_string(),
            }
            .into())
        } else {
            self.apply(
                booking_id,
                Transition {
                    operation: "reject",
                    to: BookingStatus::Rejected,
                    queue: QueueChange::Keep,
                    rejection_reason: Some(reason.trim().to_string()),
                },
            )
            .await
        };
        let applied = self.observe("reject", result)?;

        self.notifier
            .to_customer(
                &applied.booking,
                messages::booking_rejected(&applied.booking, reason.trim()),
            )
            .await;
        Ok(applied.booking)
    }

    /// confirmed → no-show. Shared by providers and the reminder scheduler.
    pub async fn mark_no_show(&self, booking_id: BookingId) -> Result<Booking> {
        let result = self
            .apply(
                booking_id,
                Transition {
                    operation: "mark_no_show",
                    to: BookingStatus::NoShow,
                    queue: QueueChange::NoShow,
                    rejection_reason: None,
                },
            )
            .await;
        let applied = self.observe("mark_no_show", result)?;

        self.notifier
            .to_customer(&applied.booking, messages::no_show(&applied.booking))
            .await;
        if let Some(next_id) = applied.moved_up {
            self.notify_moved_up(next_id).await;
        }
        Ok(applied.booking)
    }

    /// pending or confirmed → cancelled
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking> {
        let result = self
            .apply(
                booking_id,
                Transition {
                    operation: "cancel",
                    to: BookingStatus::Cancelled,
                    queue: QueueChange::Remove,
                    rejection_reason: None,
                },
            )
            .await;
        let applied = self.observe("cancel", result)?;

        self.notifier
            .to_customer(&applied.booking, messages::booking_cancelled(&applied.booking))
            .await;
        Ok(applied.booking)
    }

    /// confirmed → completed. The completion time anchors the next start.
    pub async fn complete(&self, booking_id: BookingId) -> Result<Booking> {
        let result = self
            .apply(
                booking_id,
                Transition {
                    operation: "complete",
                    to: BookingStatus::Completed,
                    queue: QueueChange::Complete,
                    rejection_reason: None,
                },
            )
            .await;
        let applied = self.observe("complete", result)?;
        Ok(applied.booking)
    }

    /// Put a confirmed booking into service with its real duration
    pub async fn start_service(
        &self,
        booking_id: BookingId,
        actual_duration: Duration,
    ) -> Result<QueueEntry> {
        let result: Result<(QueueEntry, Vec<QueueEvent>)> = async {
            let provider_id = self.get_booking(booking_id).await?.provider_id;
            let mut lock = self.queue.lock(&provider_id).await?;

            let booking = self.get_booking(booking_id).await?;
            if booking.status != BookingStatus::Confirmed {
                return Err(SchedulingError::InvalidRequest {
                    reason: format!(
                        "Booking {} is {}, only confirmed bookings can start service",
                        booking_id, booking.status
                    ),
                }
                .into());
            }

            self.queue
                .advance_in(&mut lock, booking_id, actual_duration)
                .await
        }
        .await;
        let (entry, events) = self.observe("start_service", result)?;

        info!(
            "✂️ Booking {} in service from {} to {}",
            booking_id, entry.estimated_start, entry.estimated_end
        );
        self.queue.publish(&events).await;
        Ok(entry)
    }

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound {
                    entity: "booking",
                    id: booking_id.to_string(),
                }
                .into()
            })
    }

    /// A customer's bookings, most recently scheduled first
    pub async fn booking_history(&self, customer_id: &CustomerId) -> Result<Vec<Booking>> {
        let mut history = self.bookings.list_for_customer(customer_id).await?;
        history.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(history)
    }

    /// Link a rating to a completed booking. Allowed once.
    pub async fn attach_rating(&self, booking_id: BookingId, rating_id: &str) -> Result<Booking> {
        let result: Result<Booking> = async {
            let booking = self.get_booking(booking_id).await?;
            if booking.status != BookingStatus::Completed {
                return Err(SchedulingError::InvalidRequest {
                    reason: format!("Booking {} is {}, not completed", booking_id, booking.status),
                }
                .into());
            }
            if booking.rating_id.is_some() {
                return Err(SchedulingError::InvalidRequest {
                    reason: format!("Booking {} has already been rated", booking_id),
                }
                .into());
            }

            let expected = booking.version;
            let mut rated = booking;
            rated.rating_id = Some(rating_id.to_string());
            rated.updated_at = self.clock.now();
            self.bookings.update_booking(rated, expected).await
        }
        .await;
        self.observe("attach_rating", result)
    }

    fn observe<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            debug!("{} refused: {}", operation, e);
            self.metrics.record_failure(operation, error_kind(e));
        }
        result
    }

    async fn service_duration(&self, booking: &Booking) -> Result<Duration> {
        let minutes_for_service = self
            .catalog
            .service_duration_minutes(&booking.provider_id, &booking.service_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "service",
                id: format!("{}/{}", booking.provider_id, booking.service_id),
            })?;
        Ok(minutes(minutes_for_service))
    }

    async fn apply(&self, booking_id: BookingId, transition: Transition) -> Result<Applied> {
        let timer = self.metrics.start_timer();
        let machine = self.clone();
        let staged = transition.clone();
        let applied =
            run_to_completion(async move { machine.apply_locked(booking_id, &staged).await })
                .await?;

        if let Some(removed) = &applied.removed {
            self.queue.record_removed(removed);
        }
        self.metrics
            .record_transition(applied.previous, transition.to, timer.stop());
        info!(
            "Booking {} moved from {} to {} ({})",
            booking_id, applied.previous, transition.to, transition.operation
        );
        Ok(applied)
    }

    async fn apply_locked(&self, booking_id: BookingId, transition: &Transition) -> Result<Applied> {
        let provider_id = self.get_booking(booking_id).await?.provider_id;
        let mut lock = self.queue.lock(&provider_id).await?;

        // Re-read under the lock; the status may have moved while we waited
        let current = self.get_booking(booking_id).await?;
        ensure_transition(&current, transition.to)?;
        let now = self.clock.now();

        let head_before = lock.current().peek_next_waiting().map(|e| e.booking_id);
        let mut staged = lock.staged();
        let mut events = Vec::new();
        let mut removed = None;
        let queued = staged.contains(booking_id);
        match transition.queue {
            QueueChange::Keep => {}
            QueueChange::Enqueue(duration) => {
                events.push(staged.enqueue(booking_id, duration, now)?);
            }
            QueueChange::Remove if queued => removed = Some(staged.remove(booking_id, now)?),
            QueueChange::Complete if queued => removed = Some(staged.complete(booking_id, now)?),
            QueueChange::NoShow if queued => {
                removed = Some(staged.remove_no_show(booking_id, now)?)
            }
            QueueChange::Remove | QueueChange::Complete | QueueChange::NoShow => {
                debug!("Booking {} was not queued at {}", booking_id, provider_id);
            }
        }
        let queue_changed = !events.is_empty() || removed.is_some();
        let head_after = staged.peek_next_waiting().map(|e| e.booking_id);
        let moved_up = head_after.filter(|_| removed.is_some() && head_after != head_before);

        let slot_from = slot_status_for(current.status);
        let slot_to = slot_status_for(transition.to);
        self.slots
            .transition(&current.slot_id, slot_from, slot_to)
            .await?;

        let mut next = current.clone();
        next.status = transition.to;
        next.updated_at = now;
        if let Some(reason) = &transition.rejection_reason {
            next.rejection_reason = Some(reason.clone());
        }
        let written = match self.bookings.update_booking(next, current.version).await {
            Ok(written) => written,
            Err(e) => {
                self.compensate_slot(&current.slot_id, slot_to, slot_from)
                    .await;
                return Err(e);
            }
        };

        if queue_changed {
            if let Err(e) = self.queue.commit(&mut lock, staged).await {
                self.compensate_booking(&current, &written).await;
                self.compensate_slot(&current.slot_id, slot_to, slot_from)
                    .await;
                return Err(e);
            }
        }

        Ok(Applied {
            booking: written,
            previous: current.status,
            events,
            removed,
            moved_up,
        })
    }

    async fn compensate_slot(&self, slot_id: &SlotId, written: SlotStatus, original: SlotStatus) {
        match self.slots.transition(slot_id, written, original).await {
            Ok(()) => {
                warn!("Rolled slot {} back to {}", slot_id, original);
                self.metrics.record_compensation("slot", true);
            }
            Err(e) => {
                error!(
                    "Failed to roll slot {} back from {} to {}: {}",
                    slot_id, written, original, e
                );
                self.metrics.record_compensation("slot", false);
            }
        }
    }

    async fn compensate_booking(&self, original: &Booking, written: &Booking) {
        match self
            .bookings
            .update_booking(original.clone(), written.version)
            .await
        {
            Ok(_) => {
                warn!("Rolled booking {} back to {}", original.id, original.status);
                self.metrics.record_compensation("booking", true);
            }
            Err(e) => {
                error!(
                    "Failed to roll booking {} back to {}: {}",
                    original.id, original.status, e
                );
                self.metrics.record_compensation("booking", false);
            }
        }
    }

    async fn notify_moved_up(&self, booking_id: BookingId) {
        match self.bookings.get_booking(booking_id).await {
            Ok(Some(next)) => {
                self.notifier
                    .to_customer(&next, messages::moved_up(&next))
                    .await;
            }
            Ok(None) => warn!("Next queued booking {} no longer exists", booking_id),
            Err(e) => warn!("Failed to load next queued booking {}: {}", booking_id, e),
        }
    }
}

fn ensure_transition(booking: &Booking, to: BookingStatus) -> Result<()> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(SchedulingError::InvalidTransition {
            booking_id: booking.id,
            from: booking.status,
            to,
        }
        .into())
    }
}

fn validate_request(request: &BookingRequest) -> Result<()> {
    let missing = [
        ("customer", &request.customer_id),
        ("provider", &request.provider_id),
        ("service", &request.service_id),
        ("slot", &request.slot_id),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    match missing {
        Some((field, _)) => Err(SchedulingError::InvalidRequest {
            reason: format!("Booking request is missing a {} reference", field),
        }
        .into()),
        None => Ok(()),
    }
}

/// Drive a multi-document write on its own task.
///
/// Dropping the caller (a cancelled handler, an aborted loop) no longer
/// stops the sequence between two writes; it runs through its commit or
/// its compensation either way.
async fn run_to_completion<T, F>(writes: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(writes).await.map_err(|e| {
        anyhow::Error::from(SchedulingError::InternalError {
            message: format!("Write task did not finish: {}", e),
        })
    })?
}
