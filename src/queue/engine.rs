//! Per-provider queue engine
//!
//! Every provider's queue sits behind its own async mutex, so mutations of
//! one provider are serialized while different providers never contend. The
//! lock is held across load, mutate and save of the queue document, and the
//! booking state machine holds the same lock while it changes the booking
//! and slot that go with a queue change.

use super::provider_queue::{ProviderQueue, QueueEntry, QueueEntryStatus, QueueEvent};
use super::statistics::WaitTimeSummary;
use crate::clock::Clock;
use crate::error::{error_kind, scheduling_error, Result, SchedulingError};
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::store::QueueStore;
use crate::types::{BookingId, ProviderId};
use crate::utils::elapsed_between;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

type QueueCell = Arc<Mutex<Option<ProviderQueue>>>;

/// Read-only view of a provider's queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub provider_id: ProviderId,
    pub entries: Vec<QueueEntry>,
    pub current_queue_size: usize,
    pub average_wait_time: Option<Duration>,
    pub wait_times: WaitTimeSummary,
    pub version: u64,
}

impl From<&ProviderQueue> for QueueSnapshot {
    fn from(queue: &ProviderQueue) -> Self {
        Self {
            provider_id: queue.provider_id.clone(),
            entries: queue.entries().to_vec(),
            current_queue_size: queue.current_queue_size(),
            average_wait_time: queue.average_wait_time(),
            wait_times: queue.wait_stats().summary(),
            version: queue.version,
        }
    }
}

/// Exclusive access to one provider's queue.
///
/// Holds the committed document; callers clone it, apply their change to the
/// copy and hand the copy to `QueueEngine::commit`.
pub(crate) struct QueueLock {
    guard: OwnedMutexGuard<Option<ProviderQueue>>,
    queue: ProviderQueue,
}

impl QueueLock {
    pub(crate) fn current(&self) -> &ProviderQueue {
        &self.queue
    }

    pub(crate) fn staged(&self) -> ProviderQueue {
        self.queue.clone()
    }
}

pub struct QueueEngine {
    queues: RwLock<HashMap<ProviderId, QueueCell>>,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<Notifier>,
    metrics: Arc<MetricsCollector>,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<Notifier>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            store,
            clock,
            notifier,
            metrics,
        }
    }

    async fn cell(&self, provider_id: &ProviderId) -> QueueCell {
        if let Some(cell) = self.queues.read().await.get(provider_id) {
            return cell.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(provider_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Wait for exclusive access to a provider's queue, loading it on first use
    pub(crate) async fn lock(&self, provider_id: &ProviderId) -> Result<QueueLock> {
        let mut guard = self.cell(provider_id).await.lock_owned().await;

        let queue = match guard.as_ref() {
            Some(queue) => queue.clone(),
            None => {
                let loaded = self
                    .store
                    .load_queue(provider_id)
                    .await?
                    .unwrap_or_else(|| ProviderQueue::new(provider_id.clone()));
                *guard = Some(loaded.clone());
                loaded
            }
        };

        Ok(QueueLock { guard, queue })
    }

    /// Persist a staged queue and make it the committed state.
    ///
    /// On failure the committed state is untouched; after a version conflict
    /// the cached copy is dropped so the next lock reloads from the store.
    pub(crate) async fn commit(&self, lock: &mut QueueLock, mut staged: ProviderQueue) -> Result<()> {
        let expected = lock.queue.version;
        staged.version = expected + 1;

        if let Err(e) = self.store.save_queue(&staged, expected).await {
            if matches!(
                scheduling_error(&e),
                Some(SchedulingError::VersionConflict { .. })
            ) {
                warn!(
                    "Queue for provider {} changed underneath us, dropping cached copy",
                    staged.provider_id
                );
                *lock.guard = None;
            }
            return Err(e);
        }

        self.metrics
            .set_queue_size(&staged.provider_id, staged.current_queue_size());
        *lock.guard = Some(staged.clone());
        lock.queue = staged;
        Ok(())
    }

    /// Notify customers about queue changes. Call after the lock is released.
    pub(crate) async fn publish(&self, events: &[QueueEvent]) {
        if events.is_empty() {
            return;
        }
        let revised = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::EstimateRevised { .. }))
            .count();
        self.metrics.record_estimates_revised(revised);
        self.notifier.queue_events(events).await;
    }

    pub(crate) fn record_removed(&self, entry: &QueueEntry) {
        let outcome = match entry.status {
            QueueEntryStatus::Completed => "completed",
            QueueEntryStatus::NoShow => "no_show",
            _ => "removed",
        };
        self.metrics.record_removed(outcome);
    }

    fn record_failure(&self, operation: &str, err: &anyhow::Error) {
        self.metrics.record_failure(operation, error_kind(err));
    }

    /// Append a booking to the provider's queue
    pub async fn enqueue(
        &self,
        provider_id: &ProviderId,
        booking_id: BookingId,
        service_duration: Duration,
    ) -> Result<QueueEntry> {
        let result = self
            .enqueue_locked(provider_id, booking_id, service_duration)
            .await;
        match result {
            Ok((entry, event)) => {
                self.publish(&[event]).await;
                Ok(entry)
            }
            Err(e) => {
                self.record_failure("enqueue", &e);
                Err(e)
            }
        }
    }

    async fn enqueue_locked(
        &self,
        provider_id: &ProviderId,
        booking_id: BookingId,
        service_duration: Duration,
    ) -> Result<(QueueEntry, QueueEvent)> {
        let mut lock = self.lock(provider_id).await?;
        let mut staged = lock.staged();
        let event = staged.enqueue(booking_id, service_duration, self.clock.now())?;
        let entry = staged
            .entry(booking_id)
            .cloned()
            .ok_or_else(|| SchedulingError::InternalError {
                message: format!("Enqueued booking {} vanished from staged queue", booking_id),
            })?;
        self.commit(&mut lock, staged).await?;

        self.metrics.record_enqueued();
        info!(
            "Queued booking {} at provider {} in position {} (start {})",
            booking_id, provider_id, entry.position, entry.estimated_start
        );
        Ok((entry, event))
    }

    /// Start service for an entry with its real duration and re-project the
    /// waiting entries behind it
    pub async fn advance(
        &self,
        provider_id: &ProviderId,
        booking_id: BookingId,
        actual_duration: Duration,
    ) -> Result<QueueEntry> {
        let result = self
            .advance_locked(provider_id, booking_id, actual_duration)
            .await;
        match result {
            Ok((entry, events)) => {
                self.publish(&events).await;
                Ok(entry)
            }
            Err(e) => {
                self.record_failure("advance", &e);
                Err(e)
            }
        }
    }

    async fn advance_locked(
        &self,
        provider_id: &ProviderId,
        booking_id: BookingId,
        actual_duration: Duration,
    ) -> Result<(QueueEntry, Vec<QueueEvent>)> {
        let mut lock = self.lock(provider_id).await?;
        self.advance_in(&mut lock, booking_id, actual_duration).await
    }

    /// Advance an entry of an already locked queue and commit the result
    pub(crate) async fn advance_in(
        &self,
        lock: &mut QueueLock,
        booking_id: BookingId,
        actual_duration: Duration,
    ) -> Result<(QueueEntry, Vec<QueueEvent>)> {
        let mut staged = lock.staged();
        let events = staged.advance(booking_id, actual_duration)?;
        let entry = staged
            .entry(booking_id)
            .cloned()
            .ok_or_else(|| SchedulingError::InternalError {
                message: format!("Advanced booking {} vanished from staged queue", booking_id),
            })?;
        self.commit(lock, staged).await?;

        self.metrics
            .record_wait_time(elapsed_between(entry.enqueued_at, entry.estimated_start));
        debug!(
            "Booking {} in service until {}, {} follow-up events",
            booking_id,
            entry.estimated_end,
            events.len()
        );
        Ok((entry, events))
    }

    /// Drop an entry from the provider's queue and close the gap
    pub async fn remove(&self, provider_id: &ProviderId, booking_id: BookingId) -> Result<QueueEntry> {
        let result: Result<QueueEntry> = async {
            let mut lock = self.lock(provider_id).await?;
            let mut staged = lock.staged();
            let removed = staged.remove(booking_id, self.clock.now())?;
            self.commit(&mut lock, staged).await?;
            Ok(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                self.record_removed(&removed);
                info!(
                    "Removed booking {} from provider {} queue (was position {})",
                    booking_id, provider_id, removed.position
                );
                Ok(removed)
            }
            Err(e) => {
                self.record_failure("remove", &e);
                Err(e)
            }
        }
    }

    /// Ordered, read-only view of a provider's queue
    pub async fn get_queue(&self, provider_id: &ProviderId) -> Result<QueueSnapshot> {
        let lock = self.lock(provider_id).await?;
        Ok(QueueSnapshot::from(lock.current()))
    }

    /// First entry still waiting for service
    pub async fn peek_next(&self, provider_id: &ProviderId) -> Result<Option<QueueEntry>> {
        let lock = self.lock(provider_id).await?;
        Ok(lock.current().peek_next_waiting().cloned())
    }

    /// Number of providers whose queue has been touched
    pub async fn provider_count(&self) -> usize {
        self.queues.read().await.len()
    }

    /// Wait-time aggregates of every loaded queue, by provider
    pub async fn wait_time_summaries(&self) -> BTreeMap<ProviderId, WaitTimeSummary> {
        let cells: Vec<QueueCell> = self.queues.read().await.values().cloned().collect();

        let mut summaries = BTreeMap::new();
        for cell in cells {
            if let Some(queue) = cell.lock().await.as_ref() {
                summaries.insert(queue.provider_id.clone(), queue.wait_stats().summary());
            }
        }
        summaries
    }
}
