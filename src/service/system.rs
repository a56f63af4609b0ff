//! Wiring of the scheduling core
//!
//! `SalonSystem` builds the slot ledger, queue engine, state machine and
//! reminder scheduler over one set of store ports so that the service
//! shell, the integration tests and the benchmarks share one assembly.

use crate::booking::BookingStateMachine;
use crate::clock::Clock;
use crate::config::SchedulingSettings;
use crate::metrics::MetricsCollector;
use crate::notify::{NotificationDispatcher, Notifier};
use crate::queue::QueueEngine;
use crate::scheduler::{ReminderScheduler, ReminderSettings};
use crate::slot::SlotLedger;
use crate::store::StorePorts;
use std::sync::Arc;
use tracing::debug;

pub struct SalonSystem {
    ports: StorePorts,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    notifier: Arc<Notifier>,
    slots: Arc<SlotLedger>,
    queue: Arc<QueueEngine>,
    bookings: Arc<BookingStateMachine>,
    scheduler: Arc<ReminderScheduler>,
}

impl SalonSystem {
    pub fn new(
        ports: StorePorts,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        scheduling: &SchedulingSettings,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(
            dispatcher,
            ports.directory.clone(),
            ports.bookings.clone(),
            std::time::Duration::from_millis(scheduling.notification_timeout_ms),
            metrics.clone(),
        ));
        let slots = Arc::new(SlotLedger::new(ports.slots.clone()));
        let queue = Arc::new(QueueEngine::new(
            ports.queues.clone(),
            clock.clone(),
            notifier.clone(),
            metrics.clone(),
        ));
        let bookings = Arc::new(BookingStateMachine::new(
            ports.bookings.clone(),
            ports.catalog.clone(),
            slots.clone(),
            queue.clone(),
            notifier.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            ports.bookings.clone(),
            bookings.clone(),
            notifier.clone(),
            clock.clone(),
            metrics.clone(),
            ReminderSettings::from(scheduling),
        ));
        debug!("Scheduling core assembled");

        Self {
            ports,
            clock,
            metrics,
            notifier,
            slots,
            queue,
            bookings,
            scheduler,
        }
    }

    pub fn ports(&self) -> &StorePorts {
        &self.ports
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    pub fn slots(&self) -> Arc<SlotLedger> {
        self.slots.clone()
    }

    pub fn queue(&self) -> Arc<QueueEngine> {
        self.queue.clone()
    }

    pub fn bookings(&self) -> Arc<BookingStateMachine> {
        self.bookings.clone()
    }

    pub fn scheduler(&self) -> Arc<ReminderScheduler> {
        self.scheduler.clone()
    }
}
