//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the salon-queue service
//! using Prometheus metrics.

use crate::types::BookingStatus;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the booking and queue service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    service_metrics: ServiceMetrics,
    booking_metrics: BookingMetrics,
    queue_metrics: QueueMetrics,
    notification_metrics: NotificationMetrics,
    scheduler_metrics: SchedulerMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Booking lifecycle metrics
#[derive(Clone)]
pub struct BookingMetrics {
    /// Bookings created
    pub requests_total: IntCounter,

    /// Successful transitions by source and target status
    pub transitions_total: IntCounterVec,

    /// Rejected or failed operations by error kind
    pub failures_total: IntCounterVec,

    /// Slot/booking writes undone after a later step failed
    pub compensations_total: IntCounterVec,

    pub operation_duration: HistogramVec,
}

/// Provider queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Live entries per provider
    pub queue_size: IntGaugeVec,

    /// Entries appended
    pub enqueued_total: IntCounter,

    /// Entries removed by outcome
    pub removed_total: IntCounterVec,

    /// Waiting entries whose projection moved on advance
    pub estimates_revised_total: IntCounter,

    /// Observed wait between enqueue and service start
    pub wait_time_seconds: Histogram,
}

#[derive(Clone)]
pub struct NotificationMetrics {
    /// Dispatch attempts by message kind and outcome
    pub dispatches_total: IntCounterVec,

    pub dispatch_duration: Histogram,
}

/// Reminder scheduler metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    pub ticks_total: IntCounter,

    pub tick_duration: Histogram,

    /// Reminders emitted by window
    pub reminders_total: IntCounterVec,

    /// Bookings moved to no-show by the scheduler
    pub no_shows_total: IntCounter,

    /// Bookings whose processing failed within a tick
    pub item_failures_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let booking_metrics = BookingMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let notification_metrics = NotificationMetrics::new(&registry)?;
        let scheduler_metrics = SchedulerMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            booking_metrics,
            queue_metrics,
            notification_metrics,
            scheduler_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn booking(&self) -> &BookingMetrics {
        &self.booking_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn notification(&self) -> &NotificationMetrics {
        &self.notification_metrics
    }

    pub fn scheduler(&self) -> &SchedulerMetrics {
        &self.scheduler_metrics
    }

    pub fn record_booking_requested(&self) {
        self.booking_metrics.requests_total.inc();
    }

    /// Record a committed status change
    pub fn record_transition(&self, from: BookingStatus, to: BookingStatus, duration: Duration) {
        let from_label = from.to_string();
        let to_label = to.to_string();
        self.booking_metrics
            .transitions_total
            .with_label_values(&[from_label.as_str(), to_label.as_str()])
            .inc();
        self.booking_metrics
            .operation_duration
            .with_label_values(&[to_label.as_str()])
            .observe(duration.as_secs_f64());
    }

    /// Record an operation that was refused or failed
    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.booking_metrics
            .failures_total
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn record_compensation(&self, target: &str, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.booking_metrics
            .compensations_total
            .with_label_values(&[target, status])
            .inc();
    }

    pub fn set_queue_size(&self, provider_id: &str, size: usize) {
        self.queue_metrics
            .queue_size
            .with_label_values(&[provider_id])
            .set(size as i64);
    }

    pub fn record_enqueued(&self) {
        self.queue_metrics.enqueued_total.inc();
    }

    pub fn record_removed(&self, outcome: &str) {
        self.queue_metrics
            .removed_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_estimates_revised(&self, count: usize) {
        self.queue_metrics
            .estimates_revised_total
            .inc_by(count as u64);
    }

    pub fn record_wait_time(&self, wait: Duration) {
        self.queue_metrics
            .wait_time_seconds
            .observe(wait.as_secs_f64());
    }

    pub fn record_notification(&self, kind: &str, status: &str, duration: Duration) {
        self.notification_metrics
            .dispatches_total
            .with_label_values(&[kind, status])
            .inc();
        self.notification_metrics
            .dispatch_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_scheduler_tick(&self, duration: Duration) {
        self.scheduler_metrics.ticks_total.inc();
        self.scheduler_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_reminder(&self, window: &str) {
        self.scheduler_metrics
            .reminders_total
            .with_label_values(&[window])
            .inc();
    }

    pub fn record_automatic_no_show(&self) {
        self.scheduler_metrics.no_shows_total.inc();
    }

    pub fn record_scheduler_failure(&self) {
        self.scheduler_metrics.item_failures_total.inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("salon_queue_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "salon_queue_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("salon_queue_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl BookingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let requests_total =
            IntCounter::new("salon_queue_booking_requests_total", "Bookings requested")?;
        registry.register(Box::new(requests_total.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "salon_queue_booking_transitions_total",
                "Booking status transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new(
                "salon_queue_booking_failures_total",
                "Failed booking operations",
            ),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let compensations_total = IntCounterVec::new(
            Opts::new(
                "salon_queue_compensations_total",
                "Compensating writes after partial failure",
            ),
            &["target", "status"],
        )?;
        registry.register(Box::new(compensations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "salon_queue_booking_operation_duration_seconds",
                "Booking transition duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            requests_total,
            transitions_total,
            failures_total,
            compensations_total,
            operation_duration,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_size = IntGaugeVec::new(
            Opts::new("salon_queue_size", "Live queue entries per provider"),
            &["provider"],
        )?;
        registry.register(Box::new(queue_size.clone()))?;

        let enqueued_total =
            IntCounter::new("salon_queue_enqueued_total", "Queue entries appended")?;
        registry.register(Box::new(enqueued_total.clone()))?;

        let removed_total = IntCounterVec::new(
            Opts::new("salon_queue_removed_total", "Queue entries removed"),
            &["outcome"],
        )?;
        registry.register(Box::new(removed_total.clone()))?;

        let estimates_revised_total = IntCounter::new(
            "salon_queue_estimates_revised_total",
            "Waiting entries re-projected after an advance",
        )?;
        registry.register(Box::new(estimates_revised_total.clone()))?;

        let wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "salon_queue_wait_time_seconds",
                "Time between enqueue and service start",
            )
            .buckets(vec![
                0.0, 60.0, 300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0,
            ]),
        )?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            queue_size,
            enqueued_total,
            removed_total,
            estimates_revised_total,
            wait_time_seconds,
        })
    }
}

impl NotificationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let dispatches_total = IntCounterVec::new(
            Opts::new(
                "salon_queue_notifications_total",
                "Notification dispatch attempts",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(dispatches_total.clone()))?;

        let dispatch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "salon_queue_notification_duration_seconds",
                "Notification dispatch duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(dispatch_duration.clone()))?;

        Ok(Self {
            dispatches_total,
            dispatch_duration,
        })
    }
}

impl SchedulerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ticks_total = IntCounter::new("salon_queue_scheduler_ticks_total", "Scheduler ticks")?;
        registry.register(Box::new(ticks_total.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "salon_queue_scheduler_tick_duration_seconds",
                "Scheduler tick duration",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        let reminders_total = IntCounterVec::new(
            Opts::new("salon_queue_reminders_total", "Reminders emitted"),
            &["window"],
        )?;
        registry.register(Box::new(reminders_total.clone()))?;

        let no_shows_total = IntCounter::new(
            "salon_queue_automatic_no_shows_total",
            "Bookings marked no-show by the scheduler",
        )?;
        registry.register(Box::new(no_shows_total.clone()))?;

        let item_failures_total = IntCounter::new(
            "salon_queue_scheduler_item_failures_total",
            "Bookings that failed processing within a tick",
        )?;
        registry.register(Box::new(item_failures_total.clone()))?;

        Ok(Self {
            ticks_total,
            tick_duration,
            reminders_total,
            no_shows_total,
            item_failures_total,
        })
    }
}
