//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the salon-queue
//! service, including readiness and liveness probes.

use crate::queue::WaitTimeSummary;
use crate::service::app::ServiceContext;
use crate::types::ProviderId;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value used by the health status metric
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Providers whose queue has been loaded since start
    pub provider_queues: usize,
    /// Observed waits of each loaded queue
    pub wait_times: BTreeMap<ProviderId, WaitTimeSummary>,
    /// Bookings requested since start
    pub bookings_requested: u64,
    /// Bookings moved to no-show by the reminder scheduler
    pub automatic_no_shows: u64,
    /// Reminder ticks completed
    pub scheduler_ticks: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: Arc<ServiceContext>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&context).await,
            Self::check_queue_engine(&context).await,
            Self::check_notifications(&context),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(&check.status));

        let stats = Self::gather_service_stats(&context).await;

        Ok(HealthCheck {
            status,
            service: context.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: Arc<ServiceContext>) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(context: Arc<ServiceContext>) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let queue = Self::check_queue_engine(&context).await.status;
        let notifications = Self::check_notifications(&context).status;
        Ok(queue.combine(&notifications))
    }

    /// Check if service is running
    async fn check_service_running(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Probe the queue store with a provider id that never exists
    async fn check_queue_engine(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();
        let queues = context.system().ports().queues.clone();

        let (status, message) = match queues.load_queue(&"__health__".to_string()).await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue store health probe failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Queue store unavailable: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "queue_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A closed broker degrades the service but never fails it
    fn check_notifications(context: &ServiceContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match context.amqp_connection() {
            None => (HealthStatus::Healthy, Some("Logging only".to_string())),
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed".to_string()),
            ),
        };

        ComponentCheck {
            name: "notification_transport".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(context: &ServiceContext) -> ServiceStats {
        let system = context.system();
        let metrics = system.metrics();

        ServiceStats {
            provider_queues: system.queue().provider_count().await,
            wait_times: system.queue().wait_time_summaries().await,
            bookings_requested: metrics.booking().requests_total.get(),
            automatic_no_shows: metrics.scheduler().no_shows_total.get(),
            scheduler_ticks: metrics.scheduler().ticks_total.get(),
            uptime_seconds: context.uptime().as_secs(),
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, SystemClock};
    use crate::config::AppConfig;
    use crate::metrics::MetricsCollector;
    use crate::notify::LoggingDispatcher;
    use crate::service::{AppState, SalonSystem};
    use crate::store::{InMemoryStore, StorePorts};
    use crate::types::{BookingRequest, Slot};
    use crate::utils::minutes;
    use chrono::{TimeDelta, TimeZone, Utc};

    #[test]
    fn test_combine_takes_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(&HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
    }

    #[tokio::test]
    async fn test_check_running_service_without_broker() {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        let system = Arc::new(SalonSystem::new(
            StorePorts::in_memory(Arc::new(InMemoryStore::new())),
            Arc::new(LoggingDispatcher),
            Arc::new(SystemClock),
            Arc::new(MetricsCollector::new().unwrap()),
            &config.scheduling,
        ));
        let context = AppState::with_system(config, system, None).context();

        let stopped = HealthCheck::check(context.clone()).await.unwrap();
        assert_eq!(stopped.status, HealthStatus::Unhealthy);

        *context.running_flag().write().await = true;
        let health = HealthCheck::check(context).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 3);

        let json = health.to_json().unwrap();
        assert!(json.contains("notification_transport"));
        assert!(json.contains("\"status\": \"healthy\""));
    }

    #[tokio::test]
    async fn test_stats_report_wait_time_spread_per_provider() {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        let store = Arc::new(InMemoryStore::new());
        store.register_service("salon-1", "cut", 30).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap(),
        ));
        let system = Arc::new(SalonSystem::new(
            StorePorts::in_memory(store),
            Arc::new(LoggingDispatcher),
            clock.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
            &config.scheduling,
        ));

        let bookings = system.bookings();
        let mut ids = Vec::new();
        for slot in ["slot-a", "slot-b"] {
            system
                .slots()
                .register(Slot::available(slot, "salon-1"))
                .await
                .unwrap();
            let booking = bookings
                .request_booking(BookingRequest {
                    customer_id: format!("{}-customer", slot),
                    provider_id: "salon-1".to_string(),
                    service_id: "cut".to_string(),
                    slot_id: slot.to_string(),
                    scheduled_at: clock.now() + TimeDelta::hours(1),
                })
                .await
                .unwrap();
            ids.push(bookings.accept(booking.id).await.unwrap().id);
        }

        // The first customer starts at once, the second after 30 minutes
        bookings.start_service(ids[0], minutes(30)).await.unwrap();
        clock.advance(TimeDelta::minutes(30));
        bookings.complete(ids[0]).await.unwrap();
        bookings.start_service(ids[1], minutes(30)).await.unwrap();

        let context = AppState::with_system(config, system, None).context();
        let health = HealthCheck::check(context).await.unwrap();
        let waits = &health.stats.wait_times["salon-1"];
        assert_eq!(waits.served, 2);
        assert_eq!(waits.mean_seconds, Some(900.0));
        assert_eq!(waits.std_dev_seconds, Some(900.0));
        assert_eq!(waits.min_seconds, Some(0.0));
        assert_eq!(waits.max_seconds, Some(1800.0));

        let json = health.to_json().unwrap();
        assert!(json.contains("\"wait_times\""));
    }
}
