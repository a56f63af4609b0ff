//! Metrics and monitoring for the salon-queue service
//!
//! This module provides metrics collection, health monitoring and the HTTP
//! endpoints that expose them.

pub mod collector;
pub mod health;

pub use collector::{
    BookingMetrics, MetricsCollector, MetricsTimer, NotificationMetrics, QueueMetrics,
    SchedulerMetrics, ServiceMetrics,
};
pub use health::{HealthEndpoints, HealthServer};

use crate::service::HealthStatus;
use std::sync::Arc;
use std::time::Duration;

/// Components reported in the component health gauge
const COMPONENTS: [&str; 3] = ["queue_engine", "notifications", "metrics"];

/// Collector plus the HTTP server that exposes it
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    /// Get the metrics collector
    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Get the health server
    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve the health endpoints until `stop` is called
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }

    /// Publish uptime and component health.
    ///
    /// A closed notification transport degrades the service; the queue
    /// engine and the metrics endpoint are in-process and always up.
    pub fn refresh_service_gauges(&self, uptime: Duration, notifications_healthy: bool) {
        let service = self.collector.service();
        service
            .uptime_seconds
            .set(i64::try_from(uptime.as_secs()).unwrap_or(i64::MAX));

        for component in COMPONENTS {
            let healthy = component != "notifications" || notifications_healthy;
            self.collector.update_component_health(component, healthy);
        }

        let status = if notifications_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        self.collector.update_health_status(status.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::health::HealthServerConfig;

    #[test]
    fn test_refresh_service_gauges() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let server = Arc::new(HealthServer::new(
            HealthServerConfig::default(),
            collector.clone(),
        ));
        let service = MetricsService::new(collector.clone(), server);

        service.refresh_service_gauges(Duration::from_secs(90), false);
        assert_eq!(collector.service().uptime_seconds.get(), 90);
        assert_eq!(collector.service().health_status.get(), 1);
        assert_eq!(
            collector
                .service()
                .component_health
                .with_label_values(&["notifications"])
                .get(),
            0
        );

        service.refresh_service_gauges(Duration::from_secs(120), true);
        assert_eq!(collector.service().health_status.get(), 2);
    }
}
