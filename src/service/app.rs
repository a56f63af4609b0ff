//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the scheduling
//! core to its notification transport, the health server and the periodic
//! background tasks.

use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::notify::{
    AmqpConnection, AmqpConnectionConfig, AmqpNotificationDispatcher, LoggingDispatcher,
    NotificationDispatcher,
};
use crate::service::system::SalonSystem;
use crate::store::{InMemoryStore, StorePorts};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Everything the health endpoints need to look at
pub struct ServiceContext {
    config: AppConfig,
    system: Arc<SalonSystem>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl ServiceContext {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn system(&self) -> Arc<SalonSystem> {
        self.system.clone()
    }

    /// AMQP connection, when notifications are published over AMQP
    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn running_flag(&self) -> Arc<RwLock<bool>> {
        self.is_running.clone()
    }
}

/// Main application state
pub struct AppState {
    context: Arc<ServiceContext>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Tells the periodic loops to stop after their current iteration
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing salon-queue service");
        info!(
            "Configuration: service={}, amqp_enabled={}, amqp_url={}",
            config.service.name, config.amqp.enabled, config.amqp.url
        );

        let metrics_collector = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let (dispatcher, amqp_connection) = Self::initialize_notifications(&config).await?;

        // Durable persistence sits behind the store ports; the standalone
        // service runs on the in-memory backend.
        let ports = StorePorts::in_memory(Arc::new(InMemoryStore::new()));
        let system = Arc::new(SalonSystem::new(
            ports,
            dispatcher,
            Arc::new(SystemClock),
            metrics_collector,
            &config.scheduling,
        ));

        Ok(Self::with_system(config, system, amqp_connection))
    }

    /// Build the service around an already assembled core
    pub fn with_system(
        config: AppConfig,
        system: Arc<SalonSystem>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Self {
        let context = Arc::new(ServiceContext {
            config,
            system,
            amqp_connection,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        });
        let metrics_service = Self::initialize_metrics(&context);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            context,
            metrics_service,
            background_tasks: Vec::new(),
            shutdown_tx,
        }
    }

    /// Start the health server and all background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting salon-queue service");

        // Mark as running
        *self.context.is_running.write().await = true;

        // Start metrics service first
        self.start_metrics_service().await?;

        // Start background tasks
        self.start_background_tasks().await?;

        info!("✅ Salon-queue service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of salon-queue service");

        // Mark as not running
        *self.context.is_running.write().await = false;

        // Signal the periodic loops; a sweep in progress runs to its end
        if self.shutdown_tx.send(()).is_err() {
            debug!("No background loop was listening for shutdown");
        }

        // Stop metrics service
        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        // Wait for background tasks (including metrics service task)
        self.stop_background_tasks().await;

        if let Some(connection) = self.context.amqp_connection() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        let providers = self.context.system.queue().provider_count().await;
        info!("Final service statistics: {} provider queues tracked", providers);
        info!("✅ Salon-queue service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.context.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        self.context.is_running().await
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        self.context.clone()
    }

    /// Scheduling core: bookings, slots, queues and reminders
    pub fn system(&self) -> Arc<SalonSystem> {
        self.context.system()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Pick the notification transport
    async fn initialize_notifications(
        config: &AppConfig,
    ) -> Result<(Arc<dyn NotificationDispatcher>, Option<Arc<AmqpConnection>>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled - notifications will only be logged");
            return Ok((Arc::new(LoggingDispatcher), None));
        }

        let connection = Self::initialize_amqp(config).await?;
        let dispatcher = AmqpNotificationDispatcher::new(
            &connection,
            config.amqp.exchange_name.clone(),
            config.amqp.max_retry_attempts,
            config.amqp_retry_delay(),
        )
        .await
        .map_err(|e| ServiceError::AmqpConnection {
            message: format!("Failed to set up notification publisher: {}", e),
        })?;

        Ok((Arc::new(dispatcher), Some(connection)))
    }

    /// Connect to the broker with the configured retry policy
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker...");

        let amqp_config = AmqpConnectionConfig::from_settings(&config.amqp).map_err(|e| {
            ServiceError::Configuration {
                message: format!("Invalid AMQP settings: {}", e),
            }
        })?;

        let connection = AmqpConnection::new(amqp_config).await.map_err(|e| {
            ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP broker: {}", e),
            }
        })?;

        info!("✅ AMQP connection established");
        Ok(Arc::new(connection))
    }

    /// Initialize metrics service
    fn initialize_metrics(context: &Arc<ServiceContext>) -> Arc<MetricsService> {
        let port = context.config.service.health_port;
        info!("Initializing metrics service on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let collector = context.system.metrics();
        let health_server = Arc::new(
            HealthServer::new(health_config, collector.clone()).with_context(context.clone()),
        );

        Arc::new(MetricsService::new(collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        // Clone necessary references for the background task
        let metrics_service = self.metrics_service.clone();
        let port = self.context.config.service.health_port;

        // Spawn the metrics service as a background task
        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });

        // Add the handle to background tasks for proper shutdown
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    /// Start the reminder sweep and the service health task
    async fn start_background_tasks(&mut self) -> Result<(), ServiceError> {
        info!("Starting background tasks...");

        let reminder_interval = self.context.config.reminder_interval();
        if reminder_interval.is_zero() {
            return Err(ServiceError::BackgroundTask {
                message: "Reminder interval must be greater than 0".to_string(),
            });
        }
        info!(
            "Starting reminder scheduler ({}s interval)...",
            reminder_interval.as_secs()
        );
        let reminder_task = self
            .context
            .system
            .scheduler()
            .start(reminder_interval, self.shutdown_tx.subscribe());

        info!("Starting health metrics task (60s interval)...");
        let health_metrics_task = {
            let context = self.context.clone();
            let metrics_service = self.metrics_service.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                info!("Health metrics task started");

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = shutdown_rx.recv() => break,
                    }

                    let notifications_healthy = context
                        .amqp_connection()
                        .map_or(true, |connection| connection.is_open());
                    metrics_service.refresh_service_gauges(context.uptime(), notifications_healthy);

                    debug!(
                        "Updated service health metrics - uptime: {}s, notifications healthy: {}",
                        context.uptime().as_secs(),
                        notifications_healthy
                    );
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(reminder_task);
        self.background_tasks.push(health_metrics_task);

        info!("2 background tasks started successfully");
        Ok(())
    }

    /// Wait for all background tasks to finish.
    ///
    /// Tasks still running when the shutdown timeout expires are aborted.
    /// Returns how many had to be aborted.
    async fn stop_background_tasks(&mut self) -> usize {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return 0;
        }

        info!("Waiting for {} background tasks to stop...", task_count);
        let deadline = Instant::now() + self.context.config.shutdown_timeout();

        let mut aborted = 0;
        for (i, mut task) in self.background_tasks.drain(..).enumerate() {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => debug!("Background task {}/{} stopped", i + 1, task_count),
                Ok(Err(e)) => warn!("Background task {}/{} failed: {}", i + 1, task_count, e),
                Err(_) => {
                    warn!(
                        "Background task {}/{} did not stop in time, aborting",
                        i + 1,
                        task_count
                    );
                    task.abort();
                    aborted += 1;
                }
            }
        }

        if aborted == 0 {
            info!("✅ All {} background tasks stopped", task_count);
        } else {
            warn!("{} of {} background tasks were aborted", aborted, task_count);
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingDispatcher;

    fn offline_state(health_port: u16) -> AppState {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        config.service.health_port = health_port;
        let system = Arc::new(SalonSystem::new(
            StorePorts::in_memory(Arc::new(InMemoryStore::new())),
            Arc::new(RecordingDispatcher::new()),
            Arc::new(SystemClock),
            Arc::new(MetricsCollector::new().unwrap()),
            &config.scheduling,
        ));
        AppState::with_system(config, system, None)
    }

    #[tokio::test]
    async fn test_new_without_amqp_uses_logging_dispatcher() {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        let state = AppState::new(config).await.unwrap();

        assert!(!state.is_running().await);
        assert!(state.context().amqp_connection().is_none());
    }

    #[tokio::test]
    async fn test_start_and_shutdown_toggle_running() {
        let mut state = offline_state(18_080);
        state.start().await.unwrap();
        assert!(state.is_running().await);

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
    }

    #[tokio::test]
    async fn test_shutdown_lets_background_loops_exit() {
        let mut state = offline_state(18_081);
        state.start().await.unwrap();
        assert_eq!(state.shutdown_tx.receiver_count(), 2);

        *state.context.is_running.write().await = false;
        state.shutdown_tx.send(()).unwrap();
        let _ = state.metrics_service.stop().await;

        let aborted = tokio::time::timeout(Duration::from_secs(5), state.stop_background_tasks())
            .await
            .unwrap();
        assert_eq!(aborted, 0);
        assert!(state.background_tasks.is_empty());
        assert_eq!(state.shutdown_tx.receiver_count(), 0);
    }
}
