//! Periodic reminder and no-show sweep
//!
//! `tick(now)` is the only entry point. It is driven every minute by the
//! service (see `ReminderScheduler::start`) and directly by tests with a
//! pinned instant.

use crate::booking::BookingStateMachine;
use crate::clock::Clock;
use crate::config::SchedulingSettings;
use crate::error::{scheduling_error, Result, SchedulingError};
use crate::metrics::MetricsCollector;
use crate::notify::{messages, Notifier, ReminderLead};
use crate::store::BookingStore;
use crate::types::{Booking, BookingId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lead times and windows used by each tick
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    pub first_lead: TimeDelta,
    pub second_lead: TimeDelta,
    pub window: TimeDelta,
    pub no_show_grace: TimeDelta,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            first_lead: TimeDelta::minutes(60),
            second_lead: TimeDelta::minutes(30),
            window: TimeDelta::minutes(1),
            no_show_grace: TimeDelta::minutes(10),
        }
    }
}

impl From<&SchedulingSettings> for ReminderSettings {
    fn from(settings: &SchedulingSettings) -> Self {
        Self {
            first_lead: TimeDelta::minutes(i64::from(settings.first_reminder_minutes)),
            second_lead: TimeDelta::minutes(i64::from(settings.second_reminder_minutes)),
            window: TimeDelta::seconds(
                i64::try_from(settings.reminder_window_seconds).unwrap_or(i64::MAX / 1000),
            ),
            no_show_grace: TimeDelta::minutes(i64::from(settings.no_show_grace_minutes)),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub scanned: usize,
    pub reminders: usize,
    pub no_shows: Vec<BookingId>,
    pub failures: usize,
}

enum Outcome {
    Idle,
    Reminded(ReminderLead),
    NoShow,
}

pub struct ReminderScheduler {
    bookings: Arc<dyn BookingStore>,
    machine: Arc<BookingStateMachine>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    settings: ReminderSettings,
}

impl ReminderScheduler {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        machine: Arc<BookingStateMachine>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        settings: ReminderSettings,
    ) -> Self {
        Self {
            bookings,
            machine,
            notifier,
            clock,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    /// Scan confirmed bookings scheduled today or later.
    ///
    /// Only a failure to list candidates fails the tick; each booking is
    /// processed on its own and its failures are counted in the report.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let timer = self.metrics.start_timer();
        let candidates = self.bookings.list_confirmed_from(now.date_naive()).await?;

        let mut report = TickReport {
            scanned: candidates.len(),
            ..TickReport::default()
        };

        for booking in &candidates {
            match self.process(booking, now).await {
                Ok(Outcome::Idle) => {}
                Ok(Outcome::Reminded(lead)) => {
                    report.reminders += 1;
                    self.metrics.record_reminder(lead.label());
                }
                Ok(Outcome::NoShow) => {
                    report.no_shows.push(booking.id);
                    self.metrics.record_automatic_no_show();
                }
                Err(e) => {
                    warn!("Reminder sweep failed for booking {}: {}", booking.id, e);
                    report.failures += 1;
                    self.metrics.record_scheduler_failure();
                }
            }
        }

        self.metrics.record_scheduler_tick(timer.stop());
        if report.reminders > 0 || !report.no_shows.is_empty() || report.failures > 0 {
            info!(
                "⏰ Reminder tick at {}: scanned {}, reminders {}, no-shows {}, failures {}",
                now,
                report.scanned,
                report.reminders,
                report.no_shows.len(),
                report.failures
            );
        } else {
            debug!("Reminder tick at {}: scanned {}", now, report.scanned);
        }
        Ok(report)
    }

    async fn process(&self, booking: &Booking, now: DateTime<Utc>) -> Result<Outcome> {
        if now >= booking.scheduled_at + self.settings.no_show_grace {
            return match self.machine.mark_no_show(booking.id).await {
                Ok(_) => {
                    info!(
                        "Booking {} passed its grace period, marked as no-show",
                        booking.id
                    );
                    Ok(Outcome::NoShow)
                }
                // Completed or cancelled since the scan
                Err(e)
                    if matches!(
                        scheduling_error(&e),
                        Some(SchedulingError::InvalidTransition { .. })
                    ) =>
                {
                    debug!("Booking {} no longer confirmed, skipping", booking.id);
                    Ok(Outcome::Idle)
                }
                Err(e) => Err(e),
            };
        }

        let leads = [
            (ReminderLead::OneHour, self.settings.first_lead),
            (ReminderLead::ThirtyMinutes, self.settings.second_lead),
        ];
        for (lead, offset) in leads {
            let opens = booking.scheduled_at - offset;
            if now >= opens && now < opens + self.settings.window {
                self.notifier
                    .to_customer(booking, messages::reminder(booking, lead))
                    .await;
                return Ok(Outcome::Reminded(lead));
            }
        }

        Ok(Outcome::Idle)
    }

    /// Tick on a fixed interval until a shutdown signal arrives.
    ///
    /// The signal is only observed between ticks, so a sweep that has
    /// started always finishes.
    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!("Reminder scheduler started ({}s interval)", interval.as_secs());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.recv() => {
                        info!("Reminder scheduler shutdown signal received");
                        break;
                    }
                }

                if let Err(e) = self.tick(self.clock.now()).await {
                    warn!("Reminder tick failed: {}", e);
                }
            }

            info!("Reminder scheduler stopped");
        })
    }
}
