//! Outbound notifications
//!
//! State transitions are the source of truth. Everything in this module is
//! best-effort: failures and timeouts are logged and counted, never returned
//! to the operation that produced the event.

pub mod amqp;
pub mod dispatcher;
pub mod messages;

pub use amqp::{AmqpConnection, AmqpConnectionConfig, AmqpNotificationDispatcher};
pub use dispatcher::{LoggingDispatcher, RecordingDispatcher, SentNotification};
pub use messages::{Message, ReminderLead};

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::queue::QueueEvent;
use crate::store::{BookingStore, RecipientDirectory};
use crate::types::{Booking, BookingId, ProviderId, Recipient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequested,
    BookingConfirmed,
    BookingRejected,
    BookingCancelled,
    NoShow,
    ReminderOneHour,
    ReminderThirtyMinutes,
    QueueEnqueued,
    NextInLine,
    EstimateRevised,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::BookingRequested => "booking_requested",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingRejected => "booking_rejected",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::NoShow => "no_show",
            NotificationKind::ReminderOneHour => "reminder_one_hour",
            NotificationKind::ReminderThirtyMinutes => "reminder_thirty_minutes",
            NotificationKind::QueueEnqueued => "queue_enqueued",
            NotificationKind::NextInLine => "next_in_line",
            NotificationKind::EstimateRevised => "estimate_revised",
        }
    }
}

/// Machine-readable payload attached to every notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationContext {
    pub booking_id: BookingId,
    pub provider_id: ProviderId,
    pub kind: NotificationKind,
}

/// Transport that delivers a notification to a device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(
        &self,
        recipient_token: &str,
        title: &str,
        body: &str,
        context: &NotificationContext,
    ) -> Result<()>;
}

/// Resolves recipients and sends messages through a dispatcher, swallowing
/// every failure on the way.
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    directory: Arc<dyn RecipientDirectory>,
    bookings: Arc<dyn BookingStore>,
    timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Notifier {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        directory: Arc<dyn RecipientDirectory>,
        bookings: Arc<dyn BookingStore>,
        timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            bookings,
            timeout,
            metrics,
        }
    }

    /// Deliver one message. Returns whether it was handed to the transport.
    pub async fn send(
        &self,
        recipient: &Recipient,
        message: &Message,
        context: &NotificationContext,
    ) -> bool {
        let kind = message.kind.as_str();
        let timer = self.metrics.start_timer();

        let token = match self.directory.resolve_token(recipient).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(
                    "No device token for {:?}, skipping {} notification",
                    recipient, kind
                );
                self.metrics
                    .record_notification(kind, "skipped", timer.stop());
                return false;
            }
            Err(e) => {
                warn!("Failed to resolve recipient {:?}: {}", recipient, e);
                self.metrics.record_notification(kind, "failed", timer.stop());
                return false;
            }
        };

        let dispatch = self
            .dispatcher
            .notify(&token, &message.title, &message.body, context);

        match tokio::time::timeout(self.timeout, dispatch).await {
            Ok(Ok(())) => {
                debug!(
                    "Sent {} notification for booking {}",
                    kind, context.booking_id
                );
                self.metrics.record_notification(kind, "sent", timer.stop());
                true
            }
            Ok(Err(e)) => {
                warn!(
                    "Notification {} for booking {} failed: {}",
                    kind, context.booking_id, e
                );
                self.metrics.record_notification(kind, "failed", timer.stop());
                false
            }
            Err(_) => {
                warn!(
                    "Notification {} for booking {} timed out after {:?}",
                    kind, context.booking_id, self.timeout
                );
                self.metrics
                    .record_notification(kind, "timeout", timer.stop());
                false
            }
        }
    }

    /// Send a booking-scoped message to the booking's customer
    pub async fn to_customer(&self, booking: &Booking, message: Message) -> bool {
        let recipient = Recipient::Customer(booking.customer_id.clone());
        let context = NotificationContext {
            booking_id: booking.id,
            provider_id: booking.provider_id.clone(),
            kind: message.kind,
        };
        self.send(&recipient, &message, &context).await
    }

    /// Send a booking-scoped message to the owner of the booked provider
    pub async fn to_provider_owner(&self, booking: &Booking, message: Message) -> bool {
        let recipient = Recipient::ProviderOwner(booking.provider_id.clone());
        let context = NotificationContext {
            booking_id: booking.id,
            provider_id: booking.provider_id.clone(),
            kind: message.kind,
        };
        self.send(&recipient, &message, &context).await
    }

    /// Tell affected customers about queue changes
    pub async fn queue_events(&self, events: &[QueueEvent]) {
        for event in events {
            let booking = match self.bookings.get_booking(event.booking_id()).await {
                Ok(Some(booking)) => booking,
                Ok(None) => {
                    warn!(
                        "Queue event for unknown booking {}, not notifying",
                        event.booking_id()
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Failed to load booking {} for queue notification: {}",
                        event.booking_id(),
                        e
                    );
                    continue;
                }
            };

            let message = match event {
                QueueEvent::Enqueued {
                    position,
                    estimated_start,
                    ..
                } => messages::enqueued(*position, *estimated_start),
                QueueEvent::NextInLine { .. } => messages::next_in_line(),
                QueueEvent::EstimateRevised {
                    position,
                    estimated_start,
                    ..
                } => messages::estimate_revised(*position, *estimated_start),
            };
            self.to_customer(&booking, message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::BookingRequest;
    use chrono::Utc;
    use uuid::Uuid;

    fn booking() -> Booking {
        Booking::pending(
            Uuid::new_v4(),
            BookingRequest {
                customer_id: "alice".to_string(),
                provider_id: "salon-1".to_string(),
                service_id: "cut".to_string(),
                slot_id: "slot-1".to_string(),
                scheduled_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    fn notifier_with(
        dispatcher: Arc<dyn NotificationDispatcher>,
        store: Arc<InMemoryStore>,
        timeout: Duration,
    ) -> (Notifier, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let notifier = Notifier::new(dispatcher, store.clone(), store, timeout, metrics.clone());
        (notifier, metrics)
    }

    #[tokio::test]
    async fn test_dispatcher_failure_is_swallowed() {
        let store = Arc::new(InMemoryStore::new());
        store
            .register_token(Recipient::Customer("alice".to_string()), "tok-alice")
            .unwrap();

        let mut mock = MockNotificationDispatcher::new();
        mock.expect_notify()
            .times(1)
            .returning(|_, _, _, _| Err(anyhow::anyhow!("push gateway down")));

        let (notifier, metrics) = notifier_with(Arc::new(mock), store, Duration::from_secs(1));
        let delivered = notifier
            .to_customer(&booking(), messages::next_in_line())
            .await;

        assert!(!delivered);
        assert_eq!(
            metrics
                .notification()
                .dispatches_total
                .with_label_values(&["next_in_line", "failed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_token_skips_dispatch() {
        let store = Arc::new(InMemoryStore::new());
        let mut mock = MockNotificationDispatcher::new();
        mock.expect_notify().times(0);

        let (notifier, metrics) = notifier_with(Arc::new(mock), store, Duration::from_secs(1));
        let booking = booking();
        assert!(
            !notifier
                .to_provider_owner(&booking, messages::booking_requested(&booking))
                .await
        );
        assert_eq!(
            metrics
                .notification()
                .dispatches_total
                .with_label_values(&["booking_requested", "skipped"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_context_carries_booking_and_kind() {
        let store = Arc::new(InMemoryStore::new());
        store
            .register_token(Recipient::Customer("alice".to_string()), "tok-alice")
            .unwrap();
        let booking = booking();
        let expected_id = booking.id;

        let mut mock = MockNotificationDispatcher::new();
        mock.expect_notify()
            .withf(move |token, title, _, context| {
                token.to_string() == "tok-alice"
                    && title.to_string() == "Booking Confirmed"
                    && context.booking_id == expected_id
                    && context.kind == NotificationKind::BookingConfirmed
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let (notifier, _) = notifier_with(Arc::new(mock), store, Duration::from_secs(1));
        assert!(
            notifier
                .to_customer(&booking, messages::booking_confirmed(&booking))
                .await
        );
    }

    #[tokio::test]
    async fn test_slow_dispatch_times_out() {
        let store = Arc::new(InMemoryStore::new());
        store
            .register_token(Recipient::Customer("alice".to_string()), "tok-alice")
            .unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::with_delay(Duration::from_millis(200)));

        let (notifier, metrics) =
            notifier_with(dispatcher, store, Duration::from_millis(20));
        assert!(!notifier.to_customer(&booking(), messages::next_in_line()).await);
        assert_eq!(
            metrics
                .notification()
                .dispatches_total
                .with_label_values(&["next_in_line", "timeout"])
                .get(),
            1
        );
    }
}
