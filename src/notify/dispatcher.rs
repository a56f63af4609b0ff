//! Transport-free dispatchers

use super::{NotificationContext, NotificationDispatcher};
use crate::error::{Result, SchedulingError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn notify(
        &self,
        recipient_token: &str,
        title: &str,
        body: &str,
        context: &NotificationContext,
    ) -> Result<()> {
        info!(
            "📨 [{}] to {}: {} - {} (booking {})",
            context.kind.as_str(),
            recipient_token,
            title,
            body,
            context.booking_id
        );
        Ok(())
    }
}

/// A notification captured by `RecordingDispatcher`
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipient_token: String,
    pub title: String,
    pub body: String,
    pub context: NotificationContext,
}

/// Dispatcher that remembers everything it is asked to send (for testing)
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every call and then reports a transport failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleeps before recording, to exercise dispatch timeouts
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Get all recorded notifications
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Recorded titles in send order
    pub fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.title).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(
        &self,
        recipient_token: &str,
        title: &str,
        body: &str,
        context: &NotificationContext,
    ) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| SchedulingError::lock_poisoned("recorded notifications"))?;
        sent.push(SentNotification {
            recipient_token: recipient_token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            context: context.clone(),
        });
        drop(sent);

        if self.fail {
            return Err(SchedulingError::NotificationFailed {
                message: format!("Simulated failure sending '{}'", title),
            }
            .into());
        }
        Ok(())
    }
}
