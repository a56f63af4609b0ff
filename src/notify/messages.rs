//! Titles and bodies of every notification the engine sends

use super::NotificationKind;
use crate::types::Booking;
use chrono::{DateTime, Utc};

/// Rendered notification text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

impl Message {
    fn new(kind: NotificationKind, title: &str, body: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            body,
        }
    }
}

/// Lead time of a reminder before the appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderLead {
    OneHour,
    ThirtyMinutes,
}

impl ReminderLead {
    pub fn label(self) -> &'static str {
        match self {
            ReminderLead::OneHour => "60m",
            ReminderLead::ThirtyMinutes => "30m",
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            ReminderLead::OneHour => "1 hour",
            ReminderLead::ThirtyMinutes => "30 minutes",
        }
    }
}

fn clock_time(instant: DateTime<Utc>) -> String {
    instant.format("%H:%M").to_string()
}

/// Sent to the provider owner when a customer asks for a slot
pub fn booking_requested(booking: &Booking) -> Message {
    Message::new(
        NotificationKind::BookingRequested,
        "New Booking Request",
        format!(
            "A new booking request for {} at {} has been received.",
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn booking_confirmed(booking: &Booking) -> Message {
    Message::new(
        NotificationKind::BookingConfirmed,
        "Booking Confirmed",
        format!(
            "Your booking for {} at {} has been confirmed.",
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn booking_rejected(booking: &Booking, reason: &str) -> Message {
    Message::new(
        NotificationKind::BookingRejected,
        "Booking Rejected",
        format!(
            "Your booking for {} at {} was rejected. Reason: {}",
            booking.date_label(),
            booking.time_label(),
            reason
        ),
    )
}

pub fn booking_cancelled(booking: &Booking) -> Message {
    Message::new(
        NotificationKind::BookingCancelled,
        "Booking Cancelled",
        format!(
            "Your booking for {} at {} has been cancelled.",
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn no_show(booking: &Booking) -> Message {
    Message::new(
        NotificationKind::NoShow,
        "No-Show Alert",
        format!(
            "You missed your booking for {} at {}.",
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn reminder(booking: &Booking, lead: ReminderLead) -> Message {
    let kind = match lead {
        ReminderLead::OneHour => NotificationKind::ReminderOneHour,
        ReminderLead::ThirtyMinutes => NotificationKind::ReminderThirtyMinutes,
    };
    Message::new(
        kind,
        "Appointment Reminder",
        format!(
            "Your appointment is in {} on {} at {}.",
            lead.phrase(),
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn enqueued(position: usize, estimated_start: DateTime<Utc>) -> Message {
    Message::new(
        NotificationKind::QueueEnqueued,
        "You're in the queue",
        format!(
            "You are number {} in line. Estimated start: {}.",
            position,
            clock_time(estimated_start)
        ),
    )
}

/// Sent when the entry ahead has just gone into service
pub fn next_in_line() -> Message {
    Message::new(
        NotificationKind::NextInLine,
        "You're next in queue!",
        "Please be ready for your appointment".to_string(),
    )
}

/// Sent to the new head of the queue after a no-show frees the chair
pub fn moved_up(booking: &Booking) -> Message {
    Message::new(
        NotificationKind::NextInLine,
        "Queue Update",
        format!(
            "Your appointment is next! Please arrive on time for {} at {}.",
            booking.date_label(),
            booking.time_label()
        ),
    )
}

pub fn estimate_revised(position: usize, estimated_start: DateTime<Utc>) -> Message {
    Message::new(
        NotificationKind::EstimateRevised,
        "Queue Update",
        format!(
            "Your estimated start time is now {} (number {} in line).",
            clock_time(estimated_start),
            position
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookingRequest;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn booking() -> Booking {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
        Booking::pending(
            Uuid::new_v4(),
            BookingRequest {
                customer_id: "alice".to_string(),
                provider_id: "salon-1".to_string(),
                service_id: "cut".to_string(),
                slot_id: "slot-1".to_string(),
                scheduled_at: at,
            },
            at,
        )
    }

    #[test]
    fn test_booking_messages_render_date_and_time() {
        let booking = booking();

        let requested = booking_requested(&booking);
        assert_eq!(requested.title, "New Booking Request");
        assert_eq!(
            requested.body,
            "A new booking request for 2024-05-01 at 15:00 has been received."
        );

        let rejected = booking_rejected(&booking, "Fully booked");
        assert_eq!(
            rejected.body,
            "Your booking for 2024-05-01 at 15:00 was rejected. Reason: Fully booked"
        );
        assert_eq!(rejected.kind, NotificationKind::BookingRejected);
    }

    #[test]
    fn test_reminder_messages() {
        let booking = booking();
        assert_eq!(
            reminder(&booking, ReminderLead::OneHour).body,
            "Your appointment is in 1 hour on 2024-05-01 at 15:00."
        );
        let half_hour = reminder(&booking, ReminderLead::ThirtyMinutes);
        assert_eq!(
            half_hour.body,
            "Your appointment is in 30 minutes on 2024-05-01 at 15:00."
        );
        assert_eq!(half_hour.kind, NotificationKind::ReminderThirtyMinutes);
    }

    #[test]
    fn test_queue_messages() {
        let eta = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(
            enqueued(2, eta).body,
            "You are number 2 in line. Estimated start: 09:30."
        );
        assert_eq!(next_in_line().title, "You're next in queue!");
    }
}
