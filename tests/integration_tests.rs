//! Integration tests for the salon-queue scheduling core
//!
//! These tests drive the wired system end to end:
//! - Booking lifecycle with slot and queue side effects
//! - Queue projections across advance and completion
//! - Reminder ticks and automatic no-shows
//! - Notification failures never failing a transition

mod fixtures;

use chrono::TimeDelta;
use salon_queue::error::{scheduling_error, SchedulingError};
use salon_queue::notify::RecordingDispatcher;
use salon_queue::types::{BookingStatus, SlotStatus};
use salon_queue::utils::minutes;
use std::sync::Arc;

use fixtures::{base_time, create_test_system, create_test_system_with, PROVIDER};

fn provider() -> String {
    PROVIDER.to_string()
}

#[tokio::test]
async fn test_accepted_bookings_queue_in_order() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    let b = test.confirmed("bob", "slot-b", "color", at).await;

    let snapshot = test.system.queue().get_queue(&provider()).await.unwrap();
    assert_eq!(snapshot.current_queue_size, 2);
    assert_eq!(snapshot.entries[0].booking_id, a.id);
    assert_eq!(snapshot.entries[0].position, 1);
    assert_eq!(snapshot.entries[0].estimated_start, base_time());
    assert_eq!(snapshot.entries[1].booking_id, b.id);
    assert_eq!(snapshot.entries[1].position, 2);
    assert_eq!(
        snapshot.entries[1].estimated_start,
        base_time() + TimeDelta::minutes(30)
    );

    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Booked);
    assert_eq!(test.slot_status("slot-b").await, SlotStatus::Booked);

    let bob = test.bodies_for("bob-device");
    assert!(bob
        .iter()
        .any(|body| body == "You are number 2 in line. Estimated start: 14:30."));
}

#[tokio::test]
async fn test_advance_reprojects_with_actual_duration() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    let b = test.confirmed("bob", "slot-b", "color", at).await;
    test.dispatcher.clear();

    let started = test
        .system
        .bookings()
        .start_service(a.id, minutes(45))
        .await
        .unwrap();
    assert_eq!(started.estimated_end, base_time() + TimeDelta::minutes(45));

    let snapshot = test.system.queue().get_queue(&provider()).await.unwrap();
    let next = &snapshot.entries[1];
    assert_eq!(next.booking_id, b.id);
    assert_eq!(next.estimated_start, base_time() + TimeDelta::minutes(45));
    assert_eq!(next.estimated_end, base_time() + TimeDelta::minutes(65));

    let titles: Vec<_> = test
        .dispatcher
        .sent()
        .into_iter()
        .filter(|n| n.recipient_token == "bob-device")
        .map(|n| n.title)
        .collect();
    assert!(titles.contains(&"You're next in queue!".to_string()));
}

#[tokio::test]
async fn test_complete_compacts_positions() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    let b = test.confirmed("bob", "slot-b", "color", at).await;

    test.system
        .bookings()
        .start_service(a.id, minutes(30))
        .await
        .unwrap();
    test.clock.advance(TimeDelta::minutes(30));
    let completed = test.system.bookings().complete(a.id).await.unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let snapshot = test.system.queue().get_queue(&provider()).await.unwrap();
    assert_eq!(snapshot.current_queue_size, 1);
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].booking_id, b.id);
    assert_eq!(snapshot.entries[0].position, 1);

    // Completed bookings keep their slot booked
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Booked);

    // A was served without waiting
    assert_eq!(snapshot.average_wait_time, Some(std::time::Duration::ZERO));
    assert_eq!(snapshot.wait_times.served, 1);
    assert_eq!(snapshot.wait_times.max_seconds, Some(0.0));
    assert_eq!(snapshot.wait_times.std_dev_seconds, None);
}

#[tokio::test]
async fn test_removing_twice_reports_entry_not_found() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    test.confirmed("bob", "slot-b", "color", at).await;

    let queue = test.system.queue();
    queue.remove(&provider(), a.id).await.unwrap();
    let err = queue.remove(&provider(), a.id).await.unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::EntryNotFound { .. })
    ));

    let snapshot = queue.get_queue(&provider()).await.unwrap();
    assert_eq!(snapshot.current_queue_size, 1);
    assert_eq!(snapshot.entries[0].position, 1);
}

#[tokio::test]
async fn test_scheduler_marks_late_booking_as_no_show() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let booking = test.confirmed("alice", "slot-a", "cut", at).await;
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Booked);

    test.clock.set(at + TimeDelta::minutes(10));
    let report = test
        .system
        .scheduler()
        .tick(at + TimeDelta::minutes(10))
        .await
        .unwrap();
    assert_eq!(report.no_shows, vec![booking.id]);
    assert_eq!(report.failures, 0);

    let stored = test.system.bookings().get_booking(booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::NoShow);
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Available);

    let snapshot = test.system.queue().get_queue(&provider()).await.unwrap();
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.current_queue_size, 0);

    assert!(test
        .bodies_for("alice-device")
        .contains(&"You missed your booking for 2024-05-01 at 15:00.".to_string()));

    // The next tick finds nothing left to do
    let report = test
        .system
        .scheduler()
        .tick(at + TimeDelta::minutes(11))
        .await
        .unwrap();
    assert!(report.no_shows.is_empty());
}

#[tokio::test]
async fn test_no_show_moves_next_customer_up() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    let b = test.confirmed("bob", "slot-b", "color", at).await;
    test.dispatcher.clear();

    test.system.bookings().mark_no_show(a.id).await.unwrap();

    let next = test
        .system
        .queue()
        .peek_next(&provider())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.booking_id, b.id);
    assert_eq!(next.position, 1);
    // Removal keeps the old projection
    assert_eq!(next.estimated_start, base_time() + TimeDelta::minutes(30));

    assert!(test.bodies_for("bob-device").contains(
        &"Your appointment is next! Please arrive on time for 2024-05-01 at 15:00.".to_string()
    ));
}

#[tokio::test]
async fn test_start_after_next_no_show_is_not_before_the_no_show() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let a = test.confirmed("alice", "slot-a", "cut", at).await;
    let b = test.confirmed("bob", "slot-b", "color", at).await;
    let c = test.confirmed("carol", "slot-c", "shave", at).await;

    let bookings = test.system.bookings();
    bookings.start_service(a.id, minutes(30)).await.unwrap();
    test.clock.advance(TimeDelta::minutes(30));
    bookings.complete(a.id).await.unwrap();

    test.clock.advance(TimeDelta::minutes(15));
    bookings.mark_no_show(b.id).await.unwrap();

    let started = bookings.start_service(c.id, minutes(15)).await.unwrap();
    assert_eq!(started.estimated_start, base_time() + TimeDelta::minutes(45));
    assert_eq!(started.estimated_end, base_time() + TimeDelta::hours(1));
    assert_eq!(started.position, 1);
}

#[tokio::test]
async fn test_reminders_fire_inside_their_windows() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(2);
    test.confirmed("alice", "slot-a", "cut", at).await;
    test.dispatcher.clear();

    let scheduler = test.system.scheduler();

    let hour_before = at - TimeDelta::hours(1) + TimeDelta::seconds(30);
    let report = scheduler.tick(hour_before).await.unwrap();
    assert_eq!(report.reminders, 1);

    let outside = at - TimeDelta::minutes(45);
    let report = scheduler.tick(outside).await.unwrap();
    assert_eq!(report.reminders, 0);

    let half_hour_before = at - TimeDelta::minutes(30);
    let report = scheduler.tick(half_hour_before).await.unwrap();
    assert_eq!(report.reminders, 1);

    assert_eq!(
        test.bodies_for("alice-device"),
        vec![
            "Your appointment is in 1 hour on 2024-05-01 at 16:00.".to_string(),
            "Your appointment is in 30 minutes on 2024-05-01 at 16:00.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_accept_twice_is_rejected_without_touching_slot() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let booking = test.confirmed("alice", "slot-a", "cut", at).await;
    let err = test.system.bookings().accept(booking.id).await.unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::InvalidTransition { .. })
    ));

    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Booked);
    let snapshot = test.system.queue().get_queue(&provider()).await.unwrap();
    assert_eq!(snapshot.current_queue_size, 1);
}

#[tokio::test]
async fn test_reject_twice_is_rejected() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let booking = test
        .request(PROVIDER, "alice", "slot-a", "cut", at)
        .await
        .unwrap();
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Reserved);

    let rejected = test
        .system
        .bookings()
        .reject(booking.id, "Fully booked")
        .await
        .unwrap();
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Fully booked"));
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Available);

    let err = test
        .system
        .bookings()
        .reject(booking.id, "Fully booked")
        .await
        .unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::InvalidTransition { .. })
    ));
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Available);
}

#[tokio::test]
async fn test_reserved_slot_cannot_be_requested_again() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    test.request(PROVIDER, "alice", "slot-a", "cut", at)
        .await
        .unwrap();

    test.register_customer("bob");
    let err = test
        .system
        .bookings()
        .request_booking(salon_queue::types::BookingRequest {
            customer_id: "bob".to_string(),
            provider_id: provider(),
            service_id: "cut".to_string(),
            slot_id: "slot-a".to_string(),
            scheduled_at: at,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::SlotUnavailable { .. })
    ));
    assert_eq!(test.store.booking_count().unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_slot_can_be_rebooked() {
    let test = create_test_system();
    let at = base_time() + TimeDelta::hours(1);

    let booking = test.confirmed("alice", "slot-a", "cut", at).await;
    test.system.bookings().cancel(booking.id).await.unwrap();
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Available);
    assert!(test
        .system
        .queue()
        .get_queue(&provider())
        .await
        .unwrap()
        .entries
        .is_empty());

    test.register_customer("bob");
    let rebooked = test
        .system
        .bookings()
        .request_booking(salon_queue::types::BookingRequest {
            customer_id: "bob".to_string(),
            provider_id: provider(),
            service_id: "cut".to_string(),
            slot_id: "slot-a".to_string(),
            scheduled_at: at,
        })
        .await
        .unwrap();
    assert_eq!(rebooked.status, BookingStatus::Pending);
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Reserved);
}

#[tokio::test]
async fn test_failing_notifications_never_fail_transitions() {
    let test = create_test_system_with(Arc::new(RecordingDispatcher::failing()));
    let at = base_time() + TimeDelta::hours(1);

    let booking = test.confirmed("alice", "slot-a", "cut", at).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let cancelled = test.system.bookings().cancel(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    // Every attempt still reached the transport
    assert!(!test.dispatcher.sent().is_empty());
    let failed = test
        .system
        .metrics()
        .notification()
        .dispatches_total
        .with_label_values(&["booking_cancelled", "failed"])
        .get();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_auto_accept_confirms_on_request() {
    let test = create_test_system();
    test.store.set_auto_accept(PROVIDER, true).unwrap();
    let at = base_time() + TimeDelta::hours(1);

    let booking = test
        .request(PROVIDER, "alice", "slot-a", "cut", at)
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(test.slot_status("slot-a").await, SlotStatus::Booked);

    let next = test.system.queue().peek_next(&provider()).await.unwrap();
    assert_eq!(next.map(|e| e.booking_id), Some(booking.id));
}

#[tokio::test]
async fn test_history_and_rating() {
    let test = create_test_system();
    let early = base_time() + TimeDelta::hours(1);
    let late = base_time() + TimeDelta::hours(3);

    let first = test.confirmed("alice", "slot-a", "cut", early).await;
    let second = test
        .request(PROVIDER, "alice", "slot-b", "shave", late)
        .await
        .unwrap();

    let history = test
        .system
        .bookings()
        .booking_history(&"alice".to_string())
        .await
        .unwrap();
    let ids: Vec<_> = history.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    // Only completed bookings take a rating
    let err = test
        .system
        .bookings()
        .attach_rating(first.id, "rating-1")
        .await
        .unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::InvalidRequest { .. })
    ));

    test.system.bookings().complete(first.id).await.unwrap();
    let rated = test
        .system
        .bookings()
        .attach_rating(first.id, "rating-1")
        .await
        .unwrap();
    assert_eq!(rated.rating_id.as_deref(), Some("rating-1"));

    assert!(test
        .system
        .bookings()
        .attach_rating(first.id, "rating-2")
        .await
        .is_err());
}

#[tokio::test]
async fn test_unknown_booking_is_not_found() {
    let test = create_test_system();
    let err = test
        .system
        .bookings()
        .accept(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(
        scheduling_error(&err),
        Some(SchedulingError::NotFound {
            entity: "booking",
            ..
        })
    ));
}
