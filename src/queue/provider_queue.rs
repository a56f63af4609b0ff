//! Per-provider queue document and its time projection rules
//!
//! `ProviderQueue` is a plain value: every operation mutates it in place and
//! reports what changed as `QueueEvent`s. Locking, persistence and
//! notification are the engine's job.

use super::statistics::WaitTimeStats;
use crate::error::{Result, SchedulingError};
use crate::types::{BookingId, ProviderId};
use crate::utils::{elapsed_between, to_time_delta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status of a booking inside the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueEntryStatus {
    Waiting,
    InService,
    Completed,
    NoShow,
}

impl QueueEntryStatus {
    /// Entries in these states count towards the queue size
    pub fn is_live(self) -> bool {
        matches!(self, QueueEntryStatus::Waiting | QueueEntryStatus::InService)
    }
}

/// One confirmed booking waiting for (or receiving) service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub booking_id: BookingId,
    /// 1-based and dense across the live entries
    pub position: usize,
    pub estimated_start: DateTime<Utc>,
    pub estimated_end: DateTime<Utc>,
    pub service_duration: Duration,
    pub status: QueueEntryStatus,
    pub enqueued_at: DateTime<Utc>,
}

/// Change in a queue that someone may want to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued {
        booking_id: BookingId,
        position: usize,
        estimated_start: DateTime<Utc>,
    },
    /// The entry right after one that just went into service
    NextInLine {
        booking_id: BookingId,
        estimated_start: DateTime<Utc>,
    },
    EstimateRevised {
        booking_id: BookingId,
        position: usize,
        estimated_start: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn booking_id(&self) -> BookingId {
        match self {
            QueueEvent::Enqueued { booking_id, .. }
            | QueueEvent::NextInLine { booking_id, .. }
            | QueueEvent::EstimateRevised { booking_id, .. } => *booking_id,
        }
    }
}

/// Ordered live entries for a single provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQueue {
    pub provider_id: ProviderId,
    entries: Vec<QueueEntry>,
    current_queue_size: usize,
    /// Instant the last completed service ended, consumed by the next `advance`
    served_anchor: Option<DateTime<Utc>>,
    wait_stats: WaitTimeStats,
    /// Optimistic concurrency version of the stored document
    pub version: u64,
}

impl ProviderQueue {
    pub fn new(provider_id: impl Into<ProviderId>) -> Self {
        Self {
            provider_id: provider_id.into(),
            entries: Vec::new(),
            current_queue_size: 0,
            served_anchor: None,
            wait_stats: WaitTimeStats::new(),
            version: 0,
        }
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn current_queue_size(&self) -> usize {
        self.current_queue_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn wait_stats(&self) -> &WaitTimeStats {
        &self.wait_stats
    }

    /// Mean observed wait, `None` until someone has entered service
    pub fn average_wait_time(&self) -> Option<Duration> {
        self.wait_stats.mean()
    }

    pub fn entry(&self, booking_id: BookingId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.booking_id == booking_id)
    }

    pub fn contains(&self, booking_id: BookingId) -> bool {
        self.entry(booking_id).is_some()
    }

    /// First entry still waiting for service
    pub fn peek_next_waiting(&self) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|e| e.status == QueueEntryStatus::Waiting)
    }

    fn index_of(&self, booking_id: BookingId) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.booking_id == booking_id)
            .ok_or_else(|| {
                SchedulingError::EntryNotFound {
                    provider_id: self.provider_id.clone(),
                    booking_id,
                }
                .into()
            })
    }

    /// Latest projected end among live entries
    fn projected_tail_end(&self) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|e| e.status.is_live())
            .map(|e| e.estimated_end)
            .max()
    }

    /// Append a booking behind everyone already queued
    pub fn enqueue(
        &mut self,
        booking_id: BookingId,
        service_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<QueueEvent> {
        if self.contains(booking_id) {
            return Err(SchedulingError::InvalidRequest {
                reason: format!(
                    "Booking {} is already queued for provider {}",
                    booking_id, self.provider_id
                ),
            }
            .into());
        }

        let span = to_time_delta(service_duration)?;
        let estimated_start = self.projected_tail_end().unwrap_or(now);
        let position = self.current_queue_size + 1;

        self.entries.push(QueueEntry {
            booking_id,
            position,
            estimated_start,
            estimated_end: estimated_start + span,
            service_duration,
            status: QueueEntryStatus::Waiting,
            enqueued_at: now,
        });
        self.current_queue_size += 1;

        Ok(QueueEvent::Enqueued {
            booking_id,
            position,
            estimated_start,
        })
    }

    /// Put an entry into service with its real duration and re-project
    /// every waiting entry behind it.
    pub fn advance(
        &mut self,
        booking_id: BookingId,
        actual_duration: Duration,
    ) -> Result<Vec<QueueEvent>> {
        let index = self.index_of(booking_id)?;
        if self.entries[index].status != QueueEntryStatus::Waiting {
            return Err(SchedulingError::InvalidRequest {
                reason: format!("Booking {} is already in service", booking_id),
            }
            .into());
        }
        let span = to_time_delta(actual_duration)?;

        let actual_start = self
            .served_anchor
            .unwrap_or(self.entries[index].estimated_start);
        let actual_end = actual_start + span;

        // Nobody behind may start before anyone still waiting ahead finishes
        let ahead_end = self.entries[..index]
            .iter()
            .filter(|e| e.status == QueueEntryStatus::Waiting)
            .map(|e| e.estimated_end)
            .max();
        let cursor = ahead_end.map_or(actual_end, |end| end.max(actual_end));

        let (revised_tail, _) = self.entries[index + 1..].iter().try_fold(
            (Vec::with_capacity(self.entries.len() - index - 1), cursor),
            |(mut tail, cursor), entry| -> Result<_> {
                let mut entry = entry.clone();
                if entry.status != QueueEntryStatus::Waiting {
                    tail.push(entry);
                    return Ok((tail, cursor));
                }
                entry.estimated_start = cursor;
                entry.estimated_end = cursor + to_time_delta(entry.service_duration)?;
                let next_cursor = entry.estimated_end;
                tail.push(entry);
                Ok((tail, next_cursor))
            },
        )?;

        let mut events = Vec::new();
        for (offset, revised) in revised_tail.iter().enumerate() {
            let previous = &self.entries[index + 1 + offset];
            if offset == 0 && revised.status == QueueEntryStatus::Waiting {
                events.push(QueueEvent::NextInLine {
                    booking_id: revised.booking_id,
                    estimated_start: revised.estimated_start,
                });
            }
            if revised.estimated_start != previous.estimated_start {
                events.push(QueueEvent::EstimateRevised {
                    booking_id: revised.booking_id,
                    position: revised.position,
                    estimated_start: revised.estimated_start,
                });
            }
        }

        self.served_anchor = None;
        let entry = &mut self.entries[index];
        self.wait_stats
            .add_sample(elapsed_between(entry.enqueued_at, actual_start), actual_start);
        entry.status = QueueEntryStatus::InService;
        entry.estimated_start = actual_start;
        entry.estimated_end = actual_end;
        entry.service_duration = actual_duration;

        self.entries.truncate(index + 1);
        self.entries.extend(revised_tail);

        Ok(events)
    }

    /// Drop an entry and close the gap it leaves. Estimates are untouched.
    ///
    /// Removing the next waiting entry pushes a pending completion anchor up
    /// to `now`: whoever follows cannot have started before the removal.
    pub fn remove(&mut self, booking_id: BookingId, now: DateTime<Utc>) -> Result<QueueEntry> {
        let index = self.index_of(booking_id)?;
        let was_next = self
            .peek_next_waiting()
            .is_some_and(|e| e.booking_id == booking_id);
        let removed = self.entries.remove(index);
        self.current_queue_size -= 1;

        for entry in &mut self.entries[index..] {
            entry.position -= 1;
        }
        if self.entries.is_empty() {
            self.served_anchor = None;
        } else if was_next {
            self.served_anchor = self.served_anchor.map(|anchor| anchor.max(now));
        }

        Ok(removed)
    }

    /// Remove a served entry and remember when service ended so the next
    /// `advance` starts from real time rather than the projection.
    pub fn complete(&mut self, booking_id: BookingId, now: DateTime<Utc>) -> Result<QueueEntry> {
        let mut removed = self.remove(booking_id, now)?;
        removed.status = QueueEntryStatus::Completed;
        if !self.entries.is_empty() {
            self.served_anchor = Some(now);
        }
        Ok(removed)
    }

    /// Remove an entry whose customer never showed up
    pub fn remove_no_show(
        &mut self,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let mut removed = self.remove(booking_id, now)?;
        removed.status = QueueEntryStatus::NoShow;
        Ok(removed)
    }

    /// Verify the structural invariants of the document.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let live = self.entries.iter().filter(|e| e.status.is_live()).count();
        if self.current_queue_size != live || live != self.entries.len() {
            return Err(format!(
                "queue size {} but {} live of {} entries",
                self.current_queue_size,
                live,
                self.entries.len()
            ));
        }

        let mut previous_waiting: Option<&QueueEntry> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.position != index + 1 {
                return Err(format!(
                    "entry {} has position {} at index {}",
                    entry.booking_id, entry.position, index
                ));
            }
            let span = to_time_delta(entry.service_duration).map_err(|e| e.to_string())?;
            if entry.estimated_end != entry.estimated_start + span {
                return Err(format!("entry {} end is not start + duration", entry.booking_id));
            }
            if entry.status == QueueEntryStatus::Waiting {
                if let Some(prev) = previous_waiting {
                    if entry.estimated_start < prev.estimated_end {
                        return Err(format!(
                            "entry {} starts before waiting entry {} ends",
                            entry.booking_id, prev.booking_id
                        ));
                    }
                }
                previous_waiting = Some(entry);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::scheduling_error;
    use crate::utils::minutes;
    use chrono::{TimeDelta, TimeZone};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn opening_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn queue_with(durations: &[u32]) -> (ProviderQueue, Vec<BookingId>) {
        let mut queue = ProviderQueue::new("salon-1");
        let ids: Vec<BookingId> = durations.iter().map(|_| Uuid::new_v4()).collect();
        for (id, mins) in ids.iter().zip(durations) {
            queue.enqueue(*id, minutes(*mins), opening_time()).unwrap();
        }
        (queue, ids)
    }

    #[test]
    fn test_enqueue_projects_back_to_back() {
        let (queue, ids) = queue_with(&[30, 20]);
        let a = queue.entry(ids[0]).unwrap();
        let b = queue.entry(ids[1]).unwrap();

        assert_eq!(a.position, 1);
        assert_eq!(b.position, 2);
        assert_eq!(a.estimated_start, opening_time());
        assert_eq!(b.estimated_start, a.estimated_start + TimeDelta::minutes(30));
        assert_eq!(b.estimated_end, b.estimated_start + TimeDelta::minutes(20));
        assert_eq!(queue.current_queue_size(), 2);
    }

    #[test]
    fn test_enqueue_into_empty_queue_starts_now() {
        let mut queue = ProviderQueue::new("salon-1");
        let later = opening_time() + TimeDelta::hours(3);
        let event = queue.enqueue(Uuid::new_v4(), minutes(15), later).unwrap();
        assert!(matches!(
            event,
            QueueEvent::Enqueued { position: 1, estimated_start, .. } if estimated_start == later
        ));
    }

    #[test]
    fn test_enqueue_rejects_duplicates_and_zero_duration() {
        let (mut queue, ids) = queue_with(&[30]);
        assert!(queue.enqueue(ids[0], minutes(30), opening_time()).is_err());
        assert!(queue
            .enqueue(Uuid::new_v4(), Duration::ZERO, opening_time())
            .is_err());
        assert_eq!(queue.current_queue_size(), 1);
    }

    #[test]
    fn test_advance_recomputes_from_actual_duration() {
        let (mut queue, ids) = queue_with(&[30, 20, 10]);
        let a_start = queue.entry(ids[0]).unwrap().estimated_start;

        let events = queue.advance(ids[0], minutes(45)).unwrap();

        let a = queue.entry(ids[0]).unwrap();
        let b = queue.entry(ids[1]).unwrap();
        let c = queue.entry(ids[2]).unwrap();
        assert_eq!(a.status, QueueEntryStatus::InService);
        assert_eq!(a.estimated_end, a_start + TimeDelta::minutes(45));
        assert_eq!(b.estimated_start, a_start + TimeDelta::minutes(45));
        assert_eq!(c.estimated_start, a_start + TimeDelta::minutes(65));

        assert_eq!(
            events[0],
            QueueEvent::NextInLine {
                booking_id: ids[1],
                estimated_start: b.estimated_start
            }
        );
        let revised: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::EstimateRevised { .. }))
            .map(QueueEvent::booking_id)
            .collect();
        assert_eq!(revised, vec![ids[1], ids[2]]);
        queue.check_invariants().unwrap();
    }

    #[test]
    fn test_advance_with_estimated_duration_revises_nothing() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        let events = queue.advance(ids[0], minutes(30)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], QueueEvent::NextInLine { .. }));
    }

    #[test]
    fn test_advance_unknown_entry() {
        let (mut queue, _) = queue_with(&[30]);
        let err = queue.advance(Uuid::new_v4(), minutes(10)).unwrap_err();
        assert!(matches!(
            scheduling_error(&err),
            Some(SchedulingError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn test_advance_twice_is_rejected() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        queue.advance(ids[0], minutes(30)).unwrap();
        let before = queue.clone();
        assert!(queue.advance(ids[0], minutes(40)).is_err());
        assert_eq!(queue, before);
    }

    #[test]
    fn test_remove_compacts_positions_without_recompute() {
        let (mut queue, ids) = queue_with(&[30, 20, 10]);
        let b_start = queue.entry(ids[1]).unwrap().estimated_start;

        let removed = queue.remove(ids[0], opening_time()).unwrap();
        assert_eq!(removed.booking_id, ids[0]);

        let b = queue.entry(ids[1]).unwrap();
        assert_eq!(b.position, 1);
        assert_eq!(b.estimated_start, b_start);
        assert_eq!(queue.entry(ids[2]).unwrap().position, 2);
        assert_eq!(queue.current_queue_size(), 2);
    }

    #[test]
    fn test_remove_twice_reports_entry_not_found() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        queue.remove(ids[0], opening_time()).unwrap();
        let err = queue.remove(ids[0], opening_time()).unwrap_err();
        assert!(matches!(
            scheduling_error(&err),
            Some(SchedulingError::EntryNotFound { .. })
        ));
        assert_eq!(queue.current_queue_size(), 1);
    }

    #[test]
    fn test_complete_anchors_next_actual_start() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        queue.advance(ids[0], minutes(30)).unwrap();

        let finished_at = opening_time() + TimeDelta::minutes(50);
        let done = queue.complete(ids[0], finished_at).unwrap();
        assert_eq!(done.status, QueueEntryStatus::Completed);

        queue.advance(ids[1], minutes(20)).unwrap();
        let b = queue.entry(ids[1]).unwrap();
        assert_eq!(b.estimated_start, finished_at);
        assert_eq!(b.position, 1);
    }

    #[test]
    fn test_no_show_after_completion_moves_anchor_to_removal_time() {
        let (mut queue, ids) = queue_with(&[30, 20, 10]);
        queue.advance(ids[0], minutes(30)).unwrap();

        let finished_at = opening_time() + TimeDelta::minutes(30);
        queue.complete(ids[0], finished_at).unwrap();
        let gave_up_at = opening_time() + TimeDelta::minutes(45);
        queue.remove_no_show(ids[1], gave_up_at).unwrap();

        queue.advance(ids[2], minutes(10)).unwrap();
        let c = queue.entry(ids[2]).unwrap();
        assert_eq!(c.estimated_start, gave_up_at);
        assert_eq!(c.position, 1);
    }

    #[test]
    fn test_removal_behind_next_keeps_completion_anchor() {
        let (mut queue, ids) = queue_with(&[30, 20, 10]);
        queue.advance(ids[0], minutes(30)).unwrap();

        let finished_at = opening_time() + TimeDelta::minutes(30);
        queue.complete(ids[0], finished_at).unwrap();
        queue
            .remove(ids[2], opening_time() + TimeDelta::minutes(40))
            .unwrap();

        queue.advance(ids[1], minutes(20)).unwrap();
        assert_eq!(queue.entry(ids[1]).unwrap().estimated_start, finished_at);
    }

    #[test]
    fn test_average_wait_time() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        assert_eq!(queue.average_wait_time(), None);

        // A starts immediately, B waits the full 30 minutes
        queue.advance(ids[0], minutes(30)).unwrap();
        queue.advance(ids[1], minutes(20)).unwrap();
        assert_eq!(queue.average_wait_time(), Some(minutes(15)));
    }

    #[test]
    fn test_peek_next_waiting_skips_in_service() {
        let (mut queue, ids) = queue_with(&[30, 20]);
        assert_eq!(queue.peek_next_waiting().unwrap().booking_id, ids[0]);
        queue.advance(ids[0], minutes(30)).unwrap();
        assert_eq!(queue.peek_next_waiting().unwrap().booking_id, ids[1]);
        queue.remove_no_show(ids[1], opening_time()).unwrap();
        assert!(queue.peek_next_waiting().is_none());
    }

    #[test]
    fn test_advance_out_of_order_keeps_waiting_order() {
        let (mut queue, ids) = queue_with(&[30, 20, 10]);
        queue.advance(ids[1], minutes(5)).unwrap();
        queue.check_invariants().unwrap();
        let c = queue.entry(ids[2]).unwrap();
        assert!(c.estimated_start >= queue.entry(ids[0]).unwrap().estimated_end);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u32),
        Advance(usize, u32),
        Remove(usize),
        Complete(usize, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..120).prop_map(Op::Enqueue),
            (0usize..8, 1u32..120).prop_map(|(i, d)| Op::Advance(i, d)),
            (0usize..8).prop_map(Op::Remove),
            (0usize..8, 0u32..240).prop_map(|(i, m)| Op::Complete(i, m)),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariants_hold_for_any_sequence(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let mut queue = ProviderQueue::new("salon-1");
            let mut known: Vec<BookingId> = Vec::new();

            for op in ops {
                let before = queue.clone();
                let outcome = match op {
                    Op::Enqueue(mins) => {
                        let id = Uuid::new_v4();
                        known.push(id);
                        queue.enqueue(id, minutes(mins), opening_time()).map(|_| ())
                    }
                    Op::Advance(i, mins) => match known.get(i) {
                        Some(id) => queue.advance(*id, minutes(mins)).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Remove(i) => match known.get(i) {
                        Some(id) => queue.remove(*id, opening_time()).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Complete(i, offset) => match known.get(i) {
                        Some(id) => queue
                            .complete(*id, opening_time() + TimeDelta::minutes(i64::from(offset)))
                            .map(|_| ()),
                        None => Ok(()),
                    },
                };

                // Failed operations leave the document untouched
                if outcome.is_err() {
                    prop_assert_eq!(&queue, &before);
                }
                prop_assert!(queue.check_invariants().is_ok(), "{:?}", queue.check_invariants());
            }
        }
    }
}
