/*
    Copyright (C) 2026  The FERROSPEC developers

    This file is part of FERROSPEC, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! The frame T-state counter and the discrete-event scheduler.
//!
//! All peripheral timing is expressed as events on a single queue ordered by
//! `(tstates, type)`. The emulation loop runs the CPU until the earliest
//! queued timestamp, drains every due event, and repeats; events are never
//! fired from inside an instruction.
use std::collections::VecDeque;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

/// A T-state timestamp or duration within the current frame.
pub type FTs = u32;

/// The value [EventScheduler::next_event] returns while the queue is empty.
pub const NO_EVENTS: FTs = 0xffff_ffff;

/// An identifier handed out by [EventScheduler::register].
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EventType(u16);

/// Events of this type sit in the queue but are never returned to the caller.
///
/// [EventScheduler::remove_type] rewrites matching entries to this type
/// instead of unlinking them, which keeps the queue order and the positions
/// of the surviving entries stable while the queue is being walked.
pub const EVENT_TYPE_NULL: EventType = EventType(0);

/// A single queued event.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Event {
    /// When the event is due, in frame T-states.
    pub tstates: FTs,
    /// The registered type of this event.
    pub etype: EventType,
    /// Interpreted by the owner of the event type (e.g. a drive index).
    pub user_data: u32,
}

/// An ordered queue of timed events with a registry of event types.
///
/// Types are registered once, at machine construction time, and carry a
/// human-readable name for the debugger's event list.
#[derive(Clone, Debug)]
pub struct EventScheduler {
    registered: Vec<String>,
    queue: VecDeque<Event>,
    next_event: FTs,
}

impl Default for EventScheduler {
    fn default() -> Self {
        EventScheduler::new()
    }
}

impl EventScheduler {
    /// Creates a scheduler with the null event pre-registered as type 0.
    pub fn new() -> Self {
        EventScheduler {
            registered: vec!["[Deleted event]".to_string()],
            queue: VecDeque::new(),
            next_event: NO_EVENTS,
        }
    }

    /// Registers a new event type under the given name.
    pub fn register(&mut self, name: &str) -> EventType {
        let id = self.registered.len();
        assert!(id <= u16::max_value() as usize, "event type registry overflow");
        self.registered.push(name.to_string());
        EventType(id as u16)
    }

    /// Returns the name the given type was registered under.
    pub fn name(&self, etype: EventType) -> &str {
        &self.registered[etype.0 as usize]
    }

    /// The timestamp of the earliest queued event, or [NO_EVENTS].
    #[inline(always)]
    pub fn next_event(&self) -> FTs {
        self.next_event
    }

    /// Queues an event with no user data.
    pub fn add(&mut self, tstates: FTs, etype: EventType) {
        self.add_with_data(tstates, etype, 0)
    }

    /// Queues an event at the position given by ascending `(tstates, type)`.
    ///
    /// Two events with an identical key keep their insertion order.
    ///
    /// # Panics
    /// Panics if `etype` was never registered; scheduling an unknown event
    /// is a programming error, not a recoverable condition.
    pub fn add_with_data(&mut self, tstates: FTs, etype: EventType, user_data: u32) {
        assert!(
            (etype.0 as usize) < self.registered.len(),
            "event type {} was not registered", etype.0
        );
        let event = Event { tstates, etype, user_data };
        let key = (tstates, etype);
        // after the last entry with a key not greater than ours
        let pos = self.queue.partition_point(|e| (e.tstates, e.etype) <= key);
        self.queue.insert(pos, event);
        if tstates < self.next_event {
            self.next_event = tstates;
        }
    }

    /// Removes and returns the earliest event if it is due at `now`.
    ///
    /// The event leaves the queue before the caller sees it, so a handler
    /// is free to re-arm its own type. Null events are drained silently.
    pub fn next_due(&mut self, now: FTs) -> Option<Event> {
        while self.next_event <= now {
            let event = self.queue.pop_front().expect("event queue out of sync");
            self.next_event = match self.queue.front() {
                Some(head) => head.tstates,
                None => NO_EVENTS,
            };
            if event.etype != EVENT_TYPE_NULL {
                return Some(event);
            }
        }
        None
    }

    /// Rewrites every queued event of the given type to the null type.
    ///
    /// Removing a type with no queued events is a no-op.
    pub fn remove_type(&mut self, etype: EventType) {
        for event in self.queue.iter_mut() {
            if event.etype == etype {
                event.etype = EVENT_TYPE_NULL;
            }
        }
    }

    /// Like [remove_type][EventScheduler::remove_type], narrowed to events
    /// carrying the given user data (e.g. one drive of several).
    pub fn remove_type_user_data(&mut self, etype: EventType, user_data: u32) {
        for event in self.queue.iter_mut() {
            if event.etype == etype && event.user_data == user_data {
                event.etype = EVENT_TYPE_NULL;
            }
        }
    }

    /// Subtracts a frame's worth of T-states from every queued event.
    ///
    /// Called once per frame, after the main loop exits and every due event
    /// has been drained, so no queued timestamp is below `tstates_per_frame`.
    pub fn frame(&mut self, tstates_per_frame: FTs) {
        for event in self.queue.iter_mut() {
            event.tstates -= tstates_per_frame;
        }
        self.next_event = match self.queue.front() {
            Some(head) => head.tstates,
            None => NO_EVENTS,
        };
    }

    /// Calls `f` for every queued event, in queue order.
    pub fn foreach<F: FnMut(&Event)>(&self, mut f: F) {
        for event in self.queue.iter() {
            f(event);
        }
    }

    /// Empties the queue. Registered types survive.
    ///
    /// Only legal at a frame boundary.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.next_event = NO_EVENTS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn scheduler_with(types: &[&str]) -> (EventScheduler, Vec<EventType>) {
        let mut scheduler = EventScheduler::new();
        let ids = types.iter().map(|name| scheduler.register(name)).collect();
        (scheduler, ids)
    }

    #[test]
    fn events_drain_in_timestamp_order() {
        let (mut scheduler, ids) = scheduler_with(&["a", "b"]);
        scheduler.add(300, ids[1]);
        scheduler.add(100, ids[0]);
        scheduler.add(200, ids[1]);
        assert_eq!(scheduler.next_event(), 100);

        let mut seen = Vec::new();
        while let Some(event) = scheduler.next_due(1000) {
            seen.push(event.tstates);
        }
        assert_eq!(seen, vec![100, 200, 300]);
        assert_eq!(scheduler.next_event(), NO_EVENTS);
    }

    #[test]
    fn same_timestamp_orders_by_type_then_insertion() {
        let (mut scheduler, ids) = scheduler_with(&["a", "b"]);
        scheduler.add_with_data(50, ids[1], 1);
        scheduler.add_with_data(50, ids[0], 2);
        scheduler.add_with_data(50, ids[1], 3);

        let mut seen = Vec::new();
        scheduler.foreach(|e| seen.push((e.etype, e.user_data)));
        assert_eq!(seen, vec![(ids[0], 2), (ids[1], 1), (ids[1], 3)]);
    }

    #[test]
    fn due_event_is_removed_before_the_caller_runs() {
        let (mut scheduler, ids) = scheduler_with(&["timer"]);
        scheduler.add(10, ids[0]);
        let event = scheduler.next_due(10).unwrap();
        assert_eq!(event.tstates, 10);
        // re-arming from the "handler" must not return the old entry again
        scheduler.add(20, ids[0]);
        assert_eq!(scheduler.next_event(), 20);
        assert!(scheduler.next_due(10).is_none());
    }

    #[test]
    fn events_not_yet_due_stay_queued() {
        let (mut scheduler, ids) = scheduler_with(&["a"]);
        scheduler.add(500, ids[0]);
        assert!(scheduler.next_due(499).is_none());
        assert!(scheduler.next_due(500).is_some());
    }

    #[test]
    fn remove_type_nulls_matching_events_only() {
        let (mut scheduler, ids) = scheduler_with(&["a", "b"]);
        scheduler.add(100, ids[0]);
        scheduler.add(200, ids[1]);
        scheduler.add(300, ids[0]);
        scheduler.remove_type(ids[0]);

        let mut kinds = Vec::new();
        scheduler.foreach(|e| kinds.push(e.etype));
        assert_eq!(kinds, vec![EVENT_TYPE_NULL, ids[1], EVENT_TYPE_NULL]);

        // nulled events never surface
        let survivors: Vec<_> = std::iter::from_fn(|| scheduler.next_due(1000)).collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].etype, ids[1]);
    }

    #[test]
    fn remove_type_user_data_narrows_to_one_owner() {
        let (mut scheduler, ids) = scheduler_with(&["motor"]);
        scheduler.add_with_data(100, ids[0], 0);
        scheduler.add_with_data(200, ids[0], 1);
        scheduler.remove_type_user_data(ids[0], 1);

        let survivors: Vec<_> = std::iter::from_fn(|| scheduler.next_due(1000)).collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].user_data, 0);
    }

    #[test]
    fn remove_type_without_queued_events_is_a_noop() {
        let (mut scheduler, ids) = scheduler_with(&["a"]);
        scheduler.remove_type(ids[0]);
        assert_eq!(scheduler.next_event(), NO_EVENTS);
    }

    #[test]
    fn frame_rebases_all_timestamps() {
        let (mut scheduler, ids) = scheduler_with(&["a"]);
        scheduler.add(70000, ids[0]);
        scheduler.add(71000, ids[0]);
        scheduler.frame(69888);
        assert_eq!(scheduler.next_event(), 112);

        let mut times = Vec::new();
        scheduler.foreach(|e| times.push(e.tstates));
        assert_eq!(times, vec![112, 1112]);
    }

    #[test]
    #[should_panic(expected = "was not registered")]
    fn adding_an_unregistered_type_panics() {
        let mut scheduler = EventScheduler::new();
        scheduler.add(0, EventType(7));
    }

    #[test]
    fn stress_preserves_order_under_random_insertion() {
        let (mut scheduler, ids) = scheduler_with(&["a", "b", "c", "d"]);
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..100_000 {
            let t = rng.gen_range(0..70000);
            let ty = ids[rng.gen_range(0..ids.len())];
            scheduler.add_with_data(t, ty, rng.gen());
        }
        let mut last = (0, EVENT_TYPE_NULL);
        let mut count = 0;
        while let Some(event) = scheduler.next_due(70000) {
            let key = (event.tstates, event.etype);
            assert!(key >= last, "events out of order: {:?} after {:?}", key, last);
            last = key;
            count += 1;
        }
        assert_eq!(count, 100_000);
    }
}
