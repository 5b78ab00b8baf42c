use std::time::Instant;

use mxo_shared::{District, Location};

/// What a timed event does when it fires. Kinds are the cancellation
/// granularity: `cancel(kind)` removes every pending event of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Jackout,
    Teleport,
    AbilityEnd,
}

/// Parameters travel with the event as plain data; the tick interprets
/// the kind and calls the right session method.
#[derive(Debug, Clone, PartialEq)]
pub enum EventParams {
    None,
    Teleport {
        district: District,
        position: Location,
    },
    AbilityEnd {
        ability_id: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub params: EventParams,
    pub fire_time: Instant,
}

/// A session's pending timed events, kept in fire-time order. The list
/// stays small (a handful of entries), so a sorted vec beats a heap.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn schedule(&mut self, kind: EventKind, params: EventParams, fire_time: Instant) {
        let event = Event {
            kind,
            params,
            fire_time,
        };
        // insertion stays stable for equal fire times
        let at = self
            .events
            .iter()
            .position(|e| e.fire_time > fire_time)
            .unwrap_or(self.events.len());
        self.events.insert(at, event);
    }

    /// Removes all events of a kind, returning how many were dropped.
    pub fn cancel(&mut self, kind: EventKind) -> usize {
        let before = self.events.len();
        self.events.retain(|e| e.kind != kind);
        before - self.events.len()
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    /// Drains every event with `fire_time <= now`, in fire-time order.
    /// Each event is consumed exactly once.
    pub fn take_due(&mut self, now: Instant) -> Vec<Event> {
        let cut = self
            .events
            .iter()
            .position(|e| e.fire_time > now)
            .unwrap_or(self.events.len());
        self.events.drain(..cut).collect()
    }
}
