//! simulation/events.rs - Discrete Event Ordering
//!
//! The event loop advances simulation time to the earliest of the computed
//! candidate events. Events at the same time are processed in a fixed
//! category order (droplet boundary events before injections before writes
//! before the end of the simulation), with ties inside a category broken by
//! ascending entity id.

use std::cmp::Ordering;

/// What happens at an event instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A droplet boundary reaches a channel end
    BoundaryArrival { droplet_id: usize },
    /// A droplet with boundaries in two distinct downstream channels is
    /// torn into two children
    DropletSplit { droplet_id: usize },
    /// A droplet enters the network
    DropletInjection { injection_id: usize },
    /// A mixture starts feeding a channel
    MixtureInjection { injection_id: usize },
    /// A state snapshot is due
    Write,
    /// The simulation end time is reached
    MaxTime,
}

impl EventKind {
    /// Processing priority of the category; lower runs first
    fn category(&self) -> u8 {
        match self {
            EventKind::BoundaryArrival { .. } | EventKind::DropletSplit { .. } => 0,
            EventKind::DropletInjection { .. } | EventKind::MixtureInjection { .. } => 1,
            EventKind::Write => 2,
            EventKind::MaxTime => 3,
        }
    }

    /// Entity id for tie-breaking inside a category
    fn entity(&self) -> usize {
        match self {
            EventKind::BoundaryArrival { droplet_id } => *droplet_id,
            EventKind::DropletSplit { droplet_id } => *droplet_id,
            EventKind::DropletInjection { injection_id } => *injection_id,
            EventKind::MixtureInjection { injection_id } => *injection_id,
            EventKind::Write | EventKind::MaxTime => 0,
        }
    }
}

/// An event candidate with its absolute time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    /// Absolute simulation time of the event in s
    pub time: f64,
    /// What happens
    pub kind: EventKind,
}

impl Event {
    /// Create an event
    pub fn new(time: f64, kind: EventKind) -> Self {
        Self { time, kind }
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.kind.category().cmp(&other.kind.category()))
            .then(self.kind.entity().cmp(&other.kind.entity()))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The earliest event among the candidates, by the total order
pub fn next_event(candidates: &[Event]) -> Option<Event> {
    candidates.iter().min().copied()
}
