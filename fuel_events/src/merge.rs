//! Coalescing of same-type events separated by short gaps.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{EventType, FuelEvent};

pub const DEFAULT_MERGE_GAP_MIN: f64 = 3.0;

/// Open event being extended during the merge pass.
#[derive(Clone, Debug)]
struct EventAccumulator {
    event_type: EventType,
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
    duration_min: f64,
    delta_liters: f64,
    confidence: f64,
}

impl EventAccumulator {
    fn open(event: FuelEvent) -> Self {
        Self {
            event_type: event.event_type,
            start_ts: event.start_ts,
            end_ts: event.end_ts,
            duration_min: event.duration_min,
            delta_liters: event.delta_liters,
            confidence: event.confidence,
        }
    }

    fn can_absorb(&self, next: &FuelEvent, gap_min: f64) -> bool {
        next.event_type == self.event_type && minutes_between(self.end_ts, next.start_ts) <= gap_min
    }

    fn absorb(&mut self, next: FuelEvent) {
        self.end_ts = next.end_ts;
        self.duration_min += next.duration_min;
        self.delta_liters += next.delta_liters;
        self.confidence = self.confidence.max(next.confidence);
    }

    fn close(self) -> FuelEvent {
        FuelEvent {
            event_type: self.event_type,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            duration_min: self.duration_min,
            delta_liters: self.delta_liters,
            confidence: self.confidence,
        }
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    delta
        .num_nanoseconds()
        .map(|ns| ns as f64 / 60e9)
        .unwrap_or_else(|| delta.num_milliseconds() as f64 / 60_000.0)
}

/// Sort events by start time and merge same-type neighbours in a single greedy pass.
pub fn merge_adjacent(mut events: Vec<FuelEvent>, gap_min: f64) -> Vec<FuelEvent> {
    events.sort_by_key(|e| e.start_ts);
    let candidates = events.len();

    let mut merged = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();
    let Some(first) = iter.next() else {
        return merged;
    };
    let mut current = EventAccumulator::open(first);
    for next in iter {
        if current.can_absorb(&next, gap_min) {
            current.absorb(next);
        } else {
            merged.push(current.close());
            current = EventAccumulator::open(next);
        }
    }
    merged.push(current.close());

    if merged.len() < candidates {
        debug!(candidates, merged = merged.len(), gap_min, "merged adjacent events");
    }
    merged
}
