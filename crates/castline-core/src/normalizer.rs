// Time Normalizer
//
// Maps native timestamps onto the canonical axis: seconds since the start of
// the event's half. Round durations accumulate in round order, and the
// accumulator restarts at zero on the half-boundary round.

use std::collections::BTreeMap;
use tracing::debug;

use crate::event::{Event, Half, TimeEncoding};
use crate::source::RoundTable;

#[derive(Debug, Clone, Copy)]
struct RoundAxis {
    /// Canonical time at which the round begins
    half_offset: f64,
    /// Match-absolute second at which the round begins
    start_offset: f64,
    duration: f64,
}

/// Converts native timestamps to canonical time
#[derive(Debug, Clone)]
pub struct TimeNormalizer {
    rounds: BTreeMap<u32, RoundAxis>,
    half_boundary: u32,
    tickrate: f64,
}

impl TimeNormalizer {
    pub fn new(table: &RoundTable, half_boundary: u32, tickrate: f64) -> Self {
        let mut rounds = BTreeMap::new();
        let mut running = 0.0;
        let mut lower_started = false;

        for timing in table.iter() {
            if !lower_started && timing.round_number >= half_boundary {
                running = 0.0;
                lower_started = true;
            }
            let duration = timing.duration_secs.max(0.0);
            rounds.insert(
                timing.round_number,
                RoundAxis {
                    half_offset: running,
                    start_offset: timing.start_tick as f64 / tickrate,
                    duration,
                },
            );
            running += duration;
        }

        debug!(rounds = rounds.len(), half_boundary, "Computed round offsets");

        Self {
            rounds,
            half_boundary,
            tickrate,
        }
    }

    /// Canonical time at which `round_number` begins
    ///
    /// A round missing from the table starts where the closest earlier round
    /// of the same half ended, or at zero.
    pub fn half_offset(&self, round_number: u32) -> f64 {
        if let Some(axis) = self.rounds.get(&round_number) {
            return axis.half_offset;
        }
        let half = Half::of(round_number, self.half_boundary);
        self.rounds
            .range(..round_number)
            .next_back()
            .filter(|(round, _)| Half::of(**round, self.half_boundary) == half)
            .map(|(_, axis)| axis.half_offset + axis.duration)
            .unwrap_or(0.0)
    }

    /// Match-absolute second at which `round_number` begins
    pub fn round_start_offset(&self, round_number: u32) -> Option<f64> {
        self.rounds.get(&round_number).map(|axis| axis.start_offset)
    }

    /// Seconds since the start of the event's half
    ///
    /// A match-absolute event whose round is missing from the table has no
    /// anchor and lands on the start of the round.
    pub fn canonical_time(&self, event: &Event) -> f64 {
        let native = event.native_timestamp.as_seconds(self.tickrate);
        let relative = match event.category.time_encoding() {
            TimeEncoding::RoundRelative => native,
            TimeEncoding::MatchAbsolute => match self.round_start_offset(event.round_number) {
                Some(start) => native - start,
                None => 0.0,
            },
        };

        self.half_offset(event.round_number) + relative.max(0.0)
    }

    /// Set `canonical_time` on every event
    pub fn normalize(&self, events: &mut [Event]) {
        for event in events.iter_mut() {
            event.canonical_time = Some(self.canonical_time(event));
        }
    }
}
