// Scheduler
//
// Single greedy pass per half over the normalized, compressed events.
// Each half has its own cursor (end of the last accepted slot). An event that
// starts before the cursor contends for the occupied interval and is either
// moved to the cursor or dropped, depending on its category and priority.
// Ordering and thresholds are fully deterministic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::error::{CastlineError, Result};
use crate::event::{Event, Fingerprint, Half, SourceCategory};

/// One narration interval of the final timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub round_number: u32,
    pub category: SourceCategory,
    pub fingerprint: Fingerprint,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl Slot {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Human-readable range, e.g. `12.0-15.5s`
    pub fn time_range(&self) -> String {
        format!("{:.1}-{:.1}s", self.start_time, self.end_time)
    }
}

/// Why an event did not make it into the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No non-empty narration variant
    EmptyText,
    /// Tactical commentary too far behind the cursor
    StaleTactical,
    /// Lost the occupied interval to an earlier slot
    Contended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRecord {
    pub fingerprint: Fingerprint,
    pub category: SourceCategory,
    pub round_number: u32,
    pub canonical_time: f64,
    pub priority: i32,
    pub reason: DropReason,
}

/// Final timeline: one slot list per half plus what was dropped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub upper: Vec<Slot>,
    pub lower: Vec<Slot>,
    pub dropped: Vec<DropRecord>,
}

impl Schedule {
    pub fn half(&self, half: Half) -> &[Slot] {
        match half {
            Half::Upper => &self.upper,
            Half::Lower => &self.lower,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.upper.len() + self.lower.len()
    }

    /// Check that each half is ordered and free of overlaps
    pub fn validate(&self) -> Result<()> {
        for (name, slots) in [("upper", &self.upper), ("lower", &self.lower)] {
            for slot in slots.iter() {
                if slot.start_time < 0.0 || slot.end_time < slot.start_time {
                    return Err(CastlineError::Internal(anyhow::anyhow!(
                        "{} half slot {} has invalid bounds {}",
                        name,
                        slot.fingerprint,
                        slot.time_range()
                    )));
                }
            }
            for pair in slots.windows(2) {
                if pair[0].end_time > pair[1].start_time + 1e-9 {
                    return Err(CastlineError::Internal(anyhow::anyhow!(
                        "{} half slots overlap: {} ({}) and {} ({})",
                        name,
                        pair[0].fingerprint,
                        pair[0].time_range(),
                        pair[1].fingerprint,
                        pair[1].time_range()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Greedy non-overlapping slot assignment
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    half_boundary: u32,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, half_boundary: u32) -> Self {
        Self {
            config,
            half_boundary,
        }
    }

    /// Playback duration for `text` of `category`
    pub fn duration_for(&self, category: SourceCategory, text: &str, span_secs: f64) -> f64 {
        let cap = self.config.max_duration_for(category);
        let spoken = text.chars().count() as f64 / self.config.chars_per_second;
        spoken
            .max(span_secs)
            .max(self.config.min_duration_secs)
            .min(cap)
    }

    pub fn schedule(&self, events: &[Event]) -> Schedule {
        let mut ordered: Vec<&Event> = events.iter().collect();
        ordered.sort_by(|a, b| self.order(a, b));

        let mut schedule = Schedule::default();
        let mut current_half = Half::Upper;
        let mut cursor = 0.0_f64;

        for event in ordered {
            let half = event.half(self.half_boundary);
            if half != current_half {
                debug!(round = event.round_number, "Crossed half boundary, resetting cursor");
                current_half = half;
                cursor = 0.0;
            }
            let canonical = event.canonical_time.unwrap_or(0.0);

            let text = event
                .narration
                .as_ref()
                .and_then(|n| n.pick(&self.config.text_preference));
            let Some(text) = text else {
                schedule.dropped.push(drop_record(event, canonical, DropReason::EmptyText));
                continue;
            };

            let start = match self.place(event, canonical, cursor) {
                Ok(start) => start,
                Err(reason) => {
                    debug!(
                        fingerprint = %event.fingerprint,
                        canonical,
                        cursor,
                        reason = ?reason,
                        "Dropped event"
                    );
                    schedule.dropped.push(drop_record(event, canonical, reason));
                    continue;
                }
            };

            let duration = self.duration_for(event.category, &text, event.span_secs);
            let slot = Slot {
                round_number: event.round_number,
                category: event.category,
                fingerprint: event.fingerprint.clone(),
                start_time: start,
                end_time: start + duration,
                text,
            };
            cursor = slot.end_time;

            match half {
                Half::Upper => schedule.upper.push(slot),
                Half::Lower => schedule.lower.push(slot),
            }
        }

        info!(
            upper = schedule.upper.len(),
            lower = schedule.lower.len(),
            dropped = schedule.dropped.len(),
            "Scheduled timeline"
        );
        schedule
    }

    /// Start time for an event given the cursor, or why it cannot be placed
    fn place(&self, event: &Event, start: f64, cursor: f64) -> std::result::Result<f64, DropReason> {
        let behind = cursor - start;

        if event.category == SourceCategory::Tactical {
            if behind > 0.0 {
                return if behind <= self.config.tactical_tolerance_secs {
                    Ok(cursor)
                } else {
                    Err(DropReason::StaleTactical)
                };
            }
            let ahead = -behind;
            if self.config.tactical_snap_back_secs > 0.0 && ahead <= self.config.tactical_snap_back_secs {
                return Ok(cursor);
            }
            return Ok(start);
        }

        if behind <= 0.0 {
            Ok(start)
        } else if event.priority >= self.config.preemption_threshold || behind < self.config.grace_secs {
            Ok(cursor)
        } else {
            Err(DropReason::Contended)
        }
    }

    /// (half, canonical time asc, priority desc, round asc, fingerprint asc)
    fn order(&self, a: &Event, b: &Event) -> Ordering {
        a.half(self.half_boundary)
            .cmp(&b.half(self.half_boundary))
            .then_with(|| {
                a.canonical_time
                    .unwrap_or(0.0)
                    .total_cmp(&b.canonical_time.unwrap_or(0.0))
            })
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.round_number.cmp(&b.round_number))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    }
}

fn drop_record(event: &Event, canonical: f64, reason: DropReason) -> DropRecord {
    DropRecord {
        fingerprint: event.fingerprint.clone(),
        category: event.category,
        round_number: event.round_number,
        canonical_time: canonical,
        priority: event.priority,
        reason,
    }
}
