// Event Source Adapter
//
// Uniform view over the analysis components' output. Providers yield raw
// rows; adaptation turns them into fingerprinted, priority-boosted events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::event::{Event, RawEvent, SourceCategory};

/// Produces the raw rows of one analysis component
#[async_trait]
pub trait RawEventProvider: Send + Sync {
    /// Category of every row this provider yields
    fn category(&self) -> SourceCategory;

    /// Fetch all rows; `SourceUnavailable` when the component produced nothing usable
    async fn fetch(&self) -> Result<Vec<RawEvent>>;
}

/// Adapted events of one source
#[derive(Debug, Clone)]
pub struct EventSource {
    pub category: SourceCategory,
    pub events: Vec<Event>,
}

impl EventSource {
    /// Adapt raw rows into events
    ///
    /// Applies the category's priority boost and drops rows whose fingerprint
    /// was already seen; the first occurrence wins.
    pub fn adapt(category: SourceCategory, raw: Vec<RawEvent>, config: &PipelineConfig) -> Self {
        let boost = config.priority_boost(category);
        let mut seen = HashSet::new();
        let mut events = Vec::with_capacity(raw.len());

        for row in raw {
            let mut event = Event::from_raw(category, row);
            if !seen.insert(event.fingerprint.clone()) {
                warn!(
                    category = %category,
                    fingerprint = %event.fingerprint,
                    "Dropping duplicate raw event"
                );
                continue;
            }
            event.priority += boost;
            events.push(event);
        }

        debug!(category = %category, events = events.len(), boost, "Adapted source");

        Self { category, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// In-memory provider over a fixed set of rows
#[derive(Debug, Clone)]
pub struct StaticEventProvider {
    category: SourceCategory,
    rows: Vec<RawEvent>,
}

impl StaticEventProvider {
    pub fn new(category: SourceCategory, rows: Vec<RawEvent>) -> Self {
        Self { category, rows }
    }
}

#[async_trait]
impl RawEventProvider for StaticEventProvider {
    fn category(&self) -> SourceCategory {
        self.category
    }

    async fn fetch(&self) -> Result<Vec<RawEvent>> {
        Ok(self.rows.clone())
    }
}

/// Timing of one round on the match clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundTiming {
    pub round_number: u32,
    /// First tick of the round on the match-absolute clock
    pub start_tick: u64,
    /// Effective (post freeze time) duration of the round
    pub duration_secs: f64,
}

/// Per-round timing used to place events on the canonical axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundTable {
    rounds: BTreeMap<u32, RoundTiming>,
}

impl RoundTable {
    pub fn new(rounds: impl IntoIterator<Item = RoundTiming>) -> Self {
        Self {
            rounds: rounds
                .into_iter()
                .map(|timing| (timing.round_number, timing))
                .collect(),
        }
    }

    /// Derive round timing from per-tick samples of `(round, tick, seconds_into_round)`
    ///
    /// A round starts at its smallest tick and lasts as long as its largest
    /// post freeze time second.
    pub fn from_samples(samples: impl IntoIterator<Item = (u32, u64, f64)>) -> Self {
        let mut rounds: BTreeMap<u32, RoundTiming> = BTreeMap::new();
        for (round_number, tick, seconds) in samples {
            let entry = rounds.entry(round_number).or_insert(RoundTiming {
                round_number,
                start_tick: tick,
                duration_secs: 0.0,
            });
            entry.start_tick = entry.start_tick.min(tick);
            if seconds > entry.duration_secs {
                entry.duration_secs = seconds;
            }
        }
        Self { rounds }
    }

    pub fn get(&self, round_number: u32) -> Option<&RoundTiming> {
        self.rounds.get(&round_number)
    }

    /// Rounds in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &RoundTiming> {
        self.rounds.values()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}
