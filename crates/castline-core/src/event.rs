// Event data model
//
// An Event is created from a raw provider row, enriched in place with
// narration and then canonical time, and finally consumed by the scheduler.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which analysis component produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Kill,
    Utility,
    Economy,
    Tactical,
    RoundSummary,
}

impl SourceCategory {
    /// All categories, in pipeline processing order
    pub const ALL: [SourceCategory; 5] = [
        SourceCategory::Tactical,
        SourceCategory::Kill,
        SourceCategory::Utility,
        SourceCategory::Economy,
        SourceCategory::RoundSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Kill => "kill",
            SourceCategory::Utility => "utility",
            SourceCategory::Economy => "economy",
            SourceCategory::Tactical => "tactical",
            SourceCategory::RoundSummary => "round_summary",
        }
    }

    /// How this category's native timestamps are anchored
    pub fn time_encoding(&self) -> TimeEncoding {
        match self {
            SourceCategory::Kill | SourceCategory::Tactical => TimeEncoding::RoundRelative,
            SourceCategory::Utility | SourceCategory::Economy | SourceCategory::RoundSummary => {
                TimeEncoding::MatchAbsolute
            }
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kill" => Ok(SourceCategory::Kill),
            "utility" | "grenade" => Ok(SourceCategory::Utility),
            "economy" => Ok(SourceCategory::Economy),
            "tactical" => Ok(SourceCategory::Tactical),
            "round_summary" | "round-summary" => Ok(SourceCategory::RoundSummary),
            other => Err(format!("unknown source category: {}", other)),
        }
    }
}

/// Anchor of a source's native timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeEncoding {
    /// Seconds elapsed since the round started (post freeze time)
    RoundRelative,
    /// Ticks or seconds on the whole match's raw clock
    MatchAbsolute,
}

/// A timestamp as emitted by its source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeTimestamp {
    Ticks(u64),
    Seconds(f64),
}

impl NativeTimestamp {
    /// Convert to seconds on the same anchor
    pub fn as_seconds(&self, tickrate: f64) -> f64 {
        match *self {
            NativeTimestamp::Ticks(ticks) => ticks as f64 / tickrate,
            NativeTimestamp::Seconds(secs) => secs,
        }
    }

    fn key(&self) -> String {
        match *self {
            NativeTimestamp::Ticks(ticks) => ticks.to_string(),
            NativeTimestamp::Seconds(secs) => format!("{:.3}", secs),
        }
    }
}

/// Half of the match; the on-screen clock restarts at the boundary round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Half {
    Upper,
    Lower,
}

impl Half {
    pub fn of(round_number: u32, half_boundary: u32) -> Self {
        if round_number >= half_boundary {
            Half::Lower
        } else {
            Half::Upper
        }
    }
}

/// Stable, category-scoped identity of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the fingerprint of a raw provider row
    pub fn for_raw(
        round_number: u32,
        category: SourceCategory,
        entity_id: &str,
        native: &NativeTimestamp,
    ) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            round_number,
            category,
            entity_id,
            native.key()
        ))
    }

    /// Build the fingerprint of a synthesized cluster from its members
    pub fn for_cluster<'a>(
        round_number: u32,
        category: SourceCategory,
        members: impl IntoIterator<Item = &'a Fingerprint>,
    ) -> Self {
        let mut hasher = Sha256::new();
        for member in members {
            hasher.update(member.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "{}_{}_cluster_{}",
            round_number,
            category,
            &digest[..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Length variant of a narration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextVariant {
    Short,
    Medium,
    Long,
}

/// Short, medium and long narration candidates for one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narration {
    #[serde(default)]
    pub short: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub long: String,
}

const LENGTH_LABELS: [&str; 3] = ["短版", "中版", "长版"];
const PREFIX_LABELS: [&str; 9] = [
    "short version",
    "medium version",
    "long version",
    "short",
    "medium",
    "long",
    "短",
    "中",
    "长",
];

impl Narration {
    pub fn new(
        short: impl Into<String>,
        medium: impl Into<String>,
        long: impl Into<String>,
    ) -> Self {
        Self {
            short: short.into(),
            medium: medium.into(),
            long: long.into(),
        }
    }

    /// Same text for every variant
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            short: text.clone(),
            medium: text.clone(),
            long: text,
        }
    }

    /// True when no variant carries any text
    pub fn is_empty(&self) -> bool {
        self.short.trim().is_empty() && self.medium.trim().is_empty() && self.long.trim().is_empty()
    }

    pub fn get(&self, variant: TextVariant) -> &str {
        match variant {
            TextVariant::Short => &self.short,
            TextVariant::Medium => &self.medium,
            TextVariant::Long => &self.long,
        }
    }

    /// First non-empty variant in preference order, sanitized
    pub fn pick(&self, preference: &[TextVariant]) -> Option<String> {
        preference
            .iter()
            .map(|variant| sanitize_text(self.get(*variant)))
            .find(|text| !text.is_empty())
    }

    /// Fill empty variants from `fallback`
    pub fn fill_missing(mut self, fallback: &Narration) -> Self {
        for (slot, backup) in [
            (&mut self.short, &fallback.short),
            (&mut self.medium, &fallback.medium),
            (&mut self.long, &fallback.long),
        ] {
            if slot.trim().is_empty() {
                slot.clone_from(backup);
            }
        }
        self
    }

    /// Strip leaked length labels and separators from every variant
    pub fn sanitize(&self) -> Self {
        Self {
            short: sanitize_text(&self.short),
            medium: sanitize_text(&self.medium),
            long: sanitize_text(&self.long),
        }
    }
}

/// Remove length labels ("Short:", "中版", "长：") and `---` separators
pub fn sanitize_text(text: &str) -> String {
    let mut cleaned = text.replace("---", "");
    for label in LENGTH_LABELS {
        cleaned = cleaned.replace(label, "");
    }

    let mut rest = cleaned.trim();
    loop {
        let before = rest;
        rest = rest.trim_start_matches([':', '：', ' ', '\n', '\t']);
        for label in PREFIX_LABELS {
            if let Some(head) = rest.get(..label.len()) {
                if head.eq_ignore_ascii_case(label) {
                    let tail = &rest[label.len()..];
                    let tail_trimmed = tail.trim_start();
                    if tail_trimmed.starts_with(':') || tail_trimmed.starts_with('：') {
                        rest = tail_trimmed;
                        break;
                    }
                }
            }
        }
        if rest == before {
            break;
        }
    }
    rest.trim().to_string()
}

/// A row as produced by a raw event provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Source entity identifier (player, grenade entity, analysis window)
    pub entity_id: String,
    pub round_number: u32,
    pub native_timestamp: NativeTimestamp,
    pub priority: i32,
    /// Attributes used to render prompts and fallback templates
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl RawEvent {
    pub fn new(
        entity_id: impl Into<String>,
        round_number: u32,
        native_timestamp: NativeTimestamp,
        priority: i32,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            round_number,
            native_timestamp,
            priority,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The unit flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub fingerprint: Fingerprint,
    pub category: SourceCategory,
    pub round_number: u32,
    pub native_timestamp: NativeTimestamp,
    pub priority: i32,
    /// Populated by the generator; `None` until generation ran
    pub narration: Option<Narration>,
    /// Seconds since the start of this event's half; `None` before normalization
    pub canonical_time: Option<f64>,
    /// Time covered by a synthesized cluster (0 for ordinary events)
    #[serde(default)]
    pub span_secs: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    /// Adapt a raw provider row into an event of `category`
    pub fn from_raw(category: SourceCategory, raw: RawEvent) -> Self {
        let fingerprint = Fingerprint::for_raw(
            raw.round_number,
            category,
            &raw.entity_id,
            &raw.native_timestamp,
        );
        Self {
            fingerprint,
            category,
            round_number: raw.round_number,
            native_timestamp: raw.native_timestamp,
            priority: raw.priority,
            narration: None,
            canonical_time: None,
            span_secs: 0.0,
            attributes: raw.attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn half(&self, half_boundary: u32) -> Half {
        Half::of(self.round_number, half_boundary)
    }

    /// Whether the event carries at least one usable narration variant
    pub fn has_narration(&self) -> bool {
        self.narration.as_ref().is_some_and(|n| !n.is_empty())
    }
}
