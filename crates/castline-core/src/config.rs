// Pipeline configuration
//
// PipelineConfig groups the tunables of every stage. The thresholds carried
// over from hand-tuned broadcast runs are exposed here rather than hard-coded
// in the stages that use them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{CastlineError, Result};
use crate::event::{SourceCategory, TextVariant};
use crate::retry::{duration_millis, RetryPolicy};

/// Top-level configuration passed into the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Round at which the on-screen clock restarts (side swap)
    pub half_boundary_round: u32,

    /// Ticks per second the demo parser stamped onto match-absolute events
    pub tickrate: f64,

    pub generator: GeneratorConfig,
    pub compressor: CompressorConfig,
    pub scheduler: SchedulerConfig,

    /// Added to a raw event's priority when it is adapted
    pub priority_boosts: BTreeMap<SourceCategory, i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            half_boundary_round: 13,
            tickrate: 128.0,
            generator: GeneratorConfig::default(),
            compressor: CompressorConfig::default(),
            scheduler: SchedulerConfig::default(),
            priority_boosts: BTreeMap::from([(SourceCategory::Economy, 8)]),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_half_boundary_round(mut self, round: u32) -> Self {
        self.half_boundary_round = round;
        self
    }

    pub fn with_tickrate(mut self, tickrate: f64) -> Self {
        self.tickrate = tickrate;
        self
    }

    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_compressor(mut self, compressor: CompressorConfig) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_priority_boost(mut self, category: SourceCategory, boost: i32) -> Self {
        self.priority_boosts.insert(category, boost);
        self
    }

    /// Boost applied to events of `category`
    pub fn priority_boost(&self, category: SourceCategory) -> i32 {
        self.priority_boosts.get(&category).copied().unwrap_or(0)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.half_boundary_round < 2 {
            return Err(CastlineError::config(format!(
                "half_boundary_round must be at least 2, got {}",
                self.half_boundary_round
            )));
        }
        if !(self.tickrate > 0.0) {
            return Err(CastlineError::config("tickrate must be positive"));
        }

        let generator = &self.generator;
        if generator.workers == 0 {
            return Err(CastlineError::config("generator.workers must be at least 1"));
        }
        if generator.retry.max_attempts == 0 {
            return Err(CastlineError::config(
                "generator.retry.max_attempts must be at least 1",
            ));
        }
        if generator.call_timeout.is_zero() {
            return Err(CastlineError::config("generator.call_timeout must be non-zero"));
        }

        let compressor = &self.compressor;
        if compressor.max_cluster_size == 0 {
            return Err(CastlineError::config(
                "compressor.max_cluster_size must be at least 1",
            ));
        }
        if compressor.merge_window_secs < 0.0 {
            return Err(CastlineError::config(
                "compressor.merge_window_secs must not be negative",
            ));
        }

        let scheduler = &self.scheduler;
        if !(scheduler.chars_per_second > 0.0) {
            return Err(CastlineError::config(
                "scheduler.chars_per_second must be positive",
            ));
        }
        if scheduler.min_duration_secs <= 0.0 || scheduler.min_duration_secs > scheduler.max_duration_secs
        {
            return Err(CastlineError::config(format!(
                "scheduler duration bounds are invalid: min {} max {}",
                scheduler.min_duration_secs, scheduler.max_duration_secs
            )));
        }
        for (category, cap) in &scheduler.category_duration_caps {
            if *cap <= 0.0 {
                return Err(CastlineError::config(format!(
                    "scheduler duration cap for {} must be positive",
                    category
                )));
            }
        }
        if scheduler.grace_secs < 0.0
            || scheduler.tactical_tolerance_secs < 0.0
            || scheduler.tactical_snap_back_secs < 0.0
        {
            return Err(CastlineError::config(
                "scheduler windows must not be negative",
            ));
        }
        if scheduler.text_preference.is_empty() {
            return Err(CastlineError::config(
                "scheduler.text_preference must name at least one variant",
            ));
        }

        Ok(())
    }
}

/// Concurrent Generator tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Maximum number of concurrent generation calls
    pub workers: usize,

    pub retry: RetryPolicy,

    /// Deadline for a single generation call
    #[serde(rename = "call_timeout_ms", with = "duration_millis")]
    pub call_timeout: Duration,

    /// Model identifier passed to the text-generation collaborator
    pub model: String,

    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            model: "qwen-plus".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(400),
        }
    }
}

impl GeneratorConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Cluster Compressor tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressorConfig {
    /// Maximum gap to the previous cluster member
    pub merge_window_secs: f64,

    pub max_cluster_size: usize,

    /// Categories whose bursts get merged
    pub eligible_categories: Vec<SourceCategory>,

    /// Character limit of the joined fallback summary
    pub fallback_max_chars: usize,

    /// Separator used by the joined fallback summary
    pub separator: String,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            merge_window_secs: 5.0,
            max_cluster_size: 3,
            eligible_categories: vec![SourceCategory::Kill],
            fallback_max_chars: 60,
            separator: "; ".to_string(),
        }
    }
}

impl CompressorConfig {
    pub fn with_merge_window(mut self, secs: f64) -> Self {
        self.merge_window_secs = secs;
        self
    }

    pub fn with_max_cluster_size(mut self, size: usize) -> Self {
        self.max_cluster_size = size;
        self
    }

    pub fn with_eligible_categories(mut self, categories: Vec<SourceCategory>) -> Self {
        self.eligible_categories = categories;
        self
    }

    pub fn is_eligible(&self, category: SourceCategory) -> bool {
        self.eligible_categories.contains(&category)
    }
}

/// Scheduler tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Assumed narration rate used to size a slot
    pub chars_per_second: f64,

    pub min_duration_secs: f64,
    pub max_duration_secs: f64,

    /// Tighter per-category upper bound on slot duration
    pub category_duration_caps: BTreeMap<SourceCategory, f64>,

    /// Contending events at or above this priority continue after the cursor
    pub preemption_threshold: i32,

    /// Overlap below which a low-priority event is nudged instead of dropped
    pub grace_secs: f64,

    /// How far behind the cursor tactical commentary may still slide forward
    pub tactical_tolerance_secs: f64,

    /// Tactical commentary starting at most this far after the cursor is
    /// pulled back onto it; 0 disables. The hand-tuned broadcast value was 8.0.
    pub tactical_snap_back_secs: f64,

    /// Narration variant preference, first non-empty wins
    pub text_preference: Vec<TextVariant>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chars_per_second: 5.0,
            min_duration_secs: 2.5,
            max_duration_secs: 10.0,
            category_duration_caps: BTreeMap::from([(SourceCategory::Utility, 3.0)]),
            preemption_threshold: 6,
            grace_secs: 3.0,
            tactical_tolerance_secs: 25.0,
            tactical_snap_back_secs: 0.0,
            text_preference: vec![TextVariant::Medium, TextVariant::Long, TextVariant::Short],
        }
    }
}

impl SchedulerConfig {
    pub fn with_preemption_threshold(mut self, threshold: i32) -> Self {
        self.preemption_threshold = threshold;
        self
    }

    pub fn with_grace(mut self, secs: f64) -> Self {
        self.grace_secs = secs;
        self
    }

    pub fn with_tactical_tolerance(mut self, secs: f64) -> Self {
        self.tactical_tolerance_secs = secs;
        self
    }

    pub fn with_tactical_snap_back(mut self, secs: f64) -> Self {
        self.tactical_snap_back_secs = secs;
        self
    }

    pub fn with_duration_bounds(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.min_duration_secs = min_secs;
        self.max_duration_secs = max_secs;
        self
    }

    pub fn with_chars_per_second(mut self, rate: f64) -> Self {
        self.chars_per_second = rate;
        self
    }

    pub fn with_duration_cap(mut self, category: SourceCategory, cap_secs: f64) -> Self {
        self.category_duration_caps.insert(category, cap_secs);
        self
    }

    pub fn with_text_preference(mut self, preference: Vec<TextVariant>) -> Self {
        self.text_preference = preference;
        self
    }

    /// Upper bound on slot duration for `category`
    pub fn max_duration_for(&self, category: SourceCategory) -> f64 {
        match self.category_duration_caps.get(&category) {
            Some(cap) => cap.min(self.max_duration_secs),
            None => self.max_duration_secs,
        }
    }
}
