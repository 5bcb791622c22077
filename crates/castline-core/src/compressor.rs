// Cluster Compressor
//
// Merges bursts of closely spaced events of one category (kill chains during
// a single engagement) into one synthesized event narrated by a summarizer.
// Events of other categories pass through untouched, in input order.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheOrigin, GenerationCache, GenerationCacheEntry};
use crate::config::{CompressorConfig, GeneratorConfig};
use crate::error::{CastlineError, Result};
use crate::event::{sanitize_text, Event, Fingerprint, Half, Narration, SourceCategory, TextVariant};
use crate::llm::{LlmCallConfig, LlmProvider};
use crate::prompt::{truncate_chars, PromptBuilder};

/// Produces one line of narration for a burst of events
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, category: SourceCategory, members: &[&Event]) -> Result<String>;
}

/// Short text of each member joined by a separator
pub fn join_member_texts(members: &[&Event], separator: &str, max_chars: usize) -> String {
    let parts: Vec<String> = members
        .iter()
        .filter_map(|member| {
            member.narration.as_ref().and_then(|n| {
                n.pick(&[TextVariant::Short, TextVariant::Medium, TextVariant::Long])
            })
        })
        .collect();
    truncate_chars(&parts.join(separator), max_chars)
}

/// Summarizer that only joins member texts
#[derive(Debug, Clone)]
pub struct JoinSummarizer {
    separator: String,
    max_chars: usize,
}

impl JoinSummarizer {
    pub fn new(config: &CompressorConfig) -> Self {
        Self {
            separator: config.separator.clone(),
            max_chars: config.fallback_max_chars,
        }
    }
}

#[async_trait]
impl Summarizer for JoinSummarizer {
    async fn summarize(&self, _category: SourceCategory, members: &[&Event]) -> Result<String> {
        Ok(join_member_texts(members, &self.separator, self.max_chars))
    }
}

/// Summarizer backed by the text-generation collaborator
///
/// With a cache attached, summaries are stored under the synthesized
/// cluster fingerprint and reused on later runs.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    prompts: PromptBuilder,
    config: GeneratorConfig,
    caches: HashMap<SourceCategory, Arc<dyn GenerationCache>>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, prompts: PromptBuilder, config: GeneratorConfig) -> Self {
        Self {
            provider,
            prompts,
            config,
            caches: HashMap::new(),
        }
    }

    /// Persist summaries of `category` clusters in `cache`
    pub fn with_cache(mut self, category: SourceCategory, cache: Arc<dyn GenerationCache>) -> Self {
        self.caches.insert(category, cache);
        self
    }

    async fn request(&self, category: SourceCategory, members: &[&Event]) -> Result<String> {
        let messages = self.prompts.build_cluster(category, members);
        let call_config = LlmCallConfig::from(&self.config);
        let retry = &self.config.retry;

        let mut attempt = 1;
        loop {
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            let call = self.provider.chat_completion(messages.clone(), &call_config);
            let err = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(Ok(response)) => {
                    let summary = sanitize_text(response.text.lines().next().unwrap_or_default());
                    if !summary.is_empty() {
                        return Ok(summary);
                    }
                    CastlineError::llm("empty summary")
                }
                Ok(Err(err)) => err,
                Err(_) => CastlineError::Timeout(self.config.call_timeout),
            };
            if !err.is_retryable() || !retry.has_attempts_remaining(attempt) {
                return Err(err);
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, category: SourceCategory, members: &[&Event]) -> Result<String> {
        let round_number = members.first().map(|m| m.round_number).unwrap_or_default();
        let fingerprint =
            Fingerprint::for_cluster(round_number, category, members.iter().map(|m| &m.fingerprint));
        let cache = self.caches.get(&category);

        if let Some(cache) = cache {
            if let Some(entry) = cache.lookup(&fingerprint).await {
                if !entry.medium_text.is_empty() {
                    return Ok(entry.medium_text);
                }
            }
        }

        let summary = self.request(category, members).await?;

        if let Some(cache) = cache {
            let entry = GenerationCacheEntry {
                fingerprint,
                source_category: category,
                round_number,
                priority: members.first().map(|m| m.priority).unwrap_or_default(),
                short_text: summary.clone(),
                medium_text: summary.clone(),
                long_text: summary.clone(),
                origin: CacheOrigin::Generated,
                generated_at: Utc::now(),
            };
            cache.append(entry).await?;
        }
        Ok(summary)
    }
}

/// Merges bursty same-category events
#[derive(Debug, Clone)]
pub struct ClusterCompressor {
    config: CompressorConfig,
    half_boundary: u32,
}

impl ClusterCompressor {
    pub fn new(config: CompressorConfig, half_boundary: u32) -> Self {
        Self {
            config,
            half_boundary,
        }
    }

    /// Replace every burst of eligible events with one synthesized event
    ///
    /// A cluster takes the position of its first member in the output;
    /// everything else keeps its input order.
    pub async fn compress(&self, events: Vec<Event>, summarizer: &dyn Summarizer) -> Vec<Event> {
        let clusters = self.plan_clusters(&events);

        let mut replaced: HashMap<usize, Event> = HashMap::new();
        let mut absorbed = vec![false; events.len()];
        let mut merged = 0;

        for members in clusters.iter().filter(|members| members.len() >= 2) {
            let refs: Vec<&Event> = members.iter().map(|&i| &events[i]).collect();
            let synthesized = self.synthesize(&refs, summarizer).await;
            for &i in &members[1..] {
                absorbed[i] = true;
            }
            merged += members.len();
            replaced.insert(members[0], synthesized);
        }

        let total = events.len();
        let output: Vec<Event> = events
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !absorbed[*i])
            .map(|(i, event)| replaced.remove(&i).unwrap_or(event))
            .collect();

        info!(
            input = total,
            output = output.len(),
            merged_events = merged,
            "Compressed event bursts"
        );
        output
    }

    /// Group indices of eligible events into clusters, in canonical order
    fn plan_clusters(&self, events: &[Event]) -> Vec<Vec<usize>> {
        let mut by_stream: BTreeMap<(SourceCategory, Half, u32), Vec<usize>> = BTreeMap::new();
        for (i, event) in events.iter().enumerate() {
            if self.config.is_eligible(event.category) {
                by_stream
                    .entry((event.category, event.half(self.half_boundary), event.round_number))
                    .or_default()
                    .push(i);
            }
        }

        let mut clusters = Vec::new();
        for (_, mut indices) in by_stream {
            indices.sort_by(|&a, &b| {
                canonical(&events[a])
                    .total_cmp(&canonical(&events[b]))
                    .then_with(|| events[a].fingerprint.cmp(&events[b].fingerprint))
            });

            let mut current: Vec<usize> = Vec::new();
            for i in indices {
                let joins = match current.last() {
                    Some(&last) => {
                        canonical(&events[i]) - canonical(&events[last]) < self.config.merge_window_secs
                            && current.len() < self.config.max_cluster_size
                    }
                    None => false,
                };
                if !joins && !current.is_empty() {
                    clusters.push(std::mem::take(&mut current));
                }
                current.push(i);
            }
            if !current.is_empty() {
                clusters.push(current);
            }
        }
        clusters
    }

    async fn synthesize(&self, members: &[&Event], summarizer: &dyn Summarizer) -> Event {
        let first = members[0];
        let last = members[members.len() - 1];
        let category = first.category;
        let fallback = join_member_texts(members, &self.config.separator, self.config.fallback_max_chars);

        let summary = match summarizer.summarize(category, members).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => fallback.clone(),
            Err(err) => {
                warn!(
                    category = %category,
                    round = first.round_number,
                    error = %err,
                    "Summarizer failed, joining member texts"
                );
                fallback.clone()
            }
        };

        let fingerprint = Fingerprint::for_cluster(
            first.round_number,
            category,
            members.iter().map(|m| &m.fingerprint),
        );
        debug!(fingerprint = %fingerprint, members = members.len(), "Synthesized cluster");

        let mut attributes = first.attributes.clone();
        attributes.insert("cluster_size".to_string(), members.len().to_string());
        attributes.insert(
            "cluster_members".to_string(),
            members
                .iter()
                .map(|m| m.fingerprint.as_str())
                .collect::<Vec<_>>()
                .join(","),
        );

        Event {
            fingerprint,
            category,
            round_number: first.round_number,
            native_timestamp: first.native_timestamp,
            priority: first.priority,
            narration: Some(Narration::new(fallback, summary.clone(), summary)),
            canonical_time: first.canonical_time,
            span_secs: canonical(last) - canonical(first),
            attributes,
        }
    }
}

fn canonical(event: &Event) -> f64 {
    event.canonical_time.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NativeTimestamp, RawEvent};
    use crate::memory::{InMemoryGenerationCache, MockLlmProvider, MockLlmResponse};
    use crate::retry::RetryPolicy;

    fn timed(category: SourceCategory, entity: &str, round: u32, t: f64) -> Event {
        let mut event = Event::from_raw(
            category,
            RawEvent::new(entity, round, NativeTimestamp::Seconds(t), 6),
        );
        event.canonical_time = Some(t);
        event.narration = Some(Narration::new(
            format!("{} short", entity),
            format!("{} medium", entity),
            format!("{} long", entity),
        ));
        event
    }

    fn compressor() -> ClusterCompressor {
        ClusterCompressor::new(CompressorConfig::default(), 13)
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _category: SourceCategory, _members: &[&Event]) -> Result<String> {
            Err(CastlineError::llm("unavailable"))
        }
    }

    #[tokio::test]
    async fn test_burst_of_three_then_new_cluster() {
        let events = vec![
            timed(SourceCategory::Kill, "a", 1, 0.0),
            timed(SourceCategory::Kill, "b", 1, 1.0),
            timed(SourceCategory::Kill, "c", 1, 2.0),
            timed(SourceCategory::Kill, "d", 1, 3.0),
        ];
        let summarizer = JoinSummarizer::new(&CompressorConfig::default());
        let output = compressor().compress(events, &summarizer).await;

        assert_eq!(output.len(), 2);
        let cluster = &output[0];
        assert_eq!(cluster.canonical_time, Some(0.0));
        assert_eq!(cluster.span_secs, 2.0);
        assert_eq!(cluster.attribute("cluster_size"), Some("3"));
        assert!(cluster.fingerprint.as_str().starts_with("1_kill_cluster_"));
        assert_eq!(output[1].canonical_time, Some(3.0));
        assert_eq!(output[1].span_secs, 0.0);
    }

    #[tokio::test]
    async fn test_gap_above_window_splits() {
        let events = vec![
            timed(SourceCategory::Kill, "a", 1, 0.0),
            timed(SourceCategory::Kill, "b", 1, 5.0),
        ];
        let summarizer = JoinSummarizer::new(&CompressorConfig::default());
        let output = compressor().compress(events.clone(), &summarizer).await;
        assert_eq!(output, events);
    }

    #[tokio::test]
    async fn test_ineligible_categories_untouched() {
        let events = vec![
            timed(SourceCategory::Utility, "u1", 1, 1.0),
            timed(SourceCategory::Kill, "a", 1, 0.5),
            timed(SourceCategory::Utility, "u2", 1, 1.2),
            timed(SourceCategory::Kill, "b", 1, 0.8),
        ];
        let summarizer = JoinSummarizer::new(&CompressorConfig::default());
        let output = compressor().compress(events.clone(), &summarizer).await;

        assert_eq!(output.len(), 3);
        assert_eq!(output[0], events[0]);
        assert!(output[1].fingerprint.as_str().contains("cluster"));
        assert_eq!(output[2], events[2]);
    }

    #[tokio::test]
    async fn test_rounds_do_not_merge() {
        let events = vec![
            timed(SourceCategory::Kill, "a", 1, 99.0),
            timed(SourceCategory::Kill, "b", 2, 100.0),
        ];
        let summarizer = JoinSummarizer::new(&CompressorConfig::default());
        let output = compressor().compress(events, &summarizer).await;
        assert_eq!(output.len(), 2);
    }

    #[tokio::test]
    async fn test_summarizer_failure_falls_back_to_join() {
        let events = vec![
            timed(SourceCategory::Kill, "a", 1, 0.0),
            timed(SourceCategory::Kill, "b", 1, 1.0),
        ];
        let output = compressor().compress(events, &FailingSummarizer).await;
        let narration = output[0].narration.as_ref().unwrap();
        assert_eq!(narration.medium, "a short; b short");
    }

    #[test]
    fn test_join_truncates() {
        let a = timed(SourceCategory::Kill, &"x".repeat(40), 1, 0.0);
        let b = timed(SourceCategory::Kill, &"y".repeat(40), 1, 1.0);
        let joined = join_member_texts(&[&a, &b], " / ", 60);
        assert_eq!(joined.chars().count(), 60);
    }

    #[tokio::test]
    async fn test_llm_summarizer_caches_summary() {
        let provider = Arc::new(
            MockLlmProvider::new()
                .with_default_response(MockLlmResponse::text("Triple kill on B site")),
        );
        let cache = Arc::new(InMemoryGenerationCache::new());
        let config = GeneratorConfig::default().with_retry(RetryPolicy::no_retry());
        let summarizer = LlmSummarizer::new(provider.clone(), PromptBuilder::new(13), config)
            .with_cache(SourceCategory::Kill, cache.clone());

        let a = timed(SourceCategory::Kill, "a", 1, 0.0);
        let b = timed(SourceCategory::Kill, "b", 1, 1.0);
        let first = summarizer.summarize(SourceCategory::Kill, &[&a, &b]).await.unwrap();
        let second = summarizer.summarize(SourceCategory::Kill, &[&a, &b]).await.unwrap();

        assert_eq!(first, "Triple kill on B site");
        assert_eq!(second, first);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(cache.len().await, 1);
    }
}
