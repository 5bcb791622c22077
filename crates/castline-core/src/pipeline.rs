// Commentary pipeline
//
// Phase A, per source: fetch -> adapt -> generate (bounded pool) -> attach
// narration from the cache. Phase B, once every source finished Phase A:
// normalize -> compress -> schedule, sequential and deterministic.

use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::cache::{GenerationCache, GenerationCacheFactory};
use crate::compressor::{ClusterCompressor, JoinSummarizer, LlmSummarizer, Summarizer};
use crate::config::PipelineConfig;
use crate::error::{CastlineError, Result};
use crate::event::{Event, SourceCategory};
use crate::generator::{attach_narration, ConcurrentGenerator, GenerationReport};
use crate::llm::LlmProvider;
use crate::normalizer::TimeNormalizer;
use crate::prompt::PromptBuilder;
use crate::scheduler::{Schedule, Scheduler};
use crate::source::{EventSource, RawEventProvider, RoundTable};

/// Everything a run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutput {
    pub schedule: Schedule,
    pub generation: Vec<(SourceCategory, GenerationReport)>,
    /// Sources whose provider could not produce data
    pub unavailable: Vec<SourceCategory>,
}

/// Turns raw event sources into one commentary timeline
pub struct CommentaryPipeline {
    config: PipelineConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    caches: Arc<dyn GenerationCacheFactory>,
    prompts: PromptBuilder,
}

impl CommentaryPipeline {
    /// Pipeline generating through `provider`; `None` runs on templates only
    pub fn new(
        config: PipelineConfig,
        provider: Option<Arc<dyn LlmProvider>>,
        caches: Arc<dyn GenerationCacheFactory>,
    ) -> Self {
        let prompts = PromptBuilder::new(config.half_boundary_round);
        Self {
            config,
            provider,
            caches,
            prompts,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[instrument(skip_all, fields(sources = sources.len(), rounds = rounds.len()))]
    pub async fn run(
        &self,
        sources: Vec<Box<dyn RawEventProvider>>,
        rounds: &RoundTable,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineOutput> {
        self.config.validate()?;

        let mut output = PipelineOutput::default();
        let mut events: Vec<Event> = Vec::new();
        let mut caches: HashMap<SourceCategory, Arc<dyn GenerationCache>> = HashMap::new();

        let fetched = join_all(
            sources
                .iter()
                .map(|source| async move { (source.category(), source.fetch().await) }),
        )
        .await;

        for (category, fetched) in fetched {
            let raw = match fetched {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(category = %category, error = %err, "Source unavailable, continuing without it");
                    output.unavailable.push(category);
                    continue;
                }
            };

            let adapted = EventSource::adapt(category, raw, &self.config);
            let cache = self.caches.open(category).await?;
            let boundary = self.config.half_boundary_round;
            let generator = match &self.provider {
                Some(provider) => {
                    ConcurrentGenerator::new(provider.clone(), cache.clone(), self.config.generator.clone(), boundary)
                }
                None => ConcurrentGenerator::offline(cache.clone(), self.config.generator.clone(), boundary),
            }
            .with_prompts(self.prompts.clone());

            match generator.generate(category, &adapted.events, shutdown.clone()).await {
                Ok(report) => output.generation.push((category, report)),
                Err(err) => {
                    warn!(category = %category, error = %err, "Generation incomplete, scheduling cached narration only")
                }
            }

            if *shutdown.borrow() {
                return Err(CastlineError::Cancelled);
            }

            let attached = attach_narration(adapted.events, cache.as_ref()).await;
            info!(category = %category, events = attached.len(), "Source ready for scheduling");
            events.extend(attached);
            caches.insert(category, cache);
        }

        // Phase B
        let normalizer = TimeNormalizer::new(rounds, self.config.half_boundary_round, self.config.tickrate);
        normalizer.normalize(&mut events);

        let summarizer = self.summarizer(&caches);
        let compressor = ClusterCompressor::new(self.config.compressor.clone(), self.config.half_boundary_round);
        let compressed = compressor.compress(events, summarizer.as_ref()).await;

        let scheduler = Scheduler::new(self.config.scheduler.clone(), self.config.half_boundary_round);
        output.schedule = scheduler.schedule(&compressed);

        info!(
            slots = output.schedule.slot_count(),
            dropped = output.schedule.dropped.len(),
            unavailable = output.unavailable.len(),
            "Pipeline finished"
        );
        Ok(output)
    }

    fn summarizer(&self, caches: &HashMap<SourceCategory, Arc<dyn GenerationCache>>) -> Box<dyn Summarizer> {
        match &self.provider {
            Some(provider) => {
                let mut summarizer = LlmSummarizer::new(
                    provider.clone(),
                    self.prompts.clone(),
                    self.config.generator.clone(),
                );
                for category in &self.config.compressor.eligible_categories {
                    if let Some(cache) = caches.get(category) {
                        summarizer = summarizer.with_cache(*category, cache.clone());
                    }
                }
                Box::new(summarizer)
            }
            None => Box::new(JoinSummarizer::new(&self.config.compressor)),
        }
    }
}
