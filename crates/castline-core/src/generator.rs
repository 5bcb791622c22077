// Concurrent Generator
//
// Drives the text-generation collaborator over the events of one source that
// are not cached yet. At most `workers` calls run at once; every finished
// task (generated or fallback) is appended to the cache before it counts as
// done. Shutdown is cooperative: no new task starts, no further retry is
// attempted, but an attempt already in progress is still persisted.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::cache::{AppendOutcome, CacheOrigin, GenerationCache, GenerationCacheEntry};
use crate::config::GeneratorConfig;
use crate::error::{CastlineError, Result};
use crate::event::{Event, Fingerprint, Narration, SourceCategory};
use crate::llm::{LlmCallConfig, LlmProvider};
use crate::prompt::{parse_reply, PromptBuilder, ReplyFormat};

/// Counts of what one `generate` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    /// Events handed to the generator
    pub total: usize,
    /// Already present in the cache
    pub cached: usize,
    /// Generated from a parsed reply
    pub generated: usize,
    /// Resolved through the template narration
    pub fallback: usize,
    /// Same fingerprint already submitted during this run
    pub skipped_duplicates: usize,
    /// Not started because shutdown was requested
    pub cancelled: usize,
}

/// Bounded-concurrency narration generator for one source cache
pub struct ConcurrentGenerator {
    provider: Option<Arc<dyn LlmProvider>>,
    cache: Arc<dyn GenerationCache>,
    config: GeneratorConfig,
    prompts: PromptBuilder,
    in_flight: Arc<parking_lot::Mutex<HashSet<Fingerprint>>>,
}

struct WorkerContext {
    provider: Option<Arc<dyn LlmProvider>>,
    cache: Arc<dyn GenerationCache>,
    config: GeneratorConfig,
    prompts: PromptBuilder,
}

impl ConcurrentGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache: Arc<dyn GenerationCache>,
        config: GeneratorConfig,
        half_boundary_round: u32,
    ) -> Self {
        Self {
            provider: Some(provider),
            cache,
            config,
            prompts: PromptBuilder::new(half_boundary_round),
            in_flight: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        }
    }

    /// Generator that never calls a provider; every task uses its template
    pub fn offline(
        cache: Arc<dyn GenerationCache>,
        config: GeneratorConfig,
        half_boundary_round: u32,
    ) -> Self {
        Self {
            provider: None,
            cache,
            config,
            prompts: PromptBuilder::new(half_boundary_round),
            in_flight: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn cache(&self) -> &Arc<dyn GenerationCache> {
        &self.cache
    }

    /// Generate narration for every uncached event of `category`
    #[instrument(skip(self, events, shutdown), fields(category = %category))]
    pub async fn generate(
        &self,
        category: SourceCategory,
        events: &[Event],
        shutdown: watch::Receiver<bool>,
    ) -> Result<GenerationReport> {
        let mut report = GenerationReport {
            total: events.len(),
            ..Default::default()
        };

        let mut tasks = Vec::new();
        for event in events {
            if self.cache.lookup(&event.fingerprint).await.is_some() {
                report.cached += 1;
                continue;
            }
            if !self.in_flight.lock().insert(event.fingerprint.clone()) {
                report.skipped_duplicates += 1;
                continue;
            }
            tasks.push(event.clone());
        }

        info!(
            total = report.total,
            cached = report.cached,
            tasks = tasks.len(),
            workers = self.config.workers,
            "Starting generation"
        );

        let context = Arc::new(WorkerContext {
            provider: self.provider.clone(),
            cache: self.cache.clone(),
            config: self.config.clone(),
            prompts: self.prompts.clone(),
        });
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut join_set = JoinSet::new();
        let mut pending = tasks.into_iter();
        let mut stop = shutdown.clone();

        while let Some(event) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut stop) => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                let mut in_flight = self.in_flight.lock();
                in_flight.remove(&event.fingerprint);
                report.cancelled += 1;
                for rest in pending.by_ref() {
                    in_flight.remove(&rest.fingerprint);
                    report.cancelled += 1;
                }
                warn!(cancelled = report.cancelled, "Shutdown requested, not starting remaining tasks");
                break;
            };

            let context = context.clone();
            let in_flight = self.in_flight.clone();
            let worker_shutdown = shutdown.clone();
            join_set.spawn(async move {
                let fingerprint = event.fingerprint.clone();
                let outcome = generate_one(&context, event, worker_shutdown).await;
                in_flight.lock().remove(&fingerprint);
                drop(permit);
                outcome
            });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            let outcome = joined
                .map_err(|err| CastlineError::Internal(anyhow::anyhow!("generation task failed: {}", err)))
                .and_then(|outcome| outcome);
            match outcome {
                Ok(CacheOrigin::Generated) => report.generated += 1,
                Ok(CacheOrigin::Fallback) => report.fallback += 1,
                Err(err) => {
                    warn!(error = %err, "Generation task could not persist its result");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!(
            generated = report.generated,
            fallback = report.fallback,
            cached = report.cached,
            skipped_duplicates = report.skipped_duplicates,
            cancelled = report.cancelled,
            "Generation finished"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

/// Run one task to completion and persist its result
async fn generate_one(
    context: &WorkerContext,
    event: Event,
    mut shutdown: watch::Receiver<bool>,
) -> Result<CacheOrigin> {
    let fallback = context.prompts.fallback_narration(&event);

    let (narration, origin) = if context.prompts.is_silent(&event) {
        debug!(fingerprint = %event.fingerprint, "Nothing to narrate for this event");
        (Narration::default(), CacheOrigin::Fallback)
    } else {
        match &context.provider {
            Some(provider) => {
                match request_narration(context, provider.as_ref(), &event, &mut shutdown).await {
                    Some(narration) => (narration.fill_missing(&fallback), CacheOrigin::Generated),
                    None => (fallback, CacheOrigin::Fallback),
                }
            }
            None => (fallback, CacheOrigin::Fallback),
        }
    };

    let entry = GenerationCacheEntry::new(&event, narration, origin);
    if context.cache.append(entry).await? == AppendOutcome::AlreadyPresent {
        debug!(fingerprint = %event.fingerprint, "Entry appeared while generating, kept existing");
    }
    Ok(origin)
}

/// Call the provider with retries; `None` once attempts are exhausted
async fn request_narration(
    context: &WorkerContext,
    provider: &dyn LlmProvider,
    event: &Event,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Narration> {
    let retry = &context.config.retry;
    let format = ReplyFormat::for_category(event.category);
    let call_config =
        LlmCallConfig::from(&context.config).with_json_response(format == ReplyFormat::Json);
    let messages = context.prompts.build(event);

    let mut attempt = 1;
    loop {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    debug!(fingerprint = %event.fingerprint, "Shutdown during backoff, giving up");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let call = provider.chat_completion(messages.clone(), &call_config);
        let retryable = match tokio::time::timeout(context.config.call_timeout, call).await {
            Ok(Ok(response)) => match parse_reply(&response.text, format) {
                Some(narration) => return Some(narration),
                None => {
                    warn!(fingerprint = %event.fingerprint, attempt, "Malformed generation reply");
                    true
                }
            },
            Ok(Err(err)) => {
                warn!(fingerprint = %event.fingerprint, attempt, error = %err, "Generation call failed");
                err.is_retryable()
            }
            Err(_) => {
                warn!(
                    fingerprint = %event.fingerprint,
                    attempt,
                    timeout = ?context.config.call_timeout,
                    "Generation call timed out"
                );
                true
            }
        };

        if !retryable || !retry.has_attempts_remaining(attempt) || *shutdown.borrow() {
            warn!(
                fingerprint = %event.fingerprint,
                attempts = attempt,
                "Retries exhausted, using template narration"
            );
            return None;
        }
        attempt += 1;
    }
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Fill each event's narration from the cache
///
/// Events without an entry, or whose entry holds no text, are dropped.
pub async fn attach_narration(events: Vec<Event>, cache: &dyn GenerationCache) -> Vec<Event> {
    let mut attached = Vec::with_capacity(events.len());
    for mut event in events {
        match cache.lookup(&event.fingerprint).await {
            Some(entry) if !entry.is_empty() => {
                event.narration = Some(entry.narration());
                attached.push(event);
            }
            Some(_) => {
                debug!(fingerprint = %event.fingerprint, "Dropping event with empty narration");
            }
            None => {
                debug!(fingerprint = %event.fingerprint, "Dropping event without generated narration");
            }
        }
    }
    attached
}
