// In-memory implementations for tests and offline runs
//
// These keep all data in memory:
// - InMemoryGenerationCache / InMemoryCacheFactory stand in for the JSONL store
// - MockLlmProvider scripts generation replies and records every call

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::cache::{AppendOutcome, GenerationCache, GenerationCacheEntry, GenerationCacheFactory};
use crate::error::{CastlineError, Result};
use crate::event::{Fingerprint, SourceCategory};
use crate::llm::{LlmCallConfig, LlmMessage, LlmProvider, LlmResponse};

// ============================================================================
// InMemoryGenerationCache
// ============================================================================

/// In-memory generation cache
#[derive(Debug, Default, Clone)]
pub struct InMemoryGenerationCache {
    entries: Arc<RwLock<HashMap<Fingerprint, GenerationCacheEntry>>>,
    appends: Arc<AtomicUsize>,
}

impl InMemoryGenerationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with entries (useful for testing resumption)
    pub async fn seed(&self, entries: impl IntoIterator<Item = GenerationCacheEntry>) {
        let mut map = self.entries.write().await;
        for entry in entries {
            map.entry(entry.fingerprint.clone()).or_insert(entry);
        }
    }

    /// All stored entries
    pub async fn entries(&self) -> Vec<GenerationCacheEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Number of append calls that inserted a row
    pub fn insert_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationCache for InMemoryGenerationCache {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<GenerationCacheEntry> {
        self.entries.read().await.get(fingerprint).cloned()
    }

    async fn append(&self, entry: GenerationCacheEntry) -> Result<AppendOutcome> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.fingerprint) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        entries.insert(entry.fingerprint.clone(), entry);
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(AppendOutcome::Inserted)
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Hands out one shared in-memory cache per category
///
/// Opening the same category twice returns the same cache, so a second
/// pipeline run over the factory observes the first run's results.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCacheFactory {
    caches: Arc<RwLock<HashMap<SourceCategory, InMemoryGenerationCache>>>,
}

impl InMemoryCacheFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache of `category`, created on first use
    pub async fn cache(&self, category: SourceCategory) -> InMemoryGenerationCache {
        self.caches
            .write()
            .await
            .entry(category)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl GenerationCacheFactory for InMemoryCacheFactory {
    async fn open(&self, category: SourceCategory) -> Result<Arc<dyn GenerationCache>> {
        Ok(Arc::new(self.cache(category).await))
    }
}

// ============================================================================
// MockLlmProvider
// ============================================================================

/// A scripted reply
#[derive(Debug, Clone)]
pub enum MockLlmResponse {
    Text(String),
    /// Fail the call with an LLM error
    Error(String),
    /// Never answer; exercises the call timeout
    Hang,
}

impl MockLlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        MockLlmResponse::Text(text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        MockLlmResponse::Error(message.into())
    }
}

/// Mock text-generation provider
///
/// Returns queued responses in call order, then the default response.
#[derive(Debug)]
pub struct MockLlmProvider {
    responses: RwLock<Vec<MockLlmResponse>>,
    default_response: MockLlmResponse,
    call_index: AtomicUsize,
    call_log: RwLock<Vec<Vec<LlmMessage>>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            responses: RwLock::new(Vec::new()),
            default_response: MockLlmResponse::text(
                "Mock short\n---\nMock medium narration\n---\nMock long narration text",
            ),
            call_index: AtomicUsize::new(0),
            call_log: RwLock::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Response used once the queue is exhausted
    pub fn with_default_response(mut self, response: MockLlmResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Simulated time spent per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add a response to the queue
    pub async fn add_response(&self, response: MockLlmResponse) {
        self.responses.write().await.push(response);
    }

    /// Every call's messages, in call order
    pub async fn calls(&self) -> Vec<Vec<LlmMessage>> {
        self.call_log.read().await.clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_index.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        _config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        self.call_log.write().await.push(messages);
        let index = self.call_index.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .read()
            .await
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            MockLlmResponse::Text(text) => Ok(LlmResponse::text(text)),
            MockLlmResponse::Error(message) => Err(CastlineError::llm(message)),
            MockLlmResponse::Hang => {
                std::future::pending::<()>().await;
                Err(CastlineError::llm("unreachable"))
            }
        }
    }
}
