// Match Commentary Timeline
//
// This crate reconciles independently produced streams of timestamped match
// events into one ordered, non-overlapping commentary timeline.
//
// Key design decisions:
// - Collaborators (text generation, event providers, caches, summarizers) are traits
// - Generation is cached per source and resumable; a cached fingerprint is never regenerated
// - Generation failures resolve to template narration, never to a failed run
// - Canonical time is per half: the clock restarts at the half-boundary round
// - Scheduling is a deterministic greedy pass with configurable thresholds

// Data model
pub mod event;
pub mod source;

pub mod cache;
pub mod compressor;
pub mod config;
pub mod error;
pub mod generator;
pub mod llm;
pub mod normalizer;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod scheduler;

// In-memory implementations for offline runs and testing
pub mod memory;

// Re-exports for convenience
pub use cache::{
    AppendOutcome, CacheLoadReport, CacheOrigin, FileCacheFactory, FileGenerationCache,
    GenerationCache, GenerationCacheEntry, GenerationCacheFactory,
};
pub use compressor::{ClusterCompressor, JoinSummarizer, LlmSummarizer, Summarizer};
pub use config::{CompressorConfig, GeneratorConfig, PipelineConfig, SchedulerConfig};
pub use error::{CastlineError, Result};
pub use event::{
    Event, Fingerprint, Half, Narration, NativeTimestamp, RawEvent, SourceCategory, TextVariant,
    TimeEncoding,
};
pub use generator::{attach_narration, ConcurrentGenerator, GenerationReport};
pub use llm::{
    LlmCallConfig, LlmCompletionMetadata, LlmMessage, LlmMessageRole, LlmProvider, LlmResponse,
};
pub use normalizer::TimeNormalizer;
pub use output::{write_schedule, write_schedule_csv, write_schedule_json};
pub use pipeline::{CommentaryPipeline, PipelineOutput};
pub use prompt::{parse_reply, PromptBuilder, ReplyFormat};
pub use retry::RetryPolicy;
pub use scheduler::{DropReason, DropRecord, Schedule, Scheduler, Slot};
pub use source::{EventSource, RawEventProvider, RoundTable, RoundTiming, StaticEventProvider};
