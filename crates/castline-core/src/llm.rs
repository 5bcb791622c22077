// Text-generation collaborator types
//
// Provider-agnostic request/response types. The core never depends on a
// transport; concrete providers live in their own crates.

use async_trait::async_trait;

use crate::config::GeneratorConfig;
use crate::error::Result;

// ============================================================================
// LlmProvider Trait
// ============================================================================

/// Trait for text-generation providers
///
/// Implementations handle provider-specific API calls and response parsing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Call the model and return the full reply
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse>;
}

// ============================================================================
// Message Types
// ============================================================================

/// Message for a generation call
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmMessageRole::User,
            content: content.into(),
        }
    }
}

/// Message role for generation calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
}

impl LlmMessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
        }
    }
}

// ============================================================================
// Configuration and Response Types
// ============================================================================

/// Configuration for a single generation call
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCallConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object reply
    pub json_response: bool,
}

impl From<&GeneratorConfig> for LlmCallConfig {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_response: false,
        }
    }
}

impl LlmCallConfig {
    pub fn with_json_response(mut self, json_response: bool) -> Self {
        self.json_response = json_response;
        self
    }
}

/// Metadata about a completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletionMetadata {
    pub total_tokens: Option<u32>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// Reply from a generation call
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub metadata: LlmCompletionMetadata,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: LlmCompletionMetadata::default(),
        }
    }
}
