// OpenAI Provider
//
// This crate provides the text-generation provider used for narration. It
// implements the LlmProvider trait from castline-core against the OpenAI
// chat completions protocol, which DashScope and most self-hosted servers
// also speak.

mod provider;
mod types;


pub use provider::{OpenAiProvider, DASHSCOPE_BASE_URL, OPENAI_BASE_URL};
pub use types::{ChatRequest, OpenAiMessage, ResponseFormat};

// Re-export core types for convenience
pub use castline_core::LlmProvider;
