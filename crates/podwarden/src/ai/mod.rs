//! Chat-completion providers.
//!
//! This module provides:
//! - the [`ChatModel`] capability every stage reasons through
//! - an OpenAI-compatible DeepSeek provider and a Gemini provider
//! - a factory that builds the configured provider with its credentials

pub mod deepseek;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod provider;

pub use deepseek::DeepSeekProvider;
pub use error::AiError;
pub use factory::build_chat_model;
pub use gemini::GeminiProvider;
pub use provider::{
    parse_json_response, strip_code_fence, ChatMessage, ChatModel, ChatResponse, ChatRole,
    GenerateOptions, TokenUsage, ToolCall, ToolSpec,
};
