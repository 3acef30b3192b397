//! Chat model trait and common types.
//!
//! Defines the interface every chat-completion backend implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AiError;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System message (sets context/behavior)
    System,
    /// User message (input)
    User,
    /// Assistant message (model output, possibly with tool calls)
    Assistant,
    /// Result of a tool call, answering an earlier assistant message
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result
    pub id: String,
    /// Name of the tool
    pub name: String,
    /// Arguments as decoded JSON (a raw string when the model sent invalid JSON)
    pub arguments: Value,
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A message in a conversation with a chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: ChatRole,
    /// Content of the message
    pub content: String,
    /// Tool calls carried by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call id a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content)
        }
    }

    /// Observation answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            ..Self::plain(ChatRole::Tool, content)
        }
    }
}

/// Token usage information from a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Response from a chat model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text content
    pub text: String,
    /// Tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information
    #[serde(default)]
    pub usage: TokenUsage,
    /// Model that generated the response
    pub model: String,
}

/// Options for one generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// JSON schema the answer must follow; enables the provider's JSON mode
    pub response_schema: Option<Value>,
    /// Tools offered to the model
    pub tools: Vec<ToolSpec>,
}

impl GenerateOptions {
    #[must_use]
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: Option<Value>) -> Self {
        self.response_schema = schema;
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Same options with no tools offered.
    #[must_use]
    pub fn without_tools(&self) -> Self {
        Self {
            tools: Vec::new(),
            ..self.clone()
        }
    }
}

/// A chat-completion backend.
///
/// Implementations are immutable after construction and shared behind
/// `Arc<dyn ChatModel>` between concurrent invocations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider name (e.g. "deepseek", "gemini").
    fn name(&self) -> &'static str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Generate one response from an ordered message list.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<ChatResponse, AiError>;
}

/// Strip a surrounding markdown code fence, if any.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    // Sometimes the model wraps JSON in markdown code blocks
    if let Some(rest) = text.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = text.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        text
    }
}

/// Decode structured output from a response text.
pub fn parse_json_response<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, AiError> {
    let json_text = strip_code_fence(text);
    serde_json::from_str(json_text).map_err(|e| AiError::Structured(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Answer {
        option: String,
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_json_response() {
        let answer: Answer = parse_json_response("```json\n{\"option\":\"Finish\"}\n```").unwrap();
        assert_eq!(answer.option, "Finish");
        assert!(parse_json_response::<Answer>("route to Finish").is_err());
    }

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "kubectl_patch".to_string(),
            arguments: serde_json::json!({}),
        };
        let msg = ChatMessage::tool_result(&call, "{\"success\":true}");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("kubectl_patch"));
    }

    #[test]
    fn test_without_tools_keeps_limits() {
        let options = GenerateOptions::with_max_tokens(2000).tools(vec![ToolSpec {
            name: "t".to_string(),
            description: String::new(),
            parameters: serde_json::json!({}),
        }]);
        let plain = options.without_tools();
        assert!(plain.tools.is_empty());
        assert_eq!(plain.max_tokens, Some(2000));
    }
}
