//! DeepSeek provider (OpenAI-compatible chat completions).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::error::AiError;
use super::provider::{
    ChatMessage, ChatModel, ChatResponse, ChatRole, GenerateOptions, TokenUsage, ToolCall,
};

/// DeepSeek API base (beta endpoint supports JSON output and tools)
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/beta";

const PROVIDER: &str = "deepseek";

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    model: String,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

fn function_type() -> String {
    "function".to_string()
}

/// DeepSeek chat provider.
pub struct DeepSeekProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl DeepSeekProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|source| AiError::Http {
                provider: PROVIDER,
                source,
            })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    /// Set a custom base URL (proxies, other OpenAI-compatible endpoints).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|msg| WireMessage {
                role: match msg.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                },
                content: if msg.content.is_empty() && !msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(msg.content.clone())
                },
                tool_calls: msg
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        call_type: function_type(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: match &call.arguments {
                                Value::String(raw) => raw.clone(),
                                other => other.to_string(),
                            },
                        },
                    })
                    .collect(),
                tool_call_id: msg.tool_call_id.clone(),
            })
            .collect()
    }

    fn build_request(&self, messages: &[ChatMessage], options: &GenerateOptions) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: options.response_schema.as_ref().map(|_| ResponseFormat {
                format_type: "json_object",
            }),
            tools: options
                .tools
                .iter()
                .map(|tool| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ChatModel for DeepSeekProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<ChatResponse, AiError> {
        let request = self.build_request(messages, options);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = messages.len(), tools = options.tools.len(), "Calling DeepSeek");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| AiError::Http {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| AiError::Http {
            provider: PROVIDER,
            source,
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map_or(body, |parsed| parsed.error.message);
            return Err(AiError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletion =
            serde_json::from_str(&body).map_err(|e| AiError::Parse {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(AiError::Empty(PROVIDER))?;

        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        let usage = completion.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ChatResponse {
            text: message.content.unwrap_or_default(),
            tool_calls,
            usage,
            model: if completion.model.is_empty() {
                self.model.clone()
            } else {
                completion.model
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::ToolSpec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> DeepSeekProvider {
        DeepSeekProvider::new("sk-test", "deepseek-chat")
            .unwrap()
            .with_base_url(server.uri())
    }

    #[test]
    fn test_message_conversion() {
        let call = ToolCall {
            id: "call_0".to_string(),
            name: "kubectl_patch".to_string(),
            arguments: json!({"name": "web"}),
        };
        let messages = vec![
            ChatMessage::system("You are an SRE"),
            ChatMessage::user("pod is crashing"),
            ChatMessage::assistant_with_tools("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "{\"success\":true}"),
        ];

        let converted = DeepSeekProvider::convert_messages(&messages);

        assert_eq!(converted.len(), 4);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[2].role, "assistant");
        assert!(converted[2].content.is_none());
        assert_eq!(converted[2].tool_calls[0].function.arguments, "{\"name\":\"web\"}");
        assert_eq!(converted[3].role, "tool");
        assert_eq!(converted[3].tool_call_id.as_deref(), Some("call_0"));
    }

    #[tokio::test]
    async fn test_json_mode_and_text_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "deepseek-chat",
                "max_tokens": 2000,
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "deepseek-chat",
                "choices": [{"message": {"content": "{\"option\":\"Finish\"}"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let options = GenerateOptions::with_max_tokens(2000).schema(Some(json!({"type": "object"})));
        let response = provider(&server)
            .generate(&[ChatMessage::user("triage")], &options)
            .await
            .unwrap();

        assert_eq!(response.text, "{\"option\":\"Finish\"}");
        assert_eq!(response.usage.total_tokens, 15);
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_tool_calls_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "tools": [{"type": "function", "function": {"name": "kubectl_patch"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "deepseek-chat",
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "kubectl_patch", "arguments": "{\"kind\":\"Deployment\"}"}
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let options = GenerateOptions::default().tools(vec![ToolSpec {
            name: "kubectl_patch".to_string(),
            description: "patch".to_string(),
            parameters: json!({"type": "object"}),
        }]);
        let response = provider(&server)
            .generate(&[ChatMessage::user("fix it")], &options)
            .await
            .unwrap();

        assert_eq!(response.text, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].arguments["kind"], "Deployment");
    }

    #[tokio::test]
    async fn test_api_error_message_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Authentication Fails", "type": "authentication_error"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .generate(&[ChatMessage::user("hi")], &GenerateOptions::default())
            .await
            .unwrap_err();

        match err {
            AiError::Api { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Authentication Fails");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
