//! Google Gemini provider (`generateContent`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::error::AiError;
use super::provider::{
    ChatMessage, ChatModel, ChatResponse, ChatRole, GenerateOptions, TokenUsage, ToolCall,
};

/// Gemini API base
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER: &str = "gemini";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
    /// Set on thought summaries when thinking output is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tools {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    include_thoughts: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tools>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

/// Convert a JSON schema into Gemini's OpenAPI subset.
///
/// Type names are upper-cased and `additionalProperties` is dropped.
#[must_use]
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let converted: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| key.as_str() != "additionalProperties")
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(name)) => Value::String(name.to_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

/// Gemini chat provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    thinking: bool,
}

impl GeminiProvider {
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
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            thinking: false,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Request thought summaries from the model.
    #[must_use]
    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    fn build_request(
        messages: &[ChatMessage],
        options: &GenerateOptions,
        thinking: bool,
    ) -> GenerateContentRequest {
        let system_text: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(system_text.join("\n\n")),
                ..Part::default()
            }],
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| match m.role {
                ChatRole::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(Part {
                            text: Some(m.content.clone()),
                            ..Part::default()
                        });
                    }
                    parts.extend(m.tool_calls.iter().map(|call| Part {
                        function_call: Some(FunctionCall {
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        }),
                        ..Part::default()
                    }));
                    Content {
                        role: Some("model".to_string()),
                        parts,
                    }
                }
                ChatRole::Tool => {
                    let response = serde_json::from_str::<Value>(&m.content)
                        .ok()
                        .filter(Value::is_object)
                        .unwrap_or_else(|| serde_json::json!({ "result": m.content }));
                    Content {
                        role: Some("user".to_string()),
                        parts: vec![Part {
                            function_response: Some(FunctionResponse {
                                name: m.tool_name.clone().unwrap_or_default(),
                                response,
                            }),
                            ..Part::default()
                        }],
                    }
                }
                ChatRole::User | ChatRole::System => Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        text: Some(m.content.clone()),
                        ..Part::default()
                    }],
                },
            })
            .collect();

        let tools = if options.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tools {
                function_declarations: options
                    .tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: to_gemini_schema(&tool.parameters),
                    })
                    .collect(),
            }]
        };

        GenerateContentRequest {
            system_instruction,
            contents,
            tools,
            generation_config: GenerationConfig {
                max_output_tokens: options.max_tokens,
                temperature: options.temperature,
                response_mime_type: options
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json"),
                response_schema: options.response_schema.as_ref().map(to_gemini_schema),
                thinking_config: thinking.then_some(ThinkingConfig {
                    include_thoughts: true,
                }),
            },
        }
    }
}

#[async_trait]
impl ChatModel for GeminiProvider {
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
        let request = Self::build_request(messages, options, self.thinking);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!(model = %self.model, messages = messages.len(), tools = options.tools.len(), "Calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Parse {
                provider: PROVIDER,
                reason: e.to_string(),
            })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or(AiError::Empty(PROVIDER))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let usage = parsed.usage_metadata.unwrap_or_default();
        Ok(ChatResponse {
            text,
            tool_calls,
            usage: TokenUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
            model: parsed.model_version.unwrap_or_else(|| self.model.clone()),
        })
    }
}
