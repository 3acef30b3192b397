//! One reasoning stage with a bounded tool loop.
//!
//! reason -> (tool calls -> observations -> reason)* -> answer
//!
//! Tools are offered for at most `max_tool_rounds` rounds. After that the
//! model gets one more call without tools and must answer in text.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AgentError, StageKind};
use crate::ai::{ChatMessage, ChatModel, ChatResponse, GenerateOptions, ToolCall};
use crate::cancel::guarded;
use crate::tools::{PatchResult, ToolBox, PATCH_TOOL_NAME};

/// A tool call and the observation fed back to the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct StageOutcome {
    /// Final answer text
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub model_calls: u32,
}

impl StageOutcome {
    /// Results of every patch call that produced a decodable result.
    #[must_use]
    pub fn patch_outcomes(&self) -> Vec<PatchResult> {
        self.invocations
            .iter()
            .filter(|inv| inv.call.name == PATCH_TOOL_NAME)
            .filter_map(|inv| serde_json::from_str(&inv.output).ok())
            .collect()
    }
}

pub struct StageAgent {
    kind: StageKind,
    model: Arc<dyn ChatModel>,
    tools: ToolBox,
    max_tool_rounds: u32,
    options: GenerateOptions,
}

impl StageAgent {
    #[must_use]
    pub fn new(kind: StageKind, model: Arc<dyn ChatModel>, options: GenerateOptions) -> Self {
        Self {
            kind,
            model,
            tools: ToolBox::default(),
            max_tool_rounds: 0,
            options,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolBox, max_tool_rounds: u32) -> Self {
        self.tools = tools;
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Run the stage from its rendered prompt.
    pub async fn run(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome, AgentError> {
        let with_tools = self.options.clone().tools(self.tools.specs());
        let without_tools = self.options.without_tools();

        let mut transcript = messages;
        let mut outcome = StageOutcome::default();
        let mut round = 0;

        loop {
            let offer_tools = !self.tools.is_empty() && round < self.max_tool_rounds;
            let options = if offer_tools { &with_tools } else { &without_tools };

            let response = self.generate(&transcript, options, cancel).await?;
            outcome.model_calls += 1;

            if response.tool_calls.is_empty() || !offer_tools {
                if !response.tool_calls.is_empty() {
                    warn!(stage = %self.kind, calls = response.tool_calls.len(), "Ignoring tool calls after the tool budget was spent");
                }
                outcome.text = response.text;
                return Ok(outcome);
            }

            round += 1;
            debug!(stage = %self.kind, round, calls = response.tool_calls.len(), "Model requested tools");
            transcript.push(ChatMessage::assistant_with_tools(
                response.text,
                response.tool_calls.clone(),
            ));

            for call in response.tool_calls {
                let output = self.invoke(&call, cancel).await?;
                transcript.push(ChatMessage::tool_result(&call, output.clone()));
                outcome.invocations.push(ToolInvocation { call, output });
            }
        }
    }

    async fn generate(
        &self,
        transcript: &[ChatMessage],
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, AgentError> {
        let response = guarded(cancel, self.model.generate(transcript, options))
            .await?
            .map_err(|source| AgentError::Model {
                stage: self.kind,
                source,
            })?;
        debug!(
            stage = %self.kind,
            provider = self.model.name(),
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Reasoning call finished"
        );
        Ok(response)
    }

    async fn invoke(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<String, AgentError> {
        let Some(tool) = self.tools.find(&call.name) else {
            warn!(stage = %self.kind, tool = %call.name, "Model called an unknown tool");
            return Ok(json!({
                "success": false,
                "message": format!("unknown tool: {}", call.name)
            })
            .to_string());
        };

        guarded(cancel, tool.invoke(&call.arguments))
            .await?
            .map_err(|source| AgentError::Tool {
                stage: self.kind,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;
    use crate::tools::{Tool, ToolError};
    use crate::ai::ToolSpec;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records the options of each call.
    struct Scripted {
        responses: Mutex<VecDeque<ChatResponse>>,
        offered_tools: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                offered_tools: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }

        async fn generate(
            &self,
            _messages: &[ChatMessage],
            options: &GenerateOptions,
        ) -> Result<ChatResponse, AiError> {
            self.offered_tools.lock().unwrap().push(options.tools.len());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(AiError::Empty("scripted"))
        }
    }

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                description: "echo".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, arguments: &Value) -> Result<String, ToolError> {
            Ok(arguments.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "broken".to_string(),
                description: "always fails".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _arguments: &Value) -> Result<String, ToolError> {
            Err(ToolError::Transport {
                tool: "broken".to_string(),
                message: "connection reset".to_string(),
            })
        }
    }

    fn text(t: &str) -> ChatResponse {
        ChatResponse {
            text: t.to_string(),
            ..ChatResponse::default()
        }
    }

    fn calling(name: &str) -> ChatResponse {
        ChatResponse {
            tool_calls: vec![ToolCall {
                id: "call_0".to_string(),
                name: name.to_string(),
                arguments: json!({"x": 1}),
            }],
            ..ChatResponse::default()
        }
    }

    fn agent(model: Arc<Scripted>, tools: Vec<Arc<dyn Tool>>, rounds: u32) -> StageAgent {
        StageAgent::new(StageKind::AutoFixer, model, GenerateOptions::with_max_tokens(100))
            .with_tools(ToolBox::new(tools), rounds)
    }

    #[tokio::test]
    async fn test_answer_without_tools() {
        let model = Arc::new(Scripted::new(vec![text("done")]));
        let outcome = agent(model.clone(), vec![Arc::new(Echo)], 3)
            .run(vec![ChatMessage::user("fix")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.model_calls, 1);
        assert!(outcome.invocations.is_empty());
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let model = Arc::new(Scripted::new(vec![
            calling("echo"),
            calling("echo"),
            calling("echo"),
            text("gave up"),
        ]));
        let outcome = agent(model.clone(), vec![Arc::new(Echo)], 2)
            .run(vec![ChatMessage::user("fix")], &CancellationToken::new())
            .await
            .unwrap();

        // two rounds with tools, then one final call without
        assert_eq!(*model.offered_tools.lock().unwrap(), vec![1, 1, 0]);
        assert_eq!(outcome.invocations.len(), 2);
        assert_eq!(outcome.model_calls, 3);
        assert_eq!(outcome.text, "");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_observation() {
        let model = Arc::new(Scripted::new(vec![calling("rm_rf"), text("ok")]));
        let outcome = agent(model, vec![Arc::new(Echo)], 2)
            .run(vec![ChatMessage::user("fix")], &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.invocations[0].output.contains("unknown tool: rm_rf"));
        assert_eq!(outcome.text, "ok");
    }

    #[tokio::test]
    async fn test_tool_transport_failure_is_fatal() {
        let model = Arc::new(Scripted::new(vec![calling("broken"), text("unreachable")]));
        let err = agent(model, vec![Arc::new(Broken)], 2)
            .run(vec![ChatMessage::user("fix")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Tool { stage: StageKind::AutoFixer, .. }));
    }

    #[tokio::test]
    async fn test_model_failure_names_stage() {
        let model = Arc::new(Scripted::new(vec![]));
        let err = StageAgent::new(StageKind::Searcher, model, GenerateOptions::default())
            .run(vec![ChatMessage::user("look")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(StageKind::Searcher));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let model = Arc::new(Scripted::new(vec![text("late")]));
        let err = agent(model, vec![], 1)
            .run(vec![ChatMessage::user("fix")], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn test_patch_outcomes_decoded() {
        let outcome = StageOutcome {
            invocations: vec![
                ToolInvocation {
                    call: ToolCall {
                        id: "a".to_string(),
                        name: PATCH_TOOL_NAME.to_string(),
                        arguments: Value::Null,
                    },
                    output: r#"{"success":true,"message":"patched"}"#.to_string(),
                },
                ToolInvocation {
                    call: ToolCall {
                        id: "b".to_string(),
                        name: "echo".to_string(),
                        arguments: Value::Null,
                    },
                    output: r#"{"success":true,"message":"not a patch"}"#.to_string(),
                },
            ],
            ..StageOutcome::default()
        };

        let outcomes = outcome.patch_outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].message, "patched");
    }
}
