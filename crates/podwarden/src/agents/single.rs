//! Single-call analysis mode: one prompt, one structured verdict.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::prompts::PromptRegistry;
use super::react::StageAgent;
use super::{AgentError, StageKind};
use crate::ai::{parse_json_response, ChatModel, GenerateOptions};
use crate::cancel::guarded;
use crate::incident::Incident;
use crate::knowledge::{render_documents, HybridRetriever};

/// Verdict of one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub reason: String,
    pub solution: String,
    /// Whether the incident should be reported
    pub sink: bool,
}

#[derive(Serialize)]
struct AnalyzerPrompt<'a> {
    language: &'a str,
    pod_yaml: &'a str,
    logs: &'a str,
    has_knowledge_base: bool,
    knowledge: &'a str,
}

pub struct LogAnalyzer {
    agent: StageAgent,
    retriever: Option<Arc<HybridRetriever>>,
    prompts: PromptRegistry,
}

impl LogAnalyzer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        retriever: Option<Arc<HybridRetriever>>,
        max_tokens: u32,
    ) -> Result<Self, AgentError> {
        let prompts = PromptRegistry::new()?;
        let options =
            GenerateOptions::with_max_tokens(max_tokens).schema(prompts.schema(StageKind::Analyzer));
        Ok(Self {
            agent: StageAgent::new(StageKind::Analyzer, model, options),
            retriever,
            prompts,
        })
    }

    /// Analyze one incident.
    ///
    /// An answer that does not decode is reported verbatim as the reason.
    #[instrument(skip_all, fields(incident = %incident.id(), namespace = %incident.namespace(), pod = %incident.pod()))]
    pub async fn analyze(
        &self,
        incident: &Incident,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AgentError> {
        let knowledge = match &self.retriever {
            Some(retriever) => {
                let documents = guarded(cancel, retriever.retrieve(incident.logs())).await??;
                render_documents(&documents)
            }
            None => String::new(),
        };

        let messages = self.prompts.messages(
            StageKind::Analyzer,
            &AnalyzerPrompt {
                language: incident.language().display_name(),
                pod_yaml: incident.resource_descriptor(),
                logs: incident.logs(),
                has_knowledge_base: self.retriever.is_some(),
                knowledge: &knowledge,
            },
        )?;

        let outcome = self.agent.run(messages, cancel).await?;
        let verdict = match parse_json_response::<AnalysisOutcome>(&outcome.text) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Analysis answer did not decode, reporting raw text");
                AnalysisOutcome {
                    reason: outcome.text,
                    solution: String::new(),
                    sink: true,
                }
            }
        };
        info!(sink = verdict.sink, "Analysis finished");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, ChatMessage, ChatResponse};
    use crate::incident::Language;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct OneShot {
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for OneShot {
        fn name(&self) -> &'static str {
            "oneshot"
        }

        fn model(&self) -> &str {
            "oneshot-1"
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            options: &GenerateOptions,
        ) -> Result<ChatResponse, AiError> {
            assert!(options.response_schema.is_some());
            self.prompts
                .lock()
                .unwrap()
                .extend(messages.iter().map(|m| m.content.clone()));
            Ok(ChatResponse {
                text: self.answer.clone(),
                ..ChatResponse::default()
            })
        }
    }

    fn incident() -> Incident {
        Incident::new("shop", "cart-7d9", "kind: Pod", "panic: nil map", Language::En)
    }

    #[tokio::test]
    async fn test_structured_verdict() {
        let model = Arc::new(OneShot {
            answer: r#"{"reason":"nil map write","solution":"initialize the map","sink":true}"#
                .to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let analyzer = LogAnalyzer::new(model.clone(), None, 500).unwrap();

        let verdict = analyzer
            .analyze(&incident(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(verdict.reason, "nil map write");
        assert!(verdict.sink);
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[1], "Pod yaml: kind: Pod\nLogs: panic: nil map");
    }

    #[tokio::test]
    async fn test_quiet_verdict() {
        let model = Arc::new(OneShot {
            answer: "```json\n{\"reason\":\"\",\"solution\":\"\",\"sink\":false}\n```".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let verdict = LogAnalyzer::new(model, None, 500)
            .unwrap()
            .analyze(&incident(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!verdict.sink);
    }

    #[tokio::test]
    async fn test_undecodable_answer_is_reported_raw() {
        let model = Arc::new(OneShot {
            answer: "The pod crashed because the map was never initialized.".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let verdict = LogAnalyzer::new(model, None, 500)
            .unwrap()
            .analyze(&incident(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(verdict.sink);
        assert!(verdict.reason.starts_with("The pod crashed"));
        assert!(verdict.solution.is_empty());
    }
}
