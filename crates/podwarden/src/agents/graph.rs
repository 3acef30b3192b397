//! The triage state machine.
//!
//! ```text
//!            +--------------------------------------------+
//!            v                                            |
//!   start -> Host --AutoFixer--> [AutoFixerRetrieval] -> AutoFixer
//!            |  \--Searcher----> Searcher ----------------+
//!            |  \--HumanHelper-> HumanHelper -> end
//!            \--Finish---------------------------------> end
//! ```
//!
//! Every entry into `Host` counts against the step budget. When the budget
//! is spent the run finishes with whatever the state holds.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::decision::{parse_decision, DecisionSource, StageOption};
use super::prompts::PromptRegistry;
use super::react::StageAgent;
use super::report::SinkMessage;
use super::state::IncidentState;
use super::{AgentError, StageKind};
use crate::ai::{ChatModel, GenerateOptions};
use crate::cancel::guarded;
use crate::incident::Incident;
use crate::knowledge::{render_documents, HybridRetriever};
use crate::tools::{KubectlPatchTool, PatchExecutor, PatchResult, ToolBox};

const NOT_AVAILABLE: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Host,
    AutoFixerRetrieval,
    AutoFixer,
    Searcher,
    HumanHelper,
    Finish,
}

/// Where a triage decision leads.
#[must_use]
pub const fn next_node(option: StageOption, has_knowledge_base: bool) -> Node {
    match option {
        StageOption::AutoFixer if has_knowledge_base => Node::AutoFixerRetrieval,
        StageOption::AutoFixer => Node::AutoFixer,
        StageOption::Searcher => Node::Searcher,
        StageOption::HumanHelper => Node::HumanHelper,
        StageOption::Finish => Node::Finish,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorLimits {
    /// Maximum number of triage visits per invocation
    pub max_steps: u32,
    /// Tool rounds offered to the auto-fixer per visit
    pub max_tool_rounds: u32,
    pub max_tokens: u32,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_steps: 6,
            max_tool_rounds: 4,
            max_tokens: 2000,
        }
    }
}

#[derive(Serialize)]
struct HostPrompt<'a> {
    language: &'a str,
    original_input: &'a str,
    history: Option<String>,
}

#[derive(Serialize)]
struct AutoFixerPrompt<'a> {
    language: &'a str,
    original_input: &'a str,
    has_knowledge_base: bool,
    knowledge: &'a str,
    guidance: &'a str,
}

#[derive(Serialize)]
struct SearcherPrompt<'a> {
    language: &'a str,
    original_input: &'a str,
    auto_fix_result: &'a str,
    query: &'a str,
}

#[derive(Serialize)]
struct HumanHelperPrompt<'a> {
    language: &'a str,
    original_input: &'a str,
    auto_fix_result: &'a str,
    search_result: &'a str,
}

pub struct OrchestratorBuilder {
    model: Arc<dyn ChatModel>,
    stage_models: Vec<(StageKind, Arc<dyn ChatModel>)>,
    retriever: Option<Arc<HybridRetriever>>,
    patch_executor: Option<Arc<dyn PatchExecutor>>,
    limits: OrchestratorLimits,
}

impl OrchestratorBuilder {
    /// Use a different model for one stage.
    #[must_use]
    pub fn stage_model(mut self, stage: StageKind, model: Arc<dyn ChatModel>) -> Self {
        self.stage_models.push((stage, model));
        self
    }

    /// Enable knowledge retrieval before each auto-fix attempt.
    #[must_use]
    pub fn retriever(mut self, retriever: Arc<HybridRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn patch_executor(mut self, executor: Arc<dyn PatchExecutor>) -> Self {
        self.patch_executor = Some(executor);
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: OrchestratorLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.limits.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.limits.max_tool_rounds = rounds;
        self
    }

    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.limits.max_tokens = max_tokens;
        self
    }

    fn model_for(&self, stage: StageKind) -> Arc<dyn ChatModel> {
        self.stage_models
            .iter()
            .rev()
            .find(|(kind, _)| *kind == stage)
            .map_or_else(|| Arc::clone(&self.model), |(_, model)| Arc::clone(model))
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        if self.limits.max_steps == 0 {
            return Err(AgentError::Construction(
                "max_steps must allow at least one triage step".to_string(),
            ));
        }
        let Some(executor) = self.patch_executor.clone() else {
            return Err(AgentError::Construction(
                "the auto-fixer needs a patch executor".to_string(),
            ));
        };

        let prompts = PromptRegistry::new()?;
        let options = GenerateOptions::with_max_tokens(self.limits.max_tokens);

        let host = StageAgent::new(
            StageKind::Host,
            self.model_for(StageKind::Host),
            options.clone().schema(prompts.schema(StageKind::Host)),
        );
        let autofixer = StageAgent::new(
            StageKind::AutoFixer,
            self.model_for(StageKind::AutoFixer),
            options.clone(),
        )
        .with_tools(
            ToolBox::new(vec![Arc::new(KubectlPatchTool::new(executor))]),
            self.limits.max_tool_rounds,
        );
        let searcher = StageAgent::new(
            StageKind::Searcher,
            self.model_for(StageKind::Searcher),
            options.clone(),
        );
        let human_helper = StageAgent::new(
            StageKind::HumanHelper,
            self.model_for(StageKind::HumanHelper),
            options,
        );

        Ok(Orchestrator {
            host,
            autofixer,
            searcher,
            human_helper,
            retriever: self.retriever,
            prompts,
            limits: self.limits,
        })
    }
}

/// Runs incidents through the triage graph.
///
/// Immutable after construction; one instance serves concurrent
/// invocations, each with its own [`IncidentState`].
pub struct Orchestrator {
    host: StageAgent,
    autofixer: StageAgent,
    searcher: StageAgent,
    human_helper: StageAgent,
    retriever: Option<Arc<HybridRetriever>>,
    prompts: PromptRegistry,
    limits: OrchestratorLimits,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("limits", &self.limits)
            .field("retriever", &self.retriever)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn builder(model: Arc<dyn ChatModel>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            model,
            stage_models: Vec::new(),
            retriever: None,
            patch_executor: None,
            limits: OrchestratorLimits::default(),
        }
    }

    #[must_use]
    pub fn limits(&self) -> OrchestratorLimits {
        self.limits
    }

    #[must_use]
    pub fn has_knowledge_base(&self) -> bool {
        self.retriever.is_some()
    }

    /// Investigate one incident.
    ///
    /// Any reasoning, retrieval or tool transport failure aborts the run.
    #[instrument(skip_all, fields(incident = %incident.id(), namespace = %incident.namespace(), pod = %incident.pod()))]
    pub async fn run(
        &self,
        incident: &Incident,
        cancel: &CancellationToken,
    ) -> Result<SinkMessage, AgentError> {
        let mut state = IncidentState::new(incident, self.has_knowledge_base());
        let mut node = Node::Host;

        while node != Node::Finish {
            node = match node {
                Node::Host if state.host_visits() >= self.limits.max_steps => {
                    warn!(
                        steps = state.host_visits(),
                        max_steps = self.limits.max_steps,
                        "Step budget spent, finishing"
                    );
                    state.force_finish();
                    Node::Finish
                }
                Node::Host => self.triage(&mut state, cancel).await?,
                Node::AutoFixerRetrieval => {
                    let knowledge = self.retrieve(&state, cancel).await?;
                    self.auto_fix(&mut state, &knowledge, cancel).await?;
                    Node::Host
                }
                Node::AutoFixer => {
                    self.auto_fix(&mut state, "", cancel).await?;
                    Node::Host
                }
                Node::Searcher => {
                    self.search(&mut state, cancel).await?;
                    Node::Host
                }
                Node::HumanHelper => {
                    self.human_help(&mut state, cancel).await?;
                    Node::Finish
                }
                Node::Finish => Node::Finish,
            };
        }

        let message = SinkMessage::from_state(&state);
        info!(
            steps = message.host_visits,
            forced = message.forced_finish,
            remediated = message.remediated(),
            "Investigation finished"
        );
        Ok(message)
    }

    async fn triage(
        &self,
        state: &mut IncidentState,
        cancel: &CancellationToken,
    ) -> Result<Node, AgentError> {
        let step = state.enter_host();
        let messages = self.prompts.messages(
            StageKind::Host,
            &HostPrompt {
                language: state.language().display_name(),
                original_input: state.original_input(),
                history: state.history(),
            },
        )?;

        let outcome = self.host.run(messages, cancel).await?;
        let decision = parse_decision(&outcome.text);
        if decision.source != DecisionSource::Structured {
            debug!(step, source = ?decision.source, "Triage answer did not decode, routed by keyword");
        }
        if let Some(violation) = decision.context_violation() {
            warn!(step, %violation, "Triage context does not match the chosen option");
        }

        let next = next_node(decision.option, state.has_knowledge_base());
        info!(step, option = %decision.option, next = ?next, "Triage decided");
        state.record_decision(decision);
        Ok(next)
    }

    async fn retrieve(
        &self,
        state: &IncidentState,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let Some(retriever) = &self.retriever else {
            return Ok(String::new());
        };
        let documents = guarded(cancel, retriever.retrieve(state.original_input())).await??;
        debug!(documents = documents.len(), "Knowledge injected into auto-fix prompt");
        Ok(render_documents(&documents))
    }

    async fn auto_fix(
        &self,
        state: &mut IncidentState,
        knowledge: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let guidance = state
            .last_decision()
            .map(|d| d.context.autofix.clone())
            .unwrap_or_default();
        let messages = self.prompts.messages(
            StageKind::AutoFixer,
            &AutoFixerPrompt {
                language: state.language().display_name(),
                original_input: state.original_input(),
                has_knowledge_base: state.has_knowledge_base(),
                knowledge,
                guidance: &guidance,
            },
        )?;

        let outcome = self.autofixer.run(messages, cancel).await?;
        let patches = outcome.patch_outcomes();
        let text = if outcome.text.trim().is_empty() {
            summarize_patches(&patches)
        } else {
            outcome.text
        };
        info!(
            attempted = patches.len(),
            applied = patches.iter().filter(|p| p.success).count(),
            "Auto-fix finished"
        );
        state.record_auto_fix(text, patches);
        Ok(())
    }

    async fn search(
        &self,
        state: &mut IncidentState,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let query = state
            .last_decision()
            .map(|d| d.context.search.clone())
            .unwrap_or_default();
        let messages = self.prompts.messages(
            StageKind::Searcher,
            &SearcherPrompt {
                language: state.language().display_name(),
                original_input: state.original_input(),
                auto_fix_result: state.auto_fix_result().unwrap_or(NOT_AVAILABLE),
                query: &query,
            },
        )?;

        let outcome = self.searcher.run(messages, cancel).await?;
        state.record_search(outcome.text);
        Ok(())
    }

    async fn human_help(
        &self,
        state: &mut IncidentState,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        // Triage summaries stand in for stages that never ran
        let context = state.last_decision().map(|d| d.context.clone()).unwrap_or_default();
        let auto_fix = state
            .auto_fix_result()
            .map(str::to_string)
            .or_else(|| non_empty(&context.autofix))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let search = state
            .search_result()
            .map(str::to_string)
            .or_else(|| non_empty(&context.search))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let messages = self.prompts.messages(
            StageKind::HumanHelper,
            &HumanHelperPrompt {
                language: state.language().display_name(),
                original_input: state.original_input(),
                auto_fix_result: &auto_fix,
                search_result: &search,
            },
        )?;

        let outcome = self.human_helper.run(messages, cancel).await?;
        info!("Escalated to human operators");
        state.record_human_help(outcome.text);
        Ok(())
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn summarize_patches(patches: &[PatchResult]) -> String {
    if patches.is_empty() {
        return "No fix was attempted.".to_string();
    }
    patches
        .iter()
        .map(|p| p.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
