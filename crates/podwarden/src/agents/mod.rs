//! Incident investigation agents.
//!
//! - [`Orchestrator`]: bounded triage state machine over the stages
//! - [`StageAgent`]: one reasoning stage with an optional bounded tool loop
//! - [`PromptRegistry`]: stage prompts and output schemas
//! - [`LogAnalyzer`]: single-call analysis mode

pub mod decision;
pub mod graph;
pub mod prompts;
pub mod react;
pub mod report;
pub mod single;
pub mod state;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::ai::AiError;
use crate::cancel::Cancelled;
use crate::knowledge::RetrievalError;
use crate::tools::ToolError;

pub use decision::{parse_decision, DecisionContext, DecisionSource, RoutingDecision, StageOption};
pub use graph::{next_node, Node, Orchestrator, OrchestratorBuilder, OrchestratorLimits};
pub use prompts::PromptRegistry;
pub use react::{StageAgent, StageOutcome, ToolInvocation};
pub use report::SinkMessage;
pub use single::{AnalysisOutcome, LogAnalyzer};
pub use state::IncidentState;

/// The reasoning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Host,
    AutoFixer,
    Retrieval,
    Searcher,
    HumanHelper,
    Analyzer,
}

impl StageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::AutoFixer => "autofixer",
            Self::Retrieval => "autofixer_retriever",
            Self::Searcher => "searcher",
            Self::HumanHelper => "humanhelper",
            Self::Analyzer => "analyzer",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one incident invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{stage} reasoning call failed: {source}")]
    Model {
        stage: StageKind,
        #[source]
        source: AiError,
    },

    #[error("knowledge retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("{stage} tool failed: {source}")]
    Tool {
        stage: StageKind,
        #[source]
        source: ToolError,
    },

    #[error("failed to render {stage} prompt: {message}")]
    Prompt { stage: StageKind, message: String },

    #[error("invalid orchestrator setup: {0}")]
    Construction(String),

    #[error("invocation cancelled")]
    Cancelled,

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
}

impl AgentError {
    /// Stage that failed, when the error belongs to one.
    #[must_use]
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Model { stage, .. } | Self::Tool { stage, .. } | Self::Prompt { stage, .. } => {
                Some(*stage)
            }
            Self::Retrieval(_) => Some(StageKind::Retrieval),
            Self::Construction(_) | Self::Cancelled | Self::Timeout(_) => None,
        }
    }
}

impl From<Cancelled> for AgentError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}
