//! Tools a stage may call while reasoning.

pub mod patch;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::ai::ToolSpec;

pub use patch::{
    KubePatchExecutor, KubectlPatchTool, PatchDispatchError, PatchExecutor, PatchRequest,
    PatchResult, PATCH_TOOL_NAME,
};

/// Failures that abort the calling stage.
///
/// Anything the model can react to (bad arguments, a rejected patch) is
/// returned as a tool observation instead.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} dispatch failed: {message}")]
    Transport { tool: String, message: String },

    #[error("failed to encode {tool} result: {source}")]
    Encode {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declaration shown to the model.
    fn spec(&self) -> ToolSpec;

    /// Run the tool; the returned text is fed back to the model.
    async fn invoke(&self, arguments: &Value) -> Result<String, ToolError>;
}

/// The bounded set of tools available to one stage.
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolBox {
    #[must_use]
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.spec().name == name)
    }
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.spec().name))
            .finish()
    }
}
