//! `kubectl_patch`: apply a JSON patch to a named cluster resource.
//!
//! The patch document is validated before anything is sent: it must parse
//! as a non-empty list of RFC 6902 operations. Validation failures and API
//! rejections come back as a [`PatchResult`] with `success: false`; only a
//! transport failure aborts the stage.

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Tool, ToolError};
use crate::ai::ToolSpec;

pub const PATCH_TOOL_NAME: &str = "kubectl_patch";

/// Arguments of one patch call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    /// JSON patch operations as text
    pub patch: String,
}

impl PatchRequest {
    /// Decode tool-call arguments.
    ///
    /// Accepts the arguments object or its JSON text, and a `patch` given
    /// either as text or as an inline array.
    pub fn from_arguments(arguments: &Value) -> Result<Self, String> {
        let mut value = match arguments {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .map_err(|e| format!("arguments are not valid JSON: {e}"))?,
            other => other.clone(),
        };
        if let Some(patch) = value.get_mut("patch") {
            if patch.is_array() {
                *patch = Value::String(patch.to_string());
            }
        }
        serde_json::from_value(value).map_err(|e| format!("invalid arguments: {e}"))
    }
}

/// Outcome reported back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub success: bool,
    pub message: String,
}

impl PatchResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchDispatchError {
    /// The API server refused the patch
    Rejected(String),
    /// The request never got an answer
    Transport(String),
}

/// Sends a validated patch to the cluster.
#[async_trait]
pub trait PatchExecutor: Send + Sync {
    async fn apply(
        &self,
        request: &PatchRequest,
        patch: &json_patch::Patch,
    ) -> Result<(), PatchDispatchError>;
}

/// Check a request and parse its patch document.
pub fn validate(request: &PatchRequest) -> Result<json_patch::Patch, String> {
    if request.version.trim().is_empty() || request.kind.trim().is_empty() {
        return Err("version and kind are required".to_string());
    }
    if request.name.trim().is_empty() {
        return Err("name is required".to_string());
    }

    let ops: Value = serde_json::from_str(&request.patch)
        .map_err(|e| format!("invalid json patch format: {e}"))?;
    match &ops {
        Value::Array(items) if items.is_empty() => {
            return Err("json patch cannot be empty".to_string())
        }
        Value::Array(_) => {}
        _ => return Err("json patch must be an array of operations".to_string()),
    }

    serde_json::from_value::<json_patch::Patch>(ops)
        .map_err(|e| format!("invalid json patch operation: {e}"))
}

/// Patches resources through the dynamic Kubernetes API.
#[derive(Clone)]
pub struct KubePatchExecutor {
    client: Client,
}

impl KubePatchExecutor {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PatchExecutor for KubePatchExecutor {
    async fn apply(
        &self,
        request: &PatchRequest,
        patch: &json_patch::Patch,
    ) -> Result<(), PatchDispatchError> {
        let gvk = GroupVersionKind::gvk(&request.group, &request.version, &request.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = if request.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &request.namespace, &resource)
        };

        match api
            .patch(
                &request.name,
                &PatchParams::default(),
                &Patch::Json::<()>(patch.clone()),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) => Err(PatchDispatchError::Rejected(format!(
                "{} ({}): {}",
                response.reason, response.code, response.message
            ))),
            Err(e) => Err(PatchDispatchError::Transport(e.to_string())),
        }
    }
}

/// The patch tool offered to the auto-fixer.
pub struct KubectlPatchTool {
    executor: Arc<dyn PatchExecutor>,
}

impl KubectlPatchTool {
    #[must_use]
    pub fn new(executor: Arc<dyn PatchExecutor>) -> Self {
        Self { executor }
    }

    /// Validate and dispatch one request.
    pub async fn apply_patch(&self, request: &PatchRequest) -> Result<PatchResult, ToolError> {
        let patch = match validate(request) {
            Ok(patch) => patch,
            Err(message) => {
                warn!(kind = %request.kind, namespace = %request.namespace, name = %request.name, %message, "Rejected patch before dispatch");
                return Ok(PatchResult::failed(message));
            }
        };

        info!(
            group = %request.group,
            version = %request.version,
            kind = %request.kind,
            namespace = %request.namespace,
            name = %request.name,
            patch = %request.patch,
            "Applying JSON patch"
        );

        match self.executor.apply(request, &patch).await {
            Ok(()) => {
                info!(kind = %request.kind, namespace = %request.namespace, name = %request.name, "JSON patch applied");
                Ok(PatchResult {
                    success: true,
                    message: format!(
                        "Successfully applied patch to {}/{} in namespace {}",
                        request.kind, request.name, request.namespace
                    ),
                })
            }
            Err(PatchDispatchError::Rejected(reason)) => {
                warn!(kind = %request.kind, namespace = %request.namespace, name = %request.name, %reason, "JSON patch rejected");
                Ok(PatchResult::failed(format!(
                    "failed to apply patch for {}/{}: {reason}",
                    request.namespace, request.name
                )))
            }
            Err(PatchDispatchError::Transport(message)) => Err(ToolError::Transport {
                tool: PATCH_TOOL_NAME.to_string(),
                message,
            }),
        }
    }
}

#[async_trait]
impl Tool for KubectlPatchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: PATCH_TOOL_NAME.to_string(),
            description: "Apply JSON patch to Kubernetes resources".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "group": {"type": "string", "description": "API group of the resource"},
                    "version": {"type": "string", "description": "API version of the resource"},
                    "kind": {"type": "string", "description": "Kind of the resource"},
                    "namespace": {"type": "string", "description": "Namespace of the resource"},
                    "name": {"type": "string", "description": "Name of the resource"},
                    "patch": {"type": "string", "description": "JSON patch operations as string"}
                },
                "required": ["version", "kind", "namespace", "name", "patch"]
            }),
        }
    }

    async fn invoke(&self, arguments: &Value) -> Result<String, ToolError> {
        let result = match PatchRequest::from_arguments(arguments) {
            Ok(request) => self.apply_patch(&request).await?,
            Err(message) => PatchResult::failed(message),
        };
        serde_json::to_string(&result).map_err(|source| ToolError::Encode {
            tool: PATCH_TOOL_NAME.to_string(),
            source,
        })
    }
}
