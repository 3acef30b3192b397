//! Podwarden configuration.
//!
//! One YAML document (camelCase keys) describes when to scan, which pods to
//! look at, where logs come from, which model answers, the optional
//! knowledge base, and where reports go. It can be mounted as a file or read
//! straight from a `ConfigMap`.

use crate::incident::Language;
use crate::secrets::SecretKeyRef;
use cron::Schedule;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Key under which the configuration lives in a `ConfigMap`.
pub const CONFIGMAP_KEY: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read ConfigMap {namespace}/{name}: {source}")]
    ConfigMap {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("ConfigMap {namespace}/{name} has no config.yaml entry")]
    MissingConfigMapKey { namespace: String, name: String },

    #[error("invalid schedule '{expression}': {message}")]
    Schedule { expression: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("credential lookup failed: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("failed to build provider client: {0}")]
    Provider(#[from] crate::ai::AiError),
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Cron expression for detection passes.
    #[serde(default = "default_schedule")]
    pub schedule: String,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub log_source: LogSourceConfig,

    pub llm: LlmConfig,

    /// Absent means the auto-fixer runs without retrieved knowledge.
    #[serde(default)]
    pub knowledge_base: Option<KnowledgeBaseConfig>,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_incidents")]
    pub max_concurrent_incidents: usize,

    /// Namespace used when a secret reference omits one.
    #[serde(default = "default_secret_namespace")]
    pub secret_namespace: String,
}

/// Which pods are watched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    /// Namespaces to scan; empty scans the whole cluster.
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub label_selector: Option<String>,

    #[serde(default)]
    pub exclude_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum LogSourceKind {
    #[default]
    Kubernetes,
    Loki,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSourceConfig {
    #[serde(rename = "type", default)]
    pub kind: LogSourceKind,

    #[serde(default = "default_tail_lines")]
    pub tail_lines: i64,

    #[serde(default)]
    pub loki: Option<LokiConfig>,
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            kind: LogSourceKind::Kubernetes,
            tail_lines: default_tail_lines(),
            loki: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LokiConfig {
    pub address: String,

    /// How far back `query_range` looks.
    #[serde(default = "default_loki_lookback_hours")]
    pub lookback_hours: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Deepseek,
    Gemini,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingMode {
    #[default]
    Multi,
    Single,
}

/// Chat model and investigation bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default)]
    pub working_mode: WorkingMode,

    #[serde(default)]
    pub language: Language,

    /// Maximum number of triage (host) visits per incident.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum tool-execution rounds inside one stage.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub deepseek: Option<DeepSeekConfig>,

    #[serde(default)]
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSeekConfig {
    pub model_name: String,

    #[serde(default)]
    pub base_url: Option<String>,

    pub api_key_secret_ref: SecretKeyRef,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    pub model_name: String,

    #[serde(default)]
    pub base_url: Option<String>,

    pub api_key_secret_ref: SecretKeyRef,

    /// Ask the model to include its thoughts; they are never part of the answer.
    #[serde(default)]
    pub thinking: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    #[default]
    Milvus,
    Inline,
}

/// Optional operations knowledge base.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    #[serde(default)]
    pub backend: KnowledgeBackend,

    /// Milvus REST endpoint.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// `[dense, sparse]` rerank weights.
    #[serde(default = "default_weights")]
    pub weights: [f32; 2],

    #[serde(default)]
    pub username_secret_ref: Option<SecretKeyRef>,

    #[serde(default)]
    pub password_secret_ref: Option<SecretKeyRef>,

    /// Articles file for the inline backend.
    #[serde(default)]
    pub documents: Option<String>,

    pub embedding: EmbeddingConfig,
}

impl KnowledgeBaseConfig {
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Ark,
    Openai,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    pub model_name: String,

    #[serde(default)]
    pub base_url: Option<String>,

    pub api_key_secret_ref: SecretKeyRef,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    pub name: String,
    pub feishu: FeishuSinkConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeishuSinkConfig {
    pub webhook_secret_ref: SecretKeyRef,
    pub signature_secret_ref: SecretKeyRef,
}

fn default_schedule() -> String {
    "0 */5 * * * *".to_string()
}

fn default_invocation_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent_incidents() -> usize {
    4
}

fn default_secret_namespace() -> String {
    "default".to_string()
}

fn default_tail_lines() -> i64 {
    20
}

fn default_loki_lookback_hours() -> i64 {
    700
}

fn default_max_steps() -> u32 {
    6
}

fn default_max_tool_rounds() -> u32 {
    4
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_collection_name() -> String {
    "knowledge".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_load_timeout_secs() -> u64 {
    60
}

fn default_weights() -> [f32; 2] {
    [0.8, 0.3]
}

/// Parse a cron expression.
///
/// Six or seven fields (seconds first) are passed through; a classic
/// five-field expression is treated as firing at second zero.
pub fn parse_schedule(expression: &str) -> Result<Schedule, ConfigError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| ConfigError::Schedule {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

impl Config {
    /// Load and validate configuration from a mounted file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Load and validate configuration from a `ConfigMap`.
    pub async fn from_configmap(
        client: &Client,
        namespace: &str,
        name: &str,
    ) -> Result<Self, ConfigError> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let cm = api.get(name).await.map_err(|source| ConfigError::ConfigMap {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;

        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIGMAP_KEY))
            .ok_or_else(|| ConfigError::MissingConfigMapKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        Self::from_yaml(raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_schedule(&self.schedule)?;

        match self.llm.provider {
            ProviderKind::Deepseek if self.llm.deepseek.is_none() => {
                return Err(ConfigError::Invalid(
                    "llm.provider is deepseek but llm.deepseek is missing".to_string(),
                ));
            }
            ProviderKind::Gemini if self.llm.gemini.is_none() => {
                return Err(ConfigError::Invalid(
                    "llm.provider is gemini but llm.gemini is missing".to_string(),
                ));
            }
            _ => {}
        }

        if self.llm.max_steps == 0 {
            return Err(ConfigError::Invalid("llm.maxSteps must be at least 1".to_string()));
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::Invalid("llm.maxTokens must be at least 1".to_string()));
        }
        if self.max_concurrent_incidents == 0 {
            return Err(ConfigError::Invalid(
                "maxConcurrentIncidents must be at least 1".to_string(),
            ));
        }
        if self.invocation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "invocationTimeoutSecs must be at least 1".to_string(),
            ));
        }

        if self.log_source.tail_lines < 1 || u32::try_from(self.log_source.tail_lines).is_err() {
            return Err(ConfigError::Invalid(format!(
                "logSource.tailLines must be between 1 and {}, got {}",
                u32::MAX,
                self.log_source.tail_lines
            )));
        }

        if self.log_source.kind == LogSourceKind::Loki && self.log_source.loki.is_none() {
            return Err(ConfigError::Invalid(
                "logSource.type is Loki but logSource.loki.address is missing".to_string(),
            ));
        }

        if let Some(kb) = &self.knowledge_base {
            if kb.top_k == 0 {
                return Err(ConfigError::Invalid(
                    "knowledgeBase.topK must be at least 1".to_string(),
                ));
            }
            if kb.load_timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "knowledgeBase.loadTimeoutSecs must be at least 1".to_string(),
                ));
            }
            match kb.backend {
                KnowledgeBackend::Milvus if kb.address.as_deref().is_none_or(str::is_empty) => {
                    return Err(ConfigError::Invalid(
                        "knowledgeBase.address is required for the milvus backend".to_string(),
                    ));
                }
                KnowledgeBackend::Inline if kb.documents.is_none() => {
                    return Err(ConfigError::Invalid(
                        "knowledgeBase.documents is required for the inline backend".to_string(),
                    ));
                }
                _ => {}
            }
            if kb.username_secret_ref.is_some() != kb.password_secret_ref.is_some() {
                return Err(ConfigError::Invalid(
                    "knowledgeBase username and password secret refs must be set together"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}
