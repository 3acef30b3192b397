//! Unhealthy workload detection.
//!
//! The [`Detector`] lists pods in the selected namespaces, keeps the
//! unhealthy ones, and turns each into an [`Incident`] carrying the pod
//! manifest and its recent logs.

pub mod health;
pub mod logs;
pub mod loki;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SelectorConfig;
use crate::incident::{Incident, Language};

pub use health::{has_running_container, is_pod_healthy, status_summary};
pub use logs::{KubernetesLogSource, LogSource};
pub use loki::LokiLogSource;

/// Terminal colour and cursor sequences that some workloads write to stdout.
static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap());

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to list pods in {scope}: {source}")]
    List {
        scope: String,
        #[source]
        source: kube::Error,
    },

    #[error("failed to get pod {namespace}/{name}: {source}")]
    Get {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("loki request failed: {0}")]
    Loki(#[source] reqwest::Error),

    #[error("{0}")]
    LokiQuery(String),

    #[error("failed to render pod manifest: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Strip terminal escape sequences from log text.
#[must_use]
pub fn sanitize_logs(logs: &str) -> String {
    ANSI_ESCAPE.replace_all(logs, "").into_owned()
}

/// Pod manifest as YAML, without server-side bookkeeping.
pub fn render_manifest(pod: &Pod) -> Result<String, DetectError> {
    let mut pod = pod.clone();
    pod.metadata.managed_fields = None;
    Ok(serde_yaml::to_string(&pod)?)
}

pub struct Detector {
    client: Client,
    selector: SelectorConfig,
    log_source: Arc<dyn LogSource>,
    language: Language,
}

impl Detector {
    #[must_use]
    pub fn new(
        client: Client,
        selector: SelectorConfig,
        log_source: Arc<dyn LogSource>,
        language: Language,
    ) -> Self {
        Self {
            client,
            selector,
            log_source,
            language,
        }
    }

    fn list_params(&self) -> ListParams {
        match &self.selector.label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        }
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, DetectError> {
        let params = self.list_params();
        let mut pods = Vec::new();

        if self.selector.namespaces.is_empty() {
            let api: Api<Pod> = Api::all(self.client.clone());
            let list = api.list(&params).await.map_err(|source| DetectError::List {
                scope: "all namespaces".to_string(),
                source,
            })?;
            pods.extend(list.items);
        } else {
            for namespace in &self.selector.namespaces {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let list = api.list(&params).await.map_err(|source| DetectError::List {
                    scope: format!("namespace {namespace}"),
                    source,
                })?;
                pods.extend(list.items);
            }
        }

        pods.retain(|pod| {
            let namespace = pod.namespace().unwrap_or_default();
            !self.selector.exclude_namespaces.contains(&namespace)
        });
        Ok(pods)
    }

    /// One detection pass: an incident per unhealthy pod.
    pub async fn scan(&self) -> Result<Vec<Incident>, DetectError> {
        let pods = self.list_pods().await?;
        let total = pods.len();

        let mut incidents = Vec::new();
        for pod in pods.iter().filter(|p| !p.status.as_ref().is_some_and(is_pod_healthy)) {
            match self.incident_for(pod).await {
                Ok(incident) => incidents.push(incident),
                Err(e) => {
                    warn!(namespace = %pod.namespace().unwrap_or_default(), pod = %pod.name_any(), error = %e, "Skipping pod");
                }
            }
        }

        info!(
            scanned = total,
            unhealthy = incidents.len(),
            log_source = self.log_source.name(),
            "Detection pass finished"
        );
        Ok(incidents)
    }

    /// Build an incident for one named pod regardless of its health.
    pub async fn inspect(&self, namespace: &str, name: &str) -> Result<Incident, DetectError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api.get(name).await.map_err(|source| DetectError::Get {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;
        self.incident_for(&pod).await
    }

    async fn incident_for(&self, pod: &Pod) -> Result<Incident, DetectError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();

        let logs = match self.log_source.fetch(pod).await {
            Ok(logs) => sanitize_logs(&logs),
            Err(e) => {
                warn!(%namespace, pod = %name, error = %e, "Log source failed");
                format!("Failed to retrieve logs: {e}")
            }
        };
        let manifest = render_manifest(pod)?;
        debug!(%namespace, pod = %name, log_bytes = logs.len(), "Incident built");

        Ok(Incident::new(namespace, name, manifest, logs, self.language))
    }
}
