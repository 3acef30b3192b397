use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use kube::Client;
use kube::ResourceExt;
use tracing::warn;

use super::health::{has_running_container, status_summary};
use super::DetectError;

/// Where the diagnostic text of an unhealthy pod comes from.
#[async_trait]
pub trait LogSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, pod: &Pod) -> Result<String, DetectError>;
}

/// Reads container logs from the API server.
#[derive(Clone)]
pub struct KubernetesLogSource {
    client: Client,
    tail_lines: i64,
}

impl KubernetesLogSource {
    #[must_use]
    pub fn new(client: Client, tail_lines: i64) -> Self {
        Self { client, tail_lines }
    }
}

#[async_trait]
impl LogSource for KubernetesLogSource {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn fetch(&self, pod: &Pod) -> Result<String, DetectError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();

        // Nothing to tail; the status explains more than an empty log
        if let Some(status) = pod.status.as_ref().filter(|s| !has_running_container(s)) {
            return Ok(status_summary(status));
        }

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let params = LogParams {
            tail_lines: Some(self.tail_lines),
            ..LogParams::default()
        };
        match api.logs(&name, &params).await {
            Ok(logs) => Ok(logs),
            Err(e) => {
                warn!(%namespace, pod = %name, error = %e, "Failed to retrieve logs");
                Ok(format!("Failed to retrieve logs: {e}"))
            }
        }
    }
}
