//! Credential lookup from Kubernetes secrets.
//!
//! API keys for the model and embedding providers, knowledge-store
//! credentials and webhook secrets are all referenced as
//! `(namespace, name, key)` triples. A failed lookup is always an error:
//! nothing here falls back to an empty credential.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Reference to a key within a Kubernetes Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Namespace of the Secret; falls back to the configured secret namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Name of the Secret.
    pub name: String,
    /// Key within the Secret.
    pub key: String,
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to read secret {namespace}/{name}: {source}")]
    Api {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("secret {namespace}/{name} has no key {key}")]
    MissingKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("secret {namespace}/{name} key {key} is not valid UTF-8")]
    NotUtf8 {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("secret {namespace}/{name} key {key} is empty")]
    Empty {
        namespace: String,
        name: String,
        key: String,
    },
}

/// `(namespace, name, key) -> value` lookup.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError>;
}

/// Resolve a [`SecretKeyRef`], using `default_namespace` when the ref has none.
pub async fn resolve_ref(
    resolver: &dyn SecretResolver,
    secret_ref: &SecretKeyRef,
    default_namespace: &str,
) -> Result<String, SecretError> {
    let namespace = secret_ref
        .namespace
        .as_deref()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);
    resolver
        .resolve(namespace, &secret_ref.name, &secret_ref.key)
        .await
}

/// Reads secrets through the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretResolver {
    client: Client,
}

impl KubeSecretResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretResolver for KubeSecretResolver {
    async fn resolve(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await.map_err(|source| SecretError::Api {
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;

        debug!(namespace, name, key, "Resolved secret");

        let value = if let Some(bytes) = secret.data.as_ref().and_then(|data| data.get(key)) {
            String::from_utf8(bytes.0.clone()).map_err(|_| SecretError::NotUtf8 {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })?
        } else if let Some(value) = secret.string_data.as_ref().and_then(|data| data.get(key)) {
            value.clone()
        } else {
            return Err(SecretError::MissingKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            });
        };

        non_empty(value, namespace, name, key)
    }
}

/// Fixed in-memory secrets, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    values: HashMap<(String, String, String), String>,
}

impl StaticSecretResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, namespace: &str, name: &str, key: &str, value: &str) -> Self {
        self.values.insert(
            (namespace.to_string(), name.to_string(), key.to_string()),
            value.to_string(),
        );
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
        let value = self
            .values
            .get(&(namespace.to_string(), name.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| SecretError::MissingKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            })?;
        non_empty(value, namespace, name, key)
    }
}

fn non_empty(value: String, namespace: &str, name: &str, key: &str) -> Result<String, SecretError> {
    if value.trim().is_empty() {
        return Err(SecretError::Empty {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ref_defaults_namespace() {
        let resolver = StaticSecretResolver::new().with("default", "llm", "apiKey", "sk-1");
        let secret_ref = SecretKeyRef {
            namespace: None,
            name: "llm".to_string(),
            key: "apiKey".to_string(),
        };
        assert_eq!(resolve_ref(&resolver, &secret_ref, "default").await.unwrap(), "sk-1");
    }

    #[tokio::test]
    async fn test_missing_and_empty_secrets_are_errors() {
        let resolver = StaticSecretResolver::new().with("ops", "hook", "url", "  ");
        let err = resolver.resolve("ops", "hook", "url").await.unwrap_err();
        assert!(matches!(err, SecretError::Empty { .. }));

        let err = resolver.resolve("ops", "hook", "secret").await.unwrap_err();
        assert!(matches!(err, SecretError::MissingKey { .. }));
    }
}
