use std::sync::Arc;
use tracing::info;

use super::{ChatModel, DeepSeekProvider, GeminiProvider};
use crate::config::{ConfigError, LlmConfig, ProviderKind};
use crate::secrets::{resolve_ref, SecretResolver};

/// Build the configured chat model, resolving its API key.
///
/// Any credential failure is returned before a single stage runs.
pub async fn build_chat_model(
    config: &LlmConfig,
    secrets: &dyn SecretResolver,
    secret_namespace: &str,
) -> Result<Arc<dyn ChatModel>, ConfigError> {
    let model: Arc<dyn ChatModel> = match config.provider {
        ProviderKind::Deepseek => {
            let spec = config.deepseek.as_ref().ok_or_else(|| {
                ConfigError::Invalid("llm.deepseek is not configured".to_string())
            })?;
            let api_key = resolve_ref(secrets, &spec.api_key_secret_ref, secret_namespace).await?;
            let mut provider = DeepSeekProvider::new(api_key, &spec.model_name)?;
            if let Some(base_url) = &spec.base_url {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        }
        ProviderKind::Gemini => {
            let spec = config.gemini.as_ref().ok_or_else(|| {
                ConfigError::Invalid("llm.gemini is not configured".to_string())
            })?;
            let api_key = resolve_ref(secrets, &spec.api_key_secret_ref, secret_namespace).await?;
            let mut provider =
                GeminiProvider::new(api_key, &spec.model_name)?.with_thinking(spec.thinking);
            if let Some(base_url) = &spec.base_url {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        }
    };

    info!(provider = model.name(), model = model.model(), "Chat model ready");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeepSeekConfig, WorkingMode};
    use crate::incident::Language;
    use crate::secrets::{SecretKeyRef, StaticSecretResolver};

    fn llm_config() -> LlmConfig {
        LlmConfig {
            provider: ProviderKind::Deepseek,
            working_mode: WorkingMode::Multi,
            language: Language::En,
            max_steps: 6,
            max_tool_rounds: 4,
            max_tokens: 2000,
            deepseek: Some(DeepSeekConfig {
                model_name: "deepseek-chat".to_string(),
                base_url: None,
                api_key_secret_ref: SecretKeyRef {
                    namespace: None,
                    name: "llm".to_string(),
                    key: "apiKey".to_string(),
                },
            }),
            gemini: None,
        }
    }

    #[tokio::test]
    async fn test_builds_deepseek_with_resolved_key() {
        let secrets = StaticSecretResolver::new().with("default", "llm", "apiKey", "sk-1");
        let model = build_chat_model(&llm_config(), &secrets, "default").await.unwrap();
        assert_eq!(model.name(), "deepseek");
        assert_eq!(model.model(), "deepseek-chat");
    }

    #[tokio::test]
    async fn test_unresolvable_key_is_fatal() {
        let secrets = StaticSecretResolver::new();
        let err = build_chat_model(&llm_config(), &secrets, "default")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Secret(_)));
    }
}
