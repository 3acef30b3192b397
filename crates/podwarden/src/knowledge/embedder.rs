//! Dense embedding providers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ai::AiError;

/// Volcengine Ark API base
pub const ARK_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// OpenAI API base
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns text into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Embed a batch, one vector per input in input order.
    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError>;

    /// Embed a single text. An empty vector is an error.
    async fn embed(&self, text: &str) -> Result<Vec<f64>, AiError> {
        let vectors = self.embed_strings(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or(AiError::Empty(self.name()))
    }
}

/// Narrow a batch of embeddings to `f32`, row by row.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_f32_rows(rows: &[Vec<f64>]) -> Vec<Vec<f32>> {
    rows.iter()
        .map(|row| row.iter().map(|v| *v as f32).collect())
        .collect()
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Embedder for `/embeddings` endpoints (Ark and OpenAI share the shape).
pub struct OpenAiCompatibleEmbedder {
    provider: &'static str,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleEmbedder {
    fn build(
        provider: &'static str,
        base_url: &str,
        api_key: String,
        model: String,
    ) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| AiError::Http { provider, source })?;
        Ok(Self {
            provider,
            client,
            api_key,
            base_url: base_url.to_string(),
            model,
        })
    }

    /// Volcengine Ark embeddings.
    pub fn ark(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AiError> {
        Self::build("ark", ARK_BASE_URL, api_key.into(), model.into())
    }

    /// OpenAI embeddings.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AiError> {
        Self::build("openai", OPENAI_BASE_URL, api_key.into(), model.into())
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    fn name(&self) -> &'static str {
        self.provider
    }

    async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
        let provider = self.provider;
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|source| AiError::Http { provider, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| AiError::Http { provider, source })?;
        if !status.is_success() {
            return Err(AiError::Api {
                provider,
                status: status.as_u16(),
                message: body,
            });
        }

        let mut parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|e| AiError::Parse {
                provider,
                reason: e.to_string(),
            })?;
        if parsed.data.len() != texts.len() {
            return Err(AiError::Parse {
                provider,
                reason: format!("expected {} embeddings, got {}", texts.len(), parsed.data.len()),
            });
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_to_f32_rows_keeps_shape() {
        let rows = vec![vec![0.5, -1.25], vec![], vec![3.0]];
        assert_eq!(to_f32_rows(&rows), vec![vec![0.5_f32, -1.25], vec![], vec![3.0]]);
    }

    #[tokio::test]
    async fn test_embed_single_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer ark-key"))
            .and(body_partial_json(json!({"model": "doubao-embedding", "input": ["OOMKilled"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiCompatibleEmbedder::ark("ark-key", "doubao-embedding")
            .unwrap()
            .with_base_url(server.uri());
        assert_eq!(embedder.embed("OOMKilled").await.unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_empty_embedding_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": []}]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiCompatibleEmbedder::openai("k", "text-embedding-3-small")
            .unwrap()
            .with_base_url(server.uri());
        assert!(matches!(embedder.embed("x").await, Err(AiError::Empty("openai"))));
    }

    #[tokio::test]
    async fn test_batch_reordered_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [2.0]},
                    {"index": 0, "embedding": [1.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiCompatibleEmbedder::openai("k", "m")
            .unwrap()
            .with_base_url(server.uri());
        let rows = embedder
            .embed_strings(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![1.0], vec![2.0]]);
    }
}
