//! Milvus knowledge store over the REST v2 API.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::store::{HybridSearchRequest, KnowledgeStore, LoadState, SearchHit};
use super::RetrievalError;

const STORE: &str = "milvus";

/// Name of the dense vector field.
pub const DENSE_FIELD: &str = "dense";
/// Name of the sparse (BM25) field.
pub const SPARSE_FIELD: &str = "sparse";
/// Column holding the article text.
pub const TEXT_FIELD: &str = "text";

const IVF_NPROBE: u32 = 10;
const SPARSE_DROP_RATIO: f32 = 0.2;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStateData {
    load_state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionRequest<'a> {
    collection_name: &'a str,
}

/// Milvus REST client.
pub struct MilvusStore {
    client: Client,
    address: String,
    token: Option<String>,
}

impl MilvusStore {
    pub fn new(address: impl Into<String>) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| RetrievalError::Http {
                store: STORE,
                source,
            })?;
        Ok(Self {
            client,
            address: address.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Authenticate as `user:password`.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.token = Some(format!("{username}:{password}"));
        self
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Option<T>, RetrievalError> {
        let mut request = self
            .client
            .post(format!("{}/v2/vectordb/{endpoint}", self.address))
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| RetrievalError::Http {
            store: STORE,
            source,
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|source| RetrievalError::Http {
            store: STORE,
            source,
        })?;
        if !status.is_success() {
            return Err(RetrievalError::Store {
                store: STORE,
                code: i64::from(status.as_u16()),
                message: text,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_str(&text).map_err(|e| RetrievalError::Parse {
                store: STORE,
                reason: e.to_string(),
            })?;
        if envelope.code != 0 {
            return Err(RetrievalError::Store {
                store: STORE,
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }

    fn search_body(request: &HybridSearchRequest) -> Value {
        json!({
            "collectionName": request.collection,
            "search": [
                {
                    "data": [request.dense_vector],
                    "annsField": DENSE_FIELD,
                    "metricType": "COSINE",
                    "limit": request.candidate_limit,
                    "params": {"nprobe": IVF_NPROBE}
                },
                {
                    "data": [request.sparse_query],
                    "annsField": SPARSE_FIELD,
                    "metricType": "BM25",
                    "limit": request.candidate_limit,
                    "params": {"drop_ratio_search": SPARSE_DROP_RATIO}
                }
            ],
            "rerank": {
                "strategy": "weighted",
                "params": {"weights": [request.weights.dense, request.weights.sparse]}
            },
            "limit": request.top_k,
            "outputFields": [TEXT_FIELD]
        })
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl KnowledgeStore for MilvusStore {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn load_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        self.post::<_, Value>(
            "collections/load",
            &CollectionRequest {
                collection_name: collection,
            },
        )
        .await?;
        Ok(())
    }

    async fn load_state(&self, collection: &str) -> Result<LoadState, RetrievalError> {
        let data: Option<LoadStateData> = self
            .post(
                "collections/get_load_state",
                &CollectionRequest {
                    collection_name: collection,
                },
            )
            .await?;
        let state = match data.as_ref().map(|d| d.load_state.as_str()) {
            Some("LoadStateLoaded") => LoadState::Loaded,
            Some("LoadStateLoading") => LoadState::Loading,
            Some("LoadStateNotExist") => LoadState::NotExist,
            _ => LoadState::NotLoaded,
        };
        debug!(collection, ?state, "Milvus load state");
        Ok(state)
    }

    #[instrument(skip_all, fields(collection = %request.collection, top_k = request.top_k))]
    async fn hybrid_search(
        &self,
        request: &HybridSearchRequest,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let rows: Vec<Value> = self
            .post("entities/hybrid_search", &Self::search_body(request))
            .await?
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let text = row
                .get(TEXT_FIELD)
                .and_then(Value::as_str)
                .ok_or_else(|| RetrievalError::Parse {
                    store: STORE,
                    reason: format!("row without {TEXT_FIELD} column"),
                })?;
            #[allow(clippy::cast_possible_truncation)]
            let score = row.get("distance").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            hits.push(SearchHit {
                id: row.get("id").map(id_to_string).unwrap_or_default(),
                text: text.to_string(),
                score,
            });
        }
        hits.truncate(request.top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::RerankWeights;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> HybridSearchRequest {
        HybridSearchRequest {
            collection: "runbooks".to_string(),
            top_k: 2,
            candidate_limit: 5,
            dense_vector: vec![0.5, 0.25],
            sparse_query: "OOMKilled".to_string(),
            weights: RerankWeights::default(),
        }
    }

    #[test]
    fn test_search_body_layout() {
        let body = MilvusStore::search_body(&request());
        assert_eq!(body["search"][0]["annsField"], "dense");
        assert_eq!(body["search"][0]["metricType"], "COSINE");
        assert_eq!(body["search"][0]["params"]["nprobe"], 10);
        assert_eq!(body["search"][1]["annsField"], "sparse");
        assert_eq!(body["search"][1]["metricType"], "BM25");
        assert_eq!(body["search"][1]["data"][0], "OOMKilled");
        assert_eq!(body["rerank"]["strategy"], "weighted");
        assert_eq!(body["limit"], 2);
        assert_eq!(body["outputFields"][0], "text");
    }

    #[tokio::test]
    async fn test_hybrid_search_parses_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/hybrid_search"))
            .and(header("authorization", "Bearer root:Milvus"))
            .and(body_partial_json(json!({"collectionName": "runbooks"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": [
                    {"id": 42, "distance": 0.91, "text": "Raise memory limits for OOMKilled pods"},
                    {"id": "7", "distance": 0.55, "text": "Check image tags"},
                    {"id": 3, "distance": 0.10, "text": "extra"}
                ]
            })))
            .mount(&server)
            .await;

        let store = MilvusStore::new(server.uri())
            .unwrap()
            .with_credentials("root", "Milvus");
        let hits = store.hybrid_search(&request()).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "42");
        assert_eq!(hits[1].id, "7");
        assert_eq!(hits[0].text, "Raise memory limits for OOMKilled pods");
    }

    #[tokio::test]
    async fn test_nonzero_code_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/hybrid_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 1100,
                "message": "collection not loaded"
            })))
            .mount(&server)
            .await;

        let store = MilvusStore::new(server.uri()).unwrap();
        let err = store.hybrid_search(&request()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Store { code: 1100, .. }));
    }

    #[tokio::test]
    async fn test_load_state_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/get_load_state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"loadProgress": 100, "loadState": "LoadStateLoaded"}
            })))
            .mount(&server)
            .await;

        let store = MilvusStore::new(server.uri()).unwrap();
        assert_eq!(store.load_state("runbooks").await.unwrap(), LoadState::Loaded);
    }
}
