use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RetrievalError;

/// Rerank weights for the dense and the lexical list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankWeights {
    pub dense: f32,
    pub sparse: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            dense: 0.8,
            sparse: 0.3,
        }
    }
}

impl From<[f32; 2]> for RerankWeights {
    fn from([dense, sparse]: [f32; 2]) -> Self {
        Self { dense, sparse }
    }
}

/// Parameters of one hybrid search.
#[derive(Debug, Clone)]
pub struct HybridSearchRequest {
    pub collection: String,
    /// Maximum number of fused results
    pub top_k: usize,
    /// Candidates fetched per leg before fusion
    pub candidate_limit: usize,
    pub dense_vector: Vec<f32>,
    pub sparse_query: String,
    pub weights: RerankWeights,
}

/// One ranked row: identifier, the `text` column and its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Readiness of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotExist,
    NotLoaded,
    Loading,
    Loaded,
}

/// A store that holds the knowledge corpus.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ask the store to make `collection` searchable. May return before it is.
    async fn load_collection(&self, collection: &str) -> Result<(), RetrievalError>;

    async fn load_state(&self, collection: &str) -> Result<LoadState, RetrievalError>;

    /// Dense + lexical search fused by weighted rerank, at most `top_k` rows.
    async fn hybrid_search(
        &self,
        request: &HybridSearchRequest,
    ) -> Result<Vec<SearchHit>, RetrievalError>;
}
