//! Operations knowledge retrieval.
//!
//! A [`HybridRetriever`] embeds the query, asks a [`KnowledgeStore`] for a
//! dense (cosine) and a lexical (BM25) candidate list, fuses them with a
//! weighted reranker and returns at most `top_k` documents.
//!
//! Two stores are available: [`MilvusStore`] talks to Milvus over its REST
//! API, [`InlineStore`] keeps a small article set in memory.

pub mod embedder;
pub mod inline;
pub mod milvus;
pub mod rerank;
pub mod retriever;
pub mod store;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::ai::AiError;

pub use embedder::{to_f32_rows, Embedder, OpenAiCompatibleEmbedder};
pub use inline::InlineStore;
pub use milvus::MilvusStore;
pub use rerank::weighted_rerank;
pub use retriever::{HybridRetriever, RetrieverSettings};
pub use store::{HybridSearchRequest, KnowledgeStore, LoadState, RerankWeights, SearchHit};

/// One retrieved knowledge article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub content: String,
}

/// Render documents as the knowledge block of a prompt.
#[must_use]
pub fn render_documents(documents: &[KnowledgeDocument]) -> String {
    documents
        .iter()
        .map(|doc| doc.content.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] AiError),

    #[error("{store} request failed: {source}")]
    Http {
        store: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{store} error {code}: {message}")]
    Store {
        store: &'static str,
        code: i64,
        message: String,
    },

    #[error("failed to parse {store} response: {reason}")]
    Parse {
        store: &'static str,
        reason: String,
    },

    #[error("collection {collection} does not exist")]
    CollectionMissing { collection: String },

    #[error("collection {collection} not ready after {waited:?}")]
    CollectionNotReady {
        collection: String,
        waited: Duration,
    },

    #[error("invalid knowledge documents: {0}")]
    Documents(String),
}
