//! In-memory knowledge store for small article sets.
//!
//! Articles are read from a YAML (or JSON) list of `{id, content}`.
//! Loading the collection embeds every article; searches then run cosine
//! similarity and Okapi BM25 over the same corpus and fuse the two lists
//! with [`weighted_rerank`].

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::embedder::{to_f32_rows, Embedder};
use super::rerank::weighted_rerank;
use super::store::{HybridSearchRequest, KnowledgeStore, LoadState, SearchHit};
use super::{KnowledgeDocument, RetrievalError};

const STORE: &str = "inline";

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Split text into lowercase terms. CJK ideographs are one term each.
fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            terms.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// Okapi BM25 index over the corpus.
struct Bm25Index {
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<f32>,
    avg_len: f32,
    doc_freq: HashMap<String, u32>,
}

impl Bm25Index {
    #[allow(clippy::cast_precision_loss)]
    fn build(documents: &[KnowledgeDocument]) -> Self {
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for doc in documents {
            let terms = tokenize(&doc.content);
            doc_lens.push(terms.len() as f32);
            let mut freqs: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *freqs.entry(term).or_default() += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(freqs);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<f32>() / doc_lens.len() as f32
        };

        Self {
            term_freqs,
            doc_lens,
            avg_len,
            doc_freq,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn scores(&self, query: &str) -> Vec<f32> {
        let n = self.term_freqs.len() as f32;
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(freqs, len)| {
                query_terms
                    .iter()
                    .filter_map(|term| {
                        let tf = *freqs.get(term)? as f32;
                        let df = *self.doc_freq.get(term)? as f32;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = if self.avg_len > 0.0 { len / self.avg_len } else { 0.0 };
                        let saturation = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm);
                        Some(idf * tf * (BM25_K1 + 1.0) / saturation)
                    })
                    .sum()
            })
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Rank documents by score (descending, ties by corpus order) and keep `limit`.
fn top_hits(
    documents: &[KnowledgeDocument],
    scores: &[f32],
    limit: usize,
    positive_only: bool,
) -> Vec<SearchHit> {
    let mut order: Vec<usize> = (0..documents.len())
        .filter(|&i| !positive_only || scores[i] > 0.0)
        .collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
        .into_iter()
        .take(limit)
        .map(|i| SearchHit {
            id: documents[i].id.clone(),
            text: documents[i].content.clone(),
            score: scores[i],
        })
        .collect()
}

/// Knowledge store backed by an in-memory article list.
pub struct InlineStore {
    collection: String,
    documents: Vec<KnowledgeDocument>,
    bm25: Bm25Index,
    embedder: Arc<dyn Embedder>,
    vectors: RwLock<Option<Vec<Vec<f32>>>>,
}

impl InlineStore {
    pub fn new(
        collection: impl Into<String>,
        documents: Vec<KnowledgeDocument>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrievalError> {
        if let Some(doc) = documents.iter().find(|d| d.id.trim().is_empty()) {
            return Err(RetrievalError::Documents(format!(
                "document without id: {}",
                doc.content.chars().take(40).collect::<String>()
            )));
        }
        let bm25 = Bm25Index::build(&documents);
        Ok(Self {
            collection: collection.into(),
            documents,
            bm25,
            embedder,
            vectors: RwLock::new(None),
        })
    }

    /// Read articles from a YAML or JSON file.
    pub fn from_file(
        collection: impl Into<String>,
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Documents(format!("failed to read {}: {e}", path.display()))
        })?;
        let documents: Vec<KnowledgeDocument> = serde_yaml::from_str(&raw).map_err(|e| {
            RetrievalError::Documents(format!("failed to parse {}: {e}", path.display()))
        })?;
        Self::new(collection, documents, embedder)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl KnowledgeStore for InlineStore {
    fn name(&self) -> &'static str {
        STORE
    }

    async fn load_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        if collection != self.collection {
            return Err(RetrievalError::CollectionMissing {
                collection: collection.to_string(),
            });
        }
        if self.vectors.read().await.is_some() {
            return Ok(());
        }

        let texts: Vec<String> = self.documents.iter().map(|d| d.content.clone()).collect();
        let rows = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_strings(&texts).await?
        };
        if rows.iter().any(Vec::is_empty) {
            return Err(RetrievalError::Embedding(crate::ai::AiError::Empty(
                self.embedder.name(),
            )));
        }

        *self.vectors.write().await = Some(to_f32_rows(&rows));
        info!(collection, documents = self.documents.len(), "Inline knowledge loaded");
        Ok(())
    }

    async fn load_state(&self, collection: &str) -> Result<LoadState, RetrievalError> {
        if collection != self.collection {
            return Ok(LoadState::NotExist);
        }
        Ok(if self.vectors.read().await.is_some() {
            LoadState::Loaded
        } else {
            LoadState::NotLoaded
        })
    }

    async fn hybrid_search(
        &self,
        request: &HybridSearchRequest,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        let guard = self.vectors.read().await;
        let vectors = guard.as_ref().ok_or_else(|| RetrievalError::Store {
            store: STORE,
            code: 1,
            message: format!("collection {} is not loaded", request.collection),
        })?;

        let dense_scores: Vec<f32> = vectors
            .iter()
            .map(|v| cosine(v, &request.dense_vector))
            .collect();
        let dense = top_hits(&self.documents, &dense_scores, request.candidate_limit, false);

        let lexical_scores = self.bm25.scores(&request.sparse_query);
        let sparse = top_hits(&self.documents, &lexical_scores, request.candidate_limit, true);

        Ok(weighted_rerank(
            &[
                (request.weights.dense, dense.as_slice()),
                (request.weights.sparse, sparse.as_slice()),
            ],
            request.top_k,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;
    use crate::knowledge::store::RerankWeights;

    /// Embeds by counting a few fixed keywords.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn name(&self) -> &'static str {
            "keyword"
        }

        async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["memory", "image", "probe"]
                        .iter()
                        .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                        .chain(std::iter::once(0.1))
                        .collect()
                })
                .collect())
        }
    }

    fn documents() -> Vec<KnowledgeDocument> {
        vec![
            KnowledgeDocument {
                id: "mem".to_string(),
                content: "OOMKilled containers need a higher memory limit".to_string(),
            },
            KnowledgeDocument {
                id: "img".to_string(),
                content: "ImagePullBackOff usually means a wrong image tag".to_string(),
            },
            KnowledgeDocument {
                id: "probe".to_string(),
                content: "Failing liveness probe restarts the container".to_string(),
            },
        ]
    }

    fn request(query: &str, dense: Vec<f32>, top_k: usize) -> HybridSearchRequest {
        HybridSearchRequest {
            collection: "kb".to_string(),
            top_k,
            candidate_limit: 5,
            dense_vector: dense,
            sparse_query: query.to_string(),
            weights: RerankWeights::default(),
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("CrashLoopBackOff: OOM-killed"), vec!["crashloopbackoff", "oom", "killed"]);
        assert_eq!(tokenize("内存不足 pod"), vec!["内", "存", "不", "足", "pod"]);
    }

    #[test]
    fn test_bm25_prefers_matching_document() {
        let index = Bm25Index::build(&documents());
        let scores = index.scores("wrong image tag");
        assert!(scores[1] > 0.0);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[tokio::test]
    async fn test_search_requires_load() {
        let store = InlineStore::new("kb", documents(), Arc::new(KeywordEmbedder)).unwrap();
        assert_eq!(store.load_state("kb").await.unwrap(), LoadState::NotLoaded);
        assert!(store.hybrid_search(&request("memory", vec![1.0, 0.0, 0.0, 0.1], 2)).await.is_err());

        store.load_collection("kb").await.unwrap();
        assert_eq!(store.load_state("kb").await.unwrap(), LoadState::Loaded);
        assert_eq!(store.load_state("other").await.unwrap(), LoadState::NotExist);
    }

    #[tokio::test]
    async fn test_hybrid_search_ranks_and_truncates() {
        let store = InlineStore::new("kb", documents(), Arc::new(KeywordEmbedder)).unwrap();
        store.load_collection("kb").await.unwrap();

        let hits = store
            .hybrid_search(&request("memory limit", vec![1.0, 0.0, 0.0, 0.1], 2))
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "mem");
    }

    #[test]
    fn test_rejects_document_without_id() {
        let docs = vec![KnowledgeDocument {
            id: " ".to_string(),
            content: "orphan".to_string(),
        }];
        assert!(InlineStore::new("kb", docs, Arc::new(KeywordEmbedder)).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.yaml");
        std::fs::write(
            &path,
            "- id: mem\n  content: raise the memory limit\n- id: img\n  content: fix the image tag\n",
        )
        .unwrap();
        let store = InlineStore::from_file("kb", &path, Arc::new(KeywordEmbedder)).unwrap();
        assert_eq!(store.len(), 2);
    }
}
