use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::embedder::{to_f32_rows, Embedder};
use super::store::{HybridSearchRequest, KnowledgeStore, LoadState, RerankWeights};
use super::{KnowledgeDocument, RetrievalError};
use crate::ai::AiError;

/// Minimum number of candidates fetched per search leg.
const MIN_CANDIDATES: usize = 5;

#[derive(Debug, Clone)]
pub struct RetrieverSettings {
    pub collection: String,
    pub top_k: usize,
    pub weights: RerankWeights,
    /// Upper bound on waiting for the collection to become ready
    pub load_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            collection: "knowledge".to_string(),
            top_k: 5,
            weights: RerankWeights::default(),
            load_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Dense + lexical retriever over a [`KnowledgeStore`].
///
/// Construction loads the collection and waits, bounded by
/// `load_timeout`, until the store reports it ready.
pub struct HybridRetriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    settings: RetrieverSettings,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("store", &self.store.name())
            .field("embedder", &self.embedder.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl HybridRetriever {
    pub async fn connect(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        settings: RetrieverSettings,
    ) -> Result<Self, RetrievalError> {
        let load = wait_until_loaded(store.as_ref(), &settings.collection, settings.poll_interval);
        match tokio::time::timeout(settings.load_timeout, load).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(collection = %settings.collection, timeout = ?settings.load_timeout, "Knowledge collection never became ready");
                return Err(RetrievalError::CollectionNotReady {
                    collection: settings.collection.clone(),
                    waited: settings.load_timeout,
                });
            }
        }

        info!(
            store = store.name(),
            collection = %settings.collection,
            top_k = settings.top_k,
            "Knowledge base ready"
        );
        Ok(Self {
            store,
            embedder,
            settings,
        })
    }

    #[must_use]
    pub fn top_k(&self) -> usize {
        self.settings.top_k
    }

    /// Retrieve at most `top_k` documents for `query`.
    #[instrument(skip_all, fields(collection = %self.settings.collection))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<KnowledgeDocument>, RetrievalError> {
        let dense = self.embedder.embed(query).await?;
        let dense_vector = to_f32_rows(&[dense])
            .into_iter()
            .next()
            .ok_or(RetrievalError::Embedding(AiError::Empty(self.embedder.name())))?;

        let request = HybridSearchRequest {
            collection: self.settings.collection.clone(),
            top_k: self.settings.top_k,
            candidate_limit: self.settings.top_k.max(MIN_CANDIDATES),
            dense_vector,
            sparse_query: query.to_string(),
            weights: self.settings.weights,
        };

        let mut hits = self.store.hybrid_search(&request).await?;
        hits.truncate(self.settings.top_k);
        debug!(hits = hits.len(), "Knowledge retrieved");

        Ok(hits
            .into_iter()
            .map(|hit| KnowledgeDocument {
                id: hit.id,
                content: hit.text,
            })
            .collect())
    }
}

async fn wait_until_loaded(
    store: &dyn KnowledgeStore,
    collection: &str,
    poll_interval: Duration,
) -> Result<(), RetrievalError> {
    let started = Instant::now();
    store.load_collection(collection).await?;
    loop {
        match store.load_state(collection).await? {
            LoadState::Loaded => {
                debug!(collection, elapsed = ?started.elapsed(), "Collection loaded");
                return Ok(());
            }
            LoadState::NotExist => {
                return Err(RetrievalError::CollectionMissing {
                    collection: collection.to_string(),
                });
            }
            LoadState::Loading | LoadState::NotLoaded => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::SearchHit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedEmbedder(Vec<f64>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn embed_strings(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, AiError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct FakeStore {
        ready_after: usize,
        polls: AtomicUsize,
        hits: Vec<SearchHit>,
        seen: Mutex<Option<HybridSearchRequest>>,
    }

    impl FakeStore {
        fn new(ready_after: usize, hits: Vec<SearchHit>) -> Self {
            Self {
                ready_after,
                polls: AtomicUsize::new(0),
                hits,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl KnowledgeStore for FakeStore {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn load_collection(&self, _collection: &str) -> Result<(), RetrievalError> {
            Ok(())
        }

        async fn load_state(&self, _collection: &str) -> Result<LoadState, RetrievalError> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(if polls >= self.ready_after {
                LoadState::Loaded
            } else {
                LoadState::Loading
            })
        }

        async fn hybrid_search(
            &self,
            request: &HybridSearchRequest,
        ) -> Result<Vec<SearchHit>, RetrievalError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(self.hits.clone())
        }
    }

    fn hits(n: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| SearchHit {
                id: i.to_string(),
                text: format!("article {i}"),
                score: 1.0,
            })
            .collect()
    }

    fn settings(top_k: usize, load_timeout: Duration) -> RetrieverSettings {
        RetrieverSettings {
            collection: "kb".to_string(),
            top_k,
            load_timeout,
            poll_interval: Duration::from_millis(10),
            ..RetrieverSettings::default()
        }
    }

    #[tokio::test]
    async fn test_retrieve_is_bounded_by_top_k() {
        let store = Arc::new(FakeStore::new(2, hits(9)));
        let retriever = HybridRetriever::connect(
            store.clone(),
            Arc::new(FixedEmbedder(vec![0.25, 0.5])),
            settings(3, Duration::from_secs(5)),
        )
        .await
        .unwrap();

        let docs = retriever.retrieve("OOMKilled").await.unwrap();

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].content, "article 0");
        let seen = store.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.dense_vector, vec![0.25_f32, 0.5]);
        assert_eq!(seen.sparse_query, "OOMKilled");
        assert_eq!(seen.candidate_limit, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fails_when_collection_never_ready() {
        let store = Arc::new(FakeStore::new(usize::MAX, vec![]));
        let err = HybridRetriever::connect(
            store,
            Arc::new(FixedEmbedder(vec![1.0])),
            settings(3, Duration::from_secs(2)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RetrievalError::CollectionNotReady { .. }));
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let store = Arc::new(FakeStore::new(0, hits(1)));
        let retriever = HybridRetriever::connect(
            store,
            Arc::new(FixedEmbedder(vec![])),
            settings(3, Duration::from_secs(5)),
        )
        .await
        .unwrap();

        let err = retriever.retrieve("x").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(AiError::Empty("fixed"))));
    }
}
