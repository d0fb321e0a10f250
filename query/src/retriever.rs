//! Graph-augmented context retrieval.
//!
//! A query is embedded, seeded through vector search, expanded along the
//! chunk graph and re-ranked by similarity to the query. Any failure on that
//! path falls back to a plain vector search; a failure there too yields an
//! empty, explicitly failed result.

use chunkgraph_core::config::{GraphConfig, TimeoutConfig};
use chunkgraph_core::error::{ChunkGraphError, ErrorCode};
use chunkgraph_core::metrics::{MetricsCollector, RetrievalPath};
use chunkgraph_core::model::{ContextItem, DocumentId, UserId};
use chunkgraph_core::service::{
    embed_with_deadline, search_with_deadline, EmbeddingError, EmbeddingService, Filter,
    VectorIndex, VectorIndexError,
};
use chunkgraph_core::similarity::cosine_similarity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use storage::{ChunkGraph, ChunkNode, GraphStore};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextQuery {
    pub text: String,
    pub user_id: Option<UserId>,
    pub document_ids: Option<Vec<DocumentId>>,
    pub max_results: usize,
}

impl ContextQuery {
    pub fn new(text: impl Into<String>, max_results: usize) -> Self {
        Self {
            text: text.into(),
            user_id: None,
            document_ids: None,
            max_results,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_documents<I, S>(mut self, document_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DocumentId>,
    {
        self.document_ids = Some(document_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(&self) -> Filter {
        Filter::new(self.user_id.clone(), self.document_ids.clone())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),
}

impl ChunkGraphError for RetrievalError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RetrievalError::Embedding(err) => err.error_code(),
            RetrievalError::VectorIndex(err) => err.error_code(),
        }
    }
}

/// Outcome of a retrieval, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Graph-expanded and re-ranked results.
    Graph(Vec<ContextItem>),
    /// The graph path failed; items come from a plain vector search.
    Degraded {
        items: Vec<ContextItem>,
        cause: RetrievalError,
    },
    /// Both the graph path and the fallback search failed.
    Failed {
        primary: RetrievalError,
        fallback: RetrievalError,
    },
}

impl Retrieval {
    pub fn items(&self) -> &[ContextItem] {
        match self {
            Retrieval::Graph(items) | Retrieval::Degraded { items, .. } => items,
            Retrieval::Failed { .. } => &[],
        }
    }

    pub fn into_items(self) -> Vec<ContextItem> {
        match self {
            Retrieval::Graph(items) | Retrieval::Degraded { items, .. } => items,
            Retrieval::Failed { .. } => Vec::new(),
        }
    }

    pub fn path(&self) -> RetrievalPath {
        match self {
            Retrieval::Graph(_) => RetrievalPath::Graph,
            Retrieval::Degraded { .. } => RetrievalPath::Degraded,
            Retrieval::Failed { .. } => RetrievalPath::Failed,
        }
    }
}

pub struct ContextRetriever {
    store: Arc<GraphStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    config: GraphConfig,
    timeouts: TimeoutConfig,
    metrics: Option<MetricsCollector>,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<GraphStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            config: GraphConfig::default(),
            timeouts: TimeoutConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Retrieve up to `query.max_results` passages, best first. Never fails;
    /// see [`Retrieval`] for how failures surface.
    pub async fn retrieve(&self, query: &ContextQuery) -> Retrieval {
        if query.max_results == 0 {
            return Retrieval::Graph(Vec::new());
        }

        let start = Instant::now();
        let filter = query.filter();

        let query_embedding = embed_with_deadline(
            self.embedder.as_ref(),
            &query.text,
            self.timeouts.embedding(),
        )
        .await;
        let primary = match &query_embedding {
            Ok(embedding) => self.graph_retrieve(embedding, &filter, query.max_results).await,
            Err(err) => Err(RetrievalError::from(err.clone())),
        };

        let outcome = match primary {
            Ok(items) => Retrieval::Graph(items),
            Err(cause) => {
                warn!(error = %cause, "graph retrieval failed; falling back to vector search");
                match self
                    .vector_only(query, &filter, query_embedding.ok())
                    .await
                {
                    Ok(items) => Retrieval::Degraded { items, cause },
                    Err(fallback) => {
                        error!(
                            primary = %cause,
                            fallback = %fallback,
                            "retrieval failed; returning no context"
                        );
                        Retrieval::Failed {
                            primary: cause,
                            fallback,
                        }
                    }
                }
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_retrieval(outcome.path(), start.elapsed().as_micros() as u64);
        }
        outcome
    }

    async fn graph_retrieve(
        &self,
        query_embedding: &[f32],
        filter: &Filter,
        max_results: usize,
    ) -> Result<Vec<ContextItem>, RetrievalError> {
        let hits = search_with_deadline(
            self.index.as_ref(),
            query_embedding,
            self.config.seed_width,
            filter,
            self.timeouts.vector_index(),
        )
        .await?;

        let graph = self.store.snapshot().await;
        let seeds: Vec<Arc<ChunkNode>> = hits
            .iter()
            .filter_map(|hit| graph.node(&hit.id).cloned())
            .collect();
        debug!(hits = hits.len(), seeds = seeds.len(), "seeded from vector search");

        let candidates = self.expand(&graph, seeds, query_embedding, filter).await?;

        let mut items = Vec::with_capacity(candidates.len());
        for node in &candidates {
            let embedding = node
                .embedding_or_fetch(self.embedder.as_ref(), self.timeouts.embedding())
                .await?;
            items.push(ContextItem {
                id: node.id().to_string(),
                text: node.text().to_string(),
                score: cosine_similarity(query_embedding, embedding),
                document_id: node.document_id().to_string(),
            });
        }
        rank(&mut items);
        items.truncate(max_results);
        Ok(items)
    }

    /// Breadth-first expansion from each seed over one graph version.
    ///
    /// Seeds are marked visited up front and `visited` is shared across
    /// seeds, so every node is admitted at most once.
    async fn expand(
        &self,
        graph: &ChunkGraph,
        seeds: Vec<Arc<ChunkNode>>,
        query_embedding: &[f32],
        filter: &Filter,
    ) -> Result<Vec<Arc<ChunkNode>>, RetrievalError> {
        let mut visited: HashSet<String> = HashSet::new();
        let seeds: Vec<Arc<ChunkNode>> = seeds
            .into_iter()
            .filter(|node| visited.insert(node.id().to_string()))
            .collect();
        let mut candidates = seeds.clone();

        for seed in seeds {
            let mut frontier = vec![seed];
            for _ in 0..self.config.max_hops {
                let mut next = Vec::new();
                for node in &frontier {
                    let neighbors: Vec<Arc<ChunkNode>> = graph
                        .neighbors(node.id())
                        .into_iter()
                        .map(|(neighbor, _)| neighbor)
                        .filter(|neighbor| {
                            !visited.contains(neighbor.id())
                                && filter.matches(neighbor.document_id(), neighbor.user_id())
                        })
                        .cloned()
                        .collect();

                    let mut scored = Vec::with_capacity(neighbors.len());
                    for neighbor in neighbors {
                        let embedding = neighbor
                            .embedding_or_fetch(self.embedder.as_ref(), self.timeouts.embedding())
                            .await?;
                        let score = cosine_similarity(query_embedding, embedding);
                        if score > self.config.similarity_threshold {
                            scored.push((score, neighbor));
                        }
                    }
                    scored.sort_by(|(sa, a), (sb, b)| {
                        sb.partial_cmp(sa)
                            .unwrap_or(Ordering::Equal)
                            .then_with(|| a.id().cmp(b.id()))
                    });

                    for (_, neighbor) in scored.into_iter().take(self.config.max_neighbors) {
                        if visited.insert(neighbor.id().to_string()) {
                            candidates.push(neighbor.clone());
                            next.push(neighbor);
                        }
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }

        debug!(candidates = candidates.len(), "graph expansion finished");
        Ok(candidates)
    }

    async fn vector_only(
        &self,
        query: &ContextQuery,
        filter: &Filter,
        query_embedding: Option<Vec<f32>>,
    ) -> Result<Vec<ContextItem>, RetrievalError> {
        let query_embedding = match query_embedding {
            Some(embedding) => embedding,
            None => {
                embed_with_deadline(self.embedder.as_ref(), &query.text, self.timeouts.embedding())
                    .await?
            }
        };
        let hits = search_with_deadline(
            self.index.as_ref(),
            &query_embedding,
            query.max_results,
            filter,
            self.timeouts.vector_index(),
        )
        .await?;
        Ok(hits
            .into_iter()
            .take(query.max_results)
            .map(ContextItem::from)
            .collect())
    }
}

/// Descending score, ties broken by id.
fn rank(items: &mut [ContextItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, score: f64) -> ContextItem {
        ContextItem {
            id: id.to_string(),
            text: String::new(),
            score,
            document_id: "d".to_string(),
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_id() {
        let mut items = vec![item("b", 0.5), item("c", 0.9), item("a", 0.5)];
        rank(&mut items);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_failed_retrieval_has_no_items() {
        let outcome = Retrieval::Failed {
            primary: EmbeddingError::Backend("down".into()).into(),
            fallback: VectorIndexError::Backend("down".into()).into(),
        };
        assert!(outcome.items().is_empty());
        assert_eq!(outcome.path(), RetrievalPath::Failed);
        if let Retrieval::Failed { primary, fallback } = &outcome {
            assert_eq!(primary.error_code(), ErrorCode::Unavailable);
            assert_eq!(fallback.error_code(), ErrorCode::Unavailable);
        }
        assert!(outcome.into_items().is_empty());
    }

    #[test]
    fn test_query_filter_ignores_empty_document_list() {
        let query = ContextQuery::new("q", 3)
            .with_user("u1")
            .with_documents(Vec::<String>::new());
        let filter = query.filter();
        assert_eq!(filter.user_id.as_deref(), Some("u1"));
        assert!(filter.document_ids.is_none());
    }

    #[test]
    fn test_query_deserializes_with_defaults() {
        let query: ContextQuery =
            serde_json::from_str(r#"{"text": "ownership", "max_results": 4}"#).unwrap();
        assert_eq!(query, ContextQuery::new("ownership", 4));
    }
}
