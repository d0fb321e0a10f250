//! Entry point for applications: one graph store shared by a builder and a
//! retriever, configured from [`EngineConfig`].

use chunkgraph_core::config::{ConfigError, EngineConfig};
use chunkgraph_core::error::{ChunkGraphError, ErrorCode};
use chunkgraph_core::metrics::{MetricsCollector, MetricsSnapshot};
use chunkgraph_core::model::{ContextItem, DocumentId};
use chunkgraph_core::service::{EmbeddingService, VectorIndex};
use ingestion::GraphBuilder;
use query::ContextRetriever;
use std::path::Path;
use std::sync::Arc;
use storage::GraphStore;
use thiserror::Error;
use tracing::info;

pub use chunkgraph_core::{config, embedding, metrics, model, service};
pub use ingestion::{BuildError, BuildReport};
pub use query::{ContextQuery, Retrieval, RetrievalError};
pub use storage::{GraphStats, InMemoryVectorIndex};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ChunkGraphError for EngineError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::Config(_) => ErrorCode::InvalidArgument,
        }
    }
}

pub struct ContextEngine {
    config: EngineConfig,
    store: Arc<GraphStore>,
    builder: GraphBuilder,
    retriever: ContextRetriever,
    metrics: MetricsCollector,
}

impl ContextEngine {
    pub fn new(
        config: EngineConfig,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let store = Arc::new(GraphStore::new());
        let metrics = MetricsCollector::new(config.metrics.max_history);
        let builder = GraphBuilder::new(store.clone(), index.clone(), embedder.clone())
            .with_config(config.graph.clone())
            .with_timeouts(config.timeouts.clone())
            .with_metrics(metrics.clone());
        let retriever = ContextRetriever::new(store.clone(), index, embedder)
            .with_config(config.graph.clone())
            .with_timeouts(config.timeouts.clone())
            .with_metrics(metrics.clone());

        info!(
            similarity_threshold = config.graph.similarity_threshold,
            max_hops = config.graph.max_hops,
            seed_width = config.graph.seed_width,
            "context engine ready"
        );
        Ok(Self {
            config,
            store,
            builder,
            retriever,
            metrics,
        })
    }

    /// Engine configured through [`EngineConfig::load`].
    pub fn from_env(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self, EngineError> {
        Self::new(EngineConfig::load()?, index, embedder)
    }

    pub fn from_config_file(
        path: impl AsRef<Path>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self, EngineError> {
        Self::new(EngineConfig::load_from(path)?, index, embedder)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub async fn rebuild(&self, document_id: Option<&str>) -> Result<BuildReport, BuildError> {
        self.builder.rebuild(document_id).await
    }

    pub async fn rebuild_documents(
        &self,
        document_ids: &[DocumentId],
    ) -> Result<Vec<BuildReport>, BuildError> {
        self.builder.rebuild_documents(document_ids).await
    }

    pub async fn remove_document(&self, document_id: &str) -> Result<BuildReport, BuildError> {
        self.builder.remove_document(document_id).await
    }

    /// Ranked context for `query`. Failures degrade to plain vector search
    /// and, failing that, to an empty list; use [`Self::retrieve_detailed`]
    /// to see which happened.
    pub async fn retrieve(
        &self,
        query: &str,
        user_id: Option<&str>,
        document_ids: Option<&[DocumentId]>,
        max_results: usize,
    ) -> Vec<ContextItem> {
        let mut request = ContextQuery::new(query, max_results);
        request.user_id = user_id.map(str::to_string);
        request.document_ids = document_ids.map(<[DocumentId]>::to_vec);
        self.retrieve_detailed(&request).await.into_items()
    }

    pub async fn retrieve_detailed(&self, query: &ContextQuery) -> Retrieval {
        self.retriever.retrieve(query).await
    }

    pub async fn graph_stats(&self) -> GraphStats {
        self.store.stats().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
