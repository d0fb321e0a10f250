//! Graph construction from corpus snapshots.
//!
//! A build scans the external vector index, turns the records into nodes,
//! makes sure every node involved has an embedding, derives edges, and
//! publishes the result as one graph version. All network I/O happens before
//! the publish; a failure anywhere before it leaves the graph untouched.

use chunkgraph_core::config::{GraphConfig, TimeoutConfig};
use chunkgraph_core::error::{ChunkGraphError, ErrorCode};
use chunkgraph_core::metrics::MetricsCollector;
use chunkgraph_core::model::{ChunkId, ChunkRecord, DocumentId};
use chunkgraph_core::service::{
    scan_with_deadline, EmbeddingError, EmbeddingService, Filter, VectorIndex, VectorIndexError,
};
use chunkgraph_core::similarity::cosine_similarity;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{ChunkNode, Edge, EdgeKind, GraphStats, GraphStore, GraphUpdate, StoreError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to embed chunk {chunk_id}: {source}")]
    Embedding {
        chunk_id: ChunkId,
        #[source]
        source: EmbeddingError,
    },
    #[error("corpus snapshot failed: {0}")]
    VectorIndex(#[from] VectorIndexError),
    #[error("graph update rejected: {0}")]
    Store(#[from] StoreError),
}

impl ChunkGraphError for BuildError {
    fn error_code(&self) -> ErrorCode {
        match self {
            BuildError::Embedding { source, .. } => source.error_code(),
            BuildError::VectorIndex(err) => err.error_code(),
            BuildError::Store(err) => err.error_code(),
        }
    }
}

/// Outcome of one committed build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// `None` for a full rebuild.
    pub document_id: Option<DocumentId>,
    pub nodes_removed: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    /// Graph totals after the commit.
    pub stats: GraphStats,
    pub elapsed: Duration,
}

pub struct GraphBuilder {
    store: Arc<GraphStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    config: GraphConfig,
    timeouts: TimeoutConfig,
    metrics: Option<MetricsCollector>,
}

impl GraphBuilder {
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

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Rebuild one document's part of the graph, or the whole graph when
    /// `document_id` is `None`.
    ///
    /// The index scan and embedding of new chunks run before the store's
    /// writer is taken, so a concurrent [`remove_document`](Self::remove_document)
    /// only waits for the edge derivation and commit. The build reflects the
    /// index as it was when scanned.
    pub async fn rebuild(&self, document_id: Option<&str>) -> Result<BuildReport, BuildError> {
        let result = self.rebuild_inner(document_id).await;
        self.finish("rebuild", document_id, &result);
        result
    }

    /// Rebuild several documents in order, each as its own atomic build.
    /// Stops at the first failure; documents rebuilt before it stay committed.
    pub async fn rebuild_documents(
        &self,
        document_ids: &[DocumentId],
    ) -> Result<Vec<BuildReport>, BuildError> {
        let mut reports = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            reports.push(self.rebuild(Some(document_id)).await?);
        }
        Ok(reports)
    }

    /// Drop a deleted document's nodes and every edge touching them.
    pub async fn remove_document(&self, document_id: &str) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let writer = self.store.writer().await;
        let nodes_removed = writer.base().document_nodes(document_id).len();

        let result = writer
            .commit(GraphUpdate::RemoveDocument {
                document_id: document_id.to_string(),
            })
            .await
            .map(|stats| BuildReport {
                document_id: Some(document_id.to_string()),
                nodes_removed,
                nodes_added: 0,
                edges_added: 0,
                stats,
                elapsed: start.elapsed(),
            })
            .map_err(BuildError::from);

        self.finish("remove", Some(document_id), &result);
        result
    }

    fn finish(&self, op: &str, document_id: Option<&str>, result: &Result<BuildReport, BuildError>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_build(result.is_ok());
        }
        match result {
            Ok(report) => info!(
                op,
                document_id = document_id.unwrap_or("*"),
                nodes_removed = report.nodes_removed,
                nodes_added = report.nodes_added,
                edges_added = report.edges_added,
                node_count = report.stats.node_count,
                edge_count = report.stats.edge_count,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "graph build committed"
            ),
            Err(err) => error!(
                op,
                document_id = document_id.unwrap_or("*"),
                error = %err,
                "graph build failed; graph left unchanged"
            ),
        }
    }

    async fn rebuild_inner(&self, document_id: Option<&str>) -> Result<BuildReport, BuildError> {
        let start = Instant::now();

        let filter = match document_id {
            Some(id) => Filter::document(id),
            None => Filter::default(),
        };
        let records = scan_with_deadline(
            self.index.as_ref(),
            &filter,
            self.config.snapshot_limit,
            self.timeouts.vector_index(),
        )
        .await?;
        if records.len() >= self.config.snapshot_limit {
            warn!(
                limit = self.config.snapshot_limit,
                "corpus snapshot reached its limit; remaining chunks are not indexed"
            );
        }

        let fresh = nodes_from_records(records, document_id);
        self.ensure_embeddings(fresh.iter()).await?;

        // Holding the writer serializes commits; readers keep using the
        // current version until then. Retained nodes come from the version
        // current now, not from before the scan.
        let writer = self.store.writer().await;
        let base = writer.base();
        let (retained, nodes_removed) = match document_id {
            Some(id) => (
                base.nodes()
                    .filter(|node| node.document_id() != id)
                    .cloned()
                    .collect::<Vec<_>>(),
                base.document_nodes(id).len(),
            ),
            None => (Vec::new(), base.node_count()),
        };

        // Usually cached already.
        self.ensure_embeddings(retained.iter()).await?;

        let edges = derive_edges(&fresh, &retained, &self.config);
        let nodes_added = fresh.len();
        let edges_added = edges.len();
        debug!(nodes_added, edges_added, "edges derived");

        let update = match document_id {
            Some(id) => GraphUpdate::ReplaceDocument {
                document_id: id.to_string(),
                nodes: fresh,
                edges,
            },
            None => GraphUpdate::ReplaceAll {
                nodes: fresh,
                edges,
            },
        };
        let stats = writer.commit(update).await?;

        Ok(BuildReport {
            document_id: document_id.map(str::to_string),
            nodes_removed,
            nodes_added,
            edges_added,
            stats,
            elapsed: start.elapsed(),
        })
    }

    async fn ensure_embeddings<'a>(
        &self,
        nodes: impl Iterator<Item = &'a Arc<ChunkNode>>,
    ) -> Result<(), BuildError> {
        let deadline = self.timeouts.embedding();
        for node in nodes {
            node.embedding_or_fetch(self.embedder.as_ref(), deadline)
                .await
                .map_err(|source| BuildError::Embedding {
                    chunk_id: node.id().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Turn scanned records into nodes with per-document positions.
///
/// Within a document, chunks are ordered by their payload `chunk_index` when
/// every chunk carries one, otherwise by scan order. Duplicate ids keep the
/// first record.
fn nodes_from_records(records: Vec<ChunkRecord>, document_id: Option<&str>) -> Vec<Arc<ChunkNode>> {
    let mut seen: HashSet<ChunkId> = HashSet::new();
    let mut order: Vec<DocumentId> = Vec::new();
    let mut by_document: HashMap<DocumentId, Vec<ChunkRecord>> = HashMap::new();

    for record in records {
        if let Some(expected) = document_id {
            if record.payload.document_id != expected {
                warn!(
                    chunk_id = %record.id,
                    document_id = %record.payload.document_id,
                    "scan returned a chunk outside the requested document; skipped"
                );
                continue;
            }
        }
        if !seen.insert(record.id.clone()) {
            warn!(chunk_id = %record.id, "duplicate chunk id in snapshot; skipped");
            continue;
        }
        let doc = record.payload.document_id.clone();
        by_document
            .entry(doc.clone())
            .or_insert_with(|| {
                order.push(doc);
                Vec::new()
            })
            .push(record);
    }

    let mut nodes = Vec::new();
    for doc in order {
        let Some(mut chunks) = by_document.remove(&doc) else {
            continue;
        };
        if chunks.iter().all(|c| c.payload.chunk_index.is_some()) {
            // Stable, so equal indices keep scan order.
            chunks.sort_by_key(|c| c.payload.chunk_index);
        }
        nodes.extend(
            chunks
                .into_iter()
                .enumerate()
                .map(|(position, record)| Arc::new(ChunkNode::from_record(record, position))),
        );
    }
    nodes
}

/// Edges for `fresh` nodes against each other and against `retained` ones.
///
/// Every fresh node is compared with every other node, so cost grows with
/// the graph size per new node and quadratically for a full rebuild. When a
/// pair qualifies under both rules the adjacency edge is kept.
fn derive_edges(
    fresh: &[Arc<ChunkNode>],
    retained: &[Arc<ChunkNode>],
    config: &GraphConfig,
) -> Vec<Edge> {
    let mut edges: HashMap<(ChunkId, ChunkId), Edge> = HashMap::new();

    let mut consider = |a: &ChunkNode, b: &ChunkNode| {
        let similarity = cosine_similarity(
            a.cached_embedding().unwrap_or_default(),
            b.cached_embedding().unwrap_or_default(),
        );
        if similarity > config.similarity_threshold {
            let edge = Edge::new(a.id(), b.id(), similarity.min(1.0), EdgeKind::Similar);
            edges.insert(pair_key(a.id(), b.id()), edge);
        }
    };

    for (i, node) in fresh.iter().enumerate() {
        for other in fresh[i + 1..].iter().chain(retained) {
            consider(node.as_ref(), other.as_ref());
        }
    }

    for pair in fresh.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.document_id() == b.document_id() && b.position() == a.position() + 1 {
            let edge = Edge::new(a.id(), b.id(), config.adjacency_weight, EdgeKind::Adjacent);
            edges.insert(pair_key(a.id(), b.id()), edge);
        }
    }

    let mut out: Vec<Edge> = edges.into_values().collect();
    out.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));
    out
}

fn pair_key(a: &str, b: &str) -> (ChunkId, ChunkId) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
